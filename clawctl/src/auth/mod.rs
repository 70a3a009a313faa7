//! Caller identification.
//!
//! The controller does not authenticate owners itself. It sits behind a proxy that has already
//! done so and forwards the owner identity in a trusted header (`auth.owner_header`), which
//! [`current_owner::CurrentOwner`] reads.
//!
//! The provisioner is a separate service that reports container outcomes back to us. It
//! presents a shared secret in `x-provisioner-key`, checked by [`provisioner::Provisioner`].
//!
//! Claws calling the inference gateway authenticate with their proxy token; that path lives in
//! [`crate::gateway`] because its rejections use a different error envelope.
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use clawctl::auth::CurrentOwner;
//!
//! async fn list_claws(owner: CurrentOwner, State(state): State<AppState>) -> Result<Json<Vec<ClawResponse>>> {
//!     // owner.id is the authenticated owner identity
//! }
//! ```

pub mod current_owner;
pub mod provisioner;

pub use current_owner::CurrentOwner;
pub use provisioner::Provisioner;
