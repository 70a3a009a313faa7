//! Route handlers, one module per resource.
//!
//! Owner handlers take a [`crate::auth::CurrentOwner`] and only ever see that owner's claws;
//! provisioner handlers take a [`crate::auth::Provisioner`].

pub mod claws;
pub mod environment;
pub mod messages;
pub mod provisioning;
