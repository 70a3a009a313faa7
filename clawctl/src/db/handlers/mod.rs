//! Store interfaces and their PostgreSQL implementations.

pub mod deployments;
pub mod messages;
pub mod usage;

pub use deployments::{DeploymentFilter, DeploymentStore, PgDeployments};
pub use messages::{MessageFilter, MessageStore, PgMessages};
pub use usage::{PgUsage, UsageStore};
