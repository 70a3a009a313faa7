pub mod deployments;
pub mod messages;
pub mod usage;
