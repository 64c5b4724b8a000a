//! Leader-elected publisher lifecycle.
//!
//! Every instance runs a [`PublisherSupervisor`]; the shared lock decides
//! which one actually consumes the notification stream.

mod status;
mod supervisor;

pub use status::{PublisherStatus, SupervisorState, PUBLISHER_STATUS_ID};
pub use supervisor::PublisherSupervisor;
