//! Clip job registry and state machine

pub mod broker;
pub mod types;

pub use broker::JobBroker;
pub use types::{Job, JobPatch, JobState};
