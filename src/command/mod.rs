//! Command dispatch for the swarm
//!
//! This module handles:
//! - Resolving command targets against the registry
//! - Validating per-session preconditions before anything is sent
//! - Concurrent per-device delivery bounded by a per-command timeout
//! - Aggregating every per-device outcome into one SwarmResult

mod dispatcher;
pub(crate) mod fanout;

pub use dispatcher::{CommandDispatcher, DispatcherConfig};
pub(crate) use dispatcher::dedup;
