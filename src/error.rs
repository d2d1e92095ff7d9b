//! Definition of error and status.

use std::fmt;

/// Status of a workload run.
///
/// Lookups and removals of absent keys are not errors; they return `None`.
#[derive(PartialEq, Copy, Clone, Debug)]
pub enum Status {
    /// Some actors were still running when the join deadline passed, a deadlock is possible
    Timeout,
    /// An actor panicked before finishing
    ActorPanicked,
    /// The OS refused to start an actor thread
    SpawnFailed,
    /// Invalid parameter
    InvalidParam,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
