//! Error types surfaced by shared references and execution units.

use core::fmt;

use crate::unit::UnitId;

/// Why a checked dereference was refused.
///
/// Both variants are ordinary, recoverable failures: nothing is retried
/// internally and a failed dereference leaves every handle untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessError {
    /// The handle (or the wrapper's slot) has been disposed.
    Disposed,
    /// The value is neither frozen nor owned by the calling unit.
    CrossThread {
        /// Unit that owns the value.
        owner: UnitId,
        /// Unit that attempted the access.
        caller: UnitId,
    },
}

impl AccessError {
    /// Returns `true` for [`AccessError::Disposed`].
    pub const fn is_disposed(&self) -> bool {
        matches!(self, AccessError::Disposed)
    }

    /// Returns `true` for [`AccessError::CrossThread`].
    pub const fn is_cross_thread(&self) -> bool {
        matches!(self, AccessError::CrossThread { .. })
    }
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::Disposed => f.write_str("shared reference has already been disposed"),
            AccessError::CrossThread { owner, caller } => write!(
                f,
                "illegal attempt to access non-shared object owned by {owner} from {caller}"
            ),
        }
    }
}

impl std::error::Error for AccessError {}

/// Failures reported by a [`Worker`](crate::unit::Worker) or its futures.
#[derive(Debug)]
pub enum WorkerError {
    /// The worker thread could not be spawned.
    Spawn(std::io::Error),
    /// The worker terminated before the task ran.
    Terminated,
    /// The task panicked while running on the worker.
    TaskPanicked,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Spawn(err) => write!(f, "failed to spawn worker thread: {err}"),
            WorkerError::Terminated => f.write_str("worker terminated before the task ran"),
            WorkerError::TaskPanicked => f.write_str("task panicked on the worker"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Spawn(err) => Some(err),
            _ => None,
        }
    }
}
