//! Error types shared by every property.

use thiserror::Error;

/// Result alias used by fallible constructors and checks.
pub type Result<T> = std::result::Result<T, PropertyError>;

/// Everything that can go wrong when building or touching a property.
///
/// Races are never errors: lost compare-and-set attempts report `false`
/// and rebinding is waited out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    /// A confined property was touched from a thread other than its owner.
    #[error("{caller} is not allowed to touch this property since it was created on {owner}")]
    WrongThread { caller: String, owner: String },

    /// An operation needs a property that may change, but got an immutable one.
    #[error("cannot {operation}: property can never change")]
    Immutable { operation: &'static str },

    /// No executor is registered for a thread that needs one.
    #[error("no executor is registered for {thread}")]
    NoExecutor { thread: String },

    /// The background scheduler thread could not be started.
    #[error("scheduler unavailable: {reason}")]
    SchedulerUnavailable { reason: String },
}

impl PropertyError {
    #[must_use]
    pub fn immutable(operation: &'static str) -> Self {
        Self::Immutable { operation }
    }
}
