//! Error types for storage backend operations.

use thiserror::Error;

/// Result type alias for storage backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failures reported by a [`StorageBackend`](crate::backend::StorageBackend).
///
/// Every variant carries the diagnostic text of the underlying operation so
/// it can be logged verbatim by the caller.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The command could not be started at all.
    #[error("failed to execute {command}: {source}")]
    Spawn {
        /// The command line that was attempted.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited unsuccessfully.
    #[error("{command} failed: {diagnostic}")]
    Command {
        /// The command line that failed.
        command: String,
        /// Combined stdout/stderr of the failed command.
        diagnostic: String,
    },

    /// A dataset, pool or snapshot does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A snapshot with the same name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The remote host could not be reached.
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The storage subsystem refused the operation.
    #[error("{subject}: {reason}")]
    Rejected {
        /// The dataset or snapshot the operation targeted.
        subject: String,
        /// Why the operation was refused.
        reason: String,
    },
}
