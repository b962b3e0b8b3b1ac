//! Replica error types.

use crate::source::SourceError;
use thiserror::Error;

/// Errors from replica operations.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source database error: {0}")]
    Source(#[from] SourceError),

    #[error("no generation, waiting for data")]
    NoGeneration,

    #[error("no snapshots found")]
    NoSnapshots,

    #[error("snapshot not found: {generation}/{index:016x}")]
    SnapshotNotFound { generation: String, index: u64 },

    #[error("wal segment not found: {generation}/{index:016x}")]
    WalNotFound { generation: String, index: u64 },

    #[error("unable to locate wal index {index:016x} in generation {generation:?}, highest index was {highest:016x}")]
    WalIndexNotFound {
        generation: String,
        index: u64,
        highest: u64,
    },
}

impl ReplicaError {
    /// Returns whether this error only means the source has produced no
    /// data yet and the operation should be retried on the next signal.
    pub fn is_wait_for_data(&self) -> bool {
        matches!(self, ReplicaError::NoGeneration)
    }
}
