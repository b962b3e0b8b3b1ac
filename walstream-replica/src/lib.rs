//! # walstream-replica
//!
//! Continuous-replication engine for an embedded transactional
//! database. The engine incrementally mirrors a growing write-ahead log
//! plus periodic full snapshots to a destination organized by
//! generation:
//! - At-most-once-extended WAL mirroring at known byte offsets
//! - Snapshot lifecycle under a source-side checkpoint block
//! - On-the-fly gzip compression of sealed WAL segments
//! - Retention-based pruning of snapshots, segments, and generations
//! - A two-task supervisor (monitor + retainer) under one cancellation
//!   root

use std::time::Duration;

pub mod config;
pub mod error;
pub mod replica;
pub mod retention;
pub mod source;
pub mod sync;

mod compress;
mod fsutil;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{ConfigError, ReplicaConfig};
pub use error::ReplicaError;
pub use replica::{FileReplica, Replica};
pub use source::{CheckpointGuard, FileOwner, ShadowWalReader, SourceDatabase, SourceError};

/// Default time to keep snapshots and related WAL files (24 hours).
pub const DEFAULT_RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the retainer task enforces retention.
pub const RETENTION_CHECK_INTERVAL: Duration = Duration::from_secs(60);
