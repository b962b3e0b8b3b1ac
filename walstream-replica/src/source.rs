//! Source database adapter.
//!
//! The replica engine never opens the source database itself. Everything
//! it needs — the current position, a bounded reader over new shadow-WAL
//! bytes, a change signal, and a checkpoint block during snapshots — is
//! provided by an adapter implementing [`SourceDatabase`].

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use walstream_core::Pos;

/// Errors surfaced by a source database adapter.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database is busy: {0}")]
    Busy(String),

    #[error("{0}")]
    Other(String),
}

/// Owner stamped onto files and directories created by the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOwner {
    pub uid: u32,
    pub gid: u32,
}

/// A bounded reader over one span of shadow-WAL bytes.
///
/// The reader yields bytes for a single WAL index starting at
/// [`ShadowWalReader::pos`]; reading to end means the span is exhausted,
/// not that the stream is finished — the caller asks the adapter for the
/// next reader.
pub trait ShadowWalReader: Read + Send {
    /// The position of the first byte this reader yields.
    fn pos(&self) -> Pos;
}

/// RAII guard blocking source-side checkpointing.
///
/// Implementations typically hold an open read transaction that
/// references the replication sequence table (`_walstream_seq`) for the
/// guard's lifetime; dropping the guard rolls the transaction back.
/// Writes to the source are not blocked.
pub trait CheckpointGuard: Send {}

/// Adapter over the source database being replicated.
pub trait SourceDatabase: Send + Sync {
    /// Absolute path to the live database file.
    fn path(&self) -> &Path;

    /// Current position of the database. Zero if no generation is
    /// active yet.
    fn pos(&self) -> Result<Pos, SourceError>;

    /// Change signal. The adapter must call `notify_one` whenever the
    /// database may have new bytes to replicate; the stored permit makes
    /// a change that lands during a sync pass observable by the next
    /// wait.
    fn change_notify(&self) -> Arc<Notify>;

    /// Returns a reader for shadow-WAL bytes at or after `after`, or
    /// `None` when the replica has caught up. The adapter picks the
    /// actual starting position (it may have rolled to a new index or
    /// generation since `after` was computed); the caller trusts
    /// the reader's [`ShadowWalReader::pos`].
    fn shadow_wal_reader(
        &self,
        after: Pos,
    ) -> Result<Option<Box<dyn ShadowWalReader>>, SourceError>;

    /// Blocks source-side checkpointing until the returned guard drops.
    fn block_checkpoints(&self) -> Result<Box<dyn CheckpointGuard>, SourceError>;

    /// Ownership to stamp on files and directories created by the
    /// replica. `None` leaves process defaults.
    fn file_owner(&self) -> Option<FileOwner>;
}
