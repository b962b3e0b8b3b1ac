//! # walstream-core
//!
//! Shared vocabulary for walstream replicas:
//! - Replication positions (generation, index, offset)
//! - Generation, snapshot, and WAL file naming
//! - Listing records and stats for snapshots and WAL segments

pub mod info;
pub mod path;
pub mod pos;

pub use info::{
    filter_snapshots_after, min_snapshot_by_generation, GenerationStats, SnapshotInfo, WalInfo,
};
pub use path::{
    compressed_wal_filename, is_generation_name, parse_snapshot_filename, parse_wal_filename,
    snapshot_filename, wal_filename,
};
pub use pos::Pos;

/// Length of a generation name in characters.
pub const GENERATION_NAME_LEN: usize = 16;

/// Width of a formatted WAL/snapshot index in hex digits.
pub const INDEX_HEX_WIDTH: usize = 16;
