//! Listing records for snapshots, WAL segments, and generations.

use std::time::SystemTime;

/// Metadata for one snapshot file in a replica.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// File name within the snapshot directory.
    pub name: String,
    /// Name of the replica holding the snapshot.
    pub replica: String,
    /// Generation the snapshot belongs to.
    pub generation: String,
    /// WAL index the snapshot was taken at.
    pub index: u64,
    /// File size in bytes.
    pub size: u64,
    /// Filesystem mtime of the snapshot file.
    pub created_at: SystemTime,
}

/// Metadata for one WAL segment file in a replica.
#[derive(Debug, Clone)]
pub struct WalInfo {
    /// File name within the WAL directory.
    pub name: String,
    /// Name of the replica holding the segment.
    pub replica: String,
    /// Generation the segment belongs to.
    pub generation: String,
    /// WAL index of the segment.
    pub index: u64,
    /// Starting byte offset. Always zero in the current layout; tracked
    /// for listings only.
    pub offset: u64,
    /// File size in bytes.
    pub size: u64,
    /// Filesystem mtime of the segment file.
    pub created_at: SystemTime,
}

/// Per-generation counts and time bounds.
#[derive(Debug, Clone, Default)]
pub struct GenerationStats {
    /// Number of snapshot files.
    pub snapshot_n: usize,
    /// Number of WAL segment files.
    pub wal_n: usize,
    /// Earliest mtime over all snapshot and WAL files, if any exist.
    pub created_at: Option<SystemTime>,
    /// Latest mtime over all snapshot and WAL files, if any exist.
    pub updated_at: Option<SystemTime>,
}

/// Retains only snapshots created at or after `min_time`.
pub fn filter_snapshots_after(snapshots: Vec<SnapshotInfo>, min_time: SystemTime) -> Vec<SnapshotInfo> {
    snapshots
        .into_iter()
        .filter(|s| s.created_at >= min_time)
        .collect()
}

/// Returns the snapshot with the lowest index within `generation`, if any.
pub fn min_snapshot_by_generation<'a>(
    snapshots: &'a [SnapshotInfo],
    generation: &str,
) -> Option<&'a SnapshotInfo> {
    snapshots
        .iter()
        .filter(|s| s.generation == generation)
        .min_by_key(|s| s.index)
}
