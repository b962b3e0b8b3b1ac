//! Retention engine.
//!
//! Enforcement forces a new snapshot once every snapshot has aged past
//! the retention interval, then removes snapshots and WAL segments below
//! the earliest retained snapshot's index. Generations retaining no
//! snapshot at all are removed in full.

use crate::error::ReplicaError;
use crate::replica::FileReplica;
use std::fs;
use std::io;
use std::time::SystemTime;
use walstream_core::{
    filter_snapshots_after, min_snapshot_by_generation, parse_snapshot_filename,
    parse_wal_filename, snapshot_filename, SnapshotInfo,
};

impl FileReplica {
    /// Enforces the retention policy once.
    pub fn enforce_retention(&self) -> Result<(), ReplicaError> {
        // Find the current position of the database.
        let pos = self.db.pos()?;
        if pos.is_zero() {
            return Err(ReplicaError::NoGeneration);
        }

        // Obtain the snapshots within the retention window.
        let min_time = SystemTime::now()
            .checked_sub(self.retention_interval)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut snapshots = filter_snapshots_after(self.snapshots()?, min_time);

        // If no retained snapshots exist, create a new one at the
        // current position and retain it.
        if snapshots.is_empty() {
            tracing::info!(
                "{}({}): snapshots exceed retention, creating new snapshot",
                self.db.path().display(),
                self.name()
            );
            self.snapshot(&pos.generation, pos.index)?;
            snapshots.push(SnapshotInfo {
                name: snapshot_filename(pos.index),
                replica: self.name().to_string(),
                generation: pos.generation.clone(),
                index: pos.index,
                size: 0,
                created_at: SystemTime::now(),
            });
        }

        // Delete unretained snapshots and WAL segments per generation.
        for generation in self.generations()? {
            let min_index = match min_snapshot_by_generation(&snapshots, &generation) {
                Some(snapshot) => snapshot.index,
                None => {
                    tracing::info!(
                        "{}({}): generation {:?} has no retained snapshots, deleting",
                        self.db.path().display(),
                        self.name(),
                        generation
                    );
                    let _fs = self.fs_mu.lock();
                    fs::remove_dir_all(self.generation_dir(&generation))?;
                    continue;
                }
            };

            let _fs = self.fs_mu.lock();
            self.delete_snapshots_before(&generation, min_index)?;
            self.delete_wal_before(&generation, min_index)?;
        }

        Ok(())
    }

    /// Deletes snapshots with an index below `index`.
    fn delete_snapshots_before(&self, generation: &str, index: u64) -> Result<(), ReplicaError> {
        let entries = match fs::read_dir(self.snapshot_dir(generation)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some((idx, _)) = parse_snapshot_filename(&name.to_string_lossy()) else {
                continue;
            };
            if idx >= index {
                continue;
            }

            tracing::info!(
                "{}({}): generation {:?} snapshot no longer retained, deleting {}",
                self.db.path().display(),
                self.name(),
                generation,
                name.to_string_lossy()
            );
            fs::remove_file(entry.path())?;
        }
        Ok(())
    }

    /// Deletes WAL segments (compressed or not) with an index below
    /// `index`.
    fn delete_wal_before(&self, generation: &str, index: u64) -> Result<(), ReplicaError> {
        let entries = match fs::read_dir(self.wal_dir(generation)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some((idx, _)) = parse_wal_filename(&name.to_string_lossy()) else {
                continue;
            };
            if idx >= index {
                continue;
            }

            tracing::info!(
                "{}({}): generation {:?} wal no longer retained, deleting {}",
                self.db.path().display(),
                self.name(),
                generation,
                name.to_string_lossy()
            );
            fs::remove_file(entry.path())?;
        }
        Ok(())
    }
}
