//! Sync engine: one pass of WAL mirroring.
//!
//! A pass ensures the current generation has a snapshot, recomputes the
//! cached position when unknown, drains the source's shadow-WAL reader
//! into destination segment files at known offsets, and finally gzips
//! any sealed segments.

use crate::compress;
use crate::error::ReplicaError;
use crate::fsutil;
use crate::replica::FileReplica;
use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use walstream_core::{parse_snapshot_filename, parse_wal_filename};

impl FileReplica {
    /// Runs one replication pass. Not reentrant; in normal operation
    /// only the monitor calls this, and callers drive it directly only
    /// when monitoring is disabled.
    pub fn sync(&self) -> Result<(), ReplicaError> {
        self.sync_inner(&CancellationToken::new())
    }

    pub(crate) fn sync_inner(&self, cancel: &CancellationToken) -> Result<(), ReplicaError> {
        let _sync = self.sync_mu.lock();

        // Find the current position of the database.
        let dpos = self.db.pos()?;
        if dpos.is_zero() {
            return Err(ReplicaError::NoGeneration);
        }
        let generation = dpos.generation.clone();

        // Create a snapshot if none exist for the generation.
        if self.snapshot_count(&generation)? == 0 {
            self.snapshot(&generation, dpos.index)?;
        }

        // Determine the position, if necessary.
        if self.last_pos().is_zero() {
            let pos = self.calc_pos(&generation)?;
            *self.pos.write() = pos;
        }

        // Copy WAL spans since the last position until caught up.
        while self.sync_wal()? {}

        // Gzip any sealed WAL segments.
        self.compress_sealed(&generation, cancel)?;

        Ok(())
    }

    /// Copies one shadow-WAL span into its destination segment file.
    /// Returns false when the source reports end-of-stream.
    fn sync_wal(&self) -> Result<bool, ReplicaError> {
        let Some(mut reader) = self.db.shadow_wal_reader(self.last_pos())? else {
            return Ok(false);
        };
        let pos = reader.pos();

        fsutil::mkdir_all(&self.wal_dir(&pos.generation), self.db.file_owner())?;

        let path = self.wal_path(&pos.generation, pos.index);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(&path)?;

        // Bytes before the reader's offset are already replicated and
        // are preserved as-is.
        file.seek(SeekFrom::Start(pos.offset))?;
        let n = io::copy(&mut reader, &mut file)?;
        file.sync_all()?;
        drop(file);

        // Publish the new position only once the copy is durable.
        let mut end = pos;
        end.offset += n;
        *self.pos.write() = end;

        Ok(true)
    }

    /// Copies the entire database file to the replica as a compressed
    /// snapshot at (generation, index). An existing snapshot file at
    /// that index is treated as success.
    pub(crate) fn snapshot(&self, generation: &str, index: u64) -> Result<(), ReplicaError> {
        // Block source-side checkpointing while the copy runs so the
        // database file cannot change underneath it.
        let _guard = self.db.block_checkpoints()?;

        let path = self.snapshot_path(generation, index);
        if path.exists() {
            return Ok(());
        }

        fsutil::mkdir_all(&self.snapshot_dir(generation), self.db.file_owner())?;
        compress::compress_file(self.db.path(), &path, self.db.file_owner())?;

        tracing::info!(
            "{}({}): snapshot written {}/{:016x}",
            self.db.path().display(),
            self.name(),
            generation,
            index
        );
        Ok(())
    }

    /// Returns the number of snapshots for a generation.
    pub(crate) fn snapshot_count(&self, generation: &str) -> Result<usize, ReplicaError> {
        let entries = match fs::read_dir(self.snapshot_dir(generation)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut n = 0;
        for entry in entries {
            let entry = entry?;
            if parse_snapshot_filename(&entry.file_name().to_string_lossy()).is_some() {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Gzips all sealed WAL segments: every uncompressed segment except
    /// the one with the highest index, oldest first.
    fn compress_sealed(
        &self,
        generation: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ReplicaError> {
        let dir = self.wal_dir(generation);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if matches!(parse_wal_filename(&name), Some((_, false))) {
                names.push(name);
            }
        }
        if names.len() <= 1 {
            return Ok(()); // no sealed segments, only the active one
        }

        // Lexicographic order is index order for fixed-width names; the
        // highest entry is the active segment and stays uncompressed.
        names.sort();
        names.pop();

        let _fs = self.fs_mu.lock();
        for name in names {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let src = dir.join(&name);
            // Retention may have pruned the segment after it was listed.
            if !src.exists() {
                continue;
            }

            let mut dst = src.clone().into_os_string();
            dst.push(".gz");
            compress::compress_file(&src, &PathBuf::from(dst), self.db.file_owner())?;
            fs::remove_file(&src)?;

            tracing::debug!(
                "{}({}): compressed wal segment {}/{}",
                self.db.path().display(),
                self.name(),
                generation,
                name
            );
        }

        Ok(())
    }
}
