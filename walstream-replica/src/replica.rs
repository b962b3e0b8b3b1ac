//! Replica destinations.
//!
//! A replica mirrors a source database's snapshots and WAL segments to a
//! destination, organized by generation:
//!
//! ```text
//! <dst>/generations/<generation>/snapshots/<016x-index>.snapshot.gz
//! <dst>/generations/<generation>/wal/<016x-index>.wal[.gz]
//! ```
//!
//! The single highest-index WAL per generation is uncompressed and still
//! being appended; all prior segments are sealed and gzip-compressed.

use crate::config::ReplicaConfig;
use crate::error::ReplicaError;
use crate::fsutil;
use crate::source::SourceDatabase;
use crate::RETENTION_CHECK_INTERVAL;
use flate2::read::GzDecoder;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walstream_core::{
    is_generation_name, parse_snapshot_filename, parse_wal_filename, snapshot_filename,
    wal_filename, GenerationStats, Pos, SnapshotInfo, WalInfo,
};

/// A replica destination. Currently only the local-filesystem backend
/// exists; object-store backends slot in as further variants.
pub enum Replica {
    File(Arc<FileReplica>),
}

impl Replica {
    /// The name of the replica. Defaults to the type if no name is set.
    pub fn name(&self) -> &str {
        match self {
            Replica::File(r) => r.name(),
        }
    }

    /// String identifier for the type of replica.
    pub fn replica_type(&self) -> &'static str {
        match self {
            Replica::File(r) => r.replica_type(),
        }
    }

    /// Starts background replication under `parent`.
    pub async fn start(&self, parent: &CancellationToken) {
        match self {
            Replica::File(r) => r.start(parent).await,
        }
    }

    /// Stops background replication and blocks until it has finished.
    pub async fn stop(&self) {
        match self {
            Replica::File(r) => r.stop().await,
        }
    }

    pub fn last_pos(&self) -> Pos {
        match self {
            Replica::File(r) => r.last_pos(),
        }
    }

    pub fn calc_pos(&self, generation: &str) -> Result<Pos, ReplicaError> {
        match self {
            Replica::File(r) => r.calc_pos(generation),
        }
    }

    pub fn sync(&self) -> Result<(), ReplicaError> {
        match self {
            Replica::File(r) => r.sync(),
        }
    }

    pub fn enforce_retention(&self) -> Result<(), ReplicaError> {
        match self {
            Replica::File(r) => r.enforce_retention(),
        }
    }

    pub fn generations(&self) -> Result<Vec<String>, ReplicaError> {
        match self {
            Replica::File(r) => r.generations(),
        }
    }

    pub fn generation_stats(&self, generation: &str) -> Result<GenerationStats, ReplicaError> {
        match self {
            Replica::File(r) => r.generation_stats(generation),
        }
    }

    pub fn snapshots(&self) -> Result<Vec<SnapshotInfo>, ReplicaError> {
        match self {
            Replica::File(r) => r.snapshots(),
        }
    }

    pub fn wals(&self) -> Result<Vec<WalInfo>, ReplicaError> {
        match self {
            Replica::File(r) => r.wals(),
        }
    }

    pub fn snapshot_index_at(
        &self,
        generation: &str,
        timestamp: Option<SystemTime>,
    ) -> Result<u64, ReplicaError> {
        match self {
            Replica::File(r) => r.snapshot_index_at(generation, timestamp),
        }
    }

    pub fn wal_index_at(
        &self,
        generation: &str,
        max_index: Option<u64>,
        timestamp: Option<SystemTime>,
    ) -> Result<u64, ReplicaError> {
        match self {
            Replica::File(r) => r.wal_index_at(generation, max_index, timestamp),
        }
    }

    pub fn snapshot_reader(
        &self,
        generation: &str,
        index: u64,
    ) -> Result<Box<dyn Read + Send>, ReplicaError> {
        match self {
            Replica::File(r) => r.snapshot_reader(generation, index),
        }
    }

    pub fn wal_reader(
        &self,
        generation: &str,
        index: u64,
    ) -> Result<Box<dyn Read + Send>, ReplicaError> {
        match self {
            Replica::File(r) => r.wal_reader(generation, index),
        }
    }
}

struct Tasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// A replica that mirrors the source database to a local file path.
pub struct FileReplica {
    pub(crate) db: Arc<dyn SourceDatabase>,
    pub(crate) name: Option<String>,
    pub(crate) dst: PathBuf,

    /// Last successfully replicated position.
    pub(crate) pos: RwLock<Pos>,

    /// Makes `sync` non-reentrant.
    pub(crate) sync_mu: Mutex<()>,
    /// Serializes the sealed-segment compression sweep with retention
    /// deletions of the same files.
    pub(crate) fs_mu: Mutex<()>,

    tasks: Mutex<Option<Tasks>>,

    /// Time to keep snapshots and related WAL files. The database is
    /// re-snapshotted after this interval and older files are discarded.
    pub(crate) retention_interval: Duration,

    /// If true, the replica monitors the database for changes
    /// automatically. Set to false when the replica is driven
    /// synchronously (such as in tests).
    pub(crate) monitor_enabled: bool,
}

impl FileReplica {
    /// Returns a new file replica writing under `dst`.
    pub fn new(db: Arc<dyn SourceDatabase>, dst: impl Into<PathBuf>) -> Self {
        Self {
            db,
            name: None,
            dst: dst.into(),
            pos: RwLock::new(Pos::default()),
            sync_mu: Mutex::new(()),
            fs_mu: Mutex::new(()),
            tasks: Mutex::new(None),
            retention_interval: crate::DEFAULT_RETENTION_INTERVAL,
            monitor_enabled: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retention_interval(mut self, interval: Duration) -> Self {
        self.retention_interval = interval;
        self
    }

    pub fn with_monitor_enabled(mut self, enabled: bool) -> Self {
        self.monitor_enabled = enabled;
        self
    }

    /// Applies a loaded configuration.
    pub fn with_config(mut self, config: &ReplicaConfig) -> Self {
        self.name = config.name.clone();
        self.retention_interval = config.retention_interval();
        self.monitor_enabled = config.monitor_enabled;
        self
    }

    /// The name of the replica. Defaults to the type if no name is set.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.replica_type())
    }

    /// String identifier for the type of replica.
    pub fn replica_type(&self) -> &'static str {
        "file"
    }

    /// Destination root the replica writes under.
    pub fn dst(&self) -> &Path {
        &self.dst
    }

    /// Returns the last successfully replicated position.
    pub fn last_pos(&self) -> Pos {
        self.pos.read().clone()
    }

    // Destination layout.

    pub(crate) fn generations_dir(&self) -> PathBuf {
        self.dst.join("generations")
    }

    pub(crate) fn generation_dir(&self, generation: &str) -> PathBuf {
        self.generations_dir().join(generation)
    }

    pub(crate) fn snapshot_dir(&self, generation: &str) -> PathBuf {
        self.generation_dir(generation).join("snapshots")
    }

    pub(crate) fn snapshot_path(&self, generation: &str, index: u64) -> PathBuf {
        self.snapshot_dir(generation).join(snapshot_filename(index))
    }

    pub(crate) fn wal_dir(&self, generation: &str) -> PathBuf {
        self.generation_dir(generation).join("wal")
    }

    pub(crate) fn wal_path(&self, generation: &str, index: u64) -> PathBuf {
        self.wal_dir(generation).join(wal_filename(index))
    }

    // Position tracking.

    /// Computes the replicated position for a generation from the files
    /// on disk: the highest snapshot index, advanced to the highest WAL
    /// index and the size of that (uncompressed) segment.
    pub fn calc_pos(&self, generation: &str) -> Result<Pos, ReplicaError> {
        let mut pos = Pos::new(generation, self.max_snapshot_index(generation)?, 0);

        let entries = match fs::read_dir(self.wal_dir(generation)) {
            Ok(entries) => entries,
            // No replicated WAL yet; position starts at the snapshot index.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(pos),
            Err(e) => return Err(e.into()),
        };

        let mut max: Option<u64> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some((index, _)) = parse_wal_filename(&name.to_string_lossy()) else {
                continue;
            };
            if max.map_or(true, |m| index > m) {
                max = Some(index);
            }
        }
        let Some(index) = max else {
            // WAL directory exists but holds no segments.
            return Ok(pos);
        };
        pos.index = index;

        // Sealed (compressed) segments are never the position, so the
        // active segment must exist here.
        pos.offset = fs::metadata(self.wal_path(generation, index))?.len();
        Ok(pos)
    }

    fn max_snapshot_index(&self, generation: &str) -> Result<u64, ReplicaError> {
        let entries = match fs::read_dir(self.snapshot_dir(generation)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ReplicaError::NoSnapshots)
            }
            Err(e) => return Err(e.into()),
        };

        let mut max: Option<u64> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some((index, _)) = parse_snapshot_filename(&name.to_string_lossy()) else {
                continue;
            };
            if max.map_or(true, |m| index > m) {
                max = Some(index);
            }
        }
        max.ok_or(ReplicaError::NoSnapshots)
    }

    // Listing & stats.

    /// Returns the available generation names, sorted.
    pub fn generations(&self) -> Result<Vec<String>, ReplicaError> {
        let entries = match fs::read_dir(self.generations_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut generations = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !is_generation_name(&name) {
                continue;
            }
            if !entry.file_type()?.is_dir() {
                continue;
            }
            generations.push(name.into_owned());
        }
        generations.sort();
        Ok(generations)
    }

    /// Returns counts and time bounds for a generation. Missing
    /// directories contribute zero.
    pub fn generation_stats(&self, generation: &str) -> Result<GenerationStats, ReplicaError> {
        let (snapshot_n, s_min, s_max) = self.dir_stats(&self.snapshot_dir(generation), |name| {
            parse_snapshot_filename(name).is_some()
        })?;
        let (wal_n, w_min, w_max) = self.dir_stats(&self.wal_dir(generation), |name| {
            parse_wal_filename(name).is_some()
        })?;

        let mut stats = GenerationStats {
            snapshot_n,
            wal_n,
            created_at: s_min,
            updated_at: s_max,
        };
        if wal_n > 0 {
            stats.created_at = min_time(stats.created_at, w_min);
            stats.updated_at = max_time(stats.updated_at, w_max);
        }
        Ok(stats)
    }

    fn dir_stats(
        &self,
        dir: &Path,
        matches: impl Fn(&str) -> bool,
    ) -> Result<(usize, Option<SystemTime>, Option<SystemTime>), ReplicaError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((0, None, None)),
            Err(e) => return Err(e.into()),
        };

        let mut n = 0;
        let mut min: Option<SystemTime> = None;
        let mut max: Option<SystemTime> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if !matches(&name.to_string_lossy()) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            n += 1;
            min = min_time(min, Some(modified));
            max = max_time(max, Some(modified));
        }
        Ok((n, min, max))
    }

    /// Returns all available snapshots across generations, sorted by
    /// generation then index.
    pub fn snapshots(&self) -> Result<Vec<SnapshotInfo>, ReplicaError> {
        let mut infos = Vec::new();
        for generation in self.generations()? {
            let entries = match fs::read_dir(self.snapshot_dir(&generation)) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            for entry in entries {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let Some((index, _)) = parse_snapshot_filename(&name) else {
                    continue;
                };
                let meta = entry.metadata()?;
                infos.push(SnapshotInfo {
                    name,
                    replica: self.name().to_string(),
                    generation: generation.clone(),
                    index,
                    size: meta.len(),
                    created_at: meta.modified()?,
                });
            }
        }
        infos.sort_by(|a, b| (&a.generation, a.index).cmp(&(&b.generation, b.index)));
        Ok(infos)
    }

    /// Returns all available WAL segments across generations, sorted by
    /// generation then index.
    pub fn wals(&self) -> Result<Vec<WalInfo>, ReplicaError> {
        let mut infos = Vec::new();
        for generation in self.generations()? {
            let entries = match fs::read_dir(self.wal_dir(&generation)) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            for entry in entries {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let Some((index, _)) = parse_wal_filename(&name) else {
                    continue;
                };
                let meta = entry.metadata()?;
                infos.push(WalInfo {
                    name,
                    replica: self.name().to_string(),
                    generation: generation.clone(),
                    index,
                    offset: 0,
                    size: meta.len(),
                    created_at: meta.modified()?,
                });
            }
        }
        infos.sort_by(|a, b| (&a.generation, a.index).cmp(&(&b.generation, b.index)));
        Ok(infos)
    }

    /// Returns the index of the snapshot with the greatest mtime not
    /// exceeding `timestamp`. `None` means no upper bound, i.e. the
    /// latest snapshot.
    pub fn snapshot_index_at(
        &self,
        generation: &str,
        timestamp: Option<SystemTime>,
    ) -> Result<u64, ReplicaError> {
        let entries = match fs::read_dir(self.snapshot_dir(generation)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ReplicaError::NoSnapshots)
            }
            Err(e) => return Err(e.into()),
        };

        let mut best: Option<(u64, SystemTime)> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some((index, _)) = parse_snapshot_filename(&name.to_string_lossy()) else {
                continue;
            };
            let modified = entry.metadata()?.modified()?;
            if let Some(ts) = timestamp {
                if modified > ts {
                    continue;
                }
            }
            match best {
                Some((_, max)) if modified <= max => {}
                _ => best = Some((index, modified)),
            }
        }

        best.map(|(index, _)| index).ok_or(ReplicaError::NoSnapshots)
    }

    /// Returns the greatest WAL index at most `max_index` whose mtime is
    /// at most `timestamp` (`None` lifts the respective bound). When
    /// `max_index` is given but unreachable, fails with the highest
    /// index seen.
    ///
    /// When no WAL file passes the filters and `max_index` is `None`,
    /// the result is 0, which is indistinguishable from a legitimate
    /// match at index 0.
    pub fn wal_index_at(
        &self,
        generation: &str,
        max_index: Option<u64>,
        timestamp: Option<SystemTime>,
    ) -> Result<u64, ReplicaError> {
        let entries = match fs::read_dir(self.wal_dir(generation)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut index = 0u64;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some((idx, _)) = parse_wal_filename(&name.to_string_lossy()) else {
                continue;
            };
            if let Some(ts) = timestamp {
                if entry.metadata()?.modified()? > ts {
                    continue;
                }
            }
            if let Some(max) = max_index {
                if idx > max {
                    continue;
                }
            }
            if idx < index {
                continue;
            }
            index = idx;
        }

        if let Some(max) = max_index {
            if index != max {
                return Err(ReplicaError::WalIndexNotFound {
                    generation: generation.to_string(),
                    index: max,
                    highest: index,
                });
            }
        }
        Ok(index)
    }

    // Readers.

    /// Opens snapshot data at the given generation and index,
    /// transparently decompressing.
    pub fn snapshot_reader(
        &self,
        generation: &str,
        index: u64,
    ) -> Result<Box<dyn Read + Send>, ReplicaError> {
        let dir = self.snapshot_dir(generation);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ReplicaError::SnapshotNotFound {
                    generation: generation.to_string(),
                    index,
                })
            }
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some((idx, compressed)) = parse_snapshot_filename(&name.to_string_lossy()) else {
                continue;
            };
            if idx != index {
                continue;
            }

            let file = File::open(entry.path())?;
            return Ok(if compressed {
                Box::new(GzDecoder::new(file))
            } else {
                Box::new(file)
            });
        }

        Err(ReplicaError::SnapshotNotFound {
            generation: generation.to_string(),
            index,
        })
    }

    /// Opens WAL data at the given generation and index. The
    /// uncompressed segment wins when both forms briefly coexist.
    pub fn wal_reader(
        &self,
        generation: &str,
        index: u64,
    ) -> Result<Box<dyn Read + Send>, ReplicaError> {
        let path = self.wal_path(generation, index);
        match File::open(&path) {
            Ok(file) => return Ok(Box::new(file)),
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            Err(_) => {}
        }

        let mut compressed = path.into_os_string();
        compressed.push(".gz");
        match File::open(PathBuf::from(compressed)) {
            Ok(file) => Ok(Box::new(GzDecoder::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ReplicaError::WalNotFound {
                generation: generation.to_string(),
                index,
            }),
            Err(e) => Err(e.into()),
        }
    }

    // Supervision.

    /// Starts background replication: a monitor task that syncs on every
    /// database change signal and a retainer task that periodically
    /// enforces retention. No-op unless monitoring is enabled. Any
    /// previous run is stopped first.
    pub async fn start(self: &Arc<Self>, parent: &CancellationToken) {
        if !self.monitor_enabled {
            return;
        }

        self.stop().await;

        let cancel = parent.child_token();
        let monitor = {
            let replica = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move { replica.monitor(cancel).await })
        };
        let retainer = {
            let replica = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move { replica.retainer(cancel).await })
        };

        *self.tasks.lock() = Some(Tasks {
            cancel,
            handles: vec![monitor, retainer],
        });
        tracing::debug!(
            "{}({}): replication started",
            self.db.path().display(),
            self.name()
        );
    }

    /// Cancels any outstanding replication and blocks until finished.
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else { return };

        tasks.cancel.cancel();
        for handle in tasks.handles {
            let _ = handle.await;
        }
        tracing::debug!(
            "{}({}): replication stopped",
            self.db.path().display(),
            self.name()
        );
    }

    /// Continuously replicates the database on its change signal.
    async fn monitor(self: Arc<Self>, cancel: CancellationToken) {
        // Clear temporary files that may have been left by a crash.
        if let Err(e) = fsutil::remove_tmp_files(&self.dst) {
            tracing::warn!(
                "{}({}): cannot remove tmp files: {}",
                self.db.path().display(),
                self.name(),
                e
            );
        }

        let notify = self.db.change_notify();
        loop {
            // Arm the waiter before syncing so a change that lands during
            // the pass is seen by the wait below instead of being lost.
            let notified = notify.notified();

            match self.sync_inner(&cancel) {
                Ok(()) => {}
                Err(e) if e.is_wait_for_data() => {
                    tracing::debug!(
                        "{}({}): sync: {}",
                        self.db.path().display(),
                        self.name(),
                        e
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "{}({}): sync error: {}",
                        self.db.path().display(),
                        self.name(),
                        e
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = notified => {}
            }
        }
    }

    /// Periodically enforces the retention policy.
    async fn retainer(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RETENTION_CHECK_INTERVAL) => {}
            }

            if let Err(e) = self.enforce_retention() {
                tracing::warn!(
                    "{}({}): retain error: {}",
                    self.db.path().display(),
                    self.name(),
                    e
                );
            }
        }
    }
}

fn min_time(a: Option<SystemTime>, b: Option<SystemTime>) -> Option<SystemTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn max_time(a: Option<SystemTime>, b: Option<SystemTime>) -> Option<SystemTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
