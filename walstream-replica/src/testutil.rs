//! Scripted source database for engine tests.

use crate::replica::FileReplica;
use crate::source::{CheckpointGuard, FileOwner, ShadowWalReader, SourceDatabase, SourceError};
use flate2::read::GzDecoder;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use walstream_core::Pos;

pub(crate) const GEN: &str = "b16fb0a649069b95";
pub(crate) const GEN2: &str = "c27fc1b75a17ac06";

/// A source database whose shadow WAL is scripted by tests.
pub(crate) struct MockSource {
    path: PathBuf,
    pos: Mutex<Pos>,
    /// Shadow-WAL bytes per (generation, index).
    shadow: Mutex<BTreeMap<(String, u64), Vec<u8>>>,
    notify: Arc<Notify>,
    /// Number of checkpoint blocks taken.
    pub(crate) checkpoint_blocks: AtomicUsize,
}

impl MockSource {
    pub(crate) fn new(dir: &Path) -> Arc<Self> {
        let path = dir.join("db");
        fs::write(&path, b"database image").unwrap();
        Arc::new(Self {
            path,
            pos: Mutex::new(Pos::default()),
            shadow: Mutex::new(BTreeMap::new()),
            notify: Arc::new(Notify::new()),
            checkpoint_blocks: AtomicUsize::new(0),
        })
    }

    /// Appends bytes to the shadow WAL at (generation, index), moves the
    /// database position to the end of that segment, and signals the
    /// change.
    pub(crate) fn extend_wal(&self, generation: &str, index: u64, bytes: &[u8]) {
        let mut shadow = self.shadow.lock();
        let segment = shadow.entry((generation.to_string(), index)).or_default();
        segment.extend_from_slice(bytes);
        *self.pos.lock() = Pos::new(generation, index, segment.len() as u64);
        self.notify.notify_one();
    }
}

impl SourceDatabase for MockSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn pos(&self) -> Result<Pos, SourceError> {
        Ok(self.pos.lock().clone())
    }

    fn change_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    fn shadow_wal_reader(
        &self,
        after: Pos,
    ) -> Result<Option<Box<dyn ShadowWalReader>>, SourceError> {
        let current = self.pos.lock().clone();
        if current.is_zero() {
            return Ok(None);
        }

        let shadow = self.shadow.lock();
        for ((generation, index), data) in shadow.iter() {
            if *generation != current.generation {
                continue;
            }
            let offset = if after.generation == *generation {
                if *index < after.index {
                    continue;
                }
                if *index == after.index {
                    after.offset
                } else {
                    0
                }
            } else {
                0
            };
            if (data.len() as u64) <= offset {
                continue;
            }

            let pos = Pos::new(generation.clone(), *index, offset);
            let bytes = data[offset as usize..].to_vec();
            return Ok(Some(Box::new(MockWalReader {
                pos,
                data: Cursor::new(bytes),
            })));
        }
        Ok(None)
    }

    fn block_checkpoints(&self) -> Result<Box<dyn CheckpointGuard>, SourceError> {
        self.checkpoint_blocks
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Box::new(MockGuard))
    }

    fn file_owner(&self) -> Option<FileOwner> {
        None
    }
}

struct MockWalReader {
    pos: Pos,
    data: Cursor<Vec<u8>>,
}

impl Read for MockWalReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.data.read(buf)
    }
}

impl ShadowWalReader for MockWalReader {
    fn pos(&self) -> Pos {
        self.pos.clone()
    }
}

struct MockGuard;

impl CheckpointGuard for MockGuard {}

/// Returns a synchronously driven file replica writing under
/// `<dir>/replica`.
pub(crate) fn file_replica(db: &Arc<MockSource>, dir: &Path) -> FileReplica {
    FileReplica::new(Arc::clone(db) as Arc<dyn SourceDatabase>, dir.join("replica"))
        .with_monitor_enabled(false)
}

/// Reads and decompresses a gzip file.
pub(crate) fn read_gz(path: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(fs::File::open(path).unwrap())
        .read_to_end(&mut out)
        .unwrap();
    out
}

/// Pushes a file's mtime `age` into the past.
pub(crate) fn age_file(path: &Path, age: Duration) {
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}
