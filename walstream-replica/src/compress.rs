//! Atomic gzip compress-and-replace.

use crate::fsutil;
use crate::source::FileOwner;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Compresses `src` into `dst` via a sibling `dst.tmp`.
///
/// The gzip stream is written to the temporary, fsynced, and renamed
/// into place so observers never see a partial `dst`. The source file
/// is left in place; the caller removes it once the compressed copy is
/// durable.
pub(crate) fn compress_file(src: &Path, dst: &Path, owner: Option<FileOwner>) -> io::Result<()> {
    let tmp = fsutil::tmp_path(dst);

    let result: io::Result<()> = (|| {
        let mut reader = File::open(src)?;
        let file = fsutil::create_file(&tmp, owner)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        let file = encoder.finish()?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_compress_roundtrip() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("0000000000000001.wal");
        let dst = dir.path().join("0000000000000001.wal.gz");
        let payload = b"wal frame bytes".repeat(512);
        fs::write(&src, &payload).unwrap();

        compress_file(&src, &dst, None).unwrap();

        // Source remains; no temporary left behind.
        assert!(src.exists());
        assert!(!fsutil::tmp_path(&dst).exists());

        let mut decoded = Vec::new();
        GzDecoder::new(File::open(&dst).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_compress_missing_source() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("0000000000000001.wal.gz");
        let err = compress_file(&dir.path().join("missing.wal"), &dst, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!dst.exists());
        assert!(!fsutil::tmp_path(&dst).exists());
    }

    #[test]
    fn test_compress_overwrites_stale_tmp() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("0000000000000001.wal");
        let dst = dir.path().join("0000000000000001.wal.gz");
        fs::write(&src, b"fresh bytes").unwrap();
        fs::write(fsutil::tmp_path(&dst), b"stale partial write").unwrap();

        compress_file(&src, &dst, None).unwrap();

        let mut decoded = Vec::new();
        GzDecoder::new(File::open(&dst).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"fresh bytes");
    }
}
