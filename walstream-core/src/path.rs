//! Generation, snapshot, and WAL file naming.
//!
//! Snapshot file name format: NNNNNNNNNNNNNNNN.snapshot[.gz]
//! WAL file name format:      NNNNNNNNNNNNNNNN.wal[.gz]
//! where N is one of 16 lowercase hex digits. Generation names are 16
//! lowercase hex characters with no extension.

use crate::{GENERATION_NAME_LEN, INDEX_HEX_WIDTH};

/// Returns whether `name` is a valid generation name.
pub fn is_generation_name(name: &str) -> bool {
    name.len() == GENERATION_NAME_LEN && name.bytes().all(is_lower_hex)
}

/// Snapshot file name for an index. Snapshots are always stored compressed.
pub fn snapshot_filename(index: u64) -> String {
    format!("{:016x}.snapshot.gz", index)
}

/// WAL file name for an active (uncompressed) segment.
pub fn wal_filename(index: u64) -> String {
    format!("{:016x}.wal", index)
}

/// WAL file name for a sealed (compressed) segment.
pub fn compressed_wal_filename(index: u64) -> String {
    format!("{:016x}.wal.gz", index)
}

/// Parses a snapshot file name into `(index, compressed)`.
///
/// Accepts both `.snapshot` and `.snapshot.gz`; any other name returns
/// `None` and is skipped by listings.
pub fn parse_snapshot_filename(name: &str) -> Option<(u64, bool)> {
    let (stem, compressed) = split_gz(name);
    let hex = stem.strip_suffix(".snapshot")?;
    parse_index(hex).map(|index| (index, compressed))
}

/// Parses a WAL file name into `(index, compressed)`.
pub fn parse_wal_filename(name: &str) -> Option<(u64, bool)> {
    let (stem, compressed) = split_gz(name);
    let hex = stem.strip_suffix(".wal")?;
    parse_index(hex).map(|index| (index, compressed))
}

fn split_gz(name: &str) -> (&str, bool) {
    match name.strip_suffix(".gz") {
        Some(stem) => (stem, true),
        None => (name, false),
    }
}

fn parse_index(hex: &str) -> Option<u64> {
    if hex.len() != INDEX_HEX_WIDTH || !hex.bytes().all(is_lower_hex) {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

fn is_lower_hex(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'a'..=b'f')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_generation_name() {
        assert!(is_generation_name("b16fb0a649069b95"));
        assert!(is_generation_name("0000000000000000"));
        assert!(!is_generation_name("B16FB0A649069B95")); // uppercase
        assert!(!is_generation_name("b16fb0a649069b9")); // too short
        assert!(!is_generation_name("b16fb0a649069b95a")); // too long
        assert!(!is_generation_name("b16fb0a649069b9g")); // not hex
        assert!(!is_generation_name(""));
    }

    #[test]
    fn test_snapshot_filename() {
        assert_eq!(snapshot_filename(0), "0000000000000000.snapshot.gz");
        assert_eq!(snapshot_filename(255), "00000000000000ff.snapshot.gz");
        assert_eq!(snapshot_filename(0xDEADBEEF), "00000000deadbeef.snapshot.gz");
    }

    #[test]
    fn test_wal_filename() {
        assert_eq!(wal_filename(0), "0000000000000000.wal");
        assert_eq!(wal_filename(255), "00000000000000ff.wal");
        assert_eq!(compressed_wal_filename(255), "00000000000000ff.wal.gz");
    }

    #[test]
    fn test_parse_snapshot_filename() {
        assert_eq!(
            parse_snapshot_filename("0000000000000001.snapshot"),
            Some((1, false))
        );
        assert_eq!(
            parse_snapshot_filename("00000000000000ff.snapshot.gz"),
            Some((255, true))
        );
        assert_eq!(parse_snapshot_filename("0000000000000001.wal"), None);
        assert_eq!(parse_snapshot_filename("1.snapshot"), None);
        assert_eq!(parse_snapshot_filename("000000000000000G.snapshot"), None);
        assert_eq!(parse_snapshot_filename("index.json"), None);
    }

    #[test]
    fn test_parse_wal_filename() {
        assert_eq!(parse_wal_filename("0000000000000000.wal"), Some((0, false)));
        assert_eq!(
            parse_wal_filename("00000000000000ff.wal.gz"),
            Some((255, true))
        );
        assert_eq!(parse_wal_filename("0000000000000000.snapshot"), None);
        assert_eq!(parse_wal_filename("invalid.wal"), None);
        assert_eq!(parse_wal_filename("0000000000000000.wal.tmp"), None);
    }

    #[test]
    fn test_filename_roundtrip() {
        for index in [0u64, 1, 255, u64::MAX] {
            assert_eq!(parse_wal_filename(&wal_filename(index)), Some((index, false)));
            assert_eq!(
                parse_snapshot_filename(&snapshot_filename(index)),
                Some((index, true))
            );
        }
    }
}
