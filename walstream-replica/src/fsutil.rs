//! Filesystem helpers for replica-owned files.
//!
//! Directories are created mode 0700 and files mode 0600, stamped with
//! the source database's uid/gid when one is configured.

use crate::source::FileOwner;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Creates `path` and any missing ancestors with mode 0700, applying
/// `owner` to each directory actually created.
pub(crate) fn mkdir_all(path: &Path, owner: Option<FileOwner>) -> io::Result<()> {
    let mut missing = Vec::new();
    let mut cur = path;
    loop {
        if cur.as_os_str().is_empty() || cur.exists() {
            break;
        }
        missing.push(cur.to_path_buf());
        match cur.parent() {
            Some(parent) => cur = parent,
            None => break,
        }
    }

    for dir in missing.iter().rev() {
        let mut builder = fs::DirBuilder::new();
        builder.mode(0o700);
        match builder.create(dir) {
            Ok(()) => chown(dir, owner)?,
            // Lost a create race; the directory is there either way.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Creates (or truncates) a file with mode 0600 and the given owner.
pub(crate) fn create_file(path: &Path, owner: Option<FileOwner>) -> io::Result<File> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    chown(path, owner)?;
    Ok(file)
}

pub(crate) fn chown(path: &Path, owner: Option<FileOwner>) -> io::Result<()> {
    if let Some(owner) = owner {
        std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))?;
    }
    Ok(())
}

/// Removes all `*.tmp` files under `root`, recursively. Files left by a
/// crashed compression pass are truncated on the next attempt anyway;
/// this keeps the tree clean for out-of-process readers.
pub(crate) fn remove_tmp_files(root: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            remove_tmp_files(&path)?;
        } else if path.extension().is_some_and(|ext| ext == "tmp") {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Appends `.tmp` to a path, keeping the original extension.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_mkdir_all_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("generations/b16fb0a649069b95/wal");
        mkdir_all(&path, None).unwrap();

        assert!(path.is_dir());
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_mkdir_all_existing() {
        let dir = TempDir::new().unwrap();
        mkdir_all(dir.path(), None).unwrap();
        mkdir_all(&dir.path().join("a/b"), None).unwrap();
        mkdir_all(&dir.path().join("a/b"), None).unwrap();
    }

    #[test]
    fn test_create_file_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0000000000000001.wal");
        create_file(&path, None).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_remove_tmp_files() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("generations/b16fb0a649069b95/wal");
        mkdir_all(&nested, None).unwrap();
        fs::write(nested.join("0000000000000001.wal"), b"keep").unwrap();
        fs::write(nested.join("0000000000000001.wal.gz.tmp"), b"stale").unwrap();
        fs::write(dir.path().join("other.tmp"), b"stale").unwrap();

        remove_tmp_files(dir.path()).unwrap();

        assert!(nested.join("0000000000000001.wal").exists());
        assert!(!nested.join("0000000000000001.wal.gz.tmp").exists());
        assert!(!dir.path().join("other.tmp").exists());
    }

    #[test]
    fn test_remove_tmp_files_missing_root() {
        let dir = TempDir::new().unwrap();
        remove_tmp_files(&dir.path().join("nope")).unwrap();
    }

    #[test]
    fn test_tmp_path() {
        assert_eq!(
            tmp_path(Path::new("/dst/0000000000000001.wal.gz")),
            Path::new("/dst/0000000000000001.wal.gz.tmp")
        );
    }
}
