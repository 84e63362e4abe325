//! POSIX backend for `file://` endpoints and bare absolute paths.
//!
//! Copies land in a temp file next to the target and are renamed into place,
//! so a reader never sees a half-written destination.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tempfile::NamedTempFile;

use super::{RemoteError, RemoteMetadata, RemoteStorage, TransferOptions, TransferProgress};
use crate::checksum::{file_checksum, ChecksumType};

/// Default copy chunk (4MB)
const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

pub struct PosixStorage {
    chunk_size: usize,
}

impl PosixStorage {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Smaller chunks mean more progress callbacks; mostly useful in tests
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf, RemoteError> {
        crate::url::local_path(uri).ok_or_else(|| RemoteError::UnsupportedScheme(uri.to_string()))
    }
}

impl Default for PosixStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(_meta: &fs::Metadata) -> u32 {
    0
}

#[cfg(unix)]
fn create_dir_with_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(mode).create(path)
}

#[cfg(not(unix))]
fn create_dir_with_mode(path: &Path, _mode: u32) -> std::io::Result<()> {
    fs::create_dir(path)
}

impl RemoteStorage for PosixStorage {
    fn stat(&self, uri: &str) -> Result<RemoteMetadata, RemoteError> {
        let path = self.resolve(uri)?;
        let meta = fs::metadata(&path).map_err(|e| RemoteError::from_io("stat", uri, e))?;
        Ok(RemoteMetadata {
            size: if meta.is_dir() { 0 } else { meta.len() },
            is_dir: meta.is_dir(),
            mode: mode_of(&meta),
        })
    }

    fn mkdir(&self, uri: &str, mode: u32) -> Result<(), RemoteError> {
        let path = self.resolve(uri)?;
        create_dir_with_mode(&path, mode).map_err(|e| RemoteError::from_io("mkdir", uri, e))
    }

    fn checksum(&self, uri: &str, algorithm: ChecksumType) -> Result<String, RemoteError> {
        let path = self.resolve(uri)?;
        if path.is_dir() {
            return Err(RemoteError::Other(format!("cannot checksum directory {uri}")));
        }
        file_checksum(&path, algorithm).map_err(|e| RemoteError::from_io("checksum", uri, e))
    }

    fn copy(
        &self,
        local: &Path,
        uri: &str,
        options: &TransferOptions<'_>,
    ) -> Result<u64, RemoteError> {
        let dst = self.resolve(uri)?;
        if !options.overwrite && fs::symlink_metadata(&dst).is_ok() {
            return Err(RemoteError::AlreadyExists(uri.to_string()));
        }
        let parent = dst
            .parent()
            .ok_or_else(|| RemoteError::Other(format!("no parent directory for {uri}")))?;
        if !parent.is_dir() {
            return Err(RemoteError::NotFound(parent.display().to_string()));
        }

        let local_uri = local.display().to_string();
        let mut reader = File::open(local).map_err(|e| RemoteError::from_io("open", &local_uri, e))?;
        let src_meta = reader
            .metadata()
            .map_err(|e| RemoteError::from_io("stat", &local_uri, e))?;
        let total = src_meta.len();

        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|e| RemoteError::from_io("create", uri, e))?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut total_bytes = 0u64;
        let start = Instant::now();
        let mut last_tick = start;
        let mut last_bytes = 0u64;

        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .map_err(|e| RemoteError::from_io("read", &local_uri, e))?;
            if bytes_read == 0 {
                break;
            }
            tmp.write_all(&buffer[..bytes_read])
                .map_err(|e| RemoteError::from_io("write", uri, e))?;
            total_bytes += bytes_read as u64;

            let now = Instant::now();
            let since_tick = now.duration_since(last_tick).as_secs_f64();
            let elapsed = now.duration_since(start);
            options.report(&TransferProgress {
                transferred: total_bytes,
                total,
                elapsed,
                instant_rate: if since_tick > 0.0 {
                    (total_bytes - last_bytes) as f64 / since_tick
                } else {
                    0.0
                },
                average_rate: if elapsed.as_secs_f64() > 0.0 {
                    total_bytes as f64 / elapsed.as_secs_f64()
                } else {
                    0.0
                },
            });
            last_tick = now;
            last_bytes = total_bytes;
        }

        tmp.flush().map_err(|e| RemoteError::from_io("flush", uri, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| RemoteError::from_io("fsync", uri, e))?;
        fs::set_permissions(tmp.path(), src_meta.permissions())
            .map_err(|e| RemoteError::from_io("chmod", uri, e))?;

        let persisted = if options.overwrite {
            tmp.persist(&dst)
        } else {
            tmp.persist_noclobber(&dst)
        };
        persisted.map_err(|e| RemoteError::from_io("rename", uri, e.error))?;

        tracing::trace!(
            "copied {} -> {} ({} bytes, {} streams requested)",
            local.display(),
            uri,
            total_bytes,
            options.streams
        );
        Ok(total_bytes)
    }

    fn name(&self) -> &str {
        "posix"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn uri(p: &Path) -> String {
        format!("file://{}", p.display())
    }

    #[test]
    fn test_stat_and_mkdir() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = PosixStorage::new();
        let dir = tmp.path().join("unit");

        let err = storage.stat(&uri(&dir)).unwrap_err();
        assert!(err.is_not_found());

        storage.mkdir(&uri(&dir), 0o755).unwrap();
        let meta = storage.stat(&uri(&dir)).unwrap();
        assert!(meta.is_dir);

        // second mkdir on the same path is an error, but not "not found"
        let err = storage.mkdir(&uri(&dir), 0o755).unwrap_err();
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_copy_respects_overwrite_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.txt");
        fs::write(&src, b"new contents").unwrap();
        let dst = tmp.path().join("dst.txt");
        fs::write(&dst, b"old").unwrap();

        let storage = PosixStorage::new();
        let opts = TransferOptions::new(2);
        let err = storage.copy(&src, &uri(&dst), &opts).unwrap_err();
        assert!(matches!(err, RemoteError::AlreadyExists(_)));
        assert_eq!(fs::read(&dst).unwrap(), b"old");

        let n = storage.copy(&src, &uri(&dst), &opts.with_overwrite(true)).unwrap();
        assert_eq!(n, 12);
        assert_eq!(fs::read(&dst).unwrap(), b"new contents");
    }

    #[test]
    fn test_copy_reports_progress_and_checksums_match() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("big.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        fs::write(&src, &data).unwrap();
        let dst = tmp.path().join("copy.bin");

        let seen = RefCell::new(Vec::new());
        let hook = |p: &TransferProgress| seen.borrow_mut().push(p.transferred);
        let storage = PosixStorage::with_chunk_size(4096);
        storage
            .copy(&src, &uri(&dst), &TransferOptions::new(1).with_progress(&hook))
            .unwrap();

        assert_eq!(*seen.borrow(), vec![4096, 8192, 10_000]);
        let local = file_checksum(&src, ChecksumType::Adler32).unwrap();
        let remote = storage.checksum(&uri(&dst), ChecksumType::Adler32).unwrap();
        assert_eq!(local, remote);
    }

    #[test]
    fn test_copy_into_missing_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.txt");
        fs::write(&src, b"a").unwrap();
        let dst = tmp.path().join("nope").join("a.txt");
        let err = PosixStorage::new()
            .copy(&src, &uri(&dst), &TransferOptions::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
