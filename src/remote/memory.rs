//! In-memory backend with call recording and fault injection.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;

use super::{RemoteError, RemoteMetadata, RemoteStorage, TransferOptions, TransferProgress};
use crate::checksum::{checksum_bytes, ChecksumType};

/// One operation as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    Stat(String),
    Mkdir(String),
    Checksum(String),
    Copy { uri: String, overwrite: bool },
}

#[derive(Default)]
struct Inner {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    calls: Vec<StorageCall>,
    failing_copies: BTreeSet<String>,
    failing_stats: BTreeSet<String>,
    failing_mkdirs: BTreeSet<String>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

fn key(uri: &str) -> String {
    uri.trim_end_matches('/').to_string()
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, uri: &str) {
        self.inner.lock().dirs.insert(key(uri));
    }

    pub fn put_file(&self, uri: &str, data: &[u8]) {
        self.inner.lock().files.insert(key(uri), data.to_vec());
    }

    pub fn file(&self, uri: &str) -> Option<Vec<u8>> {
        self.inner.lock().files.get(&key(uri)).cloned()
    }

    pub fn has_dir(&self, uri: &str) -> bool {
        self.inner.lock().dirs.contains(&key(uri))
    }

    /// Every copy to `uri` fails with a transport error
    pub fn fail_copy(&self, uri: &str) {
        self.inner.lock().failing_copies.insert(key(uri));
    }

    /// Undo [`fail_copy`](Self::fail_copy)
    pub fn heal_copy(&self, uri: &str) {
        self.inner.lock().failing_copies.remove(&key(uri));
    }

    /// `stat(uri)` fails with something other than not-found
    pub fn fail_stat(&self, uri: &str) {
        self.inner.lock().failing_stats.insert(key(uri));
    }

    pub fn fail_mkdir(&self, uri: &str) {
        self.inner.lock().failing_mkdirs.insert(key(uri));
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.inner.lock().calls.clone()
    }

    /// Copy calls only, in issue order
    pub fn copies(&self) -> Vec<(String, bool)> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                StorageCall::Copy { uri, overwrite } => Some((uri.clone(), *overwrite)),
                _ => None,
            })
            .collect()
    }
}

impl RemoteStorage for MemoryStorage {
    fn stat(&self, uri: &str) -> Result<RemoteMetadata, RemoteError> {
        let k = key(uri);
        let mut inner = self.inner.lock();
        inner.calls.push(StorageCall::Stat(k.clone()));
        if inner.failing_stats.contains(&k) {
            return Err(RemoteError::Other(format!("permission denied: {uri}")));
        }
        if inner.dirs.contains(&k) {
            return Ok(RemoteMetadata {
                size: 0,
                is_dir: true,
                mode: 0o755,
            });
        }
        match inner.files.get(&k) {
            Some(data) => Ok(RemoteMetadata {
                size: data.len() as u64,
                is_dir: false,
                mode: 0o644,
            }),
            None => Err(RemoteError::NotFound(uri.to_string())),
        }
    }

    fn mkdir(&self, uri: &str, _mode: u32) -> Result<(), RemoteError> {
        let k = key(uri);
        let mut inner = self.inner.lock();
        inner.calls.push(StorageCall::Mkdir(k.clone()));
        if inner.failing_mkdirs.contains(&k) {
            return Err(RemoteError::Other(format!("mkdir refused: {uri}")));
        }
        if inner.dirs.contains(&k) || inner.files.contains_key(&k) {
            return Err(RemoteError::AlreadyExists(uri.to_string()));
        }
        inner.dirs.insert(k);
        Ok(())
    }

    fn checksum(&self, uri: &str, algorithm: ChecksumType) -> Result<String, RemoteError> {
        let k = key(uri);
        let mut inner = self.inner.lock();
        inner.calls.push(StorageCall::Checksum(k.clone()));
        inner
            .files
            .get(&k)
            .map(|data| checksum_bytes(data, algorithm))
            .ok_or_else(|| RemoteError::NotFound(uri.to_string()))
    }

    fn copy(
        &self,
        local: &Path,
        uri: &str,
        options: &TransferOptions<'_>,
    ) -> Result<u64, RemoteError> {
        let k = key(uri);
        {
            let mut inner = self.inner.lock();
            inner.calls.push(StorageCall::Copy {
                uri: k.clone(),
                overwrite: options.overwrite,
            });
            if inner.failing_copies.contains(&k) {
                return Err(RemoteError::Other(format!("simulated transfer failure: {uri}")));
            }
            if !options.overwrite && inner.files.contains_key(&k) {
                return Err(RemoteError::AlreadyExists(uri.to_string()));
            }
        }

        let start = Instant::now();
        let data = std::fs::read(local)
            .map_err(|e| RemoteError::from_io("read", &local.display().to_string(), e))?;
        let len = data.len() as u64;
        let elapsed = start.elapsed();
        options.report(&TransferProgress {
            transferred: len,
            total: len,
            elapsed,
            instant_rate: 0.0,
            average_rate: 0.0,
        });

        self.inner.lock().files.insert(k, data);
        Ok(len)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
