//! Remote storage capability consumed by the reconciliation engine.
//!
//! The engine only needs four operations against a URI: stat, mkdir,
//! checksum and a local-to-remote file copy. Backends are picked from the
//! endpoint's URI scheme by [`open_endpoint`].

pub mod memory;
pub mod posix;

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::checksum::ChecksumType;

pub use memory::{MemoryStorage, StorageCall};
pub use posix::PosixStorage;

/// Errors reported by a storage backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The target does not exist. Callers treat this as a normal answer.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// Copy without overwrite onto an existing target.
    #[error("destination already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("unsupported endpoint {0} (no backend for this scheme)")]
    UnsupportedScheme(String),

    #[error("{op} {uri}: {source}")]
    Io {
        op: &'static str,
        uri: String,
        #[source]
        source: std::io::Error,
    },

    /// Anything else the transport reports.
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    /// Map an I/O error, folding `NotFound` into [`RemoteError::NotFound`].
    pub fn from_io(op: &'static str, uri: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => RemoteError::NotFound(uri.to_string()),
            std::io::ErrorKind::AlreadyExists => RemoteError::AlreadyExists(uri.to_string()),
            _ => RemoteError::Io {
                op,
                uri: uri.to_string(),
                source,
            },
        }
    }
}

/// What `stat` reports about a remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub size: u64,
    pub is_dir: bool,
    pub mode: u32,
}

/// Snapshot handed to the monitoring hook while a copy runs.
#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
    pub elapsed: Duration,
    /// Bytes per second over the last reporting interval
    pub instant_rate: f64,
    /// Bytes per second since the copy started
    pub average_rate: f64,
}

pub type ProgressHook<'a> = &'a (dyn Fn(&TransferProgress) + 'a);

/// Per-call transfer parameters.
///
/// A value, not shared state: the engine derives a copy with `overwrite`
/// set for the one transfer that needs it, the base value never changes.
#[derive(Clone, Copy)]
pub struct TransferOptions<'a> {
    pub overwrite: bool,
    /// Parallel streams requested from the transport (ignored by backends that can't)
    pub streams: u32,
    pub progress: Option<ProgressHook<'a>>,
}

impl<'a> TransferOptions<'a> {
    pub fn new(streams: u32) -> Self {
        Self {
            overwrite: false,
            streams,
            progress: None,
        }
    }

    pub fn with_progress(self, hook: ProgressHook<'a>) -> Self {
        Self {
            progress: Some(hook),
            ..self
        }
    }

    pub fn with_overwrite(self, overwrite: bool) -> Self {
        Self { overwrite, ..self }
    }

    pub(crate) fn report(&self, progress: &TransferProgress) {
        if let Some(hook) = self.progress {
            hook(progress);
        }
    }
}

impl Default for TransferOptions<'_> {
    fn default() -> Self {
        Self::new(2)
    }
}

impl std::fmt::Debug for TransferOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOptions")
            .field("overwrite", &self.overwrite)
            .field("streams", &self.streams)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Storage abstraction
pub trait RemoteStorage {
    /// Metadata for a file or directory, `NotFound` if absent
    fn stat(&self, uri: &str) -> Result<RemoteMetadata, RemoteError>;

    /// Create a single directory level
    fn mkdir(&self, uri: &str, mode: u32) -> Result<(), RemoteError>;

    /// Opaque digest of a remote file
    fn checksum(&self, uri: &str, algorithm: ChecksumType) -> Result<String, RemoteError>;

    /// Copy a local file to `uri`; returns bytes transferred
    fn copy(
        &self,
        local: &Path,
        uri: &str,
        options: &TransferOptions<'_>,
    ) -> Result<u64, RemoteError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Pick a backend for an endpoint URI prefix.
pub fn open_endpoint(endpoint: &str) -> Result<Box<dyn RemoteStorage>, RemoteError> {
    match crate::url::scheme(endpoint).as_deref() {
        Some("file") | None => {
            tracing::debug!("using posix storage for endpoint '{}'", endpoint);
            Ok(Box::new(PosixStorage::new()))
        }
        Some(_) => Err(RemoteError::UnsupportedScheme(endpoint.to_string())),
    }
}
