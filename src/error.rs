//! Error types for configuration, ledger and session failures.

use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::FileStatus;
use crate::remote::RemoteError;

/// Errors raised by the sync library.
///
/// Everything here is fatal to the session except where the engine catches a
/// file-level [`RemoteError`] and records it in the ledger instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Config or recovery file could not be read.
    #[error("cannot read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON or has a field of the wrong shape.
    #[error("JSON parse error in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A required field is absent.
    #[error("specify {field} in {path}")]
    MissingField { field: &'static str, path: PathBuf },

    /// A field is present but unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Ledger file could not be read or written.
    #[error("ledger I/O error on {path}: {source}")]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ledger file exists but does not have the expected structure.
    #[error("corrupt ledger {path}: {reason}")]
    CorruptLedger { path: PathBuf, reason: String },

    #[error("file {0} is not tracked by the ledger")]
    UnknownFile(String),

    /// Attempt to move a file backwards, e.g. done -> failed.
    #[error("refusing status change {from} -> {to} for {name}")]
    InvalidTransition {
        name: String,
        from: FileStatus,
        to: FileStatus,
    },

    /// A ledger already exists and the policy says not to touch it.
    #[error("ledger {0} already exists (use --on-existing-ledger resume|reinit)")]
    ExistingLedger(PathBuf),

    /// Remote unit directory cannot be inspected or created.
    #[error("remote directory {uri}: {source}")]
    Directory {
        uri: String,
        #[source]
        source: RemoteError,
    },

    /// Local unit directory cannot be listed.
    #[error("cannot list {path}: {source}")]
    LocalListing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
