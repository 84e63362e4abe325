//! Durable per-unit transfer ledger.
//!
//! The ledger maps every file name of a sync unit to its transfer status and
//! carries enough metadata (source base, unit dir, endpoint, destination base)
//! to rebuild the unit from the file alone, which is what recover mode does.
//!
//! On disk it is a pretty-printed JSON document:
//!
//! ```json
//! {
//!     "date": "2024-05-01 10:12:44.120331",
//!     "srcBaseDir": "/data",
//!     "srcDir": "run1",
//!     "destEndpoint": "file://",
//!     "destBaseDir": "/backup",
//!     "destDir": "file:///backup/run1",
//!     "files": {
//!         "a.txt": { "status": "done" },
//!         "b.txt": { "status": "failed", "error": "..." }
//!     }
//! }
//! ```
//!
//! Every [`TransferLedger::persist`] writes a complete snapshot to a temp file
//! in the same directory and renames it over the old one.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use tempfile::NamedTempFile;

use crate::config::check_required;
use crate::error::{Result, SyncError};
use crate::unit::SyncUnit;

/// Fields a ledger (or hand-written recovery record) must carry
pub const REQUIRED_FIELDS: [&str; 4] = ["srcBaseDir", "srcDir", "destEndpoint", "destBaseDir"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Idle,
    Done,
    Failed,
}

impl FileStatus {
    /// A verified file never goes back; a failed one may be retried.
    pub fn can_become(self, next: FileStatus) -> bool {
        use FileStatus::*;
        self == next || matches!((self, next), (Idle, Done) | (Idle, Failed) | (Failed, Done))
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileStatus::Idle => "idle",
            FileStatus::Done => "done",
            FileStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub status: FileStatus,
    /// Last transfer error, cleared once the file is done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileEntry {
    pub fn idle() -> Self {
        Self {
            status: FileStatus::Idle,
            error: None,
        }
    }
}

fn now_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Serialized form of a ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDocument {
    #[serde(default = "now_stamp")]
    pub date: String,
    pub src_base_dir: String,
    pub src_dir: String,
    pub dest_endpoint: String,
    pub dest_base_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_dir: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
}

/// Per-status counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSummary {
    pub idle: usize,
    pub done: usize,
    pub failed: usize,
}

/// Difference between the ledger and the live local listing
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListingDrift {
    /// Present locally, added to the ledger as idle
    pub added: Vec<String>,
    /// Tracked by the ledger but gone locally; kept inert
    pub missing: Vec<String>,
}

impl ListingDrift {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.missing.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TransferLedger {
    path: PathBuf,
    doc: LedgerDocument,
}

impl TransferLedger {
    /// Fresh ledger with every name idle. Nothing is written until `persist`.
    pub fn create<I, S>(unit: &SyncUnit, names: I, path: impl Into<PathBuf>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let missing = unit.missing_fields();
        if !missing.is_empty() {
            return Err(SyncError::Config(format!(
                "unit '{}' has no {}",
                unit.rel_dir,
                missing.join(", ")
            )));
        }

        let files = names
            .into_iter()
            .map(|n| (n.into(), FileEntry::idle()))
            .collect();

        Ok(Self {
            path: path.into(),
            doc: LedgerDocument {
                date: now_stamp(),
                src_base_dir: unit.src_base_dir.clone(),
                src_dir: unit.rel_dir.clone(),
                dest_endpoint: unit.dest_endpoint.clone(),
                dest_base_dir: unit.dest_base_dir.clone(),
                dest_dir: Some(unit.remote_dir()),
                files,
            },
        })
    }

    /// Read a ledger (or recovery record) from disk
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|source| SyncError::LedgerIo {
            path: path.clone(),
            source,
        })?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| SyncError::CorruptLedger {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if !value.is_object() {
            return Err(SyncError::CorruptLedger {
                path,
                reason: "top level is not a JSON object".to_string(),
            });
        }
        check_required(&value, &REQUIRED_FIELDS, &path)?;

        let doc: LedgerDocument =
            serde_json::from_value(value).map_err(|e| SyncError::CorruptLedger {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let unit = unit_of(&doc);
        if let Some(recorded) = &doc.dest_dir {
            if *recorded != unit.remote_dir() {
                tracing::warn!(
                    "ledger {} records destDir {} but its fields resolve to {}; using the latter",
                    path.display(),
                    recorded,
                    unit.remote_dir()
                );
            }
        }

        Ok(Self { path, doc })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &LedgerDocument {
        &self.doc
    }

    /// The sync unit this ledger describes
    pub fn unit(&self) -> SyncUnit {
        unit_of(&self.doc)
    }

    /// True if the ledger was written for the same source and destination
    pub fn describes(&self, unit: &SyncUnit) -> bool {
        self.unit() == *unit
    }

    pub fn len(&self) -> usize {
        self.doc.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.files.is_empty()
    }

    /// Tracked names in ledger order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.doc.files.keys().map(String::as_str)
    }

    pub fn entry(&self, name: &str) -> Result<&FileEntry> {
        self.doc
            .files
            .get(name)
            .ok_or_else(|| SyncError::UnknownFile(name.to_string()))
    }

    pub fn status(&self, name: &str) -> Result<FileStatus> {
        self.entry(name).map(|e| e.status)
    }

    /// In-memory only; call [`persist`](Self::persist) to make it durable
    pub fn set_status(&mut self, name: &str, status: FileStatus) -> Result<()> {
        let entry = self
            .doc
            .files
            .get_mut(name)
            .ok_or_else(|| SyncError::UnknownFile(name.to_string()))?;
        if !entry.status.can_become(status) {
            return Err(SyncError::InvalidTransition {
                name: name.to_string(),
                from: entry.status,
                to: status,
            });
        }
        entry.status = status;
        if status == FileStatus::Done {
            entry.error = None;
        }
        Ok(())
    }

    pub fn mark_done(&mut self, name: &str) -> Result<()> {
        self.set_status(name, FileStatus::Done)
    }

    pub fn mark_failed(&mut self, name: &str, error: impl Into<String>) -> Result<()> {
        self.set_status(name, FileStatus::Failed)?;
        if let Some(entry) = self.doc.files.get_mut(name) {
            entry.error = Some(error.into());
        }
        Ok(())
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut s = LedgerSummary::default();
        for entry in self.doc.files.values() {
            match entry.status {
                FileStatus::Idle => s.idle += 1,
                FileStatus::Done => s.done += 1,
                FileStatus::Failed => s.failed += 1,
            }
        }
        s
    }

    /// Merge the live local listing into the ledger.
    ///
    /// New names become idle entries. Entries whose file disappeared stay in
    /// the ledger untouched; the engine only walks the live listing, so they
    /// are never processed.
    pub fn reconcile_listing<S: AsRef<str>>(&mut self, live: &[S]) -> ListingDrift {
        let mut drift = ListingDrift::default();
        for name in live {
            let name = name.as_ref();
            if !self.doc.files.contains_key(name) {
                self.doc.files.insert(name.to_string(), FileEntry::idle());
                drift.added.push(name.to_string());
            }
        }
        let live_set: std::collections::BTreeSet<&str> = live.iter().map(|s| s.as_ref()).collect();
        drift.missing = self
            .doc
            .files
            .keys()
            .filter(|k| !live_set.contains(k.as_str()))
            .cloned()
            .collect();
        drift
    }

    /// Atomically replace the on-disk record with the current state
    pub fn persist(&self) -> Result<()> {
        let io_err = |source: std::io::Error| SyncError::LedgerIo {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            let mut ser = Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
            self.doc
                .serialize(&mut ser)
                .map_err(|e| io_err(std::io::Error::from(e)))?;
            writer.write_all(b"\n").map_err(io_err)?;
            writer.flush().map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        // make the rename itself durable
        if let Err(e) = sync_dir(&dir) {
            tracing::warn!("cannot fsync ledger directory {}: {}", dir.display(), e);
        }
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn unit_of(doc: &LedgerDocument) -> SyncUnit {
    SyncUnit::new(
        doc.src_base_dir.clone(),
        doc.src_dir.clone(),
        doc.dest_endpoint.clone(),
        doc.dest_base_dir.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn unit() -> SyncUnit {
        SyncUnit::new("/src", "data", "file://", "/dst")
    }

    #[test]
    fn test_create_persist_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.recover");
        let mut ledger = TransferLedger::create(&unit(), ["a.txt", "b.txt"], &path).unwrap();
        ledger.mark_done("a.txt").unwrap();
        ledger.mark_failed("b.txt", "connection reset").unwrap();
        ledger.persist().unwrap();

        let loaded = TransferLedger::load(&path).unwrap();
        assert_eq!(loaded.document(), ledger.document());
        assert_eq!(loaded.status("a.txt").unwrap(), FileStatus::Done);
        assert_eq!(
            loaded.entry("b.txt").unwrap().error.as_deref(),
            Some("connection reset")
        );
        assert_eq!(loaded.unit(), unit());
        assert_eq!(loaded.document().dest_dir.as_deref(), Some("file:///dst/data"));

        // only the ledger itself is left behind, no temp files
        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_on_disk_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.recover");
        let ledger = TransferLedger::create(&unit(), ["a.txt"], &path).unwrap();
        ledger.persist().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    \"srcBaseDir\": \"/src\""));
        assert!(text.contains("\"a.txt\": {\n            \"status\": \"idle\"\n        }"));
        assert!(!text.contains("error"));
    }

    #[test]
    fn test_load_hand_written_record() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.json");
        fs::write(
            &path,
            r#"{"srcBaseDir": "/s", "srcDir": "x", "destEndpoint": "file://", "destBaseDir": "/d"}"#,
        )
        .unwrap();
        let ledger = TransferLedger::load(&path).unwrap();
        assert!(ledger.is_empty());
        assert_eq!(ledger.unit().remote_dir(), "file:///d/x");
    }

    #[test]
    fn test_load_errors() {
        let tmp = tempfile::tempdir().unwrap();

        let missing = tmp.path().join("missing.recover");
        assert!(matches!(
            TransferLedger::load(&missing),
            Err(SyncError::LedgerIo { .. })
        ));

        let garbage = tmp.path().join("garbage.recover");
        fs::write(&garbage, "{ \"srcBaseDir\": ").unwrap();
        assert!(matches!(
            TransferLedger::load(&garbage),
            Err(SyncError::CorruptLedger { .. })
        ));

        let no_src_dir = tmp.path().join("nosrc.recover");
        fs::write(
            &no_src_dir,
            r#"{"srcBaseDir": "/s", "destEndpoint": "file://", "destBaseDir": "/d"}"#,
        )
        .unwrap();
        match TransferLedger::load(&no_src_dir) {
            Err(SyncError::MissingField { field, .. }) => assert_eq!(field, "srcDir"),
            other => panic!("unexpected: {other:?}"),
        }

        let bad_status = tmp.path().join("bad.recover");
        fs::write(
            &bad_status,
            r#"{"srcBaseDir": "/s", "srcDir": "x", "destEndpoint": "file://", "destBaseDir": "/d",
                "files": {"a": {"status": "copying"}}}"#,
        )
        .unwrap();
        assert!(matches!(
            TransferLedger::load(&bad_status),
            Err(SyncError::CorruptLedger { .. })
        ));
    }

    #[test]
    fn test_create_rejects_incomplete_unit() {
        let u = SyncUnit::new("/s", "x", "gsiftp://se", "");
        let err = TransferLedger::create(&u, ["a"], "x.recover").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_status_transitions() {
        let mut ledger = TransferLedger::create(&unit(), ["a", "b"], "unused").unwrap();
        assert!(matches!(
            ledger.status("zzz"),
            Err(SyncError::UnknownFile(_))
        ));

        ledger.mark_failed("a", "boom").unwrap();
        ledger.mark_failed("a", "boom again").unwrap();
        ledger.mark_done("a").unwrap();
        assert!(ledger.entry("a").unwrap().error.is_none());

        assert!(matches!(
            ledger.mark_failed("a", "late"),
            Err(SyncError::InvalidTransition { .. })
        ));
        assert!(ledger.set_status("a", FileStatus::Idle).is_err());
        assert!(ledger.set_status("b", FileStatus::Idle).is_ok());
        assert_eq!(
            ledger.summary(),
            LedgerSummary {
                idle: 1,
                done: 1,
                failed: 0
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_dir_reports_errors() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(sync_dir(tmp.path()).is_ok());
        assert!(sync_dir(&tmp.path().join("gone")).is_err());
    }

    #[test]
    fn test_reconcile_listing_drift() {
        let mut ledger = TransferLedger::create(&unit(), ["a", "b", "c"], "unused").unwrap();
        ledger.mark_done("b").unwrap();
        let drift = ledger.reconcile_listing(&["a", "c", "d"]);
        assert_eq!(drift.added, vec!["d".to_string()]);
        assert_eq!(drift.missing, vec!["b".to_string()]);
        assert_eq!(ledger.status("d").unwrap(), FileStatus::Idle);
        // the vanished entry keeps its status
        assert_eq!(ledger.status("b").unwrap(), FileStatus::Done);
        assert_eq!(ledger.names().collect::<Vec<_>>(), vec!["a", "b", "c", "d"]);

        assert!(ledger.reconcile_listing(&["a", "b", "c", "d"]).is_empty());
    }
}
