//! Session orchestration: runs the reconciliation engine over every sync
//! unit of a config file, or over the single unit a recovery file describes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{OnExistingLedger, RunSettings};
use crate::engine::{Reconciler, RunStats};
use crate::error::{Result, SyncError};
use crate::fs_enum::list_directory;
use crate::ledger::{ListingDrift, TransferLedger};
use crate::logger::{Logger, NoopLogger};
use crate::progress::SyncProgress;
use crate::remote::{RemoteStorage, TransferOptions, TransferProgress};
use crate::unit::SyncUnit;

/// Where the units (and their ledgers) come from
pub enum SessionMode {
    /// Units from a config file; ledgers live under `RunSettings::ledger_dir`
    Config(Vec<SyncUnit>),
    /// One unit rebuilt from a ledger, persisted back to the same file
    Recover(TransferLedger),
}

#[derive(Debug, Clone)]
pub enum UnitStatus {
    Completed(RunStats),
    Interrupted(RunStats),
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub rel_dir: String,
    pub ledger: Option<PathBuf>,
    pub drift: ListingDrift,
    pub status: UnitStatus,
}

impl UnitReport {
    pub fn stats(&self) -> Option<&RunStats> {
        match &self.status {
            UnitStatus::Completed(s) | UnitStatus::Interrupted(s) => Some(s),
            UnitStatus::Skipped(_) => None,
        }
    }
}

/// How a session ended, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    CompletedWithFailures,
    Interrupted,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::CompletedWithFailures => 2,
            ExitStatus::Interrupted => 130,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub units: Vec<UnitReport>,
    pub interrupted: bool,
}

impl SessionReport {
    /// Stats of all units merged
    pub fn stats(&self) -> RunStats {
        let mut total = RunStats::default();
        for unit in &self.units {
            if let Some(s) = unit.stats() {
                total.merge(s);
            }
        }
        total
    }

    pub fn failed_files(&self) -> u64 {
        self.stats().failed
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.interrupted {
            ExitStatus::Interrupted
        } else if self.failed_files() > 0 {
            ExitStatus::CompletedWithFailures
        } else {
            ExitStatus::Success
        }
    }
}

pub struct Session<'a> {
    storage: &'a dyn RemoteStorage,
    settings: RunSettings,
    logger: &'a dyn Logger,
    progress: Option<&'a SyncProgress>,
    stop: Option<&'a AtomicBool>,
}

impl<'a> Session<'a> {
    pub fn new(storage: &'a dyn RemoteStorage, settings: RunSettings) -> Self {
        Self {
            storage,
            settings,
            logger: &NoopLogger,
            progress: None,
            stop: None,
        }
    }

    pub fn with_logger(mut self, logger: &'a dyn Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_progress(mut self, progress: &'a SyncProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_stop_flag(mut self, stop: &'a AtomicBool) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_some_and(|s| s.load(Ordering::SeqCst))
    }

    /// Process every unit in order. Fatal errors (remote directory problems,
    /// ledger I/O) abort the session; ledgers already written stay valid.
    pub fn run(&self, mode: SessionMode) -> Result<SessionReport> {
        let mut report = SessionReport::default();

        match mode {
            SessionMode::Config(units) => {
                for unit in units {
                    if self.stop_requested() {
                        report.interrupted = true;
                        break;
                    }
                    let unit_report = self.run_unit(&unit, None)?;
                    let stop = matches!(unit_report.status, UnitStatus::Interrupted(_));
                    report.units.push(unit_report);
                    if stop {
                        report.interrupted = true;
                        break;
                    }
                }
            }
            SessionMode::Recover(ledger) => {
                let unit = ledger.unit();
                let unit_report = self.run_unit(&unit, Some(ledger))?;
                report.interrupted = matches!(unit_report.status, UnitStatus::Interrupted(_));
                report.units.push(unit_report);
            }
        }

        Ok(report)
    }

    fn run_unit(&self, unit: &SyncUnit, recovered: Option<TransferLedger>) -> Result<UnitReport> {
        let local_dir = unit.local_dir();
        if !local_dir.is_dir() {
            tracing::error!("local directory {} not present - skipped", local_dir.display());
            return Ok(UnitReport {
                rel_dir: unit.rel_dir.clone(),
                ledger: recovered.map(|l| l.path().to_path_buf()),
                drift: ListingDrift::default(),
                status: UnitStatus::Skipped(format!("{} not present", local_dir.display())),
            });
        }

        let remote_dir = unit.remote_dir();
        if self.ensure_remote_dir(&remote_dir)? {
            tracing::info!("created remote directory {}", remote_dir);
        }

        let listing = list_directory(&local_dir).map_err(|source| SyncError::LocalListing {
            path: local_dir.clone(),
            source,
        })?;
        for dir in &listing.skipped.directories {
            tracing::warn!("sub-directory {} is not synced - skipped", dir.display());
        }
        for other in &listing.skipped.other {
            tracing::warn!("{} is not a regular file - skipped", other.display());
        }
        let names = listing.names();

        let mut ledger = match recovered {
            Some(ledger) => {
                tracing::info!("read recovery file {}", ledger.path().display());
                ledger
            }
            None => self.open_ledger(unit, &names)?,
        };

        let drift = ledger.reconcile_listing(&names);
        if !drift.added.is_empty() {
            tracing::warn!(
                "{} file(s) appeared since the ledger was written, tracking them as idle: {}",
                drift.added.len(),
                drift.added.join(", ")
            );
            ledger.persist()?;
        }
        if !drift.missing.is_empty() {
            tracing::warn!(
                "{} ledger entr(ies) no longer present locally, left untouched: {}",
                drift.missing.len(),
                drift.missing.join(", ")
            );
        }

        let outcome = match self.progress {
            Some(progress) => {
                let hook = |p: &TransferProgress| progress.transfer_tick(p);
                let options = TransferOptions::new(self.settings.streams).with_progress(&hook);
                self.reconciler(options)
                    .with_progress(progress)
                    .reconcile(unit, &listing.files, &mut ledger)?
            }
            None => self
                .reconciler(TransferOptions::new(self.settings.streams))
                .reconcile(unit, &listing.files, &mut ledger)?,
        };

        let status = if outcome.interrupted {
            UnitStatus::Interrupted(outcome.stats)
        } else {
            tracing::info!("unit {} finished: {}", unit.rel_dir, outcome.stats.line());
            UnitStatus::Completed(outcome.stats)
        };

        Ok(UnitReport {
            rel_dir: unit.rel_dir.clone(),
            ledger: Some(ledger.path().to_path_buf()),
            drift,
            status,
        })
    }

    fn reconciler<'b>(&'b self, options: TransferOptions<'b>) -> Reconciler<'b> {
        let reconciler = Reconciler::new(self.storage, self.logger)
            .with_options(options)
            .with_checksum(self.settings.checksum);
        match self.stop {
            Some(stop) => reconciler.with_stop_flag(stop),
            None => reconciler,
        }
    }

    /// Make sure the unit's remote directory exists. Returns true if it was created.
    pub fn ensure_remote_dir(&self, uri: &str) -> Result<bool> {
        match self.storage.stat(uri) {
            Ok(meta) if meta.is_dir => Ok(false),
            Ok(_) => Err(SyncError::Directory {
                uri: uri.to_string(),
                source: crate::remote::RemoteError::NotADirectory(uri.to_string()),
            }),
            Err(e) if e.is_not_found() => {
                self.storage
                    .mkdir(uri, self.settings.dir_mode)
                    .map_err(|source| SyncError::Directory {
                        uri: uri.to_string(),
                        source,
                    })?;
                Ok(true)
            }
            Err(source) => Err(SyncError::Directory {
                uri: uri.to_string(),
                source,
            }),
        }
    }

    /// Config mode: fresh ledger, or an existing one per `onExistingLedger`
    fn open_ledger(&self, unit: &SyncUnit, names: &[String]) -> Result<TransferLedger> {
        let dir = &self.settings.ledger_dir;
        std::fs::create_dir_all(dir).map_err(|source| SyncError::LedgerIo {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(unit.ledger_file_name());

        if path.exists() {
            match self.settings.on_existing_ledger {
                OnExistingLedger::Resume => {
                    let ledger = TransferLedger::load(&path)?;
                    if !ledger.describes(unit) {
                        return Err(SyncError::Config(format!(
                            "ledger {} was written for {} -> {}, not {} -> {}; use --on-existing-ledger reinit",
                            path.display(),
                            ledger.unit().local_dir().display(),
                            ledger.unit().remote_dir(),
                            unit.local_dir().display(),
                            unit.remote_dir()
                        )));
                    }
                    tracing::info!("read recovery file {}", path.display());
                    return Ok(ledger);
                }
                OnExistingLedger::Reinit => {
                    tracing::info!("discarding existing recovery file {}", path.display());
                }
                OnExistingLedger::Fail => return Err(SyncError::ExistingLedger(path)),
            }
        }

        let ledger = TransferLedger::create(unit, names.iter().cloned(), &path)?;
        ledger.persist()?;
        tracing::info!("init recovery file {}", path.display());
        Ok(ledger)
    }
}
