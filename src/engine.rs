//! Reconciliation engine: one sync unit, file by file.
//!
//! For every file of the live local listing (sorted by name):
//!
//! 1. ledger says `done` -> skip without touching the remote side
//! 2. remote `stat` says not found -> copy
//! 3. remote file exists -> compare checksums; equal means done, different
//!    means one copy with overwrite enabled for that call only
//!
//! Transfer failures are recorded as `failed` and the loop moves on. The
//! ledger is persisted after every file whose status changed, before the
//! next file starts, so a crash loses at most the in-flight file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::checksum::{file_checksum, ChecksumType};
use crate::error::Result;
use crate::fs_enum::LocalFile;
use crate::ledger::{FileStatus, TransferLedger};
use crate::logger::Logger;
use crate::progress::SyncProgress;
use crate::remote::{RemoteStorage, TransferOptions};
use crate::unit::SyncUnit;

/// A file that ended up `failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub name: String,
    pub error: String,
}

/// Statistics for one unit (or a whole session once merged)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub total: u64,
    pub done: u64,
    pub failed: u64,
    /// Skipped because the ledger already said done
    pub already_done: u64,
    pub copied: u64,
    pub overwritten: u64,
    /// Existed remotely with a matching checksum
    pub verified: u64,
    pub bytes_copied: u64,
    pub failures: Vec<FileFailure>,
}

impl RunStats {
    pub fn processed(&self) -> u64 {
        self.done + self.failed
    }

    pub fn line(&self) -> String {
        format!(
            "{} / {} / {} [done / failed / total]",
            self.done, self.failed, self.total
        )
    }

    fn record(&mut self, name: &str, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::AlreadyDone => {
                self.done += 1;
                self.already_done += 1;
            }
            FileOutcome::Copied { bytes } => {
                self.done += 1;
                self.copied += 1;
                self.bytes_copied += bytes;
            }
            FileOutcome::Overwritten { bytes } => {
                self.done += 1;
                self.overwritten += 1;
                self.bytes_copied += bytes;
            }
            FileOutcome::Verified => {
                self.done += 1;
                self.verified += 1;
            }
            FileOutcome::Failed { error } => {
                self.failed += 1;
                self.failures.push(FileFailure {
                    name: name.to_string(),
                    error: error.clone(),
                });
            }
        }
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.total += other.total;
        self.done += other.done;
        self.failed += other.failed;
        self.already_done += other.already_done;
        self.copied += other.copied;
        self.overwritten += other.overwritten;
        self.verified += other.verified;
        self.bytes_copied += other.bytes_copied;
        self.failures.extend(other.failures.iter().cloned());
    }
}

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    AlreadyDone,
    Copied { bytes: u64 },
    Verified,
    Overwritten { bytes: u64 },
    Failed { error: String },
}

impl FileOutcome {
    pub fn status(&self) -> FileStatus {
        match self {
            FileOutcome::Failed { .. } => FileStatus::Failed,
            _ => FileStatus::Done,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FileOutcome::AlreadyDone => "Recorded",
            FileOutcome::Copied { .. } => "Copied",
            FileOutcome::Verified => "Verified",
            FileOutcome::Overwritten { .. } => "Overwrote",
            FileOutcome::Failed { .. } => "Failed",
        }
    }
}

/// Result of one unit loop
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub stats: RunStats,
    /// Stopped at a file boundary because of an interrupt
    pub interrupted: bool,
    pub elapsed: Duration,
}

pub struct Reconciler<'a> {
    storage: &'a dyn RemoteStorage,
    logger: &'a dyn Logger,
    options: TransferOptions<'a>,
    checksum: ChecksumType,
    stop: Option<&'a AtomicBool>,
    progress: Option<&'a SyncProgress>,
}

impl<'a> Reconciler<'a> {
    pub fn new(storage: &'a dyn RemoteStorage, logger: &'a dyn Logger) -> Self {
        Self {
            storage,
            logger,
            options: TransferOptions::default(),
            checksum: ChecksumType::default(),
            stop: None,
            progress: None,
        }
    }

    /// Base transfer options; `overwrite` in here is ignored
    pub fn with_options(mut self, options: TransferOptions<'a>) -> Self {
        self.options = options.with_overwrite(false);
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumType) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_stop_flag(mut self, stop: &'a AtomicBool) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_progress(mut self, progress: &'a SyncProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_some_and(|s| s.load(Ordering::SeqCst))
    }

    /// Walk `files` (already sorted) and bring the remote side in line.
    ///
    /// Every name in `files` must be tracked by the ledger. Errors returned
    /// here are fatal (ledger cannot be persisted, unknown file); transfer
    /// problems only show up in the stats.
    pub fn reconcile(
        &self,
        unit: &SyncUnit,
        files: &[LocalFile],
        ledger: &mut TransferLedger,
    ) -> Result<UnitOutcome> {
        let start = Instant::now();
        let mut stats = RunStats {
            total: files.len() as u64,
            ..Default::default()
        };
        let mut interrupted = false;

        self.logger.unit_start(unit, ledger.path());
        if let Some(p) = self.progress {
            p.start_unit(&unit.rel_dir, stats.total);
        }

        for file in files {
            if self.stop_requested() {
                interrupted = true;
                break;
            }

            let outcome = self.process_file(unit, file, ledger.status(&file.name)?);
            match &outcome {
                FileOutcome::AlreadyDone => {}
                FileOutcome::Failed { error } => {
                    ledger.mark_failed(&file.name, error.clone())?;
                    ledger.persist()?;
                }
                _ => {
                    ledger.mark_done(&file.name)?;
                    ledger.persist()?;
                }
            }
            stats.record(&file.name, &outcome);

            match self.progress {
                Some(p) => {
                    p.print_file_op(outcome.label(), &file.name, outcome.status() == FileStatus::Done);
                    p.file_finished(&stats);
                }
                None => tracing::info!("stats: {}", stats.line()),
            }
        }

        let elapsed = start.elapsed();
        if interrupted {
            tracing::warn!(
                "unit {} interrupted after {} of {} files",
                unit.rel_dir,
                stats.processed(),
                stats.total
            );
            self.logger.interrupted(unit);
        } else {
            if let Some(p) = self.progress {
                p.finish_unit(&stats, elapsed);
            }
            self.logger.unit_done(unit, &stats, elapsed.as_secs_f64());
        }

        Ok(UnitOutcome {
            stats,
            interrupted,
            elapsed,
        })
    }

    /// Decide and act for one file; does not touch the ledger.
    pub fn process_file(&self, unit: &SyncUnit, file: &LocalFile, status: FileStatus) -> FileOutcome {
        if status == FileStatus::Done {
            tracing::info!(
                "ledger reports {} already copied on remote",
                file.path.display()
            );
            return FileOutcome::AlreadyDone;
        }

        let uri = unit.remote_file(&file.name);
        if let Some(p) = self.progress {
            p.start_file(&file.name);
        }

        let outcome = self.transfer(file, &uri);
        match &outcome {
            FileOutcome::Copied { bytes } => self.logger.copied(&file.path, &uri, *bytes, false),
            FileOutcome::Overwritten { bytes } => self.logger.copied(&file.path, &uri, *bytes, true),
            FileOutcome::Verified => self.logger.verified(&file.path, &uri),
            FileOutcome::Failed { error } => {
                tracing::error!("{}: {}", file.path.display(), error);
                self.logger.error("transfer", &file.path, error);
            }
            FileOutcome::AlreadyDone => {}
        }
        outcome
    }

    fn transfer(&self, file: &LocalFile, uri: &str) -> FileOutcome {
        let meta = match self.storage.stat(uri) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => {
                tracing::info!(
                    "copying {} ({} bytes) -> {}",
                    file.path.display(),
                    file.size,
                    uri
                );
                return match self.storage.copy(&file.path, uri, &self.options) {
                    Ok(bytes) => FileOutcome::Copied { bytes },
                    Err(e) => FileOutcome::Failed {
                        error: format!("copy failed: {e}"),
                    },
                };
            }
            Err(e) => {
                return FileOutcome::Failed {
                    error: format!("stat failed: {e}"),
                }
            }
        };

        if meta.is_dir {
            return FileOutcome::Failed {
                error: format!("remote path {uri} is a directory"),
            };
        }
        tracing::debug!(
            "{} exists on remote ({} bytes, mode {:o}, local {} bytes)",
            uri,
            meta.size,
            meta.mode,
            file.size
        );

        let local_sum = match file_checksum(&file.path, self.checksum) {
            Ok(sum) => sum,
            Err(e) => {
                return FileOutcome::Failed {
                    error: format!("local {} checksum failed: {e}", self.checksum),
                }
            }
        };
        let remote_sum = match self.storage.checksum(uri, self.checksum) {
            Ok(sum) => sum,
            Err(e) => {
                return FileOutcome::Failed {
                    error: format!("remote {} checksum failed: {e}", self.checksum),
                }
            }
        };

        if local_sum == remote_sum {
            tracing::info!(
                "file {} already exists on remote and {} is ok - skipped",
                file.path.display(),
                self.checksum
            );
            return FileOutcome::Verified;
        }

        tracing::info!(
            "{} mismatch for {} ({} != {}), overwriting",
            self.checksum,
            file.path.display(),
            local_sum,
            remote_sum
        );
        let forced = self.options.with_overwrite(true);
        match self.storage.copy(&file.path, uri, &forced) {
            Ok(bytes) => FileOutcome::Overwritten { bytes },
            Err(e) => FileOutcome::Failed {
                error: format!("overwrite failed: {e}"),
            },
        }
    }
}
