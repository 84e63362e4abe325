use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::engine::RunStats;
use crate::unit::SyncUnit;

/// Audit trail of what a session did to the remote side.
///
/// Diagnostics go through `tracing`; this is the append-only record behind
/// `--log-file`, one line per decision.
pub trait Logger: Send + Sync {
    fn session_start(&self, _mode: &str, _input: &Path) {}
    fn unit_start(&self, _unit: &SyncUnit, _ledger: &Path) {}
    fn copied(&self, _src: &Path, _dst: &str, _bytes: u64, _overwrite: bool) {}
    fn verified(&self, _src: &Path, _dst: &str) {}
    fn error(&self, _context: &str, _path: &Path, _msg: &str) {}
    fn unit_done(&self, _unit: &SyncUnit, _stats: &RunStats, _seconds: f64) {}
    fn interrupted(&self, _unit: &SyncUnit) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
    session: String,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
            session: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] [{}] {}", Utc::now().to_rfc3339(), self.session, s);
    }
}

impl Logger for TextLogger {
    fn session_start(&self, mode: &str, input: &Path) {
        self.line(&format!("SESSION mode={} input={}", mode, input.display()));
    }
    fn unit_start(&self, unit: &SyncUnit, ledger: &Path) {
        self.line(&format!(
            "START src={} dst={} ledger={}",
            unit.local_dir().display(),
            unit.remote_dir(),
            ledger.display()
        ));
    }
    fn copied(&self, src: &Path, dst: &str, bytes: u64, overwrite: bool) {
        let verb = if overwrite { "OVERWRITE" } else { "COPY" };
        self.line(&format!("{} src={} dst={} bytes={}", verb, src.display(), dst, bytes));
    }
    fn verified(&self, src: &Path, dst: &str) {
        self.line(&format!("VERIFIED src={} dst={}", src.display(), dst));
    }
    fn error(&self, context: &str, path: &Path, msg: &str) {
        self.line(&format!("ERROR ctx={} path={} msg={}", context, path.display(), msg));
    }
    fn unit_done(&self, unit: &SyncUnit, stats: &RunStats, seconds: f64) {
        self.line(&format!(
            "DONE unit={} done={} failed={} total={} bytes={} seconds={seconds:.3}",
            unit.rel_dir, stats.done, stats.failed, stats.total, stats.bytes_copied
        ));
    }
    fn interrupted(&self, unit: &SyncUnit) {
        self.line(&format!("INTERRUPTED unit={}", unit.rel_dir));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_logger_appends_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs").join("sync.log");
        let unit = SyncUnit::new("/s", "run1", "file://", "/d");
        {
            let logger = TextLogger::new(&path).unwrap();
            logger.unit_start(&unit, Path::new("run1.recover"));
            logger.copied(Path::new("/s/run1/a"), "file:///d/run1/a", 3, false);
            logger.error("copy", Path::new("/s/run1/b"), "boom");
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("START src=/s/run1 dst=file:///d/run1"));
        assert!(lines[1].ends_with("COPY src=/s/run1/a dst=file:///d/run1/a bytes=3"));
        assert!(lines[2].contains("ERROR ctx=copy"));
    }
}
