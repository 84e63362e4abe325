//! Terminal progress for a sync session
//!
//! Two lines, cargo-style:
//! - a bar counting processed files of the current unit, with the
//!   `done / failed / total` tally as its message
//! - a spinner for the file being transferred (size, elapsed, rates)
//!
//! File decisions are printed above the bars. When the bars are hidden
//! (quiet mode, stderr not a terminal) the same lines go through `tracing`.

use crossterm::style::{Color, Stylize};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

use crate::engine::RunStats;
use crate::remote::TransferProgress;

pub struct SyncProgress {
    multi: MultiProgress,
    files: ProgressBar,
    transfer: ProgressBar,
    styled: bool,
}

/// Bold and colored when `styled`, plain text otherwise
pub fn paint(text: &str, color: Color, styled: bool) -> String {
    if styled {
        text.with(color).bold().to_string()
    } else {
        text.to_string()
    }
}

impl SyncProgress {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), std::io::stderr().is_terminal())
    }

    /// Progress that never draws (quiet mode, tests)
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden(), false)
    }

    fn with_target(target: ProgressDrawTarget, styled: bool) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let files = multi.add(ProgressBar::new(0));
        files.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:>12.green.bold} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        let transfer = multi.add(ProgressBar::new_spinner());
        transfer.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        Self {
            multi,
            files,
            transfer,
            styled,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.files.is_hidden()
    }

    pub fn start_unit(&self, rel_dir: &str, total: u64) {
        self.files.reset();
        self.files.set_length(total);
        self.files.set_position(0);
        self.files.set_prefix(rel_dir.to_string());
        self.files.set_message(String::new());
    }

    pub fn start_file(&self, name: &str) {
        self.transfer.set_message(name.to_string());
        self.transfer.enable_steady_tick(Duration::from_millis(120));
    }

    /// Monitoring hook target: `[elapsed] MB transferred (average KB/s)`
    pub fn transfer_tick(&self, p: &TransferProgress) {
        self.transfer.set_message(format!(
            "[{:4}s] {:.2}MB / {:.2}MB ({:.2}KB/s, now {:.2}KB/s)",
            p.elapsed.as_secs(),
            p.transferred as f64 / 1_048_576.0,
            p.total as f64 / 1_048_576.0,
            p.average_rate / 1024.0,
            p.instant_rate / 1024.0,
        ));
    }

    /// Print a file decision above the bars
    pub fn print_file_op(&self, operation: &str, path: &str, ok: bool) {
        if self.is_hidden() {
            tracing::info!("{} {}", operation, path);
            return;
        }
        let color = if ok { Color::Green } else { Color::Red };
        let line = format!(
            "{:>12} {}",
            paint(operation, color, self.styled),
            path
        );
        self.multi.suspend(|| eprintln!("{line}"));
    }

    /// Advance after a file decision and show the running tally
    pub fn file_finished(&self, stats: &RunStats) {
        self.transfer.disable_steady_tick();
        self.transfer.set_message(String::new());
        self.files.set_position(stats.processed());
        self.files.set_message(stats.line());
        if self.is_hidden() {
            tracing::info!("stats: {}", stats.line());
        }
    }

    pub fn finish_unit(&self, stats: &RunStats, elapsed: Duration) {
        let color = if stats.failed == 0 {
            Color::Green
        } else {
            Color::Yellow
        };
        let line = format!(
            "{} {} in {:.1}s",
            paint("Completed", color, self.styled),
            stats.line(),
            elapsed.as_secs_f64()
        );
        if self.is_hidden() {
            tracing::info!("{}", line);
        } else {
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    pub fn finish(&self) {
        self.transfer.finish_and_clear();
        self.files.finish_and_clear();
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SyncProgress {
    fn drop(&mut self) {
        if !self.files.is_finished() {
            self.finish();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_logs {
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with an info-level subscriber and return what it logged
    pub(crate) fn capture(f: impl FnOnce()) -> String {
        let buf = Captured::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buf.0.lock().clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_logs_decisions_and_tally() {
        let progress = SyncProgress::hidden();
        let stats = RunStats {
            total: 3,
            done: 1,
            failed: 1,
            ..Default::default()
        };
        let out = test_logs::capture(|| {
            progress.print_file_op("Copied", "a.txt", true);
            progress.file_finished(&stats);
            progress.finish_unit(&stats, Duration::from_millis(1500));
        });
        assert!(out.contains("Copied a.txt"));
        assert!(out.contains("stats: 1 / 1 / 3 [done / failed / total]"));
        assert!(out.contains("Completed 1 / 1 / 3 [done / failed / total] in 1.5s"));
        assert!(!out.contains('\x1b'));
    }

    #[test]
    fn test_paint_plain_when_unstyled() {
        assert_eq!(paint("done", Color::Green, false), "done");
        assert!(paint("done", Color::Green, true).contains('\x1b'));
    }
}
