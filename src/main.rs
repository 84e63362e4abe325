//! gridsync - resumable directory sync with recovery ledgers
//!
//! Config mode syncs every `srcItems` directory of a JSON config; recover
//! mode resumes the single directory a `.recover` file describes.

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::style::Color;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use gridsync::cli::{parse_error_code, Args, Mode};
use gridsync::config::{RunSettings, SyncConfig};
use gridsync::ledger::TransferLedger;
use gridsync::logger::{Logger, NoopLogger, TextLogger};
use gridsync::progress::{paint, SyncProgress};
use gridsync::remote::open_endpoint;
use gridsync::session::{Session, SessionMode, SessionReport, UnitStatus};

fn init_tracing(args: &Args, bars: bool) {
    let level = match args.verbose {
        0 if bars || args.quiet => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gridsync={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = parse_error_code(&e);
            if code == 0 {
                e.exit();
            }
            eprintln!("{e}");
            return ExitCode::from(code);
        }
    };
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            let styled = std::io::stderr().is_terminal();
            eprintln!("{} {:#}", paint("error:", Color::Red, styled), e);
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    let bars = !args.quiet && std::io::stderr().is_terminal();
    init_tracing(args, bars);

    // First Ctrl-C: finish the current file and stop. Second: leave now;
    // ledgers are only ever replaced by rename, so they stay readable.
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        if handler_stop.swap(true, Ordering::SeqCst) {
            eprintln!("\nInterrupted again. Exiting (Ctrl-C)...");
            std::process::exit(130);
        }
        eprintln!("\nInterrupted by user. Stopping after the current file (Ctrl-C again to quit)...");
    })
    .context("setting Ctrl-C handler")?;

    let mode = args.mode()?;
    let (endpoint, settings, session_mode) = match &mode {
        Mode::Config(path) => {
            let config = SyncConfig::load(path)?;
            let settings = RunSettings::from_config(&config).with_overrides(&args.overrides());
            (
                config.dest_endpoint.clone(),
                settings,
                SessionMode::Config(config.units()),
            )
        }
        Mode::Recover(path) => {
            let ledger = TransferLedger::load(path)?;
            let settings = RunSettings::default().with_overrides(&args.overrides());
            (
                ledger.document().dest_endpoint.clone(),
                settings,
                SessionMode::Recover(ledger),
            )
        }
    };

    let storage = open_endpoint(&endpoint)
        .with_context(|| format!("opening destination endpoint '{endpoint}'"))?;
    tracing::debug!("using {} storage for '{}'", storage.name(), endpoint);

    let logger: Box<dyn Logger> = match &args.log_file {
        Some(p) => Box::new(
            TextLogger::new(p).with_context(|| format!("opening log file {}", p.display()))?,
        ),
        None => Box::new(NoopLogger),
    };
    logger.session_start(mode.label(), mode.path());

    let progress = if bars {
        SyncProgress::new()
    } else {
        SyncProgress::hidden()
    };

    let session = Session::new(storage.as_ref(), settings)
        .with_logger(logger.as_ref())
        .with_progress(&progress)
        .with_stop_flag(&stop);
    let report = session.run(session_mode)?;
    progress.finish();

    print_summary(&report);
    println!("Bye!");
    Ok(ExitCode::from(report.exit_status().code()))
}

fn print_summary(report: &SessionReport) {
    let styled = std::io::stdout().is_terminal();
    for unit in &report.units {
        let ledger = unit
            .ledger
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        match &unit.status {
            UnitStatus::Completed(stats) => {
                let label = if stats.failed == 0 {
                    paint("done", Color::Green, styled)
                } else {
                    paint("partial", Color::Yellow, styled)
                };
                println!("{:>12} {} {} ({})", label, unit.rel_dir, stats.line(), ledger);
                for failure in &stats.failures {
                    println!("{:>12} {}: {}", "", failure.name, failure.error);
                }
            }
            UnitStatus::Interrupted(stats) => {
                println!(
                    "{:>12} {} {} ({})",
                    paint("stopped", Color::Yellow, styled),
                    unit.rel_dir,
                    stats.line(),
                    ledger
                );
            }
            UnitStatus::Skipped(reason) => {
                println!("{:>12} {} {}", paint("skipped", Color::Red, styled), unit.rel_dir, reason);
            }
        }
    }

    let total = report.stats();
    println!(
        "{} files: {} copied, {} overwritten, {} verified, {} already done, {} failed ({:.2} MB)",
        total.total,
        total.copied,
        total.overwritten,
        total.verified,
        total.already_done,
        total.failed,
        total.bytes_copied as f64 / 1_048_576.0
    );
    if report.interrupted {
        println!("Interrupted; rerun the same command to resume.");
    }
}
