//! Command-line arguments

use anyhow::{bail, Result};
use clap::{ArgAction, ArgGroup, Parser};
use std::path::PathBuf;

use crate::checksum::ChecksumType;
use crate::config::{OnExistingLedger, Overrides};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gridsync",
    author,
    version,
    about = "Resumable directory sync to remote storage with a per-directory recovery ledger"
)]
#[command(group(ArgGroup::new("input").required(true).args(["conf", "recover"])))]
pub struct Args {
    /// JSON config listing the directories to sync
    #[arg(short = 'c', long = "conf", value_name = "FILE")]
    pub conf: Option<PathBuf>,

    /// Resume a single directory from its recovery file
    #[arg(short = 'r', long = "recover", value_name = "FILE")]
    pub recover: Option<PathBuf>,

    /// What to do when a directory's recovery file already exists (config mode)
    #[arg(long, value_enum, value_name = "POLICY")]
    pub on_existing_ledger: Option<OnExistingLedger>,

    /// Directory holding `<dir>.recover` files (config mode)
    #[arg(long, value_name = "DIR")]
    pub ledger_dir: Option<PathBuf>,

    /// Checksum used to compare files that already exist remotely
    #[arg(long, value_enum)]
    pub checksum: Option<ChecksumType>,

    /// Parallel streams requested per transfer
    #[arg(long)]
    pub streams: Option<u32>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// No progress bars
    #[arg(short, long)]
    pub quiet: bool,

    /// Append an audit trail of every remote decision to this file
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

/// Which input drives the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Config(PathBuf),
    Recover(PathBuf),
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Config(_) => "config",
            Mode::Recover(_) => "recover",
        }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            Mode::Config(p) | Mode::Recover(p) => p,
        }
    }
}

/// Exit status for an argument error. `--help` and `--version` come back
/// from clap as errors too but are not failures.
pub fn parse_error_code(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}

impl Args {
    pub fn mode(&self) -> Result<Mode> {
        match (&self.conf, &self.recover) {
            (Some(c), None) => Ok(Mode::Config(c.clone())),
            (None, Some(r)) => Ok(Mode::Recover(r.clone())),
            _ => bail!("exactly one of --conf or --recover is required"),
        }
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            on_existing_ledger: self.on_existing_ledger,
            checksum: self.checksum,
            streams: self.streams,
            ledger_dir: self.ledger_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_mode_with_overrides() {
        let args = Args::try_parse_from([
            "gridsync",
            "-c",
            "sync.json",
            "--on-existing-ledger",
            "reinit",
            "--checksum",
            "sha256",
            "--streams",
            "4",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.mode().unwrap(), Mode::Config(PathBuf::from("sync.json")));
        assert_eq!(args.verbose, 2);
        let o = args.overrides();
        assert_eq!(o.on_existing_ledger, Some(OnExistingLedger::Reinit));
        assert_eq!(o.checksum, Some(ChecksumType::Sha256));
        assert_eq!(o.streams, Some(4));
        assert!(o.ledger_dir.is_none());
    }

    #[test]
    fn test_recover_mode() {
        let args = Args::try_parse_from(["gridsync", "--recover", "run1.recover", "-q"]).unwrap();
        assert_eq!(args.mode().unwrap().label(), "recover");
        assert!(args.quiet);
    }

    #[test]
    fn test_modes_are_exclusive_and_required() {
        assert!(Args::try_parse_from(["gridsync"]).is_err());
        assert!(Args::try_parse_from(["gridsync", "-c", "a.json", "-r", "b.recover"]).is_err());
        assert!(Args::try_parse_from(["gridsync", "-c", "a.json", "--checksum", "crc"]).is_err());
    }

    #[test]
    fn test_usage_errors_exit_as_fatal() {
        let code = |argv: &[&str]| parse_error_code(&Args::try_parse_from(argv).unwrap_err());
        assert_eq!(code(&["gridsync"]), 1);
        assert_eq!(code(&["gridsync", "-c", "a.json", "-r", "b.recover"]), 1);
        assert_eq!(code(&["gridsync", "--streams", "many", "-c", "a.json"]), 1);
        assert_eq!(code(&["gridsync", "--help"]), 0);
        assert_eq!(code(&["gridsync", "--version"]), 0);
    }
}
