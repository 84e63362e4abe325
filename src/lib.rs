//! gridsync library
//!
//! Resumable, checksum-verified directory sync to remote storage. Every
//! synced directory gets a JSON recovery ledger so an interrupted run can
//! pick up where it stopped.

pub mod checksum;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs_enum;
pub mod ledger;
pub mod logger;
pub mod progress;
pub mod remote;
pub mod session;
pub mod unit;
pub mod url;
