//! Cadence Library
//!
//! Recurring task scheduling: triggers, schedulers, workers and the
//! command-line surface built on top of them.

use shadow_rs::shadow;
shadow!(build);

pub mod cli;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logger;

pub use error::{AppError, AppResult};

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}

pub fn clap_long_version() -> &'static str {
    build::CLAP_LONG_VERSION
}
