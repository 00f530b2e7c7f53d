//! Logger setup.
//!
//! Messages go to the terminal and, once the run directory exists, to a log
//! file inside it.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};

pub fn level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Builds the sink list: the terminal, plus `log_file` when given.
pub fn sinks(verbose: bool, log_file: Option<&Path>) -> Result<Vec<Box<dyn SharedLogger>>> {
    let level = level(verbose);
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        loggers.push(WriteLogger::new(level, Config::default(), file));
    }
    Ok(loggers)
}

/// Installs the global logger. Can only succeed once per process.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    CombinedLogger::init(sinks(verbose, log_file)?).context("Failed to initialize logger")
}
