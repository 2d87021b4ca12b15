// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Building the root logger from the "log" section of the configuration

use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use slog::Drain;
use slog::Level;
use slog::Logger;
use slog::o;
use std::fs::OpenOptions;
use thiserror::Error;

/// Where log records go and how verbose they are.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum LogConfig {
    /// Human-readable records on stderr.
    StderrTerminal { level: LogLevel },
    /// Bunyan-formatted records appended to (or replacing) a file.
    File { level: LogLevel, path: Utf8PathBuf, if_exists: IfExists },
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig::StderrTerminal { level: LogLevel::Info }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IfExists {
    Fail,
    Truncate,
    Append,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    PartialEq,
    Eq,
    Serialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Level {
        match level {
            LogLevel::Trace => Level::Trace,
            LogLevel::Debug => Level::Debug,
            LogLevel::Info => Level::Info,
            LogLevel::Warn => Level::Warning,
            LogLevel::Error => Level::Error,
            LogLevel::Critical => Level::Critical,
        }
    }
}

#[derive(Debug, Error)]
#[error("open log file \"{path}\"")]
pub struct LogInitError {
    path: Utf8PathBuf,
    #[source]
    err: std::io::Error,
}

impl LogConfig {
    /// The same destination at a different level.
    pub fn with_level(self, level: LogLevel) -> LogConfig {
        match self {
            LogConfig::StderrTerminal { .. } => {
                LogConfig::StderrTerminal { level }
            }
            LogConfig::File { path, if_exists, .. } => {
                LogConfig::File { level, path, if_exists }
            }
        }
    }

    /// Create the root logger based on the requested configuration.
    pub fn to_logger(&self, name: &'static str) -> Result<Logger, LogInitError> {
        match self {
            LogConfig::StderrTerminal { level } => {
                let decorator = slog_term::TermDecorator::new().build();
                let drain =
                    slog_term::FullFormat::new(decorator).build().fuse();
                Ok(async_root_logger(*level, drain))
            }

            LogConfig::File { level, path, if_exists } => {
                let mut open_options = OpenOptions::new();
                open_options.write(true);
                open_options.create(true);

                match if_exists {
                    IfExists::Fail => {
                        open_options.create_new(true);
                    }
                    IfExists::Append => {
                        open_options.append(true);
                    }
                    IfExists::Truncate => {
                        open_options.truncate(true);
                    }
                }

                let drain = log_drain_for_file(&open_options, path, name)?;
                Ok(async_root_logger(*level, drain))
            }
        }
    }
}

fn async_root_logger<T>(level: LogLevel, drain: T) -> Logger
where
    T: Drain + Send + 'static,
    <T as Drain>::Err: std::fmt::Debug,
{
    let pid = std::process::id();
    let level_drain = slog::LevelFilter(drain, Level::from(level)).fuse();
    let async_drain = slog_async::Async::new(level_drain).build().fuse();
    Logger::root(async_drain, o!("pid" => pid))
}

fn log_drain_for_file(
    open_options: &OpenOptions,
    path: &Utf8Path,
    name: &'static str,
) -> Result<slog::Fuse<slog_json::Json<std::fs::File>>, LogInitError> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| LogInitError { path: path.to_owned(), err })?;
        }
    }

    let file = open_options
        .open(path)
        .map_err(|err| LogInitError { path: path.to_owned(), err })?;

    // Record a message to the stderr so that a reader who doesn't already
    // know how logging is configured knows where the rest of the log
    // messages went.
    eprintln!("note: configured to log to \"{}\"", path);
    Ok(slog_bunyan::with_name(name, file).build().fuse())
}
