//! stderr backend for the `log` facade.
//!
//! Lines look like `[LEVEL][category] message`; the category is the record
//! target, which the wrappers below set explicitly.

use std::io::Write;
use std::sync::Once;

use log::{Level, LevelFilter, Log, Metadata, Record};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;
static INIT: Once = Once::new();

/// Install the backend and set the level filter. Later calls only move the filter.
pub fn init_logger(level: LevelFilter) {
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
    });
    set_log_level(level);
}

/// Change the current log level filter.
pub fn set_log_level(level: LevelFilter) {
    log::set_max_level(level);
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRACE",
        Level::Debug => "DEBUG",
        Level::Info => "INFO",
        Level::Warn => "WARN",
        Level::Error => "ERROR",
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        write_log(level_name(record.level()), record.target(), record.args());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[cfg(feature = "logging")]
fn write_log(level: &str, category: &str, message: &std::fmt::Arguments) {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "[{}][{}] {}", level, category, message);
}

#[cfg(not(feature = "logging"))]
fn write_log(_level: &str, _category: &str, _message: &std::fmt::Arguments) {}

// Public log API

pub fn log_trace(category: &str, message: &str) {
    log::trace!(target: category, "{}", message);
}

pub fn log_debug(category: &str, message: &str) {
    log::debug!(target: category, "{}", message);
}

pub fn log_info(category: &str, message: &str) {
    log::info!(target: category, "{}", message);
}

pub fn log_warn(category: &str, message: &str) {
    log::warn!(target: category, "{}", message);
}

pub fn log_error(category: &str, message: &str) {
    log::error!(target: category, "{}", message);
}
