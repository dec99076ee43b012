//! Logging module
//!
//! Provides a unified logging API with different log levels.
//! The backend implementation is in `logger.rs`.

pub mod logger;

/// Logging levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Level for a `-q`/`-v` count pair, starting from `Warn`.
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        if quiet {
            return LogLevel::Error;
        }
        match verbose {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn filter(self) -> ::log::LevelFilter {
        match self {
            LogLevel::Trace => ::log::LevelFilter::Trace,
            LogLevel::Debug => ::log::LevelFilter::Debug,
            LogLevel::Info => ::log::LevelFilter::Info,
            LogLevel::Warn => ::log::LevelFilter::Warn,
            LogLevel::Error => ::log::LevelFilter::Error,
        }
    }
}

/// Install the stderr logger. Must be called once, early in `main`.
pub fn init_logger(level: LogLevel) {
    logger::init_logger(level.filter());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(LogLevel::from_verbosity(0, false), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(2, false), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(9, false), LogLevel::Trace);
        assert_eq!(LogLevel::from_verbosity(3, true), LogLevel::Error);
    }
}
