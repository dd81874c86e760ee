use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::frontend::Logger;
use crate::severity::Severity;

/// Routes records of the `log` facade into a [`Logger`].
///
/// Records are formatted on the calling thread and pushed as dynamic text,
/// so this path copies; code that logs on a hot path should use the
/// `log_*!` macros directly.
///
/// Levels map as: `Error` to error, `Warn` to warning, `Info` to notice,
/// `Debug` to trace and `Trace` to debug.
pub struct LogBridge {
    logger: Logger,
    max_level: LevelFilter,
}

impl LogBridge {
    pub fn new(logger: Logger, max_level: LevelFilter) -> Self {
        Self { logger, max_level }
    }

    /// Installs the bridge as the global `log` logger.
    pub fn install(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

pub fn severity_of(level: Level) -> Severity {
    match level {
        Level::Error => Severity::Error,
        Level::Warn => Severity::Warning,
        Level::Info => Severity::Notice,
        Level::Debug => Severity::Trace,
        Level::Trace => Severity::Debug,
    }
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level && self.logger.accepts(severity_of(metadata.level()))
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let severity = severity_of(record.level());
        match record.args().as_str() {
            Some(text) if record.target().is_empty() => {
                self.logger.push_dynamic(severity, text);
            }
            _ => {
                let text = format!("{}: {}", record.target(), record.args());
                self.logger.push_dynamic(severity, &text);
            }
        }
    }

    fn flush(&self) {}
}
