use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fmt;

pub fn line(level: Level, args: fmt::Arguments) -> String {
    let now = Local::now();
    format!("[{}] {} {}", now.format("%Y-%m-%d %H:%M:%S"), level, args)
}

/// Console backend for the `log` facade the library logs through.
pub struct ConsoleLogger {
    level: LevelFilter,
}

impl ConsoleLogger {
    pub fn new(level: LevelFilter) -> Self {
        Self { level }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{}", line(record.level(), *record.args()));
        }
    }

    fn flush(&self) {}
}

/// Installs [`ConsoleLogger`] as the global logger. Fails if another logger was installed first.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(ConsoleLogger::new(level)))?;
    log::set_max_level(level);
    Ok(())
}
