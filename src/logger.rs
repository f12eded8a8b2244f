use std::sync::OnceLock;

use chrono::{SecondsFormat, Utc};
use log::{LevelFilter, Metadata, Record};

static LOGGER: OnceLock<SimpleLogger> = OnceLock::new();

struct SimpleLogger {
    level: LevelFilter,
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!(
                "{} {:<5} {} - {}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let logger = LOGGER.get_or_init(|| SimpleLogger { level });
    log::set_logger(logger).map(|()| log::set_max_level(level))
}
