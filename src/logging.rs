use std::io::Write;

use chrono::Local;
use log::{LevelFilter, Record};
use serde::Serialize;

/// One log line in machine-readable form
#[derive(Debug, Serialize, Clone)]
pub struct LogMessage {
    level: String,
    target: String,
    message: String,
    timestamp: String,
}

impl LogMessage {
    fn from_record(record: &Record) -> Self {
        Self {
            level: record.level().to_string(),
            target: record.target().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }

    fn to_text_line(&self) -> String {
        format!("{} [{:<5}] {}: {}", self.timestamp, self.level, self.target, self.message)
    }
}

/// Installs the env_logger backend. `RUST_LOG` takes precedence over `level`.
/// With `json` every record is written as one JSON object per line.
pub fn init_logging(level: LevelFilter, json: bool) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(move |buf, record| {
            let message = LogMessage::from_record(record);
            if json {
                match serde_json::to_string(&message) {
                    Ok(line) => writeln!(buf, "{}", line),
                    Err(_) => writeln!(buf, "{}", message.to_text_line()),
                }
            } else {
                writeln!(buf, "{}", message.to_text_line())
            }
        })
        .try_init();

    if let Err(e) = result {
        eprintln!("Logger already initialized: {}", e);
    }
}
