//! Debug log backend for the `log` facade.
//!
//! Writes either to stderr or to a configured file through an internal
//! buffer. File output is buffered so the data path never blocks on disk;
//! the admin thread's timing wheel calls `log::logger().flush()` on a
//! recurring event, and teardown flushes once more.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use log::{LevelFilter, Metadata, Record};

use rcache_core::time;

enum Sink {
    Stderr,
    File(BufWriter<File>),
}

pub struct DebugLog {
    level: LevelFilter,
    sink: Mutex<Sink>,
}

impl DebugLog {
    fn new(file: Option<&Path>, level: LevelFilter) -> io::Result<DebugLog> {
        let sink = match file {
            Some(path) => {
                let f = OpenOptions::new().create(true).append(true).open(path)?;
                Sink::File(BufWriter::new(f))
            }
            None => Sink::Stderr,
        };
        Ok(DebugLog {
            level,
            sink: Mutex::new(sink),
        })
    }
}

impl log::Log for DebugLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        let (y, mon, d, h, min, s) = time::unix_to_civil(time::now_unix());
        let line = format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02} {:<5} {}: {}\n",
            y,
            mon,
            d,
            h,
            min,
            s,
            record.level(),
            record.target(),
            record.args()
        );
        let _ = match &mut *sink {
            Sink::Stderr => io::stderr().write_all(line.as_bytes()),
            Sink::File(w) => w.write_all(line.as_bytes()),
        };
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = match &mut *sink {
                Sink::Stderr => io::stderr().flush(),
                Sink::File(w) => w.flush(),
            };
        }
    }
}

/// Parse a config-file log level name.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// Install the process-wide logger. Call once, early.
pub fn setup(file: Option<&Path>, level: LevelFilter) -> io::Result<()> {
    let logger = DebugLog::new(file, level)?;
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info"), Some(LevelFilter::Info));
        assert_eq!(parse_level("trace"), Some(LevelFilter::Trace));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_file_sink_writes_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        let logger = DebugLog::new(Some(&path), LevelFilter::Info).unwrap();

        logger.log(
            &log::Record::builder()
                .args(format_args!("hello from the cache"))
                .level(log::Level::Info)
                .target("test")
                .build(),
        );
        logger.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello from the cache"));
        assert!(contents.contains("INFO"));
    }

    #[test]
    fn test_level_filters_out_verbose_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        let logger = DebugLog::new(Some(&path), LevelFilter::Warn).unwrap();

        logger.log(
            &log::Record::builder()
                .args(format_args!("too chatty"))
                .level(log::Level::Debug)
                .target("test")
                .build(),
        );
        logger.flush();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
