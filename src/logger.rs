//! Console logger for the simulator binary.
//!
//! Level tags are colored; the level is read from the `LOG` environment
//! variable (`ERROR`, `WARN`, `INFO`, `DEBUG`, `TRACE`), defaulting to `WARN`.
//!
//! ```text
//! LEVEL [TH name] [module] [file.rs:42] message
//! ```

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31,
            Level::Warn => 93,
            Level::Info => 34,
            Level::Debug => 32,
            Level::Trace => 90,
        };
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("-");
        let file = record
            .file()
            .map(|f| f.rsplit('/').next().unwrap_or(f))
            .unwrap_or("unknown");
        eprintln!(
            "\u{1B}[{}m{:>5} [TH {}] [{}] [{}:{}] {}\u{1B}[0m",
            color,
            record.level(),
            thread_name,
            record.target(),
            file,
            record.line().unwrap_or(0),
            record.args()
        );
    }

    fn flush(&self) {}
}

fn level_from(value: Option<&str>) -> LevelFilter {
    match value {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        Some("OFF") => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}

/// Install the logger. `verbose` raises the floor to `INFO`.
pub fn init(verbose: bool) -> Result<(), SetLoggerError> {
    static LOGGER: SimpleLogger = SimpleLogger;

    log::set_logger(&LOGGER)?;
    let level = level_from(std::env::var("LOG").ok().as_deref());
    log::set_max_level(if verbose { level.max(LevelFilter::Info) } else { level });
    Ok(())
}
