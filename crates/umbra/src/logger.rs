use log::{Level, LevelFilter, Log, Metadata, Record};

/// Writes `[component] message` lines to stderr, where the component is the
/// first segment of the record target.
struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let component = component(record.target());
        match record.level() {
            Level::Error | Level::Warn => {
                eprintln!("[{component}] {}: {}", level_label(record.level()), record.args())
            }
            _ => eprintln!("[{component}] {}", record.args()),
        }
    }

    fn flush(&self) {}
}

fn component(target: &str) -> &str {
    target.split("::").next().unwrap_or(target)
}

fn level_label(level: Level) -> &'static str {
    match level {
        Level::Error => "error",
        Level::Warn => "warning",
        Level::Info => "info",
        Level::Debug => "debug",
        Level::Trace => "trace",
    }
}

pub fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_boxed_logger(Box::new(StderrLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}
