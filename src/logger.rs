use log::{Level, LevelFilter, Metadata, Record};

struct Logger;

static LOGGER: Logger = Logger;

const TIMESTAMP: &str = "%Y/%m/%d %H:%M:%S%.6f";

/// Sends every record to stderr. `debug` also lets the mqtt library through.
pub fn init(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn is_own(target: &str) -> bool {
    target.starts_with(env!("CARGO_CRATE_NAME"))
}

fn format(record: &Record) -> String {
    let now = chrono::Local::now().format(TIMESTAMP);
    if !is_own(record.target()) {
        format!("{} [{}] {}: {}", now, record.level(), record.target(), record.args())
    } else if record.level() == Level::Info {
        format!("{} {}", now, record.args())
    } else {
        format!("{} [{}] {}", now, record.level(), record.args())
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
            && (is_own(metadata.target()) || log::max_level() >= LevelFilter::Debug)
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}", format(record));
        }
    }

    fn flush(&self) {}
}
