use chrono::Local;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::File;
use std::path::Path;

/// log file name like `prefix_2024-05-01_12-30-00.log`
pub fn timestamped_log_name(prefix: &str) -> String {
    let date_and_time = Local::now().format("%Y-%m-%d_%H-%M-%S");
    format!("{}_{}.log", prefix, date_and_time)
}

/// Build the logger list for the given settings; a file that cannot be created is skipped.
pub fn build_loggers(
    level: LevelFilter,
    log_file: Option<&Path>,
    console: bool,
) -> Vec<Box<dyn SharedLogger>> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    if console {
        loggers.push(TermLogger::new(
            level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }
    if let Some(path) = log_file {
        match File::create(path) {
            Ok(file) => loggers.push(WriteLogger::new(level, Config::default(), file)),
            Err(e) => eprintln!("cannot create log file {}: {}", path.display(), e),
        }
    }
    loggers
}

/// Install the global logger. Returns false when nothing was installed
/// (no sink requested, or a logger is already set for this process).
pub fn init_logger(level: LevelFilter, log_file: Option<&Path>, console: bool) -> bool {
    let loggers = build_loggers(level, log_file, console);
    if loggers.is_empty() {
        return false;
    }
    CombinedLogger::init(loggers).is_ok()
}
