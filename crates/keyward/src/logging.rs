#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, WriteLogger};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use keyward_platform::AppPaths;

/// Open the log for appending. A log past `max_size` is first moved to
/// `{name}.1`, replacing any earlier rotation.
fn open_log(path: &Path, max_size: u64) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::metadata(path).is_ok_and(|metadata| metadata.len() > max_size) {
        std::fs::rename(path, previous_log(path))?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn previous_log(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".1");
    PathBuf::from(name)
}

/// Install the global logger. Returns the log file path when file logging is
/// active.
pub fn init_logging(paths: &AppPaths, debug_enabled: bool, max_log_size: u64) -> Option<PathBuf> {
    let log_path = paths.log_file();
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("keyward")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    #[cfg(debug_assertions)]
    loggers.push(TermLogger::new(
        LevelFilter::Debug,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ));

    let file_logging = match open_log(&log_path, max_log_size) {
        Ok(file) => {
            loggers.push(WriteLogger::new(LevelFilter::Debug, config, file));
            true
        }
        Err(error) => {
            eprintln!("Could not open log file {}: {error}", log_path.display());
            false
        }
    };

    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }
    set_logging_enabled(debug_enabled);

    if debug_enabled {
        log::info!("Debug logging enabled, log file: {}", log_path.display());
    }
    file_logging.then_some(log_path)
}

pub fn set_logging_enabled(enabled: bool) {
    log::set_max_level(if enabled {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    });
}
