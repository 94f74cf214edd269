use chrono::{DateTime, Datelike, Local};
use colored::Colorize;
use log::{Level, LevelFilter};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Initialises the global logger.
///
/// Without a file, records go to stderr with colored level tags. With a file,
/// records are appended as `[YYYY-mm-dd HH:MM:SS] [LEVEL] message`.
pub fn init_logger(level: LevelFilter, log_file: Option<&Path>) {
    let mut builder = env_logger::Builder::new();
    builder.filter(None, level);

    let file = log_file.and_then(|path| {
        rotate_log(path);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("Failed to open log file {:?}: {}", path, e))
            .ok()
    });

    match file {
        Some(file) => {
            builder
                .target(env_logger::Target::Pipe(Box::new(file)))
                .format(|buf, record| {
                    writeln!(
                        buf,
                        "{} [{}] {}",
                        Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                        record.level(),
                        record.args()
                    )
                });
        }
        None => {
            builder.format(|buf, record| {
                let level = match record.level() {
                    Level::Error => "ERROR".red(),
                    Level::Warn => "WARN".yellow(),
                    Level::Info => "INFO".green(),
                    Level::Debug => "DEBUG".blue(),
                    Level::Trace => "TRACE".purple(),
                };
                writeln!(buf, "[{}] - {}", level, record.args())
            });
        }
    }

    // A second initialisation (tests, re-entry from a front end) is not an error.
    let _ = builder.try_init();
}

/// Moves a log written during a previous month to `vpn_connect_YYYY_MM.log`
/// next to it. An existing archive for that month is never overwritten.
pub fn rotate_log(path: &Path) {
    let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
        return;
    };
    let modified: DateTime<Local> = modified.into();
    let now = Local::now();
    if modified.month() == now.month() && modified.year() == now.year() {
        return;
    }

    let Some(dir) = path.parent() else { return };
    let archive = dir.join(format!("vpn_connect_{}.log", modified.format("%Y_%m")));
    if archive.exists() {
        return;
    }
    if let Err(e) = std::fs::rename(path, &archive) {
        eprintln!("Log rotation error: {}", e);
    }
}
