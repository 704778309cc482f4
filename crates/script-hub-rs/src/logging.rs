use crate::config::Config;
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber: a stdout layer, plus a plain-text layer
/// appending to the log file when one is configured. Returns the file in use.
pub fn init_logging(config: &Config) -> Option<PathBuf> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level(config)));

    let file = log_path(config).and_then(|path| match open_append(&path) {
        Ok(file) => Some((path, file)),
        Err(err) => {
            eprintln!("log_file_error: {}: {err}", path.display());
            None
        }
    });
    let (path, file_layer) = match file {
        Some((path, file)) => (
            Some(path),
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stdout))
        .with(file_layer)
        .try_init()
        .ok()
        .and(path)
}

fn log_level(config: &Config) -> String {
    if config.debug {
        return "debug".to_string();
    }
    std::env::var("SCRIPT_HUB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

/// `None` when either the directory or the file name is empty.
pub fn log_path(config: &Config) -> Option<PathBuf> {
    if config.log_dir.trim().is_empty() || config.log_file.trim().is_empty() {
        return None;
    }
    Some(Path::new(&config.log_dir).join(&config.log_file))
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
