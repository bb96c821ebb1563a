//! Tracing initialisation for the foldrun binary.
//!
//! Two layers are installed: a console layer filtered by `RUST_LOG`
//! (falling back to the supplied level), and an optional plain-text layer
//! appending to a log file at its own level.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Log files at or above this size are rolled over at startup.
pub const MAX_LOG_BYTES: u64 = 25 * 1024 * 1024;

/// Where and how verbosely to write the log file.
#[derive(Debug, Clone)]
pub struct FileLog {
    pub path: PathBuf,
    pub level: Level,
}

/// Move `path` to `<path>.1` if it has grown past [`MAX_LOG_BYTES`].
pub fn roll_log_file(path: &Path, max_bytes: u64) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() >= max_bytes => {
            let mut rolled = path.as_os_str().to_owned();
            rolled.push(".1");
            fs::rename(path, PathBuf::from(rolled))?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON on the console.
/// * `level`: console verbosity when `RUST_LOG` is not set.
/// * `file`: optional log file layer.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level, file: Option<&FileLog>) -> io::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let console: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
            .json()
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
            .boxed()
    };

    let file_layer = match file {
        Some(cfg) => {
            roll_log_file(&cfg.path, MAX_LOG_BYTES)?;
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&cfg.path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(handle))
                    .with_filter(LevelFilter::from_level(cfg.level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console.with_filter(env_filter))
        .with(file_layer)
        .try_init()
        .ok();

    Ok(())
}
