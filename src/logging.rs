use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ChurnError, Result};

pub const DEFAULT_FILTER: &str = "churn_features=info";

/// `log_<YYYY-mm-dd_HH-MM-SS>.log` under `dir`.
pub fn log_file_path(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!("log_{stamp}.log"))
}

/// Install the global subscriber: stderr plus, when `dir` is given, a plain
/// text file for this run. `RUST_LOG` overrides the default filter.
///
/// Returns the log file path.
pub fn init(dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let (file_layer, path) = match dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = log_file_path(dir);
            let file = File::create(&path)?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| ChurnError::General(format!("Failed to initialize tracing: {e}")))?;

    Ok(path)
}
