//! Logging initialization
//!
//! Human-readable tracing output on stderr, duplicated to a per-run log
//! file under the managed temp root so daemon runs leave an audit trail.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize tracing. Returns the path of the duplicated log file when one
/// could be created.
pub fn init_logging(verbose: u8, log_dir: Option<&Path>) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2);

    let (file_layer, log_path) = match log_dir {
        Some(dir) => match open_run_log(dir) {
            Ok((file, path)) => {
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false);
                (Some(layer), Some(path))
            }
            Err(e) => {
                eprintln!("warning: could not open run log under {}: {e}", dir.display());
                (None, None)
            }
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    log_path
}

fn open_run_log(dir: &Path) -> std::io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let path = dir.join(format!("run_{stamp}.log"));
    let file = File::create(&path)?;
    Ok((file, path))
}
