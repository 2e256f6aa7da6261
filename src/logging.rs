//! Tracing initialization: a global subscriber with an env-driven filter, a pretty/JSON
//! stdout-format switch, and a daily-rolling file layer alongside it.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Keeps the non-blocking file writer alive for the lifetime of the process.
static GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install a global `tracing` subscriber. `RUST_LOG` (or `SYNAPSE_LOG`, checked first) controls
/// the filter; defaults to `info` when neither is set. Writes to stdout in `format`, and to a
/// `synapse.log` file under `log_dir` (or the platform data directory when `None`) rolled daily.
pub fn init(format: LogFormat, log_dir: Option<PathBuf>) {
    let filter = EnvFilter::try_from_env("SYNAPSE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = log_dir.unwrap_or_else(resolve_log_dir);
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "synapse.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = GUARD.set(guard);
    let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);

    let result = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(file_layer)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(file_layer)
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

fn resolve_log_dir() -> PathBuf {
    dirs::data_local_dir().map(|d| d.join("synapse")).unwrap_or_else(std::env::temp_dir)
}
