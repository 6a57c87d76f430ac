//! Tracing setup for the CLI.
//!
//! Logs go to stdout through a compact formatter and, when a file target can
//! be opened, to a non-blocking file layer as well. `CHUNKMILL_LOG_FILE`
//! overrides the default target of `logs/chunkmill.log`.
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Keeps the non-blocking writer's flush thread alive for the process lifetime.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the tracing subscriber. `RUST_LOG` controls filtering, defaulting
/// to `info`. Call once at startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry().with(filter).with(stdout);

    match file_writer() {
        Some(writer) => {
            let file = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .compact();
            registry.with(file).init();
        }
        None => registry.init(),
    }
}

/// Open the log file target, falling back to stdout-only on failure.
fn file_writer() -> Option<NonBlocking> {
    let path = std::env::var("CHUNKMILL_LOG_FILE")
        .unwrap_or_else(|_| "logs/chunkmill.log".to_string());
    if let Some(parent) = Path::new(&path).parent()
        && !parent.as_os_str().is_empty()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to open log file {path}: {err}");
            return None;
        }
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let _ = LOG_GUARD.set(guard);
    Some(non_blocking)
}
