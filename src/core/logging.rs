use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::core::config::AppPaths;

const BOOTSTRAP_LEVEL: &str = "info";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Installs the global subscriber: stdout plus a daily rolling `server.log`.
///
/// Runs before configuration is loaded so config warnings are not lost. The
/// filter starts from `RUST_LOG` (or `info`) and can be narrowed later with
/// [`apply_level`].
pub fn init(paths: &AppPaths) {
    let log_dir = &paths.log_dir;
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, "server.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(BOOTSTRAP_LEVEL));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(non_blocking);

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
    if installed.is_ok() {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Switches the filter to the configured `logging.level`.
///
/// Returns `false` without touching the filter when `RUST_LOG` is set, the
/// level does not parse, or [`init`] did not install the subscriber.
pub fn apply_level(level: &str) -> bool {
    let rust_log_set = std::env::var_os("RUST_LOG").is_some();
    let Some(filter) = configured_filter(rust_log_set, level) else {
        return false;
    };
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };

    match handle.reload(filter) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!("Failed to apply logging.level '{}': {}", level, err);
            false
        }
    }
}

fn configured_filter(rust_log_set: bool, level: &str) -> Option<EnvFilter> {
    if rust_log_set {
        return None;
    }
    match EnvFilter::try_new(level) {
        Ok(filter) => Some(filter),
        Err(err) => {
            tracing::warn!("Ignoring logging.level '{}': {}", level, err);
            None
        }
    }
}
