use anyhow::{anyhow, Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

pub const DEFAULT_FILTER: &str = "info,modelingest=debug,modelingest_lib=debug";

/// Stderr plus a `modelingest.log` file in `log_dir`. `RUST_LOG` overrides
/// `filter`. Keep the returned guard alive until exit or the file misses its
/// tail.
pub fn init_logs(filter: Option<&str>, log_dir: &str) -> Result<WorkerGuard> {
    let filter = filter.unwrap_or(DEFAULT_FILTER);
    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let trace_file = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix("modelingest.log")
        .build(log_dir)
        .with_context(|| format!("opening log file in {}", log_dir))?;
    let (file_writer, guard) = tracing_appender::non_blocking(trace_file);

    let file_layer = tracing_subscriber::fmt::Layer::new()
        .with_writer(file_writer)
        .with_file(true)
        .with_ansi(false)
        .with_line_number(true)
        .with_target(true)
        .with_level(true)
        .compact()
        .with_filter(env_filter());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .compact()
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow!("logging already initialised: {}", e))?;

    Ok(guard)
}

/// Stderr only, for tests and embedding. Ignores a second call.
pub fn init_test_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(DEFAULT_FILTER))
        .without_time()
        .with_test_writer()
        .compact()
        .try_init();
}
