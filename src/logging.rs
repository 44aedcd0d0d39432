use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes logging with console output and a daily-rolling JSON file.
///
/// The returned guard must be kept alive for the life of the process so the
/// file writer flushes on exit.
pub fn init_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    let log_dir = log_dir.as_ref();
    let file = fs::create_dir_all(log_dir).ok().map(|_| {
        let file_appender = tracing_appender::rolling::daily(log_dir, "observatory.log");
        tracing_appender::non_blocking(file_appender)
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("observatory=info"));

    match file {
        Some((writer, guard)) => {
            let file_layer = fmt::layer().json().with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init();
            None
        }
    }
}
