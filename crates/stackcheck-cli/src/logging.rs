//! Logging initialisation.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Level used for `-v` counts; with no flag the configured level applies.
fn level(configured: &str, verbosity: u8) -> String {
    match verbosity {
        0 => configured.to_ascii_lowercase(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install a console layer on stderr and a file layer writing to `log_file`.
///
/// `RUST_LOG` takes precedence over both `configured` and `verbosity`. The
/// returned guard flushes the file writer when dropped, so keep it alive for
/// the whole run.
pub fn init_logging(
    configured: &str,
    verbosity: u8,
    json: bool,
    log_file: &Path,
) -> Result<WorkerGuard> {
    let level = level(configured, verbosity);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&level)
            .with_context(|| format!("Invalid log level '{}'", level))?,
    };

    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .with_context(|| format!("Log file path '{}' has no file name", log_file.display()))?;
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory '{}'", directory.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

    // Each branch builds its own layers; their types depend on the layers
    // below them.
    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(fmt::layer().json().with_ansi(false).with_writer(writer))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .try_init()
    };
    installed.context("Failed to install the log subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_overrides_configured_level() {
        assert_eq!(level("WARN", 0), "warn");
        assert_eq!(level("warn", 1), "info");
        assert_eq!(level("warn", 2), "debug");
        assert_eq!(level("warn", 7), "trace");
    }
}
