use crate::domain::settings::LogSettings;
use anyhow::Context;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub struct LoggingGuard {
    // Dropping the worker guard flushes and stops the file writer
    _guards: Vec<WorkerGuard>,
}

fn rotation_from_str(rotation: &str) -> Rotation {
    match rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// `RUST_LOG` wins over the configured level; an unparsable level falls
/// back to `info`.
fn build_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let file_layer = if settings.file_logging_enabled {
        std::fs::create_dir_all(&settings.log_dir)
            .with_context(|| format!("creating log directory {}", settings.log_dir))?;
        let file_appender = tracing_appender::rolling::RollingFileAppender::new(
            rotation_from_str(&settings.rotation),
            &settings.log_dir,
            &settings.file_name_prefix,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                // Callbacks arrive on the stack's dispatch thread
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(build_filter(settings))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::info!(level = %settings.level, "Logging initialized");

    Ok(LoggingGuard { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_names_are_case_insensitive() {
        assert_eq!(rotation_from_str("Hourly"), Rotation::HOURLY);
        assert_eq!(rotation_from_str("NEVER"), Rotation::NEVER);
        assert_eq!(rotation_from_str("weekly"), Rotation::DAILY);
    }

    #[test]
    fn file_logging_writes_into_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            file_logging_enabled: true,
            console_logging_enabled: false,
            log_dir: dir.path().join("logs").to_string_lossy().into_owned(),
            rotation: "never".to_string(),
            ..LogSettings::default()
        };

        // Another test binary may already own the global subscriber; the
        // directory is created before installation either way.
        let _ = init_logger(&settings);
        assert!(dir.path().join("logs").is_dir());
    }
}
