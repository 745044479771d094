use crate::domain::settings::LogSettings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const BLUETOOTH_TARGET: &str = "heart_monitor::infrastructure::bluetooth";
const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

pub struct LoggingGuard {
    // Dropping the guard flushes and stops the file writer
    _guards: Vec<WorkerGuard>,
}

fn rotation(name: &str) -> Rotation {
    match name.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn level(name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    LEVELS.contains(&name.as_str()).then_some(name)
}

/// Filter directives derived from the settings, the global level first.
/// Unknown level names fall back to "info" for the global level and are
/// dropped for the Bluetooth override.
pub fn filter_directives(settings: &LogSettings) -> String {
    let mut directives = level(&settings.level).unwrap_or_else(|| "info".to_string());
    if let Some(bluetooth) = settings.bluetooth_level.as_deref().and_then(level) {
        directives.push_str(&format!(",{}={}", BLUETOOTH_TARGET, bluetooth));
    }
    directives
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    // RUST_LOG wins over the settings file
    let directives = filter_directives(settings);
    let level_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Status lines go to stdout, so logs use stderr
    let console_layer = if settings.console_logging_enabled {
        Some(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target)
                .with_ansi(settings.ansi_colors),
        )
    } else {
        None
    };

    let file_layer = if settings.file_logging_enabled {
        let file_appender = RollingFileAppender::builder()
            .rotation(rotation(&settings.rotation))
            .filename_prefix(&settings.file_name_prefix)
            .filename_suffix("log")
            .build(&settings.log_dir)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        filter = %directives,
        log_dir = %settings.log_dir,
        file = settings.file_logging_enabled,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guards: guards })
}
