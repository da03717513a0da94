//! Logger configuration and structured output formatting.
//!
//! Column-aligned log lines with level colors, suitable for both terminals
//! and log shippers. Request-scoped records include the correlation id in
//! the message, written by the stages that have a request context in hand.

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Visible width of the `[LEVEL]` column including padding.
const LEVEL_FIELD_WIDTH: usize = 8;

/// Visible width of the `module` column including padding.
const TARGET_FIELD_WIDTH: usize = 24;

/// Configure and initialize the process-wide logger.
///
/// Format: `Mar 15 24 10:30:00 AM | [INFO ] | linkgate::proxy        | message`.
///
/// Honors `RUST_LOG` for level filtering and `NO_COLOR` to disable ANSI
/// colors. Call once at startup; calling twice panics (env_logger refuses
/// double initialization), which is the desired failure mode for a wiring
/// bug.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            let level_plain = record.level().to_string();
            // Padding is computed from the plain text so color codes never
            // skew the column width.
            let padding = LEVEL_FIELD_WIDTH.saturating_sub(level_plain.len() + 2).max(1);

            let level_display = if no_color {
                format!("[{}]", level_plain)
            } else {
                let color = match record.level() {
                    log::Level::Error => "\x1b[31m",
                    log::Level::Warn => "\x1b[33m",
                    log::Level::Info => "\x1b[32m",
                    log::Level::Debug => "\x1b[34m",
                    log::Level::Trace => "\x1b[35m",
                };
                format!("[{}{}\x1b[0m]", color, level_plain)
            };

            let target = record.target();
            let target_padding = TARGET_FIELD_WIDTH.saturating_sub(target.len()).max(1);

            writeln!(
                buf,
                "{} | {}{}| {}{}| {}",
                Local::now().format("%b %d %y %I:%M:%S %p"),
                level_display,
                " ".repeat(padding),
                target,
                " ".repeat(target_padding),
                record.args(),
            )
        })
        .init();
}

/// Test-friendly variant that ignores double initialization.
pub fn configure_logger_for_tests() {
    let _ = Builder::new().filter_level(LevelFilter::Debug).is_test(true).try_init();
}
