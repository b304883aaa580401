//! Logging setup
//!
//! Console output as `timestamp [LEVEL] component: message`, where the component
//! is the protocol layer (frame, codec, session, ...), or JSON lines.
//! `RUST_LOG` wins over the configured level when set.

use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LogConfig;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Tag and ANSI colour per level
fn level_style(level: &Level) -> (&'static str, &'static str) {
    match *level {
        Level::TRACE => ("TRACE", "\x1b[35m"),
        Level::DEBUG => ("DEBUG", "\x1b[34m"),
        Level::INFO => ("INFO", "\x1b[32m"),
        Level::WARN => ("WARN", "\x1b[33m"),
        Level::ERROR => ("ERROR", "\x1b[31m"),
    }
}

/// Protocol layer that emitted an event: `frame` for `voltage_givenergy::frame`.
/// Targets outside this crate are kept whole.
fn component(target: &str) -> &str {
    target.strip_prefix("voltage_givenergy::").unwrap_or(target)
}

/// `2025-12-02T00:50:44.809123Z [WARN] frame: Frame sync lost, ...`
struct ComponentFormat;

impl<S, N> FormatEvent<S, N> for ComponentFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let (tag, color) = level_style(metadata.level());
        write!(writer, "{} ", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        if writer.has_ansi_escapes() {
            write!(writer, "{}[{}]\x1b[0m ", color, tag)?;
        } else {
            write!(writer, "[{}] ", tag)?;
        }
        write!(writer, "{}: ", component(metadata.target()))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter from `RUST_LOG` when present, otherwise from the configured level
fn build_filter(level: &str, rust_log: Option<String>) -> Result<EnvFilter, Box<dyn std::error::Error>> {
    let directives = rust_log
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| level.to_string());
    EnvFilter::try_new(&directives).map_err(|e| format!("Invalid log level '{}': {}", directives, e).into())
}

/// Install the global subscriber.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = build_filter(&config.level, std::env::var("RUST_LOG").ok())?;
    let (reload_filter, handle) = reload::Layer::new(filter);

    let output = if config.json {
        fmt::layer()
            .json()
            .with_level(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(true)
            .event_format(ComponentFormat)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(output)
        .try_init()?;

    let _ = FILTER_HANDLE.set(handle);
    tracing::debug!("Logging initialised (json={})", config.json);
    Ok(())
}

/// Change the active filter, e.g. `debug` or `info,voltage_givenergy=trace`
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;
    let filter = EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
    handle
        .reload(filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;
    tracing::info!("Log level changed to: {}", level);
    Ok(())
}
