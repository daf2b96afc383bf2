//! # Logging & Tracing Infrastructure
//!
//! Configures `tracing-subscriber` for the audiobook core:
//! - Pretty, JSON and compact output formats
//! - Per-crate filtering with quiet defaults for HTTP and SQL dependencies
//! - Redaction of tokens and signed content URLs
//! - Mirroring of events into a host [`LoggerSink`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::time::LogLevel;
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Compact)
//!     .with_level(LogLevel::Debug)
//!     .with_logger_sink(host_sink);
//!
//! init_logging(config)?;
//! tracing::info!(item_id = "li_1", "Book opened");
//! ```
//!
//! ## LoggerSink integration
//!
//! When a sink is configured, every event that survives filtering is
//! converted into a [`LogEntry`] and forwarded on the current tokio runtime
//! (or synchronously when called outside one). With redaction enabled,
//! sensitive field values are masked before they reach the sink.

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

/// Crates whose level follows [`LoggingConfig::level`]; everything else is `warn`.
const WORKSPACE_TARGETS: &[&str] = &[
    "core_runtime",
    "core_library",
    "core_metadata",
    "core_playback",
    "core_sync",
    "core_service",
    "provider_audiobookshelf",
    "bridge_desktop",
];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact format for production
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Logging configuration
#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Minimum log level for workspace crates
    pub level: LogLevel,
    /// Mask tokens and URL query strings in forwarded entries
    pub redact_sensitive: bool,
    /// Custom filter string (e.g., "core_playback=trace,core_sync=debug")
    pub filter: Option<String>,
    /// Optional logger sink for forwarding logs to host
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Include span context (`open_book`, `flush`, ...) in console output
    pub enable_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            redact_sensitive: true,
            filter: None,
            logger_sink: None,
            enable_spans: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_redaction(mut self, redact: bool) -> Self {
        self.redact_sensitive = redact;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("redact_sensitive", &self.redact_sensitive)
            .field("filter", &self.filter)
            .field("has_logger_sink", &self.logger_sink.is_some())
            .finish()
    }
}

/// Initialize the logging system
///
/// Call once during startup. A second call returns
/// [`Error::LoggingInstalled`]; an invalid filter returns [`Error::Config`].
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let sink_layer = LoggerSinkLayer::new(config.logger_sink.clone(), config.redact_sensitive);
    let registry = tracing_subscriber::registry().with(filter).with(sink_layer);

    let span_events = if config.enable_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    // stdout belongs to the host.
    let console = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(console.pretty().with_span_events(span_events))
            .try_init(),
        LogFormat::Json => registry
            .with(
                console
                    .json()
                    .flatten_event(true)
                    .with_current_span(config.enable_spans)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(console.compact().with_span_events(span_events))
            .try_init(),
    };

    result.map_err(|e| Error::LoggingInstalled(e.to_string()))
}

fn level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let filter_string = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            let level = level_str(config.level);
            let mut directives = vec!["warn".to_string()];
            directives.extend(WORKSPACE_TARGETS.iter().map(|t| format!("{}={}", t, level)));
            directives.push("h2=warn,hyper=warn,reqwest=warn,sqlx=warn".to_string());
            directives.join(",")
        }
    };

    EnvFilter::try_new(filter_string)
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

/// Layer that forwards events to a `LoggerSink` implementation.
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
    redact: bool,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>, redact: bool) -> Self {
        Self { sink, redact }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let metadata = event.metadata();
        let level = tracing_level_to_log_level(*metadata.level());
        if level < sink.min_level() {
            return;
        }

        let mut visitor = SinkVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .unwrap_or_else(|| metadata.name().to_string());

        let mut entry = LogEntry::new(level, metadata.target(), message);
        for (key, value) in visitor.fields {
            let value = if self.redact {
                redact_if_sensitive(&key, &value)
            } else {
                value
            };
            entry = entry.with_field(key, value);
        }

        if let Some(span) = ctx.lookup_current() {
            entry = entry.with_span_id(span.name());
        }

        let sink = Arc::clone(sink);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = sink.log(entry).await {
                        eprintln!("LoggerSink error: {}", err);
                    }
                });
            }
            Err(_) => {
                if let Err(err) = futures::executor::block_on(sink.log(entry)) {
                    eprintln!("LoggerSink error: {}", err);
                }
            }
        }
    }
}

#[derive(Default)]
struct SinkVisitor {
    message: Option<String>,
    fields: HashMap<String, String>,
}

impl SinkVisitor {
    fn record_value(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for SinkVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_value(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{:?}", value));
    }
}

fn tracing_level_to_log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Mask a field value when its name suggests a credential, and strip query
/// strings from URLs (content URLs carry `?token=` on most servers).
///
/// ```ignore
/// info!(url = %redact_if_sensitive("url", &track.content_url), "Loading track");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    const SENSITIVE_FIELDS: &[&str] = &[
        "token",
        "password",
        "secret",
        "api_key",
        "authorization",
        "bearer",
    ];

    let field_lower = field_name.to_lowercase();
    if SENSITIVE_FIELDS.iter().any(|&f| field_lower.contains(f)) {
        "[REDACTED]".to_string()
    } else if value.starts_with("http://") || value.starts_with("https://") {
        redact_url(value).to_string()
    } else {
        value.to_string()
    }
}

/// Drop the query string and fragment of a URL.
pub fn redact_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}
