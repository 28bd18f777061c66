//! # Logging & Tracing Infrastructure
//!
//! Structured logging on top of `tracing`, supporting:
//! - JSON, pretty and compact output
//! - Per-crate filtering
//! - Locator redaction (query strings, credentials, directories)
//! - Mirroring events into a host [`LoggerSink`]
//!
//! Every stream-scoped event carries a `stream_key` field. The sink layer
//! lifts that field into [`LogEntry::stream_key`] so hosts can split logs per
//! stream without parsing messages.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_traits::log::{LogLevel, MemoryLogger};
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use std::sync::Arc;
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Compact)
//!     .with_level(LogLevel::Debug)
//!     .with_logger_sink(Arc::new(MemoryLogger::default()));
//! init_logging(config)?;
//!
//! tracing::info!(stream_key = "audio_42", "Stream opened");
//! ```

use crate::error::{Error, Result};

use bridge_traits::log::{LogEntry, LogLevel, LoggerSink};

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

/// Field name that identifies the stream an event belongs to.
pub const STREAM_KEY_FIELD: &str = "stream_key";

static REDACT_LOCATORS: AtomicBool = AtomicBool::new(true);

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact single-line format
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
    /// Minimum log level for the pipeline crates
    pub level: LogLevel,
    /// Redact source locators passed through [`display_locator`]
    pub redact_locators: bool,
    /// Custom filter string (e.g., "core_playback=trace,bridge_desktop=debug")
    pub filter: Option<String>,
    /// Optional logger sink for forwarding logs to host
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            redact_locators: true,
            filter: None,
            logger_sink: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("redact_locators", &self.redact_locators)
            .field("filter", &self.filter)
            .field("has_logger_sink", &self.logger_sink.is_some())
            .finish()
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

    /// Enable or disable locator redaction
    pub fn with_locator_redaction(mut self, redact: bool) -> Self {
        self.redact_locators = redact;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set logger sink for host integration
    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

/// Initialize the logging system
///
/// Call once during application startup. Subsequent calls return an error
/// because a global subscriber is already installed.
///
/// # Errors
///
/// Returns [`Error::Config`] if the filter string is invalid or logging was
/// already initialized.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    REDACT_LOCATORS.store(config.redact_locators, Ordering::Relaxed);

    let sink_layer = LoggerSinkLayer::new(config.logger_sink.clone());
    let registry = tracing_subscriber::registry().with(filter).with(sink_layer);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(config.display_target)
                    .with_thread_ids(config.display_thread_info)
                    .with_thread_names(config.display_thread_info)
                    .with_span_events(if config.enable_spans {
                        tracing_subscriber::fmt::format::FmtSpan::ACTIVE
                    } else {
                        tracing_subscriber::fmt::format::FmtSpan::NONE
                    })
                    .with_writer(io::stdout),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(config.enable_spans)
                    .with_span_list(config.enable_spans)
                    .with_target(config.display_target)
                    .with_thread_ids(config.display_thread_info)
                    .with_thread_names(config.display_thread_info)
                    .with_writer(io::stdout),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(config.display_target)
                    .with_thread_ids(config.display_thread_info)
                    .with_thread_names(config.display_thread_info)
                    .with_writer(io::stdout),
            )
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let filter_string = match &config.filter {
        Some(custom_filter) => custom_filter.clone(),
        None => {
            // Pipeline crates at the configured level, HTTP stack at warn
            let level = config.level.as_directive();
            let crates = [
                "core_runtime",
                "core_playback",
                "bridge_traits",
                "bridge_desktop",
                "stream_pipeline_workspace",
            ];
            let mut directives: Vec<String> = crates
                .iter()
                .map(|name| format!("{}={}", name, level))
                .collect();
            directives.extend(["h2=warn", "hyper=warn", "reqwest=warn"].map(String::from));
            directives.join(",")
        }
    };

    EnvFilter::try_new(filter_string)
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

/// Layer that forwards events to a `LoggerSink` implementation.
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self { sink }
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
        if let Some(stream_key) = visitor.stream_key {
            entry = entry.with_stream_key(stream_key);
        }
        for (key, value) in visitor.fields {
            entry = entry.with_field(key, value);
        }
        if let Some(span) = ctx.lookup_current() {
            entry = entry.with_span(span.name());
        }

        let sink = Arc::clone(sink);

        // Inside a runtime the sink must not block the emitting task.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = sink.log(entry).await {
                    eprintln!("LoggerSink error: {}", err);
                }
            });
            return;
        }

        if let Err(err) = futures::executor::block_on(async move { sink.log(entry).await }) {
            eprintln!("LoggerSink error: {}", err);
        }
    }
}

#[derive(Default)]
struct SinkVisitor {
    message: Option<String>,
    stream_key: Option<String>,
    fields: HashMap<String, String>,
}

impl SinkVisitor {
    fn record_value(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            STREAM_KEY_FIELD => self.stream_key = Some(value),
            name => {
                self.fields.insert(name.to_string(), value);
            }
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

/// Reduce a source locator to something safe to log.
///
/// URLs lose their credentials, query string and fragment; file paths are
/// reduced to their basename.
///
/// ```
/// use core_runtime::logging::redact_locator;
///
/// assert_eq!(
///     redact_locator("https://user:pw@cdn.example.com/a/ep1.mp3?sig=abc"),
///     "https://cdn.example.com/a/ep1.mp3"
/// );
/// assert_eq!(redact_locator("/home/me/Music/song.mp3"), "song.mp3");
/// ```
pub fn redact_locator(locator: &str) -> String {
    if let Some((scheme, rest)) = locator.split_once("://") {
        let rest = rest.split(['?', '#']).next().unwrap_or(rest);
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let host = authority.rsplit('@').next().unwrap_or(authority);
        return format!("{}://{}{}", scheme, host, path);
    }

    strip_path(locator).to_string()
}

/// Locator as it should appear in logs, honoring the configured redaction.
pub fn display_locator(locator: &str) -> Cow<'_, str> {
    if REDACT_LOCATORS.load(Ordering::Relaxed) {
        Cow::Owned(redact_locator(locator))
    } else {
        Cow::Borrowed(locator)
    }
}

/// Strip full file paths to basename only
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
