//! Structured JSONL logging for the Logos Delivery control plane
//!
//! # Features
//!
//! - **JSONL Output**: structured JSON lines on the console by default
//! - **Command Correlation**: every host command carries a `command_id`, sends
//!   also carry their `request_id` and `message_hash`
//! - **Node Context Injection**: spans are tagged with the node they belong to
//! - **File Rotation**: daily/hourly log rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```no_run
//! use delivery_logging::DeliverySubscriberBuilder;
//!
//! // JSONL to stderr at the host-requested level
//! let _guard = DeliverySubscriberBuilder::new()
//!     .with_level("debug")
//!     .try_init()
//!     .ok();
//! ```

pub mod config;
pub mod context;
pub mod correlation;
pub mod layers;

pub use config::{
    ConsoleFormat, FileConfig, FileRotation, JsonFields, LOG_DIR_VAR, LOG_FORMAT_VAR, LogConfig,
};
pub use context::{NodeContextData, NodeContextGuard};
pub use correlation::{CommandCorrelation, CorrelationExt, fields, spans};
pub use tracing_appender::non_blocking::WorkerGuard;

use tracing::Subscriber;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Errors raised while installing the subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,

    #[error("cannot open log file: {0}")]
    File(#[from] InitError),
}

/// Builder for configuring and initializing the delivery logging subscriber
///
/// By default console output uses JSONL format. Use
/// [`LogConfig::development`] for human-readable output.
#[derive(Debug, Default)]
pub struct DeliverySubscriberBuilder {
    config: LogConfig,
}

impl DeliverySubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the filter directive, e.g. `"info"` or `"delivery_node=debug"`
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.filter = level.into();
        self
    }

    /// Console format, `None` to disable console output
    pub fn with_console(mut self, format: Option<ConsoleFormat>) -> Self {
        self.config.console = format;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber as the global default
    ///
    /// The returned guard flushes file output; keep it alive for as long as
    /// logging is needed. Fails with [`LoggingError::AlreadyInitialized`]
    /// when another subscriber got there first.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.filter));
        let fields = self.config.fields;

        let console_layer = self.config.console.map(|format| match format {
            ConsoleFormat::Json => json_layer(fields, std::io::stderr),
            ConsoleFormat::Pretty | ConsoleFormat::Color => tracing_subscriber::fmt::layer()
                .with_ansi(format == ConsoleFormat::Color)
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed(),
        });

        let (file_layer, guard) = match self.config.file.as_ref() {
            Some(file_config) => {
                let (writer, guard) = tracing_appender::non_blocking(file_appender(file_config)?);
                (Some(json_layer(fields, writer)), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(env_filter)
            .with(layers::NodeContextLayer::new())
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        Ok(guard)
    }
}

fn json_layer<S, W>(fields: JsonFields, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(fields.span_list)
        .flatten_event(fields.flatten)
        .with_file(fields.location)
        .with_line_number(fields.location)
        .with_thread_ids(fields.thread)
        .with_thread_names(fields.thread)
        .with_ansi(false)
        .with_writer(writer)
        .boxed()
}

fn file_appender(config: &FileConfig) -> Result<RollingFileAppender, InitError> {
    let rotation = match config.rotation {
        FileRotation::Daily => Rotation::DAILY,
        FileRotation::Hourly => Rotation::HOURLY,
        FileRotation::Never => Rotation::NEVER,
    };
    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log");
    if let Some(keep) = config.keep {
        builder = builder.max_log_files(keep);
    }
    builder.build(&config.directory)
}
