//! Logging initialization.

use thiserror::Error;
use tracing::*;
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::{
    filter::{Directive, ParseError},
    fmt::layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

use super::types::LoggerConfig;

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A configured filter directive could not be parsed.
    #[error("invalid filter directive '{directive}': {source}")]
    InvalidDirective {
        directive: String,
        #[source]
        source: ParseError,
    },

    /// The rolling file appender could not be created.
    #[error("failed to create log file appender: {0}")]
    FileAppender(#[from] InitError),

    /// A global subscriber was already installed.
    #[error("failed to install subscriber: {0}")]
    Install(#[from] TryInitError),
}

/// Builds the env filter, INFO by default and overridable through `RUST_LOG`.
pub(crate) fn build_filter(config: &LoggerConfig) -> Result<EnvFilter, LoggingError> {
    let mut filt = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    for directive in &config.directives {
        let parsed: Directive =
            directive
                .parse()
                .map_err(|source| LoggingError::InvalidDirective {
                    directive: directive.clone(),
                    source,
                })?;
        filt = filt.add_directive(parsed);
    }

    Ok(filt)
}

/// Initializes the logging subsystem with the provided config.
pub fn init(config: LoggerConfig) -> Result<(), LoggingError> {
    let filt = build_filter(&config)?;

    let stdout_sub = if config.stdout_config.json_format {
        layer()
            .json()
            .with_span_events(config.stdout_config.fmt_span.clone())
            .with_filter(filt)
            .boxed()
    } else {
        layer()
            .compact()
            .with_span_events(config.stdout_config.fmt_span.clone())
            .with_filter(filt)
            .boxed()
    };

    // Each layer owns its own filter instance.
    let file_layer = config
        .file_logging_config
        .as_ref()
        .map(|file_config| -> Result<_, LoggingError> {
            let filt = build_filter(&config)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(file_config.rotation.clone())
                .filename_prefix(&file_config.file_name_prefix)
                .build(&file_config.directory)?;

            let file_layer = if file_config.json_format {
                layer()
                    .json()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_filter(filt)
                    .boxed()
            } else {
                layer()
                    .compact()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_filter(filt)
                    .boxed()
            };
            Ok(file_layer)
        })
        .transpose()?;

    tracing_subscriber::registry()
        .with(stdout_sub)
        .with(file_layer)
        .try_init()?;

    info!(
        service_name = %config.service_name,
        file_logging = config.file_logging_config.is_some(),
        "logging initialized"
    );

    Ok(())
}
