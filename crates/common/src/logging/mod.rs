//! Logging subsystem built on `tracing-subscriber`.

pub mod manager;
pub mod types;


pub use manager::{init, LoggingError};
pub use types::{FileLoggingConfig, LoggerConfig, StdoutConfig};

// Rotation is part of `FileLoggingConfig`.
pub use tracing_appender::rolling::Rotation;

/// Formats a service name with an optional label suffix.
pub fn format_service_name(base: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}
