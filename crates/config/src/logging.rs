use std::path::PathBuf;

use beacon_common::logging::{self, format_service_name, FileLoggingConfig, LoggerConfig, LoggingError};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVICE_NAME: &str = "beacon-engine";

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Optional suffix appended to the service name, e.g. a node label.
    #[serde(default)]
    pub service_label: Option<String>,

    /// Emit JSON on stdout and in files.
    #[serde(default)]
    pub json_format: bool,

    /// Directory for rotated log files; file logging is off when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Prefix of rotated log files, defaults to the service name.
    #[serde(default)]
    pub log_file_prefix: Option<String>,

    /// Extra `tracing` filter directives.
    #[serde(default)]
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_label: None,
            json_format: false,
            log_dir: None,
            log_file_prefix: None,
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    /// Builds the logger setup consumed by [`beacon_common::logging::init`].
    pub fn to_logger_config(&self) -> LoggerConfig {
        let service_name = format_service_name(&self.service_name, self.service_label.as_deref());
        let mut config = LoggerConfig::new(service_name).with_json_logging(self.json_format);

        if let Some(dir) = &self.log_dir {
            let prefix = self
                .log_file_prefix
                .clone()
                .unwrap_or_else(|| self.service_name.clone());
            config = config.with_file_logging(
                FileLoggingConfig::new(dir.clone(), prefix).with_json_format(self.json_format),
            );
        }

        for directive in &self.directives {
            config = config.with_directive(directive.clone());
        }

        config
    }

    /// Installs the global subscriber for this section.
    pub fn init(&self) -> Result<(), LoggingError> {
        logging::init(self.to_logger_config())
    }
}
