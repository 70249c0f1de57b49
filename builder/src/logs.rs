//! Process logging
//!
//! Diagnostics for the operator, separate from the build log events that go
//! to the bus. Always written to stdout, optionally mirrored to a daily file.

use std::path::PathBuf;

use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::PipelineError;

const LOG_FILE_PREFIX: &str = "build-runner.log";

/// Verbosity used when `RUST_LOG` is not set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directives for this level. The MQTT client is held at `warn`
    /// since it logs every packet.
    fn directives(&self) -> String {
        let level = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        format!("{level},rumqttc=warn")
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid LOG_LEVEL: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub level: LogLevel,

    /// One JSON object per line instead of human readable text
    pub json: bool,

    /// Mirror logs to `<dir>/build-runner.log.<date>`
    pub file_dir: Option<PathBuf>,
}

/// Install the global subscriber.
///
/// Keep the returned guard until exit; dropping it flushes the file writer.
pub fn init_logging(options: LogOptions) -> Result<Option<WorkerGuard>, PipelineError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.level.directives()));

    let (file_layer, guard) = match &options.file_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let (text_layer, json_layer) = if options.json {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(text_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| PipelineError::ConfigError(format!("Logging already initialized: {e}")))?;

    Ok(guard)
}
