use super::config::{LogFormat, LogLevel};
use parking_lot::RwLock;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid directive format '{input}'. Expected: 'target=level'")]
    InvalidDirectiveFormat { input: String },

    #[error("Empty target in directive '{input}'")]
    EmptyTarget { input: String },

    #[error("Invalid log level in directive '{input}'")]
    InvalidLevel { input: String },

    #[error("Logging system initialization failed: {details}")]
    InitFailed { details: String },
}

/// `target=level` filter directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirective {
    pub target: String,
    pub level: LogLevel,
}

impl LogDirective {
    pub fn new(target: impl Into<String>, level: LogLevel) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    pub fn parse(directive: &str) -> Result<Self, LoggingError> {
        let Some((target, level)) = directive.split_once('=') else {
            return Err(LoggingError::InvalidDirectiveFormat {
                input: directive.to_string(),
            });
        };
        let target = target.trim();
        if target.is_empty() {
            return Err(LoggingError::EmptyTarget {
                input: directive.to_string(),
            });
        }
        let level = LogLevel::from_str(level).map_err(|_| LoggingError::InvalidLevel {
            input: directive.to_string(),
        })?;
        Ok(Self::new(target, level))
    }

    pub fn to_filter_string(&self) -> String {
        format!("{}={}", self.target, self.level.as_str())
    }
}

/// Collects filter directives and installs the global subscriber.
pub struct LoggingSystem {
    directives: RwLock<Vec<LogDirective>>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: RwLock::new(Vec::new()),
        }
    }

    /// Adds a directive. Malformed ones are reported on stderr and skipped;
    /// an unknown level falls back to `info` for that target.
    pub fn add_directive(&self, directive: &str) {
        match LogDirective::parse(directive) {
            Ok(parsed) => self.directives.write().push(parsed),
            Err(LoggingError::InvalidLevel { input }) => {
                eprintln!("Warning: invalid level in '{input}', using info");
                if let Some((target, _)) = input.split_once('=') {
                    self.directives
                        .write()
                        .push(LogDirective::new(target.trim(), LogLevel::Info));
                }
            }
            Err(e) => eprintln!("Warning: {e}, skipping directive"),
        }
    }

    /// Quiets chatty dependencies.
    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in ["rdkafka", "warp", "hyper"] {
            directives.push(LogDirective::new(target, LogLevel::Warn));
        }
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        std::iter::once(default_level.as_str().to_string())
            .chain(directives.iter().map(LogDirective::to_filter_string))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }

    /// `RUST_LOG`, when set, replaces the built filter.
    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), LoggingError> {
        let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(from_env) if !from_env.trim().is_empty() => from_env,
            _ => self.build_filter_string(default_level),
        };
        let env_filter = EnvFilter::try_new(&filter).map_err(|e| LoggingError::InitFailed {
            details: format!("Failed to create EnvFilter with '{filter}': {e}"),
        })?;

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_target(true),
                )
                .try_init(),
            LogFormat::Text => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .compact(),
                )
                .try_init(),
        };

        result.map_err(|e| LoggingError::InitFailed {
            details: format!("Failed to set global tracing subscriber: {e}"),
        })
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs logging once per process; later calls return the first outcome.
pub fn setup_logging_safe(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    static OUTCOME: OnceLock<Result<(), String>> = OnceLock::new();

    let outcome = OUTCOME.get_or_init(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        logging_system
            .initialize_tracing(level, format)
            .map_err(|e| e.to_string())
    });

    outcome
        .clone()
        .map_err(|details| LoggingError::InitFailed { details })
}
