//! Error types for tee_log
//!
//! This module defines the error types used by the fan-out engine. Sink
//! implementations report [`SinkError`](crate::sinks::SinkError); the engine
//! wraps those into [`TeeError`] together with the name of the sink that
//! failed, and aggregates best-effort failures into a [`CompositeError`].

use crate::sinks::traits::SinkError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tee_log operations
#[derive(Error, Debug)]
pub enum TeeError {
    /// Neither the inline key nor the fallback variable named any sink
    #[error("no sinks configured: set `tee-drivers` or the fallback environment variable")]
    NoSinksConfigured,

    /// Registry lookup miss
    #[error("sink type not found: {0}")]
    SinkTypeNotFound(String),

    /// A factory was registered twice under the same name
    #[error("sink type already registered: {0}")]
    DuplicateSinkType(String),

    /// Override file present but unreadable or malformed
    #[error("failed to load sink overrides from {}: {message}", .path.display())]
    ConfigLoad { path: PathBuf, message: String },

    /// The sink's constructor returned an error
    #[error("failed to construct sink '{name}': {source}")]
    SinkConstructionFailed {
        name: String,
        #[source]
        source: SinkError,
    },

    /// One sink failed while the operation continued for the others
    #[error("sink '{name}': {source}")]
    SinkFailed {
        name: String,
        #[source]
        source: SinkError,
    },

    /// Some sinks failed to log a record
    #[error("partial log failure: {0}")]
    PartialLogFailure(CompositeError),

    /// Some sinks failed to close
    #[error("partial close failure: {0}")]
    PartialCloseFailure(CompositeError),

    /// Re-deriving or rebuilding one sink failed during reload
    #[error("reload of sink '{name}' failed: {source}")]
    ReloadFailed {
        name: String,
        #[source]
        source: Box<TeeError>,
    },

    /// Several sinks failed during one reload pass
    #[error("partial reload failure: {0}")]
    PartialReloadFailure(CompositeError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    ConfigFileMissing(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    /// Tracing subscriber errors
    #[error("Tracing error: {0}")]
    TracingError(String),

    /// I/O errors
    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

/// Result type alias for tee_log operations
pub type Result<T> = std::result::Result<T, TeeError>;

impl TeeError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new override-file load error
    pub fn config_load<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap a failure of one sink during reload
    pub fn reload_failed(name: impl Into<String>, source: TeeError) -> Self {
        Self::ReloadFailed {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Returns the aggregated causes when this is a partial failure
    pub fn composite(&self) -> Option<&CompositeError> {
        match self {
            Self::PartialLogFailure(c)
            | Self::PartialCloseFailure(c)
            | Self::PartialReloadFailure(c) => Some(c),
            _ => None,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Partial failures leave the logger usable; construction-time failures
    /// do not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SinkFailed { .. }
            | Self::PartialLogFailure(_)
            | Self::PartialCloseFailure(_)
            | Self::ReloadFailed { .. }
            | Self::PartialReloadFailure(_)
            | Self::IoError { .. } => true,
            Self::NoSinksConfigured
            | Self::SinkTypeNotFound(_)
            | Self::SinkConstructionFailed { .. } => false,
            _ => false,
        }
    }

    /// Get the error category for logging purposes
    pub fn category(&self) -> &'static str {
        match self {
            Self::NoSinksConfigured
            | Self::ConfigLoad { .. }
            | Self::ConfigError(_)
            | Self::ConfigFileMissing(_)
            | Self::InvalidLogLevel(_) => "config",
            Self::SinkTypeNotFound(_) | Self::DuplicateSinkType(_) => "registry",
            Self::SinkConstructionFailed { .. } => "construction",
            Self::SinkFailed { .. } | Self::PartialLogFailure(_) => "log",
            Self::PartialCloseFailure(_) => "close",
            Self::ReloadFailed { .. } | Self::PartialReloadFailure(_) => "reload",
            Self::TracingError(_) => "tracing",
            Self::IoError { .. } => "io",
        }
    }
}

/// Aggregate of independent failures from a best-effort multi-sink operation.
///
/// The cause list is never empty; [`CompositeError::from_causes`] returns
/// `None` for an empty list.
#[derive(Debug)]
pub struct CompositeError {
    message: String,
    causes: Vec<TeeError>,
}

impl CompositeError {
    /// Build a composite from the collected causes, `None` if there are none.
    pub fn from_causes(message: impl Into<String>, causes: Vec<TeeError>) -> Option<Self> {
        if causes.is_empty() {
            return None;
        }
        Some(Self {
            message: message.into(),
            causes,
        })
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Causes in encounter order
    pub fn causes(&self) -> &[TeeError] {
        &self.causes
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    pub fn into_causes(self) -> Vec<TeeError> {
        self.causes
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.causes {
            write!(f, "; {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn sink_failure(name: &str, msg: &str) -> TeeError {
        TeeError::SinkFailed {
            name: name.to_string(),
            source: SinkError::Generic(msg.to_string()),
        }
    }

    #[test]
    fn test_error_creation() {
        let config_err = TeeError::config("Invalid configuration");
        assert!(matches!(config_err, TeeError::ConfigError(_)));
        assert_eq!(
            config_err.to_string(),
            "Configuration error: Invalid configuration"
        );

        let load_err = TeeError::config_load("/etc/docker/tee.json", "expected value");
        assert_eq!(
            load_err.to_string(),
            "failed to load sink overrides from /etc/docker/tee.json: expected value"
        );
    }

    #[test]
    fn test_no_sinks_message_names_key() {
        let err = TeeError::NoSinksConfigured;
        assert!(err.to_string().contains("tee-drivers"));
        assert_eq!(err.category(), "config");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_composite_display_joins_causes() {
        let composite = CompositeError::from_causes(
            "failed to log on some sinks",
            vec![sink_failure("a", "disk full"), sink_failure("b", "refused")],
        )
        .unwrap();

        assert_eq!(composite.len(), 2);
        assert_eq!(
            composite.to_string(),
            "failed to log on some sinks; sink 'a': Generic error: disk full; sink 'b': Generic error: refused"
        );
    }

    #[test]
    fn test_composite_rejects_empty_causes() {
        assert!(CompositeError::from_causes("nothing", Vec::new()).is_none());
    }

    #[test]
    fn test_composite_accessor() {
        let composite =
            CompositeError::from_causes("failed to close on some sinks", vec![sink_failure("a", "x")])
                .unwrap();
        let err = TeeError::PartialCloseFailure(composite);
        assert_eq!(err.composite().map(|c| c.len()), Some(1));
        assert_eq!(err.category(), "close");
        assert!(err.is_recoverable());

        assert!(TeeError::NoSinksConfigured.composite().is_none());
    }

    #[test]
    fn test_reload_failed_keeps_source() {
        let err = TeeError::reload_failed("a", TeeError::SinkTypeNotFound("a".to_string()));
        assert_eq!(
            err.to_string(),
            "reload of sink 'a' failed: sink type not found: a"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "sink type not found: a");
    }

    #[test]
    fn test_error_from_conversions() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let tee_error: TeeError = io_error.into();
        assert!(matches!(tee_error, TeeError::IoError { .. }));
        assert_eq!(tee_error.category(), "io");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(TeeError::config("test").category(), "config");
        assert_eq!(
            TeeError::SinkTypeNotFound("x".into()).category(),
            "registry"
        );
        assert_eq!(
            TeeError::SinkConstructionFailed {
                name: "x".into(),
                source: SinkError::Closed
            }
            .category(),
            "construction"
        );
        assert_eq!(sink_failure("a", "b").category(), "log");
        assert_eq!(TeeError::TracingError("t".into()).category(), "tracing");
    }
}
