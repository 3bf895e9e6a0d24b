//! Error handling for archivectl.
use thiserror::Error;

/// Defines all possible errors raised while controlling the archive services.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// A `${VAR}` reference in the configuration has no value in the environment.
    #[error("Missing environment variable referenced by config: {0}")]
    MissingEnvVar(String),

    /// Error constructing or starting a managed service.
    #[error("Failed to start service '{service}': {source}")]
    ServiceStartError {
        /// The service that failed to start.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error stopping a managed service.
    #[error("Failed to stop service '{service}': {source}")]
    ServiceStopError {
        /// The service that failed to stop.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `ControlError`.
impl<T> From<std::sync::PoisonError<T>> for ControlError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ControlError::MutexPoisonError(err.to_string())
    }
}

/// Error type for server log operations.
#[derive(Debug, Error)]
pub enum LogSinkError {
    /// The requested log file does not exist.
    #[error("Server log '{0}' not found")]
    LogUnavailable(String),

    /// Error while reading or appending to the log file.
    #[error("Server log I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
