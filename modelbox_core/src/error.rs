//! Unified error handling for the driver registry.
//!
//! Every fallible registry operation returns [`DriverResult`]; the error side
//! carries one of the status kinds shared across the subsystem.

use thiserror::Error;

/// Status kinds used by the registry core
#[derive(Debug, Error)]
pub enum DriverError {
    /// Bad input or dynamic-loader error
    #[error("invalid: {0}")]
    Invalid(String),

    /// No matching driver or file
    #[error("not found: {0}")]
    NotFound(String),

    /// A required plugin symbol is missing
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Malformed descriptor or version string
    #[error("bad config: {0}")]
    BadConfig(String),

    /// Duplicate driver identity
    #[error("already exists: {0}")]
    Exist(String),

    /// I/O or subprocess failure
    #[error("fault: {0}")]
    Fault(String),
}

/// Convenience type alias for Results using DriverError
pub type DriverResult<T> = std::result::Result<T, DriverError>;

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Fault(err.to_string())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Fault(format!("json error: {}", err))
    }
}

impl From<serde_yaml::Error> for DriverError {
    fn from(err: serde_yaml::Error) -> Self {
        DriverError::BadConfig(format!("yaml error: {}", err))
    }
}

impl DriverError {
    /// Create an invalid-input error
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        DriverError::Invalid(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        DriverError::NotFound(msg.into())
    }

    /// Create a bad-config error
    pub fn bad_config<S: Into<String>>(msg: S) -> Self {
        DriverError::BadConfig(msg.into())
    }

    /// Create a fault error
    pub fn fault<S: Into<String>>(msg: S) -> Self {
        DriverError::Fault(msg.into())
    }
}
