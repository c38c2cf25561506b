//! Error types for mssql-notify

use thiserror::Error;

/// Result type for mssql-notify operations
pub type Result<T> = std::result::Result<T, ListenerError>;

/// Errors that can occur while installing, running or administering listeners
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Another automatically-managed listener with the same identity is active
    #[error("A listener with identity {identity} has already been started")]
    DuplicateListener { identity: i32 },

    /// A DDL step of the install or uninstall sequence failed
    #[error("Installation error during {phase}: {message}")]
    Installation { phase: String, message: String },

    /// Any database statement or query failure
    #[error("Database execution error: {message}")]
    Execution { message: String },

    /// The received payload did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A subscriber callback reported a failure
    #[error("Handler error: {message}")]
    Handler { message: String },
}

impl ListenerError {
    /// Create an execution error
    pub fn execution<S: Into<String>>(message: S) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Wrap a failure from one step of the install/uninstall sequence
    pub fn installation<P: Into<String>>(phase: P, source: ListenerError) -> Self {
        let message = match source {
            Self::Execution { message } => message,
            other => other.to_string(),
        };
        Self::Installation {
            phase: phase.into(),
            message,
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler<S: Into<String>>(message: S) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Whether the error came from the database rather than from local state
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::Installation { .. })
    }
}

impl From<std::io::Error> for ListenerError {
    fn from(err: std::io::Error) -> Self {
        Self::execution(format!("I/O error: {err}"))
    }
}

#[cfg(feature = "mssql")]
impl From<tiberius::error::Error> for ListenerError {
    fn from(err: tiberius::error::Error) -> Self {
        Self::execution(err.to_string())
    }
}

impl From<::config::ConfigError> for ListenerError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_installation_keeps_execution_message() {
        let err = ListenerError::installation(
            "execute_install_procedure",
            ListenerError::execution("ServiceBroker is disabled"),
        );

        assert_eq!(
            err.to_string(),
            "Installation error during execute_install_procedure: ServiceBroker is disabled"
        );
        assert!(err.is_database_error());
    }

    #[test]
    fn test_duplicate_listener_message() {
        let err = ListenerError::DuplicateListener { identity: 7 };
        assert_eq!(
            err.to_string(),
            "A listener with identity 7 has already been started"
        );
        assert!(!err.is_database_error());
    }
}
