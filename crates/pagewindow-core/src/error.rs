use thiserror::Error;

pub type Result<T> = std::result::Result<T, WindowError>;

#[derive(Debug, Error)]
pub enum WindowError {
    /// The window and the backing store disagree, or a caller passed a
    /// coordinate that does not exist. Never swallowed.
    #[error("Window invariant violated: {message}")]
    InvariantViolation { message: String },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl WindowError {
    /// Build an invariant violation and log it at error level.
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "window invariant violated");
        Self::InvariantViolation { message }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

/// Failures reported by a backing store adapter.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("Failed to decode record: {message}")]
    Decode { message: String },
    #[error("Record not found: {id}")]
    NotFound { id: String },
}

impl SourceError {
    pub fn database<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn database_message(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_errors_convert_into_window_errors() {
        let err: WindowError = SourceError::database_message("disk I/O error").into();
        assert!(matches!(err, WindowError::Source(SourceError::Database { .. })));
        assert_eq!(err.to_string(), "Database error: disk I/O error");
    }

    #[test]
    fn invariant_violation_is_detectable() {
        let err = WindowError::invariant("index 4 out of range for 3 sections");
        assert!(err.is_invariant_violation());
        assert!(err.to_string().contains("index 4 out of range"));
    }

    #[test]
    fn database_error_keeps_its_source() {
        let io = std::io::Error::other("locked");
        let err = SourceError::database(io);
        let source = std::error::Error::source(&err);
        assert!(source.is_some());
    }
}
