//! Core error types for timelapse.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid encoding
    InvalidEncoding,

    /// Invalid ID format
    InvalidId { reason: String },

    /// Parse error
    ParseError { message: String },

    /// Validation error
    Validation { field: String, reason: String },

    /// Not found
    NotFound { kind: String, id: String },

    /// Storage could not persist or read a row
    Storage {
        /// Failure description
        reason: String,
    },

    /// Cancelled
    Cancelled,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding => write!(f, "Invalid encoding"),
            Self::InvalidId { reason } => write!(f, "Invalid ID: {}", reason),
            Self::ParseError { message } => write!(f, "Parse error: {}", message),
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::Storage { reason } => write!(f, "Storage error: {}", reason),
            Self::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError {
            message: err.to_string(),
        }
    }
}

impl From<postcard::Error> for CoreError {
    fn from(_: postcard::Error) -> Self {
        Self::InvalidEncoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidEncoding;
        assert_eq!(format!("{}", err), "Invalid encoding");

        let err = CoreError::NotFound {
            kind: "Resource".to_string(),
            id: "42".to_string(),
        };
        assert_eq!(format!("{}", err), "Resource not found: 42");
    }

    #[test]
    fn test_storage_error_display() {
        let err = CoreError::Storage {
            reason: "disk full".to_string(),
        };
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_json_error_converts() {
        let parse = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: CoreError = parse.into();
        assert!(matches!(err, CoreError::ParseError { .. }));
    }

    #[test]
    fn test_error_equality() {
        let err1 = CoreError::InvalidEncoding;
        let err2 = CoreError::InvalidEncoding;
        assert_eq!(err1, err2);
        assert_ne!(err1, CoreError::Cancelled);
    }
}
