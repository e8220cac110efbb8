//! Storage errors.

use timelapse_core::CoreError;

/// Storage result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Row not found
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// The durable tier rejected a read or write
    #[error("Durable storage failure: {reason}")]
    Durability { reason: String },

    /// A previous flush failed; writes are rejected until the table is reinitialized
    #[error("Table {table} is unusable after a failed flush ({lost_rows} pending rows lost)")]
    Poisoned { table: String, lost_rows: u64 },

    /// Row could not be encoded or decoded
    #[error("Row encoding failed: {reason}")]
    Encoding { reason: String },

    /// Stored body could not be decompressed
    #[error("Failed to decompress {encoding} body: {reason}")]
    Decompression { encoding: String, reason: String },

    /// Stored body uses an encoding this build cannot decode
    #[error("Unsupported content encoding: {0}")]
    UnsupportedEncoding(String),
}

impl StoreError {
    /// Shorthand for a missing row
    #[must_use]
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        Self::Durability {
            reason: err.to_string(),
        }
    }
}

impl From<postcard::Error> for StoreError {
    fn from(err: postcard::Error) -> Self {
        Self::Encoding {
            reason: err.to_string(),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => CoreError::NotFound { kind, id },
            other => CoreError::Storage {
                reason: other.to_string(),
            },
        }
    }
}

/// Map any redb error type onto [`StoreError::Durability`]
pub(crate) fn durable_err<E: Into<redb::Error>>(err: E) -> StoreError {
    StoreError::from(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::not_found("Resource", 4);
        assert_eq!(err.to_string(), "Resource not found: 4");

        let err = StoreError::Poisoned {
            table: "dom_changes".to_string(),
            lost_rows: 3,
        };
        assert!(err.to_string().contains("3 pending rows lost"));
    }

    #[test]
    fn test_store_error_into_core() {
        let core: CoreError = StoreError::not_found("Resource", 1).into();
        assert!(matches!(core, CoreError::NotFound { .. }));

        let core: CoreError = StoreError::UnsupportedEncoding("x-foo".to_string()).into();
        assert!(matches!(core, CoreError::Storage { .. }));
    }
}
