//! Change log errors.

use timelapse_core::{CoreError, GlobalId};
use timelapse_storage::StoreError;

/// Change log result type
pub type LogResult<T> = Result<T, LogError>;

/// Change log error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// The underlying table failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record arrived with an id at or below one already in the log
    #[error("Global id {id} does not follow the last appended id {last}")]
    GlobalIdRegression { id: GlobalId, last: GlobalId },

    /// Session timeline input could not be parsed
    #[error("Invalid session timeline: {reason}")]
    Timeline { reason: String },
}

impl From<LogError> for CoreError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Store(store) => store.into(),
            LogError::GlobalIdRegression { .. } => CoreError::Validation {
                field: "global_id".to_string(),
                reason: err.to_string(),
            },
            LogError::Timeline { reason } => CoreError::ParseError { message: reason },
        }
    }
}
