//! Replay errors.

use timelapse_core::{CoreError, TabId};
use timelapse_log::LogError;
use timelapse_storage::StoreError;

/// Replay result type
pub type ReplayResult<T> = Result<T, ReplayError>;

/// Replay error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    /// A load was cancelled mid-apply; the reconstructor must be replaced
    #[error("Reconstructor was discarded after a cancelled load")]
    Discarded,

    /// The session has no records or commands for this tab
    #[error("Unknown tab: {0}")]
    UnknownTab(TabId),

    /// Storage snapshot could not be parsed
    #[error("Invalid storage snapshot: {reason}")]
    Snapshot { reason: String },

    /// Reading the change log failed
    #[error(transparent)]
    Log(#[from] LogError),

    /// Reading the resource store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ReplayError> for CoreError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::Discarded => CoreError::Cancelled,
            ReplayError::UnknownTab(tab) => CoreError::NotFound {
                kind: "Tab".to_string(),
                id: tab.to_string(),
            },
            ReplayError::Snapshot { reason } => CoreError::ParseError { message: reason },
            ReplayError::Log(log) => log.into(),
            ReplayError::Store(store) => store.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_core() {
        assert_eq!(CoreError::from(ReplayError::Discarded), CoreError::Cancelled);
        assert!(matches!(
            CoreError::from(ReplayError::UnknownTab(TabId::new(4))),
            CoreError::NotFound { ref id, .. } if id == "tab_4"
        ));
        let store: ReplayError = StoreError::UnsupportedEncoding("x".to_string()).into();
        assert!(matches!(CoreError::from(store), CoreError::Storage { .. }));
    }
}
