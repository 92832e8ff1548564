use crate::event::PayloadError;
use crate::nats::ChannelError;
use std::fmt;

/// Errors surfaced by the reconciliation engine to the display layer.
///
/// None of these stop the engine; it keeps serving the last known state.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Snapshot or history fetch failed; existing state is preserved
    FetchFailed { message: String, retryable: bool },
    /// Live payload dropped
    MalformedPayload(PayloadError),
    /// Live update for an id not in the store; a snapshot refresh was requested
    UnknownEntityLiveUpdate { entity_id: String },
    ConnectionFailed(String),
    ConnectionLost(String),
}

impl EngineError {
    /// True when the caller may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::FetchFailed { retryable, .. } => *retryable,
            EngineError::ConnectionFailed(_) | EngineError::ConnectionLost(_) => true,
            EngineError::MalformedPayload(_) | EngineError::UnknownEntityLiveUpdate { .. } => false,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::FetchFailed { message, .. } => write!(f, "fetch failed: {}", message),
            EngineError::MalformedPayload(e) => write!(f, "malformed live payload: {}", e),
            EngineError::UnknownEntityLiveUpdate { entity_id } => {
                write!(f, "live update for unknown entity '{}'", entity_id)
            }
            EngineError::ConnectionFailed(e) => write!(f, "push channel connection failed: {}", e),
            EngineError::ConnectionLost(e) => write!(f, "push channel connection lost: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<PayloadError> for EngineError {
    fn from(e: PayloadError) -> Self {
        EngineError::MalformedPayload(e)
    }
}

impl From<ChannelError> for EngineError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::ConnectionLost(reason) => EngineError::ConnectionLost(reason),
            other => EngineError::ConnectionFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let fetch = EngineError::FetchFailed {
            message: "timeout".to_string(),
            retryable: true,
        };
        assert!(fetch.is_retryable());
        assert!(!EngineError::MalformedPayload(PayloadError::NotAnObject).is_retryable());
        assert!(EngineError::ConnectionLost("eof".to_string()).is_retryable());
    }

    #[test]
    fn test_channel_error_conversion() {
        let lost: EngineError = ChannelError::ConnectionLost("stream ended".to_string()).into();
        assert_eq!(lost, EngineError::ConnectionLost("stream ended".to_string()));

        let failed: EngineError = ChannelError::ConnectionFailed("refused".to_string()).into();
        assert!(matches!(failed, EngineError::ConnectionFailed(_)));
    }
}
