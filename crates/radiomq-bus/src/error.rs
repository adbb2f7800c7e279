//! Error types for bus operations

use thiserror::Error;

/// Main error type for bus operations
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Broker connection could not be established
    #[error("cannot connect to broker: {0}")]
    ConnectFailed(String),

    /// Broker refused or timed out a subscription
    #[error("cannot subscribe to {topic}: {reason}")]
    SubscribeFailed {
        /// Topic of the subscription
        topic: String,
        /// Failure reason
        reason: String,
    },

    /// Broker did not accept a publish
    #[error("cannot publish to {topic}: {reason}")]
    PublishFailed {
        /// Topic of the message
        topic: String,
        /// Failure reason
        reason: String,
    },

    /// Payload could not be serialized
    #[error("encode error: {0}")]
    Encode(String),

    /// Inbound bytes are not a known payload
    #[error("decode error: {0}")]
    Decode(String),
}

impl BusError {
    /// True if the operation may succeed when retried
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BusError::ConnectFailed(_) | BusError::SubscribeFailed { .. } | BusError::PublishFailed { .. }
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BusError::ConnectFailed(_) => "CONNECT_FAILED",
            BusError::SubscribeFailed { .. } => "SUBSCRIBE_FAILED",
            BusError::PublishFailed { .. } => "PUBLISH_FAILED",
            BusError::Encode(_) => "ENCODE",
            BusError::Decode(_) => "DECODE",
        }
    }
}

impl From<serde_cbor::Error> for BusError {
    fn from(err: serde_cbor::Error) -> Self {
        BusError::Decode(err.to_string())
    }
}

/// Result type alias for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = BusError::SubscribeFailed {
            topic: "rfm69/tx".into(),
            reason: "not authorized".into(),
        };
        assert_eq!(err.error_code(), "SUBSCRIBE_FAILED");
        assert!(err.is_retriable());
        assert_eq!(err.to_string(), "cannot subscribe to rfm69/tx: not authorized");
        assert!(!BusError::Decode("junk".into()).is_retriable());
    }
}
