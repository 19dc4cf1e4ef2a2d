use thiserror::Error;

use crate::{coap::PduError, connection::FramingError, worker_queue::QueueError};

pub type CaResult<T> = Result<T, CaError>;

/// Result taxonomy shared by every layer of the connectivity core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaError {
    /// An operation was attempted before `initialize()` or after `terminate()`
    #[error("Connectivity core is not initialized. Call initialize() before using it")]
    NotInitialized,

    /// Caller supplied an empty or otherwise unusable argument
    #[error("Invalid parameter: {reason}")]
    InvalidParam { reason: &'static str },

    /// A buffer could not be grown to hold the requested data
    #[error("Failed to allocate {requested} bytes (limit {limit})")]
    MemoryAllocationFailed { requested: usize, limit: usize },

    /// Sending failed on one adapter, or on every adapter of a fan-out
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },

    /// The operation has no meaning for the transport it was issued against
    #[error("Operation not supported by this transport")]
    NotSupported,

    /// The adapter exists but is not started
    #[error("Transport adapter is not enabled")]
    AdapterNotEnabled,

    /// Generic failure
    #[error("Operation failed: {reason}")]
    Failed { reason: String },
}

impl CaError {
    pub fn send_failed(reason: impl Into<String>) -> Self {
        CaError::SendFailed {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        CaError::Failed {
            reason: reason.into(),
        }
    }
}

impl From<PduError> for CaError {
    fn from(error: PduError) -> Self {
        CaError::failed(error.to_string())
    }
}

impl From<FramingError> for CaError {
    fn from(error: FramingError) -> Self {
        match error {
            FramingError::MessageTooLarge { length, max } => CaError::MemoryAllocationFailed {
                requested: length,
                limit: max,
            },
            other => CaError::failed(other.to_string()),
        }
    }
}

impl From<QueueError> for CaError {
    fn from(error: QueueError) -> Self {
        CaError::failed(error.to_string())
    }
}
