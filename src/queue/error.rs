use thiserror::Error;

use crate::retry::Retryable;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Confirmation queue unavailable: {0}")]
    Unavailable(String),
    /// The delivery was already acked, or its visibility timeout expired and it was handed out again.
    #[error("Unknown or expired receipt: {0}")]
    UnknownReceipt(u64),
}

impl Retryable for QueueError {
    fn is_transient(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}
