use thiserror::Error;

use crate::domain::OrderId;
use crate::queue::QueueError;
use crate::store::StoreError;

/// Errors surfaced to intake callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IntakeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Order not found: {0}")]
    NotFound(String),
    #[error("Order already exists: {0}")]
    AlreadyExists(String),
    /// The order was stored but its confirmation task never reached the queue.
    /// It stays PENDING until someone re-drives it.
    #[error("Order {order_id} stored but not queued for confirmation: {reason}")]
    NotEnqueued { order_id: OrderId, reason: String },
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for IntakeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => IntakeError::NotFound(key),
            StoreError::AlreadyExists(key) => IntakeError::AlreadyExists(key),
            StoreError::Unavailable(reason) => IntakeError::Unavailable(reason),
            // intake never changes status; reaching here means the store misbehaved
            other @ (StoreError::Conflict { .. } | StoreError::InvalidTransition { .. }) => {
                IntakeError::Unavailable(other.to_string())
            }
        }
    }
}

impl From<QueueError> for IntakeError {
    fn from(err: QueueError) -> Self {
        IntakeError::Unavailable(err.to_string())
    }
}
