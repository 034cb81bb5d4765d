use thiserror::Error;

use crate::actor_framework::FrameworkError;
use crate::domain::{OrderKey, OrderStatus};
use crate::retry::Retryable;

/// Errors that can occur during order store operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Order not found: {0}")]
    NotFound(String),
    #[error("Order already exists: {0}")]
    AlreadyExists(String),
    /// The order is already in the target status. Callers treat this as already applied.
    #[error("Order {key} is already {status}")]
    Conflict { key: OrderKey, status: OrderStatus },
    #[error("Order {key} cannot move {from} -> {to} while {current}")]
    InvalidTransition {
        key: OrderKey,
        from: OrderStatus,
        to: OrderStatus,
        current: OrderStatus,
    },
    #[error("Order store unavailable: {0}")]
    Unavailable(String),
}

impl From<FrameworkError> for StoreError {
    fn from(err: FrameworkError) -> Self {
        match err {
            FrameworkError::NotFound(id) => StoreError::NotFound(id),
            FrameworkError::AlreadyExists(id) => StoreError::AlreadyExists(id),
            transient => StoreError::Unavailable(transient.to_string()),
        }
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
