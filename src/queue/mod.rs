//! At-least-once delivery of confirmation tasks from intake to the workers.

pub mod error;
mod memory;

pub use error::*;
pub use memory::*;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::ConfirmationTask;

/// A task handed to a worker. It stays on the queue until acked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receipt: u64,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
    pub task: ConfirmationTask,
}

#[async_trait]
pub trait ConfirmationQueue: Send + Sync {
    /// Returns once the task is accepted. Transient failures are retried with
    /// backoff and surface as [`QueueError::Unavailable`] when exhausted.
    async fn enqueue(&self, task: ConfirmationTask) -> Result<(), QueueError>;

    /// Waits for the next task. Resolves to `None` when `cancel` fires first.
    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Delivery>, QueueError>;

    /// Processing succeeded; drop the task for good.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Processing failed; make the task deliverable again after the nack delay.
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;
}
