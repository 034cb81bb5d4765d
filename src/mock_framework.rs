//! # Mock Framework
//!
//! Utilities for testing clients in isolation.
//!
//! Use [`create_mock_client`] (or [`create_mock_store`]) to get a client and a receiver.
//! Then use helpers like [`expect_insert`] or [`expect_action`] to assert behavior
//! and answer on the actor's behalf. [`RecordingQueue`] stands in for the
//! confirmation queue and remembers what was enqueued, acked and nacked.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::actor_framework::{Entity, ResourceClient, ResourceRequest, Response};
use crate::domain::{ConfirmationTask, Order};
use crate::queue::{ConfirmationQueue, Delivery, QueueError};
use crate::retry::RetryPolicy;
use crate::store::OrderStore;

pub const MOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Creates a mock client and a receiver for asserting requests.
///
/// The client sends to a channel the test controls instead of a running
/// `ResourceActor`, so each reply (success, failure, silence) is scripted.
pub fn create_mock_client<T: Entity>(buffer_size: usize) -> (ResourceClient<T>, mpsc::Receiver<ResourceRequest<T>>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (ResourceClient::new(sender, MOCK_TIMEOUT), receiver)
}

/// An [`OrderStore`] over a mock client, without retries.
pub fn create_mock_store(buffer_size: usize) -> (OrderStore, mpsc::Receiver<ResourceRequest<Order>>) {
    create_mock_store_with_retry(buffer_size, RetryPolicy::none())
}

pub fn create_mock_store_with_retry(
    buffer_size: usize,
    retry: RetryPolicy,
) -> (OrderStore, mpsc::Receiver<ResourceRequest<Order>>) {
    let (client, receiver) = create_mock_client::<Order>(buffer_size);
    (OrderStore::new(client, retry, 10), receiver)
}

/// Helper to verify that the next message is an Insert request
pub async fn expect_insert<T: Entity>(receiver: &mut mpsc::Receiver<ResourceRequest<T>>) -> Option<(T, Response<()>)> {
    match receiver.recv().await {
        Some(ResourceRequest::Insert { item, respond_to }) => Some((item, respond_to)),
        _ => None,
    }
}

/// Helper to verify that the next message is a Get request
pub async fn expect_get<T: Entity>(receiver: &mut mpsc::Receiver<ResourceRequest<T>>) -> Option<(T::Id, Response<Option<T>>)> {
    match receiver.recv().await {
        Some(ResourceRequest::Get { id, respond_to }) => Some((id, respond_to)),
        _ => None,
    }
}

/// Helper to verify that the next message is an Action request
pub async fn expect_action<T: Entity>(
    receiver: &mut mpsc::Receiver<ResourceRequest<T>>,
) -> Option<(T::Id, T::Action, Response<T::ActionResult>)> {
    match receiver.recv().await {
        Some(ResourceRequest::Action { id, action, respond_to }) => Some((id, action, respond_to)),
        _ => None,
    }
}

/// In-process stand-in for a confirmation queue.
#[derive(Default)]
pub struct RecordingQueue {
    fail_enqueue: bool,
    tasks: Mutex<Vec<ConfirmationTask>>,
    acked: Mutex<Vec<u64>>,
    nacked: Mutex<Vec<u64>>,
}

impl RecordingQueue {
    /// A queue whose `enqueue` always reports `Unavailable`.
    pub fn failing() -> Self {
        Self {
            fail_enqueue: true,
            ..Self::default()
        }
    }

    pub fn tasks(&self) -> Vec<ConfirmationTask> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    pub fn nacked(&self) -> Vec<u64> {
        self.nacked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationQueue for RecordingQueue {
    async fn enqueue(&self, task: ConfirmationTask) -> Result<(), QueueError> {
        if self.fail_enqueue {
            return Err(QueueError::Unavailable("recording queue set to fail".to_string()));
        }
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Delivery>, QueueError> {
        cancel.cancelled().await;
        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.acked.lock().unwrap().push(delivery.receipt);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.nacked.lock().unwrap().push(delivery.receipt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderId;
    use chrono::Utc;

    #[tokio::test]
    async fn test_mock_store() {
        let (store, mut receiver) = create_mock_store(10);

        let get_task = tokio::spawn(async move { store.get("U1", &OrderId::new("o1")).await });

        let (key, responder) = expect_get(&mut receiver).await.expect("Expected Get request");
        assert_eq!(key.owner_id, "U1");
        let order = Order::pending("U1", OrderId::new("o1"), 2.0, Utc::now());
        responder.send(Ok(Some(order.clone()))).unwrap();

        let result = get_task.await.unwrap();
        assert_eq!(result, Ok(order));
    }
}
