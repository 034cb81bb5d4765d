//! Confirmation workers.
//!
//! Per delivery: `update_status(PENDING -> CONFIRMED)`, then
//! - success: publish, ack
//! - already confirmed: ack; publish again on a redelivery, or on any replay
//!   under [`ReplayPolicy::Republish`]
//! - unknown order: ack and log, a retry cannot fix it
//! - store unavailable or processing timeout: nack for redelivery

mod pool;

pub use pool::*;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub use crate::config::ReplayPolicy;
use crate::config::WorkerConfig;
use crate::domain::{ConfirmationTask, OrderEvent, OrderStatus};
use crate::notifier::Notifier;
use crate::queue::{ConfirmationQueue, Delivery};
use crate::store::{OrderStore, StoreError};

/// Pause after a failed dequeue before asking again.
const IDLE_BACKOFF: Duration = Duration::from_millis(100);

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// First confirmation; subscribers were notified. Acked.
    Confirmed,
    /// Order was already confirmed. Acked.
    Replayed,
    /// No such order. Acked.
    Missing,
    /// The store refused the transition for a reason a retry cannot change. Acked.
    Rejected(String),
    /// Transient failure. Nacked for redelivery.
    Retry(String),
}

impl TaskOutcome {
    pub fn should_ack(&self) -> bool {
        !matches!(self, TaskOutcome::Retry(_))
    }
}

pub struct ConfirmationWorker {
    id: usize,
    store: OrderStore,
    queue: Arc<dyn ConfirmationQueue>,
    notifier: Notifier,
    replay_policy: ReplayPolicy,
    processing_timeout: Option<Duration>,
}

impl ConfirmationWorker {
    pub fn new(
        id: usize,
        store: OrderStore,
        queue: Arc<dyn ConfirmationQueue>,
        notifier: Notifier,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            id,
            store,
            queue,
            notifier,
            replay_policy: config.replay_policy,
            processing_timeout: config.processing_timeout(),
        }
    }

    /// Consume deliveries until `cancel` fires. A task already dequeued is
    /// finished and settled before the loop exits.
    #[instrument(name = "confirmation_worker", skip(self, cancel), fields(worker = self.id))]
    pub async fn run(self, cancel: CancellationToken) {
        info!("Worker starting");
        loop {
            let delivery = match self.queue.dequeue(&cancel).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(IDLE_BACKOFF) => continue,
                    }
                }
            };
            self.handle(delivery).await;
        }
        info!("Worker stopped");
    }

    /// Process one delivery and ack or nack it.
    #[instrument(skip(self, delivery), fields(receipt = delivery.receipt, attempt = delivery.attempt))]
    pub async fn handle(&self, delivery: Delivery) -> TaskOutcome {
        let outcome = match self.processing_timeout {
            Some(limit) => tokio::time::timeout(limit, self.process(&delivery.task, delivery.attempt))
                .await
                .unwrap_or_else(|_| TaskOutcome::Retry(format!("processing exceeded {:?}", limit))),
            None => self.process(&delivery.task, delivery.attempt).await,
        };

        let settled = if outcome.should_ack() {
            self.queue.ack(&delivery).await
        } else {
            self.queue.nack(&delivery).await
        };
        if let Err(e) = settled {
            // The queue hands it out again once the visibility timeout passes.
            warn!(error = %e, ?outcome, "Could not settle delivery");
        }
        outcome
    }

    /// Run the confirmation state machine for one task without touching the queue.
    ///
    /// `attempt` is the delivery attempt. On a redelivery an earlier attempt may
    /// have confirmed the order and given up before publishing, so a replay
    /// then always publishes.
    #[instrument(skip(self, task), fields(owner_id = %task.owner_id, order_id = %task.order_id))]
    pub async fn process(&self, task: &ConfirmationTask, attempt: u32) -> TaskOutcome {
        let result = self
            .store
            .update_status(&task.owner_id, &task.order_id, OrderStatus::Pending, OrderStatus::Confirmed)
            .await;

        match result {
            Ok(order) => {
                let reached = self.notifier.publish(OrderEvent::confirmed(&order, false));
                info!(subscribers = reached, "Order confirmed");
                TaskOutcome::Confirmed
            }
            Err(StoreError::Conflict { .. }) => {
                debug!("Order already confirmed, replayed task");
                if attempt > 1 || self.replay_policy == ReplayPolicy::Republish {
                    self.republish(task).await;
                }
                TaskOutcome::Replayed
            }
            Err(StoreError::NotFound(key)) => {
                error!(%key, "Confirmation task for an order that does not exist, dropping it");
                TaskOutcome::Missing
            }
            Err(StoreError::Unavailable(reason)) => {
                warn!(%reason, "Order store unavailable, task will be retried");
                TaskOutcome::Retry(reason)
            }
            Err(other @ (StoreError::InvalidTransition { .. } | StoreError::AlreadyExists(_))) => {
                error!(error = %other, "Confirmation rejected by the store, dropping task");
                TaskOutcome::Rejected(other.to_string())
            }
        }
    }

    async fn republish(&self, task: &ConfirmationTask) {
        match self.store.get(&task.owner_id, &task.order_id).await {
            Ok(order) => {
                let reached = self.notifier.publish(OrderEvent::confirmed(&order, true));
                debug!(subscribers = reached, "Confirmation re-published");
            }
            // The status change already happened; only the extra notification is lost.
            Err(e) => warn!(error = %e, "Could not load order to re-publish confirmation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor_framework::FrameworkError;
    use crate::config::QueueConfig;
    use crate::domain::{Order, OrderId};
    use crate::mock_framework::{create_mock_store, expect_action, expect_get, RecordingQueue};
    use crate::queue::InMemoryQueue;
    use crate::retry::RetryPolicy;
    use crate::store::{spawn_order_store, Transition};
    use chrono::Utc;

    struct Fixture {
        store: OrderStore,
        queue: Arc<RecordingQueue>,
        notifier: Notifier,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: spawn_order_store(RetryPolicy::none(), 10),
                queue: Arc::new(RecordingQueue::default()),
                notifier: Notifier::new(16),
            }
        }

        fn worker(&self, config: &WorkerConfig) -> ConfirmationWorker {
            ConfirmationWorker::new(1, self.store.clone(), self.queue.clone(), self.notifier.clone(), config)
        }

        async fn pending_order(&self, owner: &str, id: &str) -> Delivery {
            let order = Order::pending(owner, OrderId::new(id), 42.0, Utc::now());
            self.store.put(order.clone()).await.unwrap();
            delivery(ConfirmationTask::for_order(&order), 1)
        }
    }

    fn delivery(task: ConfirmationTask, receipt: u64) -> Delivery {
        Delivery { receipt, attempt: 1, task }
    }

    #[tokio::test]
    async fn test_confirms_publishes_and_acks() {
        let fx = Fixture::new();
        let mut events = fx.notifier.subscribe();
        let worker = fx.worker(&WorkerConfig::default());
        let delivery = fx.pending_order("U1", "o1").await;

        assert_eq!(worker.handle(delivery.clone()).await, TaskOutcome::Confirmed);
        assert_eq!(fx.queue.acked(), vec![delivery.receipt]);

        let order = fx.store.get("U1", &OrderId::new("o1")).await.unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(events.recv().await.unwrap(), OrderEvent::confirmed(&order, false));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_acked_without_second_event() {
        let fx = Fixture::new();
        let mut events = fx.notifier.subscribe();
        let worker = fx.worker(&WorkerConfig::default());
        let first = fx.pending_order("U1", "o1").await;
        let second = delivery(first.task.clone(), 2);

        assert_eq!(worker.handle(first).await, TaskOutcome::Confirmed);
        assert_eq!(worker.handle(second).await, TaskOutcome::Replayed);
        assert_eq!(fx.queue.acked(), vec![1, 2]);
        assert!(fx.queue.nacked().is_empty());

        assert!(events.recv().await.is_ok());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_republish_policy_notifies_on_replay() {
        let fx = Fixture::new();
        let mut events = fx.notifier.subscribe();
        let config = WorkerConfig {
            replay_policy: ReplayPolicy::Republish,
            ..WorkerConfig::default()
        };
        let worker = fx.worker(&config);
        let first = fx.pending_order("U1", "o1").await;

        worker.handle(first.clone()).await;
        assert_eq!(worker.handle(delivery(first.task.clone(), 2)).await, TaskOutcome::Replayed);

        let OrderEvent::OrderConfirmed { replay, .. } = events.recv().await.unwrap();
        assert!(!replay);
        let OrderEvent::OrderConfirmed { replay, .. } = events.recv().await.unwrap();
        assert!(replay);
    }

    #[tokio::test]
    async fn test_missing_order_is_acked() {
        let fx = Fixture::new();
        let worker = fx.worker(&WorkerConfig::default());
        let task = ConfirmationTask {
            owner_id: "U1".to_string(),
            order_id: OrderId::new("ghost"),
        };

        assert_eq!(worker.handle(delivery(task, 7)).await, TaskOutcome::Missing);
        assert_eq!(fx.queue.acked(), vec![7]);
    }

    #[tokio::test]
    async fn test_unavailable_store_nacks() {
        let (store, mut store_rx) = create_mock_store(10);
        let queue = Arc::new(RecordingQueue::default());
        let worker = ConfirmationWorker::new(1, store, queue.clone(), Notifier::new(4), &WorkerConfig::default());
        let task = ConfirmationTask {
            owner_id: "U1".to_string(),
            order_id: OrderId::new("o1"),
        };

        let handled = tokio::spawn(async move { worker.handle(delivery(task, 3)).await });
        let (_, _, responder) = expect_action(&mut store_rx).await.expect("Expected Action");
        drop(responder);

        let outcome = handled.await.unwrap();
        assert_eq!(outcome, TaskOutcome::Retry(FrameworkError::ActorDropped.to_string()));
        assert_eq!(queue.nacked(), vec![3]);
        assert!(queue.acked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_timeout_nacks() {
        let (store, mut store_rx) = create_mock_store(10);
        let queue = Arc::new(RecordingQueue::default());
        let config = WorkerConfig {
            processing_timeout_ms: Some(50),
            ..WorkerConfig::default()
        };
        let worker = ConfirmationWorker::new(1, store, queue.clone(), Notifier::new(4), &config);
        let task = ConfirmationTask {
            owner_id: "U1".to_string(),
            order_id: OrderId::new("o1"),
        };

        let handled = tokio::spawn(async move { worker.handle(delivery(task, 4)).await });
        // Hold the store request so processing stalls.
        let _held = expect_action(&mut store_rx).await;

        let outcome = handled.await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Retry(_)));
        assert_eq!(queue.nacked(), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_after_timeout_publishes_confirmation() {
        let (store, mut store_rx) = create_mock_store(10);
        let queue = Arc::new(RecordingQueue::default());
        let notifier = Notifier::new(4);
        let mut events = notifier.subscribe();
        let config = WorkerConfig {
            processing_timeout_ms: Some(50),
            ..WorkerConfig::default()
        };
        let worker = Arc::new(ConfirmationWorker::new(1, store, queue.clone(), notifier, &config));
        let order = Order::pending("U1", OrderId::new("o1"), 9.0, Utc::now());
        let task = ConfirmationTask::for_order(&order);

        // Attempt 1: the store applies the change but answers after the deadline.
        let first = {
            let worker = worker.clone();
            let delivery = delivery(task.clone(), 1);
            tokio::spawn(async move { worker.handle(delivery).await })
        };
        let (_, change, late_reply) = expect_action(&mut store_rx).await.expect("Expected Action");
        assert!(matches!(first.await.unwrap(), TaskOutcome::Retry(_)));
        let mut confirmed = order.clone();
        confirmed.status = OrderStatus::Confirmed;
        confirmed.change_id = Some(change.change_id);
        let _ = late_reply.send(Ok(Transition::Applied(confirmed.clone())));
        assert!(events.try_recv().is_err());

        // Attempt 2 finds the order already confirmed by attempt 1.
        let second = {
            let worker = worker.clone();
            let redelivery = Delivery {
                receipt: 2,
                attempt: 2,
                task,
            };
            tokio::spawn(async move { worker.handle(redelivery).await })
        };
        let (_, _, responder) = expect_action(&mut store_rx).await.expect("Expected redelivered Action");
        responder
            .send(Ok(Transition::AlreadyApplied {
                order: confirmed.clone(),
                same_change: false,
            }))
            .unwrap();
        let (_, responder) = expect_get(&mut store_rx).await.expect("Expected Get");
        responder.send(Ok(Some(confirmed.clone()))).unwrap();

        assert_eq!(second.await.unwrap(), TaskOutcome::Replayed);
        assert_eq!(queue.nacked(), vec![1]);
        assert_eq!(queue.acked(), vec![2]);
        assert_eq!(events.recv().await.unwrap(), OrderEvent::confirmed(&confirmed, true));
    }

    #[tokio::test]
    async fn test_run_loop_drains_queue_until_cancelled() {
        let store = spawn_order_store(RetryPolicy::none(), 10);
        let queue = Arc::new(InMemoryQueue::spawn(&QueueConfig::default(), RetryPolicy::none()));
        let notifier = Notifier::new(16);
        let mut events = notifier.subscribe();

        let order = Order::pending("U1", OrderId::new("o1"), 1.0, Utc::now());
        store.put(order.clone()).await.unwrap();
        queue.enqueue(ConfirmationTask::for_order(&order)).await.unwrap();

        let cancel = CancellationToken::new();
        let worker = ConfirmationWorker::new(1, store.clone(), queue.clone(), notifier, &WorkerConfig::default());
        let handle = tokio::spawn(worker.run(cancel.clone()));

        let event = events.recv().await.unwrap();
        assert_eq!(event.order_id(), &order.order_id);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(queue.stats().await.unwrap().in_flight, 0);
    }
}
