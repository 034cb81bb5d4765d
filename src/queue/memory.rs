use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{ConfirmationQueue, Delivery, QueueError};
use crate::config::QueueConfig;
use crate::domain::ConfirmationTask;
use crate::retry::RetryPolicy;

#[derive(Debug)]
pub enum QueueRequest {
    Enqueue {
        task: ConfirmationTask,
        respond_to: oneshot::Sender<()>,
    },
    Dequeue {
        respond_to: oneshot::Sender<Delivery>,
    },
    Ack {
        receipt: u64,
        respond_to: oneshot::Sender<Result<(), QueueError>>,
    },
    Nack {
        receipt: u64,
        respond_to: oneshot::Sender<Result<(), QueueError>>,
    },
    Stats {
        respond_to: oneshot::Sender<QueueStats>,
    },
}

/// Point-in-time queue depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub delayed: usize,
    pub in_flight: usize,
    pub waiting_workers: usize,
}

struct Queued {
    task: ConfirmationTask,
    attempts: u32,
}

struct InFlight {
    task: ConfirmationTask,
    attempts: u32,
    visible_at: Instant,
}

/// Queue actor. Owns ready, delayed and in-flight tasks plus the workers waiting on `dequeue`.
pub struct QueueActor {
    receiver: mpsc::Receiver<QueueRequest>,
    ready: VecDeque<Queued>,
    delayed: Vec<(Instant, Queued)>,
    in_flight: HashMap<u64, InFlight>,
    waiters: VecDeque<oneshot::Sender<Delivery>>,
    next_receipt: u64,
    visibility_timeout: Duration,
    nack_delay: Duration,
}

impl QueueActor {
    #[instrument(name = "confirmation_queue", skip(self))]
    pub async fn run(mut self) {
        info!("ConfirmationQueue starting");
        loop {
            self.release_due(Instant::now());
            self.serve_waiters();

            let wake_at = self.next_wake();
            tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                _ = sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {}
            }
        }
        info!(
            ready = self.ready.len(),
            in_flight = self.in_flight.len(),
            "ConfirmationQueue stopped"
        );
    }

    fn handle(&mut self, msg: QueueRequest) {
        match msg {
            QueueRequest::Enqueue { task, respond_to } => {
                debug!(order_id = %task.order_id, "Task enqueued");
                self.ready.push_back(Queued { task, attempts: 0 });
                let _ = respond_to.send(());
            }
            QueueRequest::Dequeue { respond_to } => {
                self.waiters.push_back(respond_to);
            }
            QueueRequest::Ack { receipt, respond_to } => {
                let result = match self.in_flight.remove(&receipt) {
                    Some(flight) => {
                        debug!(receipt, order_id = %flight.task.order_id, "Task acked");
                        Ok(())
                    }
                    None => Err(QueueError::UnknownReceipt(receipt)),
                };
                let _ = respond_to.send(result);
            }
            QueueRequest::Nack { receipt, respond_to } => {
                let result = match self.in_flight.remove(&receipt) {
                    Some(flight) => {
                        debug!(receipt, order_id = %flight.task.order_id, "Task nacked");
                        let queued = Queued {
                            task: flight.task,
                            attempts: flight.attempts,
                        };
                        if self.nack_delay.is_zero() {
                            self.ready.push_back(queued);
                        } else {
                            self.delayed.push((Instant::now() + self.nack_delay, queued));
                        }
                        Ok(())
                    }
                    None => Err(QueueError::UnknownReceipt(receipt)),
                };
                let _ = respond_to.send(result);
            }
            QueueRequest::Stats { respond_to } => {
                let _ = respond_to.send(QueueStats {
                    ready: self.ready.len(),
                    delayed: self.delayed.len(),
                    in_flight: self.in_flight.len(),
                    waiting_workers: self.waiters.iter().filter(|w| !w.is_closed()).count(),
                });
            }
        }
    }

    /// Move expired in-flight tasks and elapsed nacks back to ready.
    fn release_due(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.visible_at <= now)
            .map(|(receipt, _)| *receipt)
            .collect();
        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                warn!(receipt, order_id = %flight.task.order_id, attempts = flight.attempts, "Visibility timeout expired, task will be redelivered");
                self.ready.push_back(Queued {
                    task: flight.task,
                    attempts: flight.attempts,
                });
            }
        }

        if self.delayed.iter().any(|(at, _)| *at <= now) {
            let (mut due, later): (Vec<_>, Vec<_>) =
                std::mem::take(&mut self.delayed).into_iter().partition(|(at, _)| *at <= now);
            self.delayed = later;
            due.sort_by_key(|(at, _)| *at);
            self.ready.extend(due.into_iter().map(|(_, queued)| queued));
        }
    }

    fn serve_waiters(&mut self) {
        self.waiters.retain(|waiter| !waiter.is_closed());

        while !self.ready.is_empty() {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            let Some(queued) = self.ready.pop_front() else {
                break;
            };

            let receipt = self.next_receipt;
            self.next_receipt += 1;
            let attempt = queued.attempts + 1;
            let delivery = Delivery {
                receipt,
                attempt,
                task: queued.task.clone(),
            };

            match waiter.send(delivery) {
                Ok(()) => {
                    debug!(receipt, attempt, order_id = %queued.task.order_id, "Task delivered");
                    self.in_flight.insert(
                        receipt,
                        InFlight {
                            task: queued.task,
                            attempts: attempt,
                            visible_at: Instant::now() + self.visibility_timeout,
                        },
                    );
                }
                // The worker stopped waiting; keep the task at the head.
                Err(_) => self.ready.push_front(queued),
            }
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        let flights = self.in_flight.values().map(|flight| flight.visible_at);
        let nacks = self.delayed.iter().map(|(at, _)| *at);
        flights.chain(nacks).min()
    }
}

/// Client handle for the in-memory confirmation queue.
#[derive(Clone)]
pub struct InMemoryQueue {
    sender: mpsc::Sender<QueueRequest>,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl InMemoryQueue {
    pub fn new(config: &QueueConfig, retry: RetryPolicy) -> (QueueActor, Self) {
        let (sender, receiver) = mpsc::channel(config.buffer_size);
        let actor = QueueActor {
            receiver,
            ready: VecDeque::new(),
            delayed: Vec::new(),
            in_flight: HashMap::new(),
            waiters: VecDeque::new(),
            next_receipt: 1,
            visibility_timeout: config.visibility_timeout(),
            nack_delay: config.nack_delay(),
        };
        let client = Self {
            sender,
            request_timeout: config.request_timeout(),
            retry,
        };
        (actor, client)
    }

    /// Start the actor on the current runtime and return its client.
    pub fn spawn(config: &QueueConfig, retry: RetryPolicy) -> Self {
        let (actor, client) = Self::new(config, retry);
        tokio::spawn(actor.run());
        client
    }

    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.call(|respond_to| QueueRequest::Stats { respond_to }).await
    }

    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> QueueRequest) -> Result<R, QueueError> {
        let (respond_to, response) = oneshot::channel();
        let exchange = async move {
            self.sender
                .send(make(respond_to))
                .await
                .map_err(|_| QueueError::Unavailable("queue closed".to_string()))?;
            response
                .await
                .map_err(|_| QueueError::Unavailable("queue dropped the request".to_string()))
        };
        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| QueueError::Unavailable(format!("no answer within {:?}", self.request_timeout)))?
    }
}

#[async_trait]
impl ConfirmationQueue for InMemoryQueue {
    #[instrument(skip(self, task), fields(order_id = %task.order_id))]
    async fn enqueue(&self, task: ConfirmationTask) -> Result<(), QueueError> {
        debug!("Sending request");
        self.retry
            .run("enqueue", |_| {
                let task = task.clone();
                async move { self.call(|respond_to| QueueRequest::Enqueue { task, respond_to }).await }
            })
            .await
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Delivery>, QueueError> {
        let (respond_to, response) = oneshot::channel();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            sent = self.sender.send(QueueRequest::Dequeue { respond_to }) => {
                sent.map_err(|_| QueueError::Unavailable("queue closed".to_string()))?;
            }
        }
        // Dropping `response` on cancellation tells the actor to hand the task to someone else.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            delivery = response => delivery
                .map(Some)
                .map_err(|_| QueueError::Unavailable("queue stopped".to_string())),
        }
    }

    #[instrument(skip(self, delivery), fields(receipt = delivery.receipt, order_id = %delivery.task.order_id))]
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let receipt = delivery.receipt;
        self.retry
            .run("ack", |_| async move {
                self.call(|respond_to| QueueRequest::Ack { receipt, respond_to })
                    .await
                    .and_then(|result| result)
            })
            .await
    }

    #[instrument(skip(self, delivery), fields(receipt = delivery.receipt, order_id = %delivery.task.order_id))]
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let receipt = delivery.receipt;
        self.retry
            .run("nack", |_| async move {
                self.call(|respond_to| QueueRequest::Nack { receipt, respond_to })
                    .await
                    .and_then(|result| result)
            })
            .await
    }
}
