use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::monitor::backlog_monitor;
use crate::api::IntakeApi;
use crate::config::{ConfigError, PipelineConfig};
use crate::intake::IntakeClient;
use crate::notifier::Notifier;
use crate::queue::InMemoryQueue;
use crate::retry::RetryPolicy;
use crate::store::{order_store, OrderStore};
use crate::worker::WorkerPool;

/// How long `shutdown` waits for each actor once its clients are gone.
const ACTOR_STOP_GRACE: Duration = Duration::from_secs(5);

/// The running pipeline: store and queue actors, notifier, worker pool and
/// (optionally) the backlog monitor.
///
/// Responsible for starting up actors, wiring them together, and handling shutdown.
pub struct OrderSystem {
    pub api: IntakeApi,
    pub intake: IntakeClient,
    pub store: OrderStore,
    pub queue: InMemoryQueue,
    pub notifier: Notifier,
    cancel: CancellationToken,
    workers: WorkerPool,
    monitor: Option<JoinHandle<()>>,
    actors: Vec<(&'static str, JoinHandle<()>)>,
}

impl OrderSystem {
    /// Validate `config` and start every component on the current runtime.
    pub fn start(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let retry = RetryPolicy::from(&config.retry);

        // 1. Order store
        let (store_actor, store) = order_store(&config.store, retry.clone());
        let store_handle = tokio::spawn(store_actor.run());

        // 2. Confirmation queue
        let (queue_actor, queue) = InMemoryQueue::new(&config.queue, retry);
        let queue_handle = tokio::spawn(queue_actor.run());
        let shared_queue = Arc::new(queue.clone());

        // 3. Notifier and workers
        let notifier = Notifier::new(config.notifier.buffer_size);
        let cancel = CancellationToken::new();
        let workers = WorkerPool::start(&config.worker, store.clone(), shared_queue.clone(), notifier.clone(), &cancel);

        // 4. Backlog monitor
        let monitor = config.monitor.enabled.then(|| {
            tokio::spawn(backlog_monitor(
                store.clone(),
                queue.clone(),
                config.monitor.clone(),
                cancel.child_token(),
            ))
        });

        // 5. Intake surface
        let intake = IntakeClient::new(store.clone(), shared_queue);
        let api = IntakeApi::new(intake.clone());

        info!(workers = workers.len(), monitor = monitor.is_some(), "Order system started");
        Ok(Self {
            api,
            intake,
            store,
            queue,
            notifier,
            cancel,
            workers,
            monitor,
            actors: vec![("order_store", store_handle), ("confirmation_queue", queue_handle)],
        })
    }

    /// Stop workers (letting in-flight tasks settle), stop the monitor, then
    /// close the actors once their clients are dropped.
    pub async fn shutdown(self) {
        info!("Shutting down system...");
        let Self {
            api,
            intake,
            store,
            queue,
            notifier,
            cancel,
            workers,
            monitor,
            actors,
        } = self;

        cancel.cancel();
        workers.shutdown().await;
        if let Some(monitor) = monitor {
            if let Err(e) = monitor.await {
                error!(error = ?e, "Backlog monitor failed");
            }
        }

        // Actors stop when their channels close.
        drop((api, intake, store, queue, notifier));

        for (name, mut handle) in actors {
            match tokio::time::timeout(ACTOR_STOP_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(actor = name, error = ?e, "Actor task failed"),
                Err(_) => {
                    warn!(actor = name, "Actor still has live clients, aborting it");
                    handle.abort();
                }
            }
        }

        info!("System shutdown complete.");
    }
}
