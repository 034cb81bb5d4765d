use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::ConfirmationWorker;
use crate::config::WorkerConfig;
use crate::notifier::Notifier;
use crate::queue::ConfirmationQueue;
use crate::store::OrderStore;

/// A fixed set of workers sharing one cancellation token.
pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.count` workers. They stop when `shutdown` is called or `parent` is cancelled.
    #[instrument(name = "worker_pool", skip_all, fields(count = config.count))]
    pub fn start(
        config: &WorkerConfig,
        store: OrderStore,
        queue: Arc<dyn ConfirmationQueue>,
        notifier: Notifier,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let handles = (0..config.count)
            .map(|id| {
                let worker = ConfirmationWorker::new(id, store.clone(), queue.clone(), notifier.clone(), config);
                tokio::spawn(worker.run(cancel.clone()))
            })
            .collect();
        info!("Worker pool started");
        Self { cancel, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop dequeuing and wait for in-flight tasks to settle.
    #[instrument(name = "worker_pool_shutdown", skip(self))]
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = ?e, "Worker task failed");
            }
        }
        info!("Worker pool stopped");
    }
}
