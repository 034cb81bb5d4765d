//! Pending-backlog monitor.
//!
//! Nothing re-drives an order whose confirmation task was never enqueued, so
//! such orders sit in `PENDING` forever. This loop makes them visible.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::MonitorConfig;
use crate::domain::OrderStatus;
use crate::queue::{InMemoryQueue, QueueStats};
use crate::store::{OrderStore, StoreError};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound on one backlog check before it is reported as stuck.
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct BacklogReport {
    pub pending: usize,
    /// Pending orders older than the configured threshold.
    pub stale: usize,
    pub oldest_age: Option<Duration>,
    /// `None` when the queue did not answer.
    pub queue: Option<QueueStats>,
}

/// Scan pending orders and the queue once.
#[instrument(skip(store, queue))]
pub async fn check_backlog(
    store: &OrderStore,
    queue: &InMemoryQueue,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<BacklogReport, StoreError> {
    let mut report = BacklogReport {
        pending: 0,
        stale: 0,
        oldest_age: None,
        queue: None,
    };

    let mut pending = store.query_by_status(OrderStatus::Pending);
    while let Some(order) = pending.try_next().await? {
        report.pending += 1;
        let age = (now - order.created_at).to_std().unwrap_or(Duration::ZERO);
        report.oldest_age = report.oldest_age.max(Some(age));
        if age >= stale_after {
            report.stale += 1;
            warn!(
                owner_id = %order.owner_id,
                order_id = %order.order_id,
                age_secs = age.as_secs(),
                "Order stuck in PENDING"
            );
        }
    }

    report.queue = match queue.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!(error = %e, "Queue stats unavailable");
            None
        }
    };
    Ok(report)
}

/// Run [`check_backlog`] every `config.interval()` until `cancel` fires.
#[instrument(name = "backlog_monitor", skip_all)]
pub async fn backlog_monitor(
    store: OrderStore,
    queue: InMemoryQueue,
    config: MonitorConfig,
    cancel: CancellationToken,
) {
    info!(interval_ms = config.interval_ms, "Backlog monitor starting");
    // `interval` panics on zero.
    let mut interval_timer = tokio::time::interval(config.interval().max(MIN_INTERVAL));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval_timer.tick() => {}
        }

        let start = Instant::now();
        let check = check_backlog(&store, &queue, config.stale_after(), Utc::now());
        match tokio::time::timeout(CHECK_TIMEOUT, check).await {
            Ok(Ok(report)) => log_report(&report, start.elapsed()),
            Ok(Err(e)) => {
                error!(error = %e, duration_ms = start.elapsed().as_millis(), "Backlog check failed")
            }
            Err(_) => error!(
                timeout_ms = CHECK_TIMEOUT.as_millis(),
                "Backlog check timed out - store may be blocked/overloaded"
            ),
        }
    }
    info!("Backlog monitor stopped");
}

fn log_report(report: &BacklogReport, elapsed: Duration) {
    let duration_ms = elapsed.as_millis();
    let oldest_secs = report.oldest_age.map(|age| age.as_secs());
    if report.stale > 0 {
        warn!(
            pending = report.pending,
            stale = report.stale,
            oldest_secs,
            duration_ms,
            "Pending backlog has stale orders"
        );
    } else {
        debug!(pending = report.pending, oldest_secs, duration_ms, "Backlog check completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::domain::{ConfirmationTask, Order, OrderId};
    use crate::queue::ConfirmationQueue;
    use crate::retry::RetryPolicy;
    use crate::store::spawn_order_store;

    #[tokio::test]
    async fn test_check_backlog_counts_stale_orders() {
        let store = spawn_order_store(RetryPolicy::none(), 2);
        let queue = InMemoryQueue::spawn(&QueueConfig::default(), RetryPolicy::none());
        let now = Utc::now();

        let old = Order::pending("U1", OrderId::new("old"), 1.0, now - chrono::Duration::minutes(10));
        let fresh = Order::pending("U1", OrderId::new("fresh"), 1.0, now);
        let done = Order::pending("U2", OrderId::new("done"), 1.0, now - chrono::Duration::hours(1));
        for order in [&old, &fresh, &done] {
            store.put(order.clone()).await.unwrap();
        }
        store
            .update_status("U2", &done.order_id, OrderStatus::Pending, OrderStatus::Confirmed)
            .await
            .unwrap();
        queue.enqueue(ConfirmationTask::for_order(&fresh)).await.unwrap();

        let report = check_backlog(&store, &queue, Duration::from_secs(300), now).await.unwrap();
        assert_eq!(report.pending, 2);
        assert_eq!(report.stale, 1);
        assert_eq!(report.oldest_age, Some(Duration::from_secs(600)));
        assert_eq!(report.queue.unwrap().ready, 1);
    }

    async fn run_monitor_briefly(interval_ms: u64) {
        let store = spawn_order_store(RetryPolicy::none(), 2);
        let queue = InMemoryQueue::spawn(&QueueConfig::default(), RetryPolicy::none());
        let cancel = CancellationToken::new();
        let config = MonitorConfig {
            interval_ms,
            ..MonitorConfig::default()
        };

        let handle = tokio::spawn(backlog_monitor(store, queue, config, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(35)).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_on_cancel() {
        run_monitor_briefly(10).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_tolerates_zero_interval() {
        run_monitor_briefly(0).await;
    }
}
