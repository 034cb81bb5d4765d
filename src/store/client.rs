use std::collections::VecDeque;

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument, warn};

use super::entity::{OrderIndex, StatusChange, Transition};
use super::error::StoreError;
use crate::actor_framework::{Page, ResourceClient};
use crate::domain::{Order, OrderId, OrderKey, OrderStatus};
use crate::retry::RetryPolicy;

/// Lazy stream of orders produced by an index query.
pub type OrderStream = BoxStream<'static, Result<Order, StoreError>>;

/// Client for the order store actor.
///
/// Every call is retried with backoff while the actor is unreachable. A retry
/// can replay a write whose first attempt landed but whose answer was lost;
/// `put` and `update_status` recognise their own earlier write in that case.
#[derive(Clone)]
pub struct OrderStore {
    inner: ResourceClient<Order>,
    retry: RetryPolicy,
    page_size: usize,
}

impl OrderStore {
    pub fn new(inner: ResourceClient<Order>, retry: RetryPolicy, page_size: usize) -> Self {
        Self {
            inner,
            retry,
            page_size: page_size.max(1),
        }
    }

    #[instrument(skip(self, order), fields(owner_id = %order.owner_id, order_id = %order.order_id))]
    pub async fn put(&self, order: Order) -> Result<(), StoreError> {
        debug!("Storing order");
        self.retry
            .run("put", |attempt| {
                let order = order.clone();
                async move {
                    match self.inner.insert(order.clone()).await.map_err(StoreError::from) {
                        Err(StoreError::AlreadyExists(id)) if attempt > 1 => {
                            match self.inner.get(order.key()).await? {
                                Some(existing) if existing == order => {
                                    debug!("Earlier attempt already stored the order");
                                    Ok(())
                                }
                                _ => Err(StoreError::AlreadyExists(id)),
                            }
                        }
                        other => other,
                    }
                }
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn get(&self, owner_id: &str, order_id: &OrderId) -> Result<Order, StoreError> {
        let key = OrderKey::new(owner_id, order_id.clone());
        let found = self
            .retry
            .run("get", |_| {
                let key = key.clone();
                async move { self.inner.get(key).await.map_err(StoreError::from) }
            })
            .await?;
        found.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// All orders of one owner, in `order_id` order.
    pub fn query_by_owner(&self, owner_id: &str) -> OrderStream {
        self.query(OrderIndex::Owner(owner_id.to_string()))
    }

    /// All orders currently in `status`.
    pub fn query_by_status(&self, status: OrderStatus) -> OrderStream {
        self.query(OrderIndex::Status(status))
    }

    /// Compare-and-set: moves the order to `to` only if it is currently `from`.
    ///
    /// Returns [`StoreError::Conflict`] when the order is already `to` because of
    /// some other change. A retry that finds its own earlier write succeeds.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        owner_id: &str,
        order_id: &OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Order, StoreError> {
        let key = OrderKey::new(owner_id, order_id.clone());
        let change = StatusChange::new(from, to, Utc::now());

        self.retry
            .run("update_status", |attempt| {
                let key = key.clone();
                let change = change.clone();
                async move {
                    match self.inner.perform_action(key.clone(), change).await? {
                        Transition::Applied(order) => {
                            info!(status = %order.status, "Order status updated");
                            Ok(order)
                        }
                        // An earlier attempt of this call landed but its answer was lost.
                        Transition::AlreadyApplied { order, same_change: true } => {
                            warn!(attempt, "Status already applied by a retried attempt");
                            Ok(order)
                        }
                        Transition::AlreadyApplied { order, same_change: false } => {
                            debug!("Order already in target status");
                            Err(StoreError::Conflict { key, status: order.status })
                        }
                        Transition::Rejected { current } => Err(StoreError::InvalidTransition {
                            key,
                            from,
                            to,
                            current,
                        }),
                    }
                }
            })
            .await
    }

    /// Drain a query into memory.
    pub async fn collect(stream: OrderStream) -> Result<Vec<Order>, StoreError> {
        stream.try_collect().await
    }

    fn query(&self, index: OrderIndex) -> OrderStream {
        let store = self.clone();
        let start = ScanCursor {
            after: None,
            buffered: VecDeque::new(),
            exhausted: false,
        };

        stream::unfold(Some(start), move |state| {
            let store = store.clone();
            let index = index.clone();
            async move {
                let Some(mut cursor) = state else {
                    return None;
                };
                loop {
                    if let Some(order) = cursor.buffered.pop_front() {
                        return Some((Ok(order), Some(cursor)));
                    }
                    if cursor.exhausted {
                        return None;
                    }
                    match store.scan_page(index.clone(), cursor.after.take()).await {
                        Ok(page) => {
                            cursor.exhausted = page.next.is_none();
                            cursor.after = page.next;
                            cursor.buffered.extend(page.items);
                        }
                        // Surface the failure once, then end the stream.
                        Err(e) => return Some((Err(e), None)),
                    }
                }
            }
        })
        .boxed()
    }

    #[instrument(skip(self))]
    async fn scan_page(&self, index: OrderIndex, after: Option<OrderKey>) -> Result<Page<Order>, StoreError> {
        self.retry
            .run("scan", |_| {
                let index = index.clone();
                let after = after.clone();
                async move {
                    self.inner
                        .scan(index, after, self.page_size)
                        .await
                        .map_err(StoreError::from)
                }
            })
            .await
    }
}

struct ScanCursor {
    after: Option<OrderKey>,
    buffered: VecDeque<Order>,
    exhausted: bool,
}
