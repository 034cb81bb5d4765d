//! Intake: accepts new orders and hands them to the confirmation queue.

pub mod error;

pub use error::*;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument};

use crate::domain::{ConfirmationTask, Order, OrderId};
use crate::queue::ConfirmationQueue;
use crate::store::{OrderStore, OrderStream};

/// Client-side orchestration of order creation.
///
/// The store write happens before the enqueue and is never rolled back. If the
/// enqueue fails the caller gets [`IntakeError::NotEnqueued`] and the order
/// stays `PENDING`.
#[derive(Clone)]
pub struct IntakeClient {
    store: OrderStore,
    queue: Arc<dyn ConfirmationQueue>,
}

impl IntakeClient {
    pub fn new(store: OrderStore, queue: Arc<dyn ConfirmationQueue>) -> Self {
        Self { store, queue }
    }

    #[instrument(skip(self), fields(order_id = tracing::field::Empty))]
    pub async fn create_order(&self, owner_id: &str, total: f64) -> Result<Order, IntakeError> {
        info!("Processing create_order request");

        // Step 1: Validate input
        validate_owner(owner_id)?;
        validate_total(total)?;

        // Step 2: Persist the pending order
        let order = Order::pending(owner_id, OrderId::generate(), total, Utc::now());
        tracing::Span::current().record("order_id", tracing::field::display(&order.order_id));
        self.store.put(order.clone()).await?;
        debug!("Order stored");

        // Step 3: Hand off for confirmation
        if let Err(e) = self.queue.enqueue(ConfirmationTask::for_order(&order)).await {
            error!(error = %e, "Order stored but confirmation task was not enqueued");
            return Err(IntakeError::NotEnqueued {
                order_id: order.order_id,
                reason: e.to_string(),
            });
        }

        info!("Order accepted");
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn list_orders(&self, owner_id: &str) -> Result<Vec<Order>, IntakeError> {
        validate_owner(owner_id)?;
        let orders = OrderStore::collect(self.store.query_by_owner(owner_id)).await?;
        debug!(count = orders.len(), "Listed orders");
        Ok(orders)
    }

    /// Lazy variant of [`IntakeClient::list_orders`].
    pub fn orders(&self, owner_id: &str) -> OrderStream {
        self.store.query_by_owner(owner_id)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, owner_id: &str, order_id: &OrderId) -> Result<Order, IntakeError> {
        Ok(self.store.get(owner_id, order_id).await?)
    }
}

fn validate_owner(owner_id: &str) -> Result<(), IntakeError> {
    if owner_id.trim().is_empty() {
        return Err(IntakeError::InvalidArgument("owner_id must not be empty".to_string()));
    }
    Ok(())
}

fn validate_total(total: f64) -> Result<(), IntakeError> {
    if !total.is_finite() || total < 0.0 {
        return Err(IntakeError::InvalidArgument(format!(
            "total must be a non-negative number, got {total}"
        )));
    }
    Ok(())
}
