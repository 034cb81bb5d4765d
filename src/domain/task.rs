use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order::{Order, OrderId, OrderKey};

/// Work item handed from intake to the confirmation workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmationTask {
    pub owner_id: String,
    pub order_id: OrderId,
}

impl ConfirmationTask {
    pub fn for_order(order: &Order) -> Self {
        Self {
            owner_id: order.owner_id.clone(),
            order_id: order.order_id.clone(),
        }
    }

    pub fn key(&self) -> OrderKey {
        OrderKey::new(self.owner_id.clone(), self.order_id.clone())
    }
}

/// State-change notifications fanned out by the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    OrderConfirmed {
        owner_id: String,
        order_id: OrderId,
        total: f64,
        confirmed_at: DateTime<Utc>,
        /// Set when the event was re-published for an already confirmed order.
        replay: bool,
    },
}

impl OrderEvent {
    pub fn confirmed(order: &Order, replay: bool) -> Self {
        OrderEvent::OrderConfirmed {
            owner_id: order.owner_id.clone(),
            order_id: order.order_id.clone(),
            total: order.total,
            confirmed_at: order.updated_at,
            replay,
        }
    }

    pub fn order_id(&self) -> &OrderId {
        match self {
            OrderEvent::OrderConfirmed { order_id, .. } => order_id,
        }
    }
}
