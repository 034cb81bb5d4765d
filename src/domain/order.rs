use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of an order. `Pending -> Confirmed` is the only edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
        }
    }

    /// Whether `self -> to` is a legal status edge.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        matches!((self, to), (OrderStatus::Pending, OrderStatus::Confirmed))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque order identifier.
///
/// Generated ids look like `ord_<unix millis>_<uuid>`: the zero-padded
/// millisecond prefix keeps them roughly creation-ordered when sorted, the
/// random suffix keeps concurrent generators from colliding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    pub fn generate_at(now: DateTime<Utc>) -> Self {
        Self(format!(
            "ord_{:013}_{}",
            now.timestamp_millis().max(0),
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OrderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Compound primary key of an order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub owner_id: String,
    pub order_id: OrderId,
}

impl OrderKey {
    pub fn new(owner_id: impl Into<String>, order_id: impl Into<OrderId>) -> Self {
        Self {
            owner_id: owner_id.into(),
            order_id: order_id.into(),
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.order_id)
    }
}

/// Represents a customer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub owner_id: String,
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Token of the status change that produced the current status.
    #[serde(skip)]
    pub change_id: Option<Uuid>,
}

impl Order {
    /// Builds a fresh `PENDING` order stamped with `now`.
    pub fn pending(
        owner_id: impl Into<String>,
        order_id: OrderId,
        total: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            order_id,
            status: OrderStatus::Pending,
            total,
            created_at: now,
            updated_at: now,
            change_id: None,
        }
    }

    pub fn key(&self) -> OrderKey {
        OrderKey {
            owner_id: self.owner_id.clone(),
            order_id: self.order_id.clone(),
        }
    }
}
