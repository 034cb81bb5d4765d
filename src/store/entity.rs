use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::actor_framework::Entity;
use crate::domain::{Order, OrderKey, OrderStatus};

/// Secondary indexes an order is reachable through.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderIndex {
    Owner(String),
    Status(OrderStatus),
}

/// Compare-and-set on the order status.
///
/// `change_id` is shared by every retry of one logical change, so the store can
/// tell a replay of that change from somebody else's.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub change_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(from: OrderStatus, to: OrderStatus, at: DateTime<Utc>) -> Self {
        Self {
            change_id: Uuid::new_v4(),
            from,
            to,
            at,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Transition {
    /// Status moved `from -> to`; carries the updated record.
    Applied(Order),
    /// Status was already `to`; record untouched. `same_change` is set when
    /// this very change put it there.
    AlreadyApplied { order: Order, same_change: bool },
    /// Current status matches neither end, or `from -> to` is not a legal edge.
    Rejected { current: OrderStatus },
}

impl Entity for Order {
    type Id = OrderKey;
    type IndexKey = OrderIndex;
    type Action = StatusChange;
    type ActionResult = Transition;

    fn id(&self) -> OrderKey {
        self.key()
    }

    fn index_keys(&self) -> Vec<OrderIndex> {
        vec![
            OrderIndex::Owner(self.owner_id.clone()),
            OrderIndex::Status(self.status),
        ]
    }

    /// Applies a status change only when the current status equals `from`.
    fn handle_action(&mut self, change: StatusChange) -> Transition {
        if !change.from.can_transition_to(change.to) {
            return Transition::Rejected { current: self.status };
        }
        if self.status == change.to {
            return Transition::AlreadyApplied {
                order: self.clone(),
                same_change: self.change_id == Some(change.change_id),
            };
        }
        if self.status != change.from {
            return Transition::Rejected { current: self.status };
        }

        self.status = change.to;
        // updated_at never moves backwards, even if clocks disagree
        self.updated_at = change.at.max(self.created_at);
        self.change_id = Some(change.change_id);
        Transition::Applied(self.clone())
    }
}
