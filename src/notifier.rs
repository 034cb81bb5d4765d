//! Fan-out of order events to whoever is listening.
//!
//! Delivery is best effort: a subscriber that falls more than the configured
//! buffer behind skips the oldest events. Publishing never fails the caller.

use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::domain::OrderEvent;

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<OrderEvent>,
}

impl Notifier {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Returns how many subscribers the event reached. Zero is a valid outcome.
    #[instrument(skip(self, event), fields(order_id = %event.order_id()))]
    pub fn publish(&self, event: OrderEvent) -> usize {
        match self.sender.send(event) {
            Ok(reached) => {
                debug!(subscribers = reached, "Event published");
                reached
            }
            Err(_) => {
                debug!("No subscribers, event dropped");
                0
            }
        }
    }
}
