//! Order store: keyed by `(owner_id, order_id)`, indexed by owner and by status.

mod client;
pub mod entity;
pub mod error;

pub use client::*;
pub use entity::{OrderIndex, StatusChange, Transition};
pub use error::*;

use crate::actor_framework::ResourceActor;
use crate::config::StoreConfig;
use crate::domain::Order;
use crate::retry::RetryPolicy;

/// Build the store actor and a client for it. The caller spawns `actor.run()`.
pub fn order_store(config: &StoreConfig, retry: RetryPolicy) -> (ResourceActor<Order>, OrderStore) {
    let (actor, inner) = ResourceActor::<Order>::new(config.buffer_size, config.request_timeout());
    (actor, OrderStore::new(inner, retry, config.page_size))
}

/// Spawn a store actor with default settings. Handy in tests.
pub fn spawn_order_store(retry: RetryPolicy, page_size: usize) -> OrderStore {
    let config = StoreConfig {
        page_size,
        ..StoreConfig::default()
    };
    let (actor, store) = order_store(&config, retry);
    tokio::spawn(actor.run());
    store
}
