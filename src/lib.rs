//! Order lifecycle pipeline.
//!
//! Orders enter through [`intake`] as `PENDING`, are written to the [`store`],
//! and a confirmation task is put on the [`queue`]. [`worker`]s move each order
//! to `CONFIRMED` with a compare-and-set and announce it through the [`notifier`].
//! [`app_system::OrderSystem`] wires it all together.

pub mod actor_framework;
pub mod api;
pub mod app_system;
pub mod config;
pub mod domain;
pub mod intake;
pub mod notifier;
pub mod queue;
pub mod retry;
pub mod store;
pub mod worker;

#[cfg(test)]
mod mock_framework;
