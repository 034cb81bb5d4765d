//! System orchestration, startup, and shutdown logic.

pub mod monitor;
pub mod order_system;
pub mod shared;
pub mod telemetry;

pub use monitor::*;
pub use order_system::*;
pub use shared::*;
pub use telemetry::*;
