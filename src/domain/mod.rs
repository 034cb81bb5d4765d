pub mod order;
pub mod task;

pub use order::*;
pub use task::*;
