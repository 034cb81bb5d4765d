//! Process-wide pipeline handle.
//!
//! Started once, on first use, from [`PipelineConfig::load`] and then reused by
//! every caller in the process. It lives until the process exits and must be
//! first touched from inside the runtime that will drive it.

use tokio::sync::OnceCell;
use tracing::info;

use super::OrderSystem;
use crate::config::{ConfigError, PipelineConfig};

static SHARED: OnceCell<OrderSystem> = OnceCell::const_new();

/// The shared system, starting it from the environment on first call.
pub async fn shared_system() -> Result<&'static OrderSystem, ConfigError> {
    shared_system_with(|| PipelineConfig::load(None)).await
}

/// Like [`shared_system`], with the config supplied by `load` on first call.
/// Later calls ignore `load` and return the existing system.
pub async fn shared_system_with<F>(load: F) -> Result<&'static OrderSystem, ConfigError>
where
    F: FnOnce() -> Result<PipelineConfig, ConfigError>,
{
    SHARED
        .get_or_try_init(|| async move {
            let config = load()?;
            info!("Starting shared order system");
            OrderSystem::start(&config)
        })
        .await
}
