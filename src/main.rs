use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn, Instrument};

use order_pipeline::api::{CreateOrderRequest, ListOrdersRequest};
use order_pipeline::app_system::{setup_tracing, OrderSystem};
use order_pipeline::config::PipelineConfig;

const CONFIRM_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup tracing once for the entire application
    setup_tracing();

    // Optional config file as the first argument; ORDER_PIPELINE__* overrides it.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = PipelineConfig::load(config_path.as_deref()).context("loading configuration")?;

    info!("Starting order pipeline");
    let system = OrderSystem::start(&config)?;
    let mut events = system.notifier.subscribe();

    let span = tracing::info_span!("order_intake");
    let created = async {
        info!("Creating demo orders");
        let mut created = Vec::new();
        for (owner_id, total) in [("U1", 199.0), ("U1", 25.5), ("U2", 12.0)] {
            let request = CreateOrderRequest {
                owner_id: owner_id.to_string(),
                total,
            };
            match system.api.create(request).await {
                Ok(response) => {
                    info!(owner_id, order_id = %response.order_id, status = %response.status, "Order accepted");
                    created.push(response.order_id);
                }
                Err(e) => error!(owner_id, code = ?e.code, message = %e.message, "Order rejected"),
            }
        }
        // Rejected before anything is written.
        if let Err(e) = system.api.handle_create(r#"{"owner_id":"U1","total":-5}"#).await {
            info!(response = %e, "Negative total rejected as expected");
        }
        created
    }
    .instrument(span)
    .await;

    let span = tracing::info_span!("await_confirmations");
    async {
        for _ in 0..created.len() {
            match tokio::time::timeout(CONFIRM_WAIT, events.recv()).await {
                Ok(Ok(event)) => info!(order_id = %event.order_id(), "Confirmation received"),
                Ok(Err(e)) => warn!(error = %e, "Notifier closed or lagged"),
                Err(_) => {
                    warn!("Timed out waiting for confirmations");
                    break;
                }
            }
        }
    }
    .instrument(span)
    .await;

    for owner_id in ["U1", "U2"] {
        let listed = system
            .api
            .list(ListOrdersRequest {
                owner_id: owner_id.to_string(),
            })
            .await;
        match listed {
            Ok(response) => {
                for order in &response.orders {
                    info!(owner_id, order_id = %order.order_id, status = %order.status, total = order.total, "Order");
                }
            }
            Err(e) => error!(owner_id, message = %e.message, "Listing failed"),
        }
    }

    // Shutdown system gracefully
    system.shutdown().await;

    info!("Application completed successfully");
    Ok(())
}
