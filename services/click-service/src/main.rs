mod app;
mod config;
mod error;
mod handlers;
mod models;
mod service;
mod state;
mod validation;
mod warehouse;

use std::sync::Arc;

use clickstream_common::{bind_listener, init_tracing, shutdown_signal};

use crate::config::ServiceConfig;
use crate::state::AppState;
use crate::warehouse::BigQueryClient;

#[tokio::main]
async fn main() {
    let _guards = init_tracing("click-tracking-service");

    let config = ServiceConfig::from_env();
    let dataset = config.warehouse.dataset.clone();
    let table = config.warehouse.table.clone();

    // Without a working warehouse client the service must not take traffic.
    let warehouse = match BigQueryClient::connect(config.warehouse).await {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize BigQuery client");
            std::process::exit(1);
        }
    };

    let state = AppState::new(Arc::new(warehouse), dataset, table);
    let app = app::build_router(state);

    let listener = match bind_listener(config.port).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, port = config.port, "failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!(port = config.port, "click tracking service listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }
}
