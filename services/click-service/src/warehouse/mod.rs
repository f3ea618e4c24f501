//! Access to the analytics warehouse.
//!
//! Handlers only see the [`Warehouse`] trait; [`BigQueryClient`] is the
//! production implementation talking to the BigQuery REST API.

mod bigquery;
mod credentials;

use async_trait::async_trait;

use crate::models::{ClickEvent, ClickStatistic};

pub use bigquery::{BigQueryClient, BigQueryConfig};

/// Column layout of the click table, in load order.
pub const CLICK_SCHEMA: [(&str, &str); 6] = [
    ("user_id", "STRING"),
    ("tab_name", "STRING"),
    ("click_timestamp", "TIMESTAMP"),
    ("session_id", "STRING"),
    ("app_version", "STRING"),
    ("device_info", "STRING"),
];

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Append `rows` to `dataset.table`, returning once the load job is done.
    async fn load_rows(
        &self,
        rows: &[ClickEvent],
        dataset: &str,
        table: &str,
    ) -> Result<(), WarehouseError>;

    /// Per-tab click counts for one user, highest count first.
    async fn query_user_clicks(&self, user_id: &str) -> Result<Vec<ClickStatistic>, WarehouseError>;
}

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// No usable credentials or project; fatal at startup.
    #[error("warehouse client init failed: {0}")]
    Init(String),

    #[error("load job into {table} failed: {source}")]
    Write {
        table: String,
        #[source]
        source: ApiError,
    },

    #[error("query failed: {source}")]
    Query {
        #[source]
        source: ApiError,
    },
}

impl WarehouseError {
    /// Coarse failure class for logs; never sent to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            WarehouseError::Init(_) => "init",
            WarehouseError::Write { source, .. } | WarehouseError::Query { source } => source.kind(),
        }
    }
}

/// Failures below the warehouse operations: token exchange, transport, API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("job {job_id} failed: {message}")]
    Job { job_id: String, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Auth(_) => "auth",
            ApiError::Transport(_) => "transport",
            ApiError::Api { .. } => "api",
            ApiError::Job { .. } => "job",
            ApiError::Decode(_) => "decode",
        }
    }
}
