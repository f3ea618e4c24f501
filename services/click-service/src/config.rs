use std::{path::PathBuf, time::Duration};

use clickstream_common::{env_opt, env_or};

use crate::warehouse::BigQueryConfig;

const DEFAULT_DATASET: &str = "analytics_dataset";
const DEFAULT_TABLE: &str = "tab_clicks";
const DEFAULT_API_URL: &str = "https://bigquery.googleapis.com";

/// Process configuration, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub port: u16,
    pub warehouse: BigQueryConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let warehouse = BigQueryConfig {
            project_id: env_opt("BIGQUERY_PROJECT_ID"),
            dataset: env_or("BIGQUERY_DATASET", DEFAULT_DATASET.to_string()),
            table: env_or("BIGQUERY_TABLE", DEFAULT_TABLE.to_string()),
            credentials_file: env_opt::<PathBuf>("BIGQUERY_CREDENTIALS_FILE"),
            location: env_opt("BIGQUERY_LOCATION"),
            api_url: env_or("BIGQUERY_API_URL", DEFAULT_API_URL.to_string()),
            poll_interval: Duration::from_millis(env_or("BIGQUERY_POLL_INTERVAL_MS", 500u64).max(1)),
            query_timeout: Duration::from_millis(env_or("BIGQUERY_QUERY_TIMEOUT_MS", 10_000u64)),
        };

        Self {
            port: env_or("PORT", 8080u16),
            warehouse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_click_table() {
        // Only reads variables no other test sets.
        let config = ServiceConfig::from_env();
        if std::env::var("BIGQUERY_DATASET").is_err() {
            assert_eq!(config.warehouse.dataset, "analytics_dataset");
        }
        if std::env::var("BIGQUERY_TABLE").is_err() {
            assert_eq!(config.warehouse.table, "tab_clicks");
        }
        if std::env::var("BIGQUERY_POLL_INTERVAL_MS").is_err() {
            assert_eq!(config.warehouse.poll_interval, Duration::from_millis(500));
        }
    }
}
