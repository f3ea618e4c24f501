use chrono::{DateTime, Utc};
use serde::Serialize;

/// One tab click, stamped by the service when it is accepted.
///
/// A field sent as JSON `null` is present but empty and loads as SQL NULL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClickEvent {
    pub user_id: Option<String>,
    pub tab_name: Option<String>,
    pub click_timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub app_version: Option<String>,
    pub device_info: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClickStatistic {
    pub tab_name: Option<String>,
    pub click_count: i64,
}

#[derive(Serialize)]
pub struct TrackClickResponse {
    pub status: &'static str,
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct UserClicksResponse {
    pub user_id: String,
    pub click_statistics: Vec<ClickStatistic>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
}
