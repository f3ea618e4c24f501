use chrono::Utc;
use serde_json::Value;

use crate::error::ServiceError;
use crate::models::{TrackClickResponse, UserClicksResponse};
use crate::state::AppState;
use crate::validation::{validate, Validation};

pub async fn track_click(state: &AppState, body: &[u8]) -> Result<TrackClickResponse, ServiceError> {
    // Unparseable bodies are client errors here (400), not the catch-all 500.
    let payload: Value = serde_json::from_slice(body).map_err(|err| {
        tracing::warn!(error = %err, "rejected unparseable click payload");
        ServiceError::invalid_json()
    })?;

    let event = match validate(&payload, Utc::now()) {
        Validation::Valid(event) => event,
        Validation::Invalid { missing } => {
            tracing::warn!(missing = ?missing, "rejected click payload");
            return Err(ServiceError::missing_fields());
        }
    };

    let rows = [event];
    if let Err(err) = state
        .warehouse
        .load_rows(&rows, &state.dataset, &state.table)
        .await
    {
        tracing::error!(
            error = %err,
            error_kind = err.kind(),
            user_id = rows[0].user_id.as_deref().unwrap_or_default(),
            "error processing click event"
        );
        return Err(ServiceError::internal());
    }

    Ok(TrackClickResponse {
        status: "success",
        message: "Click event recorded successfully",
    })
}

pub async fn user_clicks(state: &AppState, user_id: String) -> Result<UserClicksResponse, ServiceError> {
    match state.warehouse.query_user_clicks(&user_id).await {
        Ok(click_statistics) => {
            tracing::debug!(
                user_id = user_id.as_str(),
                tabs = click_statistics.len(),
                "click statistics retrieved"
            );
            Ok(UserClicksResponse {
                user_id,
                click_statistics,
            })
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                error_kind = err.kind(),
                user_id = user_id.as_str(),
                "error retrieving click statistics"
            );
            Err(ServiceError::internal())
        }
    }
}
