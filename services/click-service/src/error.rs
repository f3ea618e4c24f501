use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::models::ErrorResponse;

pub const MISSING_FIELDS: &str = "Missing required fields";
pub const INVALID_JSON: &str = "Invalid JSON payload";
pub const INTERNAL_ERROR: &str = "Internal server error";

/// A failure already reduced to what the caller may see.
#[derive(Debug)]
pub struct ServiceError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ServiceError {
    pub fn new(status: StatusCode, error: &'static str) -> Self {
        Self {
            status,
            body: ErrorResponse { error },
        }
    }

    pub fn missing_fields() -> Self {
        Self::new(StatusCode::BAD_REQUEST, MISSING_FIELDS)
    }

    pub fn invalid_json() -> Self {
        Self::new(StatusCode::BAD_REQUEST, INVALID_JSON)
    }

    /// Warehouse detail stays in the logs; callers get a fixed message.
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
