pub mod auth;
pub mod rest;

use axum::{http::StatusCode, Json};

/// Error response shared by every API route: status plus `{ "error": ... }`.
pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}
