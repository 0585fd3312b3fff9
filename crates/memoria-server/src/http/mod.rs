//! HTTP surface: axum `Router`, shared `AppState`, and an `AppError`
//! newtype that maps the core error taxonomy onto status codes. Responses
//! are raw resource JSON rather than a `{success, data, error}` envelope.

mod routes;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use memoria_core::{Error, Store};
use serde_json::json;

use crate::auth::DeviceFlowTable;

pub use routes::create_router;

/// Shared application state. Cheap to clone — every field is an `Arc` or
/// `Copy`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub flows: Arc<DeviceFlowTable>,
    pub admin_password: Option<String>,
    pub default_budget: u32,
}

/// Wraps every handler error so a single `From` impl maps the full core
/// error taxonomy onto HTTP status codes via `Error::status_code`.
pub struct AppError(pub Error);

pub type AppResult<T> = Result<T, AppError>;

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Every JSON response body is two-space indented, unlike `axum::Json`'s
/// compact default.
pub struct PrettyJson<T>(pub T);

impl<T: serde::Serialize> IntoResponse for PrettyJson<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec_pretty(&self.0) {
            Ok(bytes) => (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                bytes,
            )
                .into_response(),
            Err(e) => AppError(Error::Fatal(e.to_string())).into_response(),
        }
    }
}

pub struct Created<T>(pub T);

impl<T: serde::Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec_pretty(&self.0) {
            Ok(bytes) => (
                StatusCode::CREATED,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                bytes,
            )
                .into_response(),
            Err(e) => AppError(Error::Fatal(e.to_string())).into_response(),
        }
    }
}
