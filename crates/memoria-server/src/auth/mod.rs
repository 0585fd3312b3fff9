//! Device authorization: a small OAuth-device-code-flow lookalike used so a
//! headless or CLI-only device can be approved by a human at a
//! verification URL, without ever typing a password into the device
//! itself.

mod device;
mod flow;
mod tokens;

pub use device::{Device, DeviceRegistry};
pub use flow::{DeviceFlowTable, ExchangeOutcome, FlowStatus, InitiatedFlow};
pub use tokens::{generate_token, generate_user_code, hash_token};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::http::{AppError, AppState};

const UNAUTHENTICATED_PREFIXES: &[&str] = &["/health", "/api/auth/", "/device"];

fn is_unauthenticated_path(path: &str) -> bool {
    UNAUTHENTICATED_PREFIXES
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(prefix))
}

/// Bearer-token middleware guarding every route except `/health`,
/// `/api/auth/*` and `/device*`. When no admin password is configured the
/// server has no notion of "authenticated" yet, so every request passes —
/// a fresh install is usable before a device is ever approved.
pub async fn require_auth(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    if state.admin_password.is_none() || is_unauthenticated_path(req.uri().path()) {
        return next.run(req).await;
    }

    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let token = match token {
        Some(t) => t,
        None => return AppError::from(memoria_core::Error::Unauthorized).into_response(),
    };

    let registry = DeviceRegistry::new(state.store.as_ref());
    match registry.authenticate(token, Some(&addr.ip().to_string())) {
        Ok(_device) => next.run(req).await,
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
            (status, e.to_string()).into_response()
        }
    }
}
