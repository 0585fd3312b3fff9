//! Route table. Every handler follows the same shape: extract
//! `State<AppState>`/`Path`/`Query`, call into the store, wrap the result
//! in `AppResult<T>` so `?` alone handles error mapping.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use memoria_core::{
    sync, ComposeRequest, ComposeResult, CreateNode, Direction, Edge, EdgeKind, Error, Node,
    NodeKind, PullRequest, PushRequest, Store, UpdateNode,
};
use serde::{Deserialize, Serialize};

use crate::auth::{DeviceRegistry, ExchangeOutcome};

use super::{AppError, AppResult, AppState, Created, PrettyJson};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/nodes", post(create_node))
        .route("/api/nodes/:id", get(get_node).patch(update_node).delete(delete_node))
        .route("/api/nodes/:id/tags", post(add_tag).delete(remove_tag))
        .route("/api/nodes/:id/supersede", post(supersede_node))
        .route("/api/edges/:id", get(get_edges))
        .route("/api/edges", post(create_edge).delete(delete_edge))
        .route("/api/query", post(run_query))
        .route("/api/compose", post(run_compose))
        .route("/api/sync/push", post(sync_push))
        .route("/api/sync/pull", post(sync_pull))
        .route("/api/auth/device", post(auth_device))
        .route("/api/auth/token", post(auth_token))
        .route("/api/auth/refresh", post(auth_refresh))
        .route("/device/authorize", get(device_authorize_form).post(device_authorize_submit))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:id/revoke", post(revoke_device))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> PrettyJson<HealthResponse> {
    PrettyJson(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct StatusResponse {
    total_nodes: u64,
    total_tokens: u64,
    total_edges: u64,
    unique_tags: u64,
    node_counts_by_kind: HashMap<String, u64>,
}

async fn status(State(state): State<AppState>) -> AppResult<PrettyJson<StatusResponse>> {
    let stats = state.store.stats()?;
    let node_counts_by_kind = stats
        .node_counts_by_kind
        .into_iter()
        .map(|(k, v)| (k.as_str().to_string(), v))
        .collect();

    Ok(PrettyJson(StatusResponse {
        total_nodes: stats.total_nodes,
        total_tokens: stats.total_tokens,
        total_edges: stats.total_edges,
        unique_tags: stats.unique_tags,
        node_counts_by_kind,
    }))
}

#[derive(Deserialize)]
struct CreateNodeBody {
    #[serde(rename = "type")]
    kind: String,
    content: String,
    summary: Option<String>,
    metadata: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

fn parse_kind(s: &str) -> AppResult<NodeKind> {
    NodeKind::parse(s).ok_or_else(|| AppError(Error::InvalidInput(format!("unknown node kind '{s}'"))))
}

async fn create_node(
    State(state): State<AppState>,
    Json(body): Json<CreateNodeBody>,
) -> AppResult<Created<Node>> {
    let node = state.store.create_node(CreateNode {
        kind: parse_kind(&body.kind)?,
        content: body.content,
        summary: body.summary,
        metadata: body.metadata,
        tags: body.tags,
    })?;
    Ok(Created(node))
}

async fn get_node(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<PrettyJson<Node>> {
    let canonical = state.store.resolve_id(&id)?;
    Ok(PrettyJson(state.store.get_node(&canonical)?))
}

#[derive(Deserialize, Default)]
struct UpdateNodeBody {
    content: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    summary: Option<String>,
    metadata: Option<String>,
}

async fn update_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateNodeBody>,
) -> AppResult<PrettyJson<Node>> {
    let canonical = state.store.resolve_id(&id)?;
    let kind = body.kind.map(|k| parse_kind(&k)).transpose()?;
    let node = state.store.update_node(
        &canonical,
        UpdateNode {
            content: body.content,
            kind,
            summary: body.summary,
            metadata: body.metadata,
        },
    )?;
    Ok(PrettyJson(node))
}

async fn delete_node(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<StatusCode> {
    let canonical = state.store.resolve_id(&id)?;
    state.store.delete_node(&canonical)?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct SupersedeBody {
    replacement_id: String,
}

async fn supersede_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SupersedeBody>,
) -> AppResult<PrettyJson<Node>> {
    let canonical = state.store.resolve_id(&id)?;
    let replacement = state.store.resolve_id(&body.replacement_id)?;
    let node = state.store.supersede_node(&canonical, &replacement)?;
    Ok(PrettyJson(node))
}

#[derive(Deserialize)]
struct TagsBody {
    tags: Vec<String>,
}

#[derive(Serialize)]
struct TagsResponse {
    id: String,
    tags: Vec<String>,
}

async fn add_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TagsBody>,
) -> AppResult<PrettyJson<TagsResponse>> {
    let canonical = state.store.resolve_id(&id)?;
    for tag in &body.tags {
        state.store.add_tag(&canonical, tag)?;
    }
    let node = state.store.get_node(&canonical)?;
    Ok(PrettyJson(TagsResponse {
        id: node.id,
        tags: node.tags,
    }))
}

async fn remove_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TagsBody>,
) -> AppResult<PrettyJson<TagsResponse>> {
    let canonical = state.store.resolve_id(&id)?;
    for tag in &body.tags {
        state.store.remove_tag(&canonical, tag)?;
    }
    let node = state.store.get_node(&canonical)?;
    Ok(PrettyJson(TagsResponse {
        id: node.id,
        tags: node.tags,
    }))
}

#[derive(Deserialize)]
struct EdgeDirectionQuery {
    direction: Option<String>,
}

fn parse_direction(s: Option<&str>) -> Direction {
    match s.map(str::to_lowercase).as_deref() {
        Some("in") => Direction::In,
        Some("out") => Direction::Out,
        _ => Direction::Both,
    }
}

async fn get_edges(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EdgeDirectionQuery>,
) -> AppResult<PrettyJson<Vec<Edge>>> {
    let canonical = state.store.resolve_id(&id)?;
    let edges = state
        .store
        .get_edges(&canonical, parse_direction(query.direction.as_deref()))?;
    Ok(PrettyJson(edges))
}

#[derive(Deserialize)]
struct CreateEdgeBody {
    from_id: String,
    to_id: String,
    #[serde(rename = "type")]
    kind: String,
}

fn parse_edge_kind(s: &str) -> AppResult<EdgeKind> {
    EdgeKind::parse(s).ok_or_else(|| AppError(Error::InvalidInput(format!("unknown edge kind '{s}'"))))
}

async fn create_edge(
    State(state): State<AppState>,
    Json(body): Json<CreateEdgeBody>,
) -> AppResult<Created<Edge>> {
    let from = state.store.resolve_id(&body.from_id)?;
    let to = state.store.resolve_id(&body.to_id)?;
    let edge = state.store.create_edge(&from, &to, parse_edge_kind(&body.kind)?)?;
    Ok(Created(edge))
}

#[derive(Deserialize)]
struct DeleteEdgeBody {
    from_id: String,
    to_id: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn delete_edge(
    State(state): State<AppState>,
    Json(body): Json<DeleteEdgeBody>,
) -> AppResult<StatusCode> {
    let from = state.store.resolve_id(&body.from_id)?;
    let to = state.store.resolve_id(&body.to_id)?;
    let kind = body.kind.map(|k| parse_edge_kind(&k)).transpose()?;
    state.store.delete_edge(&from, &to, kind)?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct QueryBody {
    query: Option<String>,
    #[serde(default)]
    include_superseded: bool,
}

#[derive(Serialize)]
struct QueryResponse {
    count: usize,
    nodes: Vec<Node>,
}

async fn run_query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> AppResult<PrettyJson<QueryResponse>> {
    let query = memoria_core::parse_query(body.query.as_deref().unwrap_or(""))
        .map_err(|e| AppError(Error::InvalidInput(e.to_string())))?;
    let nodes = query.execute(state.store.as_ref(), body.include_superseded)?;
    Ok(PrettyJson(QueryResponse {
        count: nodes.len(),
        nodes,
    }))
}

#[derive(Deserialize)]
struct ComposeBody {
    #[serde(flatten)]
    request: ComposeRequest,
    template: Option<String>,
}

async fn run_compose(State(state): State<AppState>, Json(body): Json<ComposeBody>) -> AppResult<Response> {
    let mut request = body.request;
    if request.budget == 0 {
        request.budget = state.default_budget;
    }
    let result: ComposeResult = memoria_core::compose(state.store.as_ref(), &request)?;
    match body.template {
        Some(name) => {
            let rendered = memoria_core::compose::render_template(&result, &name)
                .map_err(|e| AppError(Error::InvalidInput(e)))?;
            Ok((
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
                rendered,
            )
                .into_response())
        }
        None => Ok(PrettyJson(result).into_response()),
    }
}

async fn sync_push(
    State(state): State<AppState>,
    Json(req): Json<PushRequest>,
) -> AppResult<PrettyJson<sync::PushResponse>> {
    Ok(PrettyJson(sync::apply_push(state.store.as_ref(), &req)?))
}

async fn sync_pull(
    State(state): State<AppState>,
    Json(req): Json<PullRequest>,
) -> AppResult<PrettyJson<sync::PullResponse>> {
    Ok(PrettyJson(sync::handle_pull(state.store.as_ref(), &req)?))
}

#[derive(Deserialize)]
struct DeviceInitBody {
    device_name: String,
}

#[derive(Serialize)]
struct DeviceInitResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    interval: u64,
}

async fn auth_device(
    State(state): State<AppState>,
    Json(body): Json<DeviceInitBody>,
) -> PrettyJson<DeviceInitResponse> {
    state.flows.cleanup_expired();
    let initiated = state.flows.initiate(&body.device_name);
    PrettyJson(DeviceInitResponse {
        device_code: initiated.device_code,
        user_code: initiated.user_code,
        verification_uri: "/device/authorize".to_string(),
        expires_in: initiated.expires_in,
        interval: initiated.interval,
    })
}

#[derive(Deserialize)]
struct TokenBody {
    device_code: String,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    token_type: &'static str,
    expires_in: u64,
    device_id: String,
}

const ACCESS_TOKEN_TTL_SECS: u64 = 3600;

async fn auth_token(State(state): State<AppState>, Json(body): Json<TokenBody>) -> AppResult<Response> {
    match state.flows.exchange(&body.device_code)? {
        ExchangeOutcome::Pending => {
            Ok((StatusCode::ACCEPTED, Json(serde_json::json!({"error": "authorization_pending"}))).into_response())
        }
        ExchangeOutcome::Denied => {
            Ok((StatusCode::FORBIDDEN, Json(serde_json::json!({"error": "access_denied"}))).into_response())
        }
        ExchangeOutcome::Expired => {
            Ok((StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "expired_token"}))).into_response())
        }
        ExchangeOutcome::Success {
            device_id,
            device_name,
            access_token,
            refresh_token,
        } => {
            let registry = DeviceRegistry::new(state.store.as_ref());
            registry.register(&device_id, &device_name, &access_token, &refresh_token)?;
            Ok(PrettyJson(TokenResponse {
                access_token,
                refresh_token,
                token_type: "Bearer",
                expires_in: ACCESS_TOKEN_TTL_SECS,
                device_id,
            })
            .into_response())
        }
    }
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: String,
}

async fn auth_refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> AppResult<PrettyJson<TokenResponse>> {
    let registry = DeviceRegistry::new(state.store.as_ref());
    let new_access = crate::auth::generate_token();
    let new_refresh = crate::auth::generate_token();
    let device = registry.rotate(&body.refresh_token, &new_access, &new_refresh)?;
    Ok(PrettyJson(TokenResponse {
        access_token: new_access,
        refresh_token: new_refresh,
        token_type: "Bearer",
        expires_in: ACCESS_TOKEN_TTL_SECS,
        device_id: device.id,
    }))
}

async fn device_authorize_form() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html><body>
<h1>Authorize device</h1>
<form method="post" action="/device/authorize">
  <label>Code: <input name="user_code"></label>
  <label>Admin password: <input name="admin_password" type="password"></label>
  <button type="submit" name="action" value="approve">Approve</button>
  <button type="submit" name="action" value="deny">Deny</button>
</form>
</body></html>"#,
    )
}

#[derive(Deserialize)]
struct AuthorizeSubmitBody {
    user_code: String,
    admin_password: String,
    action: String,
}

async fn device_authorize_submit(
    State(state): State<AppState>,
    Json(body): Json<AuthorizeSubmitBody>,
) -> AppResult<StatusCode> {
    match &state.admin_password {
        Some(expected) if expected == &body.admin_password => {}
        Some(_) => return Err(AppError(Error::Forbidden("incorrect admin password".to_string()))),
        None => return Err(AppError(Error::Forbidden("no admin password configured".to_string()))),
    }

    if body.action == "deny" {
        state.flows.deny(&body.user_code)?;
    } else {
        state.flows.approve(&body.user_code)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct DeviceSummary {
    id: String,
    name: String,
    created_at: chrono::DateTime<chrono::Utc>,
    last_seen: Option<chrono::DateTime<chrono::Utc>>,
    last_ip: Option<String>,
    revoked: bool,
}

impl From<crate::auth::Device> for DeviceSummary {
    fn from(d: crate::auth::Device) -> Self {
        DeviceSummary {
            id: d.id,
            name: d.name,
            created_at: d.created_at,
            last_seen: d.last_seen,
            last_ip: d.last_ip,
            revoked: d.revoked,
        }
    }
}

async fn list_devices(State(state): State<AppState>) -> AppResult<PrettyJson<Vec<DeviceSummary>>> {
    let registry = DeviceRegistry::new(state.store.as_ref());
    Ok(PrettyJson(registry.list()?.into_iter().map(DeviceSummary::from).collect()))
}

async fn revoke_device(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<StatusCode> {
    let registry = DeviceRegistry::new(state.store.as_ref());
    registry.revoke(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
