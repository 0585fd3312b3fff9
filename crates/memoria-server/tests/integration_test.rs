//! End-to-end HTTP tests, driving the real axum `Router` in-process via
//! `tower::ServiceExt::oneshot` rather than a bound socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use memoria_core::RedbStore;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

#[path = "../src/auth/mod.rs"]
mod auth;
#[path = "../src/http/mod.rs"]
mod http;

use http::AppState;

fn test_state() -> (AppState, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = RedbStore::open(dir.path().join("t.redb")).unwrap();
    let state = AppState {
        store: Arc::new(store),
        flows: Arc::new(auth::DeviceFlowTable::new()),
        admin_password: None,
        default_budget: 4000,
    };
    (state, dir)
}

async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let router = http::create_router(state.clone());
    let request_body = match body {
        Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(request_body)
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ready() {
    let (state, _dir) = test_state();
    let (status, body) = send(&state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn node_create_get_update_delete_round_trip() {
    let (state, _dir) = test_state();

    let (status, created) = send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "the sky is blue"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(&state, "GET", &format!("/api/nodes/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["content"], json!("the sky is blue"));

    let (status, updated) = send(
        &state,
        "PATCH",
        &format!("/api/nodes/{id}"),
        Some(json!({"summary": "weather fact"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["summary"], json!("weather fact"));

    let (status, _) = send(&state, "DELETE", &format!("/api/nodes/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&state, "GET", &format!("/api/nodes/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn edge_creation_is_idempotent_and_deletable() {
    let (state, _dir) = test_state();
    let (_, a) = send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "node a"})),
    )
    .await;
    let (_, b) = send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "node b"})),
    )
    .await;
    let from_id = a["id"].as_str().unwrap();
    let to_id = b["id"].as_str().unwrap();

    let body = json!({"from_id": from_id, "to_id": to_id, "type": "RELATES_TO"});
    let (status_1, edge_1) = send(&state, "POST", "/api/edges", Some(body.clone())).await;
    let (status_2, edge_2) = send(&state, "POST", "/api/edges", Some(body)).await;
    assert_eq!(status_1, StatusCode::CREATED);
    assert_eq!(status_2, StatusCode::CREATED);
    assert_eq!(edge_1["id"], edge_2["id"]);

    let (status, edges) = send(
        &state,
        "GET",
        &format!("/api/edges/{from_id}?direction=out"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edges.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_a_node_cascades_its_edges() {
    let (state, _dir) = test_state();
    let (_, a) = send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "node a"})),
    )
    .await;
    let (_, b) = send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "node b"})),
    )
    .await;
    let from_id = a["id"].as_str().unwrap().to_string();
    let to_id = b["id"].as_str().unwrap().to_string();
    send(
        &state,
        "POST",
        "/api/edges",
        Some(json!({"from_id": from_id, "to_id": to_id, "type": "RELATES_TO"})),
    )
    .await;

    send(&state, "DELETE", &format!("/api/nodes/{from_id}"), None).await;

    let (status, edges) = send(
        &state,
        "GET",
        &format!("/api/edges/{to_id}?direction=in"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(edges.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn tags_endpoint_adds_and_removes_additively() {
    let (state, _dir) = test_state();
    let (_, created) = send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "node a", "tags": ["tier:working"]})),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, tagged) = send(
        &state,
        "POST",
        &format!("/api/nodes/{id}/tags"),
        Some(json!({"tags": ["project:acme", "tier:pinned"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tagged["id"], json!(id));
    let mut tags = tagged["tags"].as_array().unwrap().clone();
    tags.sort_by_key(|v| v.as_str().unwrap().to_string());
    assert_eq!(
        tags,
        vec![
            json!("project:acme"),
            json!("tier:pinned"),
            json!("tier:working")
        ]
    );

    let (status, untagged) = send(
        &state,
        "DELETE",
        &format!("/api/nodes/{id}/tags"),
        Some(json!({"tags": ["tier:working"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let mut remaining = untagged["tags"].as_array().unwrap().clone();
    remaining.sort_by_key(|v| v.as_str().unwrap().to_string());
    assert_eq!(remaining, vec![json!("project:acme"), json!("tier:pinned")]);
}

#[tokio::test]
async fn supersede_excludes_node_from_listing_but_keeps_it_fetchable() {
    let (state, _dir) = test_state();
    let (_, old) = send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "old fact"})),
    )
    .await;
    let (_, new) = send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "new fact"})),
    )
    .await;
    let old_id = old["id"].as_str().unwrap().to_string();
    let new_id = new["id"].as_str().unwrap().to_string();

    let (status, superseded) = send(
        &state,
        "POST",
        &format!("/api/nodes/{old_id}/supersede"),
        Some(json!({"replacement_id": new_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(superseded["superseded_by"], json!(new_id));

    let (status, fetched) = send(&state, "GET", &format!("/api/nodes/{old_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], json!(old_id));

    let (_, listed) = send(&state, "POST", "/api/query", Some(json!({}))).await;
    let contents: Vec<&str> = listed["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["new fact"]);
}

#[tokio::test]
async fn query_filters_by_tag() {
    let (state, _dir) = test_state();
    send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "tagged", "tags": ["project:acme"]})),
    )
    .await;
    send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "untagged"})),
    )
    .await;

    let (status, results) = send(
        &state,
        "POST",
        "/api/query",
        Some(json!({"query": "tag:project:acme"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results["count"], json!(1));
    let contents: Vec<&str> = results["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["tagged"]);
}

#[tokio::test]
async fn compose_with_markdown_template_returns_rendered_text() {
    let (state, _dir) = test_state();
    send(
        &state,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "pinned fact", "tags": ["tier:pinned"]})),
    )
    .await;

    let router = http::create_router(state.clone());
    let request = Request::builder()
        .method("POST")
        .uri("/api/compose")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({"budget": 4000, "template": "default"})).unwrap(),
        ))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/markdown"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let rendered = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(rendered.contains("pinned fact"));
}

#[tokio::test]
async fn device_authorization_flow_issues_working_token() {
    let dir = TempDir::new().unwrap();
    let store = RedbStore::open(dir.path().join("t.redb")).unwrap();
    let state = AppState {
        store: Arc::new(store),
        flows: Arc::new(auth::DeviceFlowTable::new()),
        admin_password: Some("hunter2".to_string()),
        default_budget: 4000,
    };

    let (status, device_init) = send(
        &state,
        "POST",
        "/api/auth/device",
        Some(json!({"device_name": "laptop"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let device_code = device_init["device_code"].as_str().unwrap().to_string();
    let user_code = device_init["user_code"].as_str().unwrap().to_string();

    let (status, _) = send(
        &state,
        "POST",
        "/device/authorize",
        Some(json!({"user_code": user_code, "admin_password": "hunter2", "action": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, token) = send(
        &state,
        "POST",
        "/api/auth/token",
        Some(json!({"device_code": device_code})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(token["token_type"], json!("Bearer"));
    assert!(token["access_token"].as_str().unwrap().len() > 10);
}

#[tokio::test]
async fn device_authorization_wrong_password_is_forbidden() {
    let dir = TempDir::new().unwrap();
    let store = RedbStore::open(dir.path().join("t.redb")).unwrap();
    let state = AppState {
        store: Arc::new(store),
        flows: Arc::new(auth::DeviceFlowTable::new()),
        admin_password: Some("hunter2".to_string()),
        default_budget: 4000,
    };

    let (_, device_init) = send(
        &state,
        "POST",
        "/api/auth/device",
        Some(json!({"device_name": "laptop"})),
    )
    .await;
    let user_code = device_init["user_code"].as_str().unwrap().to_string();

    let (status, _) = send(
        &state,
        "POST",
        "/device/authorize",
        Some(json!({"user_code": user_code, "admin_password": "wrong", "action": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn sync_push_then_pull_round_trips_a_node() {
    let (state_a, _dir_a) = test_state();
    let (state_b, _dir_b) = test_state();

    let (_, created) = send(
        &state_a,
        "POST",
        "/api/nodes",
        Some(json!({"type": "fact", "content": "from device a"})),
    )
    .await;

    let (status, pull) = send(&state_a, "POST", "/api/sync/pull", Some(json!({"device_id": "a", "since_version": 0}))).await;
    assert_eq!(status, StatusCode::OK);
    let changes = pull["changes"].as_array().unwrap().clone();
    assert_eq!(changes.len(), 1);

    let (status, push) = send(
        &state_b,
        "POST",
        "/api/sync/push",
        Some(json!({"device_id": "b", "sync_version": 0, "changes": changes})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(push["accepted"], json!(1));

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = send(&state_b, "GET", &format!("/api/nodes/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["content"], json!("from device a"));
}
