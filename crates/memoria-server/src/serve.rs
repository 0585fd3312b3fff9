//! Server bootstrap: open the configured backend, build `AppState`, wire
//! middleware and bind. The pipeline is storage open -> state construction
//! -> router -> bind -> wait for ctrl-c; the only transport served is the
//! HTTP API.

use std::sync::Arc;
use std::time::Duration;

use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::auth::DeviceFlowTable;
use crate::config::Config;
use crate::http::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn run(config: Config) -> anyhow::Result<()> {
    info!("starting memoria-server v{}", env!("CARGO_PKG_VERSION"));
    info!("bind: {}", config.bind_addr);

    if config.tls_cert.is_some() {
        warn!(
            "TLS cert/key configured but in-process TLS termination is not implemented; \
             terminate TLS at a reverse proxy in front of this process"
        );
    }

    info!("opening store...");
    let store = config.backend().open().await?;
    let stats = store.stats()?;
    info!(
        "store ready: {} nodes, {} edges",
        stats.total_nodes, stats.total_edges
    );

    if config.admin_password.is_none() {
        warn!("MEMORIA_ADMIN_PASSWORD not set — every request is served unauthenticated");
    }

    let state = AppState {
        store: store.clone(),
        flows: Arc::new(DeviceFlowTable::new()),
        admin_password: config.admin_password.clone(),
        default_budget: config.default_budget,
    };

    let auto_sync_task = match config.sync_remote_url.clone() {
        Some(remote_url) if config.resolve_auto_sync() => {
            info!("auto-sync enabled against {remote_url}");
            let store = store.clone();
            let sync_token = config.sync_token.clone();
            let state_path = config.sync_state_path();
            let interval = Duration::from_secs(config.sync_interval_secs);
            Some(tokio::spawn(async move {
                run_auto_sync_loop(store, remote_url, sync_token, state_path, interval).await;
            }))
        }
        _ => None,
    };

    let app = crate::http::create_router(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let http_task = tokio::spawn(async move {
        info!("listening on {}", listener.local_addr().unwrap());
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .expect("HTTP server failed");
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    http_task.abort();
    if let Some(task) = auto_sync_task {
        task.abort();
    }

    Ok(())
}

/// Runs a pull-then-push sync cycle against `remote_url` once per
/// `interval`, forever. Each cycle's failures are logged and swallowed —
/// a remote being briefly unreachable must not bring the server down — so
/// the next tick always gets a fresh attempt.
async fn run_auto_sync_loop(
    store: Arc<dyn memoria_core::Store>,
    remote_url: String,
    sync_token: Option<String>,
    state_path: std::path::PathBuf,
    interval: Duration,
) {
    let device_id = memoria_core::new_id();
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match sync_once(
            &client,
            store.as_ref(),
            &remote_url,
            sync_token.as_deref(),
            &device_id,
            &state_path,
        )
        .await
        {
            Ok((pulled, pushed)) => info!("auto-sync tick: pulled {pulled}, pushed {pushed}"),
            Err(e) => warn!("auto-sync tick failed: {e}"),
        }
    }
}

/// One pull-then-push cycle: pulls every remote change since the last
/// recorded `last_pull_version`, applies it locally, then pushes every
/// local change since `last_push_version`. `SyncState` is updated and
/// persisted to `state_path` after each half, so a failed push doesn't
/// re-request an already-applied pull on the next tick.
async fn sync_once(
    client: &reqwest::Client,
    store: &dyn memoria_core::Store,
    remote_url: &str,
    sync_token: Option<&str>,
    device_id: &str,
    state_path: &std::path::Path,
) -> anyhow::Result<(usize, usize)> {
    let mut state = memoria_core::sync::load_state(state_path, remote_url)?;

    let pull_req = memoria_core::PullRequest {
        device_id: device_id.to_string(),
        since_version: state.last_pull_version,
    };
    let mut request = client
        .post(format!("{remote_url}/api/sync/pull"))
        .json(&pull_req);
    if let Some(token) = sync_token {
        request = request.bearer_auth(token);
    }
    let pull_response: memoria_core::PullResponse =
        request.send().await?.error_for_status()?.json().await?;

    let pulled = pull_response.changes.len();
    for change in &pull_response.changes {
        memoria_core::sync::apply_remote(store, change, false)?;
    }
    state.last_pull_version = pull_response.sync_version.max(state.last_pull_version);
    state.last_pull_at = Some(chrono::Utc::now());
    memoria_core::sync::save_state(state_path, &state)?;

    let (changes, local_max) = memoria_core::sync::get_local_changes(store, state.last_push_version)?;
    let pushed = changes.len();
    if !changes.is_empty() {
        let push_req = memoria_core::PushRequest {
            device_id: device_id.to_string(),
            sync_version: state.last_push_version,
            changes,
        };
        let mut request = client
            .post(format!("{remote_url}/api/sync/push"))
            .json(&push_req);
        if let Some(token) = sync_token {
            request = request.bearer_auth(token);
        }
        let push_response: memoria_core::PushResponse =
            request.send().await?.error_for_status()?.json().await?;
        state.last_push_version = push_response.sync_version.max(local_max);
    }
    state.last_push_at = Some(chrono::Utc::now());
    memoria_core::sync::save_state(state_path, &state)?;

    Ok((pulled, pushed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_core::{CreateNode, NodeFilter, NodeKind, RedbStore, Store};
    use tempfile::TempDir;

    #[test]
    fn max_body_bytes_is_one_megabyte() {
        assert_eq!(MAX_BODY_BYTES, 1024 * 1024);
    }

    #[tokio::test]
    async fn auto_sync_cycle_pulls_and_pushes_against_a_real_remote() {
        let remote_dir = TempDir::new().unwrap();
        let remote_store: Arc<dyn Store> =
            Arc::new(RedbStore::open(remote_dir.path().join("remote.redb")).unwrap());
        remote_store
            .create_node(CreateNode {
                kind: NodeKind::Fact,
                content: "remote fact".to_string(),
                summary: None,
                metadata: None,
                tags: vec![],
            })
            .unwrap();

        let remote_state = crate::http::AppState {
            store: remote_store.clone(),
            flows: Arc::new(DeviceFlowTable::new()),
            admin_password: None,
            default_budget: 4000,
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crate::http::create_router(remote_state);
        let server = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        let local_dir = TempDir::new().unwrap();
        let local_store: Arc<dyn Store> =
            Arc::new(RedbStore::open(local_dir.path().join("local.redb")).unwrap());
        local_store
            .create_node(CreateNode {
                kind: NodeKind::Fact,
                content: "local fact".to_string(),
                summary: None,
                metadata: None,
                tags: vec![],
            })
            .unwrap();

        let state_path = local_dir.path().join("sync_state.json");
        let remote_url = format!("http://{addr}");
        let client = reqwest::Client::new();
        let (pulled, pushed) = sync_once(
            &client,
            local_store.as_ref(),
            &remote_url,
            None,
            "device-under-test",
            &state_path,
        )
        .await
        .unwrap();

        assert_eq!(pulled, 1);
        assert_eq!(pushed, 1);

        let remote_contents: Vec<String> = remote_store
            .list_nodes(NodeFilter::default())
            .unwrap()
            .into_iter()
            .map(|n| n.content)
            .collect();
        assert!(remote_contents.contains(&"local fact".to_string()));

        let local_contents: Vec<String> = local_store
            .list_nodes(NodeFilter::default())
            .unwrap()
            .into_iter()
            .map(|n| n.content)
            .collect();
        assert!(local_contents.contains(&"remote fact".to_string()));

        server.abort();
    }
}
