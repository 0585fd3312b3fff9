//! Sync engine: versioned pull/push replication between a local embedded
//! store and a remote (typically network-backed) store, with
//! last-writer-wins conflict resolution. Per-remote bookkeeping persists as
//! a single JSON state file, restricted to owner-only permissions on unix.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::Store;
use crate::types::Node;

/// One unit of replication: either an upsert or a deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeChange {
    Upsert(Node),
    Deleted { id: String, sync_version: u64 },
}

impl NodeChange {
    pub fn sync_version(&self) -> u64 {
        match self {
            NodeChange::Upsert(node) => node.sync_version,
            NodeChange::Deleted { sync_version, .. } => *sync_version,
        }
    }
}

/// Per-remote sync bookkeeping, persisted as a single JSON file keyed by
/// `server_url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub server_url: String,
    pub last_push_version: u64,
    pub last_pull_version: u64,
    pub last_push_at: Option<DateTime<Utc>>,
    pub last_pull_at: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn new(server_url: impl Into<String>) -> Self {
        SyncState {
            server_url: server_url.into(),
            last_push_version: 0,
            last_pull_version: 0,
            last_push_at: None,
            last_pull_at: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SyncStateFile {
    remotes: HashMap<String, SyncState>,
}

/// Loads the state for `server_url` from `path`, or a fresh `SyncState` if
/// the file or the entry doesn't exist yet.
pub fn load_state(path: &Path, server_url: &str) -> Result<SyncState> {
    if !path.exists() {
        return Ok(SyncState::new(server_url));
    }
    let bytes = std::fs::read(path)?;
    let file: SyncStateFile = serde_json::from_slice(&bytes)?;
    Ok(file
        .remotes
        .get(server_url)
        .cloned()
        .unwrap_or_else(|| SyncState::new(server_url)))
}

/// Persists `state` into `path`, preserving any other remotes' entries.
/// The file is created with owner-only permissions on unix, since it may
/// indirectly reveal which remotes a device talks to.
pub fn save_state(path: &Path, state: &SyncState) -> Result<()> {
    let mut file = if path.exists() {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).unwrap_or_default()
    } else {
        SyncStateFile::default()
    };
    file.remotes.insert(state.server_url.clone(), state.clone());

    let bytes = serde_json::to_vec_pretty(&file)?;
    std::fs::write(path, &bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }

    Ok(())
}

/// Every node and tombstone whose `sync_version > since_version`, merged
/// and ordered ascending, plus the max version observed.
pub fn get_local_changes(store: &dyn Store, since_version: u64) -> Result<(Vec<NodeChange>, u64)> {
    let (nodes, node_max) = store.changes_since(since_version)?;
    let tombstones = store.tombstones_since(since_version)?;

    let mut changes: Vec<NodeChange> = nodes.into_iter().map(NodeChange::Upsert).collect();
    let mut max_version = node_max;
    for (id, sync_version) in tombstones {
        max_version = max_version.max(sync_version);
        changes.push(NodeChange::Deleted { id, sync_version });
    }

    changes.sort_by_key(|c| c.sync_version());
    Ok((changes, max_version))
}

/// Outcome of applying one `NodeChange`, for the caller's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Deleted,
    DeletedNoop,
    Conflict,
}

/// Applies one incoming `NodeChange` to `store`. When `reassign_version` is
/// set, the node is stamped with a
/// freshly allocated local `sync_version` before being written — used by
/// the server applying a client's push; client-side pull application
/// leaves the remote's `sync_version` untouched.
pub fn apply_remote(store: &dyn Store, change: &NodeChange, reassign_version: bool) -> Result<ApplyOutcome> {
    match change {
        NodeChange::Deleted { id, .. } => match store.delete_node(id) {
            Ok(()) => Ok(ApplyOutcome::Deleted),
            Err(crate::error::Error::NotFound(_)) => Ok(ApplyOutcome::DeletedNoop),
            Err(e) => Err(e),
        },
        NodeChange::Upsert(remote) => {
            let local = store.get_node(&remote.id).ok();
            match local {
                None => {
                    let mut incoming = remote.clone();
                    if reassign_version {
                        incoming.sync_version = store.next_sync_version()?;
                    }
                    store.put_node_from_sync(&incoming)?;
                    Ok(ApplyOutcome::Created)
                }
                Some(local) if local.updated_at > remote.updated_at => Ok(ApplyOutcome::Conflict),
                Some(local) => {
                    let mut merged = remote.clone();
                    let mut tags = local.tags.clone();
                    for tag in &remote.tags {
                        if !tags.contains(tag) {
                            tags.push(tag.clone());
                        }
                    }
                    merged.tags = tags;
                    if reassign_version {
                        merged.sync_version = store.next_sync_version()?;
                    }
                    store.put_node_from_sync(&merged)?;
                    Ok(ApplyOutcome::Updated)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub device_id: String,
    pub sync_version: u64,
    pub changes: Vec<NodeChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub accepted: usize,
    pub conflicts: usize,
    pub sync_version: u64,
}

/// Server-side push handling: applies `req.changes` in the order received,
/// bumping each affected node's `sync_version`.
pub fn apply_push(store: &dyn Store, req: &PushRequest) -> Result<PushResponse> {
    let mut accepted = 0;
    let mut conflicts = 0;
    for change in &req.changes {
        match apply_remote(store, change, true)? {
            ApplyOutcome::Conflict => conflicts += 1,
            _ => accepted += 1,
        }
    }
    let (_, current_max) = store.changes_since(0)?;
    Ok(PushResponse {
        accepted,
        conflicts,
        sync_version: current_max,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub device_id: String,
    pub since_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<NodeChange>,
    pub sync_version: u64,
}

/// Server-side pull handling: every change since `req.since_version`.
pub fn handle_pull(store: &dyn Store, req: &PullRequest) -> Result<PullResponse> {
    let (changes, sync_version) = get_local_changes(store, req.since_version)?;
    Ok(PullResponse {
        changes,
        sync_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CreateNode, RedbStore};
    use crate::types::NodeKind;
    use tempfile::TempDir;

    fn open_store() -> (RedbStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(dir.path().join("t.redb")).unwrap();
        (store, dir)
    }

    #[test]
    fn state_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        let mut state = SyncState::new("https://example.com");
        state.last_pull_version = 42;
        save_state(&path, &state).unwrap();

        let loaded = load_state(&path, "https://example.com").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_state_file_yields_fresh_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.json");
        let state = load_state(&path, "https://example.com").unwrap();
        assert_eq!(state.last_pull_version, 0);
    }

    #[test]
    fn apply_remote_creates_unknown_node() {
        let (store, _dir) = open_store();
        let remote = Node::new(NodeKind::Fact, "remote fact".to_string(), None, "{}".to_string());
        let outcome =
            apply_remote(&store, &NodeChange::Upsert(remote.clone()), false).unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);
        assert_eq!(store.get_node(&remote.id).unwrap().content, "remote fact");
    }

    #[test]
    fn apply_remote_keeps_newer_local_on_conflict() {
        let (store, _dir) = open_store();
        let local = store
            .create_node(CreateNode {
                kind: NodeKind::Fact,
                content: "local newer".to_string(),
                summary: None,
                metadata: None,
                tags: vec![],
            })
            .unwrap();

        let mut remote = local.clone();
        remote.content = "remote older".to_string();
        remote.updated_at = local.updated_at - chrono::Duration::seconds(10);

        let outcome = apply_remote(&store, &NodeChange::Upsert(remote), false).unwrap();
        assert_eq!(outcome, ApplyOutcome::Conflict);
        assert_eq!(store.get_node(&local.id).unwrap().content, "local newer");
    }

    #[test]
    fn apply_remote_delete_is_noop_when_missing_locally() {
        let (store, _dir) = open_store();
        let outcome = apply_remote(
            &store,
            &NodeChange::Deleted {
                id: crate::id::new_id(),
                sync_version: 1,
            },
            false,
        )
        .unwrap();
        assert_eq!(outcome, ApplyOutcome::DeletedNoop);
    }

    #[test]
    fn push_bumps_sync_version_on_apply() {
        let (store, _dir) = open_store();
        let remote = Node::new(NodeKind::Fact, "pushed fact".to_string(), None, "{}".to_string());
        let req = PushRequest {
            device_id: "device-1".to_string(),
            sync_version: 0,
            changes: vec![NodeChange::Upsert(remote.clone())],
        };
        let response = apply_push(&store, &req).unwrap();
        assert_eq!(response.accepted, 1);
        assert_eq!(response.conflicts, 0);
        let stored = store.get_node(&remote.id).unwrap();
        assert!(stored.sync_version > 0);
    }
}
