pub mod compose;
pub mod config;
pub mod error;
pub mod id;
pub mod query;
pub mod storage;
pub mod sync;
pub mod types;

pub use compose::{compose, ComposeRequest, ComposeResult, ComposedNode};
pub use config::BackendConfig;
pub use error::{Error, Result};
pub use id::{estimate_tokens, new_id};
pub use query::{parse_query, Query};
pub use storage::{CreateNode, NodeFilter, RedbStore, SqlStore, Store, StorageStats, UpdateNode};
pub use sync::{NodeChange, PullRequest, PullResponse, PushRequest, PushResponse, SyncState};
pub use types::*;
