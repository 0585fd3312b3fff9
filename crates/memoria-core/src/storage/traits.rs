use crate::error::Result;
use crate::storage::filters::{NodeFilter, StorageStats};
use crate::types::{Direction, Edge, EdgeKind, Node, NodeKind};

/// Fields accepted by `create_node`. `metadata` defaults to `"{}"` when
/// absent; `tags` are inserted alongside the node in the same transaction.
#[derive(Debug, Clone, Default)]
pub struct CreateNode {
    pub kind: NodeKind,
    pub content: String,
    pub summary: Option<String>,
    pub metadata: Option<String>,
    pub tags: Vec<String>,
}

/// Patch semantics: only `Some` fields are applied.
#[derive(Debug, Clone, Default)]
pub struct UpdateNode {
    pub content: Option<String>,
    pub kind: Option<NodeKind>,
    pub summary: Option<String>,
    pub metadata: Option<String>,
}

/// The single contract shared by the embedded and network backends. Both
/// implementations must produce identical observable semantics; callers
/// program against this trait, never against a concrete backend.
pub trait Store: Send + Sync {
    // --- Node operations ---

    fn create_node(&self, input: CreateNode) -> Result<Node>;

    /// Returns the active (non-superseded) node matching exactly on
    /// type + content, or `None`.
    fn find_by_type_and_content(&self, kind: NodeKind, content: &str) -> Result<Option<Node>>;

    fn get_node(&self, id: &str) -> Result<Node>;

    fn update_node(&self, id: &str, patch: UpdateNode) -> Result<Node>;

    /// Marks `id` as replaced by `replacement_id`. The replacement must
    /// already exist and be a different node. A superseded node is never
    /// deleted — it stays readable by `get_node`/prefix resolution, but
    /// `list_nodes`/`find_by_type_and_content`/`search` skip it unless the
    /// caller opts in via `NodeFilter::include_superseded`.
    fn supersede_node(&self, id: &str, replacement_id: &str) -> Result<Node>;

    /// Hard delete, cascading to incident edges and owned tags.
    fn delete_node(&self, id: &str) -> Result<()>;

    /// Ordered by `created_at` descending.
    fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<Node>>;

    /// Full-text search over `content`; active nodes ranked first.
    fn search(&self, text: &str) -> Result<Vec<Node>>;

    /// Resolves a full id or unambiguous prefix to a canonical id.
    fn resolve_id(&self, prefix: &str) -> Result<String>;

    // --- Edge operations ---

    /// Idempotent: inserting an existing `(from, to, kind)` triple is a
    /// no-op. Both endpoints must already exist.
    fn create_edge(&self, from: &str, to: &str, kind: EdgeKind) -> Result<Edge>;

    /// Omitting `kind` removes every edge between the two nodes.
    fn delete_edge(&self, from: &str, to: &str, kind: Option<EdgeKind>) -> Result<()>;

    fn get_edges(&self, id: &str, direction: Direction) -> Result<Vec<Edge>>;

    // --- Tag operations ---

    fn add_tag(&self, node_id: &str, tag: &str) -> Result<()>;
    fn remove_tag(&self, node_id: &str, tag: &str) -> Result<()>;
    fn get_tags(&self, node_id: &str) -> Result<Vec<String>>;
    fn list_all_tags(&self) -> Result<Vec<String>>;
    fn list_tags_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    fn get_nodes_by_tag(&self, tag: &str) -> Result<Vec<Node>> {
        self.list_nodes(NodeFilter::new().with_tag(tag))
    }

    // --- Pending scratchpad ---

    fn set_pending(&self, key: &str, value: &str) -> Result<()>;
    fn get_pending(&self, key: &str) -> Result<String>;
    fn delete_pending(&self, key: &str) -> Result<()>;

    // --- Sync support ---

    /// Every node whose `sync_version > since_version`, ascending, tags
    /// loaded, plus the max version observed.
    fn changes_since(&self, since_version: u64) -> Result<(Vec<Node>, u64)>;

    /// Overwrite-or-insert a node exactly as given (used by sync apply),
    /// preserving whatever `sync_version` the caller set on `node`.
    fn put_node_from_sync(&self, node: &Node) -> Result<()>;

    /// Ids (and the version they were deleted at) of every node hard-deleted
    /// with a tombstone `sync_version > since_version`, ascending. Lets
    /// `changes_since` report deletions even though the node row itself is
    /// gone.
    fn tombstones_since(&self, since_version: u64) -> Result<Vec<(String, u64)>>;

    /// Allocate and persist the next global sync version. Used by the
    /// server-side push-apply path, which assigns a fresh version to each
    /// node it writes on behalf of a client.
    fn next_sync_version(&self) -> Result<u64>;

    // --- Views ---

    fn get_view(&self, name: &str) -> Result<crate::types::View>;
    fn put_view(&self, view: &crate::types::View) -> Result<()>;

    // --- Stats / maintenance ---

    fn stats(&self) -> Result<StorageStats>;
}
