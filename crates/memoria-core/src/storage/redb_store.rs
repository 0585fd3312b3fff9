//! Embedded single-file backend built on `redb`.
//!
//! Table layout and the secondary-index maintenance discipline (diff old vs
//! new, drop read handles before reopening for write) are kept consistent
//! across every mutating method. Full-text search is a word-level inverted
//! index rather than a database trigger: `index_node` keeps `FTS_INDEX` in
//! sync inside `create_node`/`update_node`/`delete_node`, the same way it
//! keeps `NODES_BY_KIND` in sync.

use chrono::{DateTime, Utc};
use redb::{Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::id::new_id;
use crate::storage::filters::{NodeFilter, StorageStats};
use crate::storage::migrations::run_migrations;
use crate::storage::traits::{CreateNode, Store, UpdateNode};
use crate::types::{Direction, Edge, EdgeKind, Node, NodeKind, View};

const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
const EDGES: TableDefinition<&str, &[u8]> = TableDefinition::new("edges");
const VIEWS: TableDefinition<&str, &[u8]> = TableDefinition::new("views");
const PENDING: TableDefinition<&str, &str> = TableDefinition::new("pending");
const TOMBSTONES: TableDefinition<&str, &[u8]> = TableDefinition::new("tombstones");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const NODES_BY_KIND: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("nodes_by_kind");
const NODES_BY_TAG: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("nodes_by_tag");
const TAGS_BY_NODE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("tags_by_node");
const EDGES_BY_FROM: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("edges_by_from");
const EDGES_BY_TO: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("edges_by_to");
const FTS_INDEX: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("fts_index");

const STATS_NODE_COUNT: &str = "stats:node_count";
const STATS_EDGE_COUNT: &str = "stats:edge_count";
const STATS_TOTAL_TOKENS: &str = "stats:total_tokens";
const NEXT_SYNC_VERSION: &str = "next_sync_version";

/// A node as persisted on disk — identical to `Node` minus the derived
/// `tags` field, which lives in `TAGS_BY_NODE`/`NODES_BY_TAG` instead so
/// that tag mutation never requires rewriting the node row.
#[derive(serde::Serialize, serde::Deserialize)]
struct StoredNode {
    id: String,
    kind: NodeKind,
    content: String,
    summary: Option<String>,
    token_estimate: u32,
    superseded_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    metadata: String,
    sync_version: u64,
}

impl From<&Node> for StoredNode {
    fn from(n: &Node) -> Self {
        StoredNode {
            id: n.id.clone(),
            kind: n.kind,
            content: n.content.clone(),
            summary: n.summary.clone(),
            token_estimate: n.token_estimate,
            superseded_by: n.superseded_by.clone(),
            created_at: n.created_at,
            updated_at: n.updated_at,
            metadata: n.metadata.clone(),
            sync_version: n.sync_version,
        }
    }
}

impl StoredNode {
    fn into_node(self, tags: Vec<String>) -> Node {
        Node {
            id: self.id,
            kind: self.kind,
            content: self.content,
            summary: self.summary,
            token_estimate: self.token_estimate,
            superseded_by: self.superseded_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            metadata: self.metadata,
            sync_version: self.sync_version,
            tags,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Tombstone {
    deleted_at: DateTime<Utc>,
    sync_version: u64,
}

/// Lowercase, alphanumeric-word tokenization for the FTS index.
fn tokenize(content: &str) -> Vec<String> {
    let mut words: Vec<String> = content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    words.sort();
    words.dedup();
    words
}

pub struct RedbStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(&path)?;

        {
            let write_txn = db.begin_write()?;
            let _ = write_txn.open_table(NODES)?;
            let _ = write_txn.open_table(EDGES)?;
            let _ = write_txn.open_table(VIEWS)?;
            let _ = write_txn.open_table(PENDING)?;
            let _ = write_txn.open_table(TOMBSTONES)?;
            let _ = write_txn.open_table(META)?;
            let _ = write_txn.open_multimap_table(NODES_BY_KIND)?;
            let _ = write_txn.open_multimap_table(NODES_BY_TAG)?;
            let _ = write_txn.open_multimap_table(TAGS_BY_NODE)?;
            let _ = write_txn.open_multimap_table(EDGES_BY_FROM)?;
            let _ = write_txn.open_multimap_table(EDGES_BY_TO)?;
            let _ = write_txn.open_multimap_table(FTS_INDEX)?;
            write_txn.commit()?;
        }

        run_migrations(&db)?;

        let store = RedbStore {
            db: Arc::new(db),
            path,
        };
        store.ensure_default_view()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_default_view(&self) -> Result<()> {
        if self.get_view("default").is_err() {
            self.put_view(&View::default_view())?;
        }
        Ok(())
    }

    fn serialize_node(node: &Node) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&StoredNode::from(node))?)
    }

    fn deserialize_stored_node(bytes: &[u8]) -> Result<StoredNode> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn load_tags(&self, node_id: &str) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_multimap_table(TAGS_BY_NODE)?;
        let mut tags: Vec<String> = table
            .get(node_id)?
            .map(|r| r.map(|g| g.value().to_string()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tags.sort();
        Ok(tags)
    }

    fn read_node_row(&self, id: &str) -> Result<Option<Node>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODES)?;
        let stored = match table.get(id)? {
            Some(bytes) => Self::deserialize_stored_node(bytes.value())?,
            None => return Ok(None),
        };
        drop(table);
        drop(read_txn);
        let tags = self.load_tags(id)?;
        Ok(Some(stored.into_node(tags)))
    }

    fn next_sync_version_locked(&self, txn: &redb::WriteTransaction) -> Result<u64> {
        let mut meta = txn.open_table(META)?;
        let current = meta
            .get(NEXT_SYNC_VERSION)?
            .map(|v| u64::from_le_bytes(v.value().try_into().unwrap()))
            .unwrap_or(0);
        let next = current + 1;
        meta.insert(NEXT_SYNC_VERSION, next.to_le_bytes().as_slice())?;
        Ok(next)
    }

    fn adjust_counter(&self, txn: &redb::WriteTransaction, key: &str, delta: i64) -> Result<()> {
        let mut meta = txn.open_table(META)?;
        let current = meta
            .get(key)?
            .map(|v| u64::from_le_bytes(v.value().try_into().unwrap()))
            .unwrap_or(0) as i64;
        let next = (current + delta).max(0) as u64;
        meta.insert(key, next.to_le_bytes().as_slice())?;
        Ok(())
    }

    fn read_counter(&self, key: &str) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META)?;
        Ok(meta
            .get(key)?
            .map(|v| u64::from_le_bytes(v.value().try_into().unwrap()))
            .unwrap_or(0))
    }

    fn index_node(
        &self,
        txn: &redb::WriteTransaction,
        node: &Node,
        old: Option<&Node>,
    ) -> Result<()> {
        {
            let mut kind_idx = txn.open_multimap_table(NODES_BY_KIND)?;
            if let Some(old) = old {
                kind_idx.remove(old.kind.as_str(), node.id.as_str())?;
            }
            kind_idx.insert(node.kind.as_str(), node.id.as_str())?;
        }
        {
            let mut fts = txn.open_multimap_table(FTS_INDEX)?;
            if let Some(old) = old {
                for word in tokenize(&old.content) {
                    fts.remove(word.as_str(), node.id.as_str())?;
                }
            }
            for word in tokenize(&node.content) {
                fts.insert(word.as_str(), node.id.as_str())?;
            }
        }
        Ok(())
    }

    fn node_matches_filter(node: &Node, filter: &NodeFilter) -> bool {
        if !filter.include_superseded && node.is_superseded() {
            return false;
        }
        if let Some(kind) = filter.kind {
            if node.kind != kind {
                return false;
            }
        }
        if let Some(ref tag) = filter.tag {
            if !node.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(since) = filter.since {
            if node.created_at < since {
                return false;
            }
        }
        true
    }
}

impl Store for RedbStore {
    fn create_node(&self, input: CreateNode) -> Result<Node> {
        let content = input.content.trim().to_string();
        if content.is_empty() {
            return Err(Error::InvalidInput("content must not be empty".into()));
        }
        let metadata = input.metadata.unwrap_or_else(|| "{}".to_string());
        let mut node = Node::new(input.kind, content, input.summary, metadata);
        node.tags = {
            let mut t = input.tags;
            t.sort();
            t.dedup();
            t
        };

        let write_txn = self.db.begin_write()?;
        node.sync_version = self.next_sync_version_locked(&write_txn)?;
        {
            let mut nodes = write_txn.open_table(NODES)?;
            nodes.insert(node.id.as_str(), Self::serialize_node(&node)?.as_slice())?;
        }
        self.index_node(&write_txn, &node, None)?;
        {
            let mut tags_by_node = write_txn.open_multimap_table(TAGS_BY_NODE)?;
            let mut nodes_by_tag = write_txn.open_multimap_table(NODES_BY_TAG)?;
            for tag in &node.tags {
                tags_by_node.insert(node.id.as_str(), tag.as_str())?;
                nodes_by_tag.insert(tag.as_str(), node.id.as_str())?;
            }
        }
        self.adjust_counter(&write_txn, STATS_NODE_COUNT, 1)?;
        self.adjust_counter(&write_txn, STATS_TOTAL_TOKENS, node.token_estimate as i64)?;
        write_txn.commit()?;

        Ok(node)
    }

    fn find_by_type_and_content(&self, kind: NodeKind, content: &str) -> Result<Option<Node>> {
        let read_txn = self.db.begin_read()?;
        let kind_idx = read_txn.open_multimap_table(NODES_BY_KIND)?;
        let nodes_table = read_txn.open_table(NODES)?;
        for id in kind_idx.get(kind.as_str())? {
            let id = id?;
            if let Some(bytes) = nodes_table.get(id.value())? {
                let stored = Self::deserialize_stored_node(bytes.value())?;
                if stored.content == content && stored.superseded_by.is_none() {
                    let id = stored.id.clone();
                    drop(nodes_table);
                    drop(kind_idx);
                    drop(read_txn);
                    let tags = self.load_tags(&id)?;
                    return Ok(Some(stored.into_node(tags)));
                }
            }
        }
        Ok(None)
    }

    fn get_node(&self, id: &str) -> Result<Node> {
        let canonical = self.resolve_id(id)?;
        self.read_node_row(&canonical)?
            .ok_or_else(|| Error::not_found(format!("node {id}")))
    }

    fn update_node(&self, id: &str, patch: UpdateNode) -> Result<Node> {
        let canonical = self.resolve_id(id)?;
        let mut node = self
            .read_node_row(&canonical)?
            .ok_or_else(|| Error::not_found(format!("node {id}")))?;
        let old = node.clone();

        if let Some(content) = patch.content {
            let trimmed = content.trim().to_string();
            if trimmed.is_empty() {
                return Err(Error::InvalidInput("content must not be empty".into()));
            }
            node.token_estimate = crate::id::estimate_tokens(&trimmed);
            node.content = trimmed;
        }
        if let Some(kind) = patch.kind {
            node.kind = kind;
        }
        if let Some(summary) = patch.summary {
            node.summary = Some(summary);
        }
        if let Some(metadata) = patch.metadata {
            node.metadata = metadata;
        }
        node.updated_at = Utc::now();

        let write_txn = self.db.begin_write()?;
        node.sync_version = self.next_sync_version_locked(&write_txn)?;
        {
            let mut nodes = write_txn.open_table(NODES)?;
            nodes.insert(node.id.as_str(), Self::serialize_node(&node)?.as_slice())?;
        }
        self.index_node(&write_txn, &node, Some(&old))?;
        self.adjust_counter(
            &write_txn,
            STATS_TOTAL_TOKENS,
            node.token_estimate as i64 - old.token_estimate as i64,
        )?;
        write_txn.commit()?;

        Ok(node)
    }

    fn supersede_node(&self, id: &str, replacement_id: &str) -> Result<Node> {
        let canonical = self.resolve_id(id)?;
        let replacement = self.resolve_id(replacement_id)?;
        if replacement == canonical {
            return Err(Error::InvalidInput("a node cannot supersede itself".into()));
        }
        if self.read_node_row(&replacement)?.is_none() {
            return Err(Error::not_found(format!("node {replacement_id}")));
        }

        let mut node = self
            .read_node_row(&canonical)?
            .ok_or_else(|| Error::not_found(format!("node {id}")))?;
        node.superseded_by = Some(replacement);
        node.updated_at = Utc::now();

        let write_txn = self.db.begin_write()?;
        node.sync_version = self.next_sync_version_locked(&write_txn)?;
        {
            let mut nodes = write_txn.open_table(NODES)?;
            nodes.insert(node.id.as_str(), Self::serialize_node(&node)?.as_slice())?;
        }
        write_txn.commit()?;

        Ok(node)
    }

    fn delete_node(&self, id: &str) -> Result<()> {
        let canonical = self.resolve_id(id)?;
        let node = self
            .read_node_row(&canonical)?
            .ok_or_else(|| Error::not_found(format!("node {id}")))?;

        let edges_out = self.get_edges(&canonical, Direction::Out)?;
        let edges_in = self.get_edges(&canonical, Direction::In)?;

        let write_txn = self.db.begin_write()?;

        for edge in edges_out.iter().chain(edges_in.iter()) {
            let mut edges = write_txn.open_table(EDGES)?;
            edges.remove(edge.id.as_str())?;
            drop(edges);
            let mut from_idx = write_txn.open_multimap_table(EDGES_BY_FROM)?;
            from_idx.remove(edge.from_id.as_str(), edge.id.as_str())?;
            drop(from_idx);
            let mut to_idx = write_txn.open_multimap_table(EDGES_BY_TO)?;
            to_idx.remove(edge.to_id.as_str(), edge.id.as_str())?;
        }
        self.adjust_counter(
            &write_txn,
            STATS_EDGE_COUNT,
            -((edges_out.len() + edges_in.len()) as i64),
        )?;

        {
            let mut tags_by_node = write_txn.open_multimap_table(TAGS_BY_NODE)?;
            let mut nodes_by_tag = write_txn.open_multimap_table(NODES_BY_TAG)?;
            for tag in &node.tags {
                tags_by_node.remove(node.id.as_str(), tag.as_str())?;
                nodes_by_tag.remove(tag.as_str(), node.id.as_str())?;
            }
        }

        {
            let mut kind_idx = write_txn.open_multimap_table(NODES_BY_KIND)?;
            kind_idx.remove(node.kind.as_str(), node.id.as_str())?;
        }
        {
            let mut fts = write_txn.open_multimap_table(FTS_INDEX)?;
            for word in tokenize(&node.content) {
                fts.remove(word.as_str(), node.id.as_str())?;
            }
        }
        {
            let mut nodes = write_txn.open_table(NODES)?;
            nodes.remove(node.id.as_str())?;
        }

        let sync_version = self.next_sync_version_locked(&write_txn)?;
        {
            let mut tombstones = write_txn.open_table(TOMBSTONES)?;
            let tombstone = Tombstone {
                deleted_at: Utc::now(),
                sync_version,
            };
            tombstones.insert(node.id.as_str(), bincode::serialize(&tombstone)?.as_slice())?;
        }

        self.adjust_counter(&write_txn, STATS_NODE_COUNT, -1)?;
        self.adjust_counter(&write_txn, STATS_TOTAL_TOKENS, -(node.token_estimate as i64))?;
        write_txn.commit()?;
        Ok(())
    }

    fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<Node>> {
        let read_txn = self.db.begin_read()?;
        let nodes_table = read_txn.open_table(NODES)?;
        let mut ids: Vec<String> = Vec::new();

        if let Some(kind) = filter.kind {
            let kind_idx = read_txn.open_multimap_table(NODES_BY_KIND)?;
            for id in kind_idx.get(kind.as_str())? {
                ids.push(id?.value().to_string());
            }
        } else if let Some(ref tag) = filter.tag {
            let tag_idx = read_txn.open_multimap_table(NODES_BY_TAG)?;
            for id in tag_idx.get(tag.as_str())? {
                ids.push(id?.value().to_string());
            }
        } else {
            for item in nodes_table.iter()? {
                let (key, _) = item?;
                ids.push(key.value().to_string());
            }
        }

        let mut nodes = Vec::new();
        for id in ids {
            if let Some(bytes) = nodes_table.get(id.as_str())? {
                let stored = Self::deserialize_stored_node(bytes.value())?;
                drop(bytes);
                let tags = self.load_tags(&id)?;
                let node = stored.into_node(tags);
                if Self::node_matches_filter(&node, &filter) {
                    nodes.push(node);
                }
            }
        }

        nodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            nodes.truncate(limit);
        }
        Ok(nodes)
    }

    fn search(&self, text: &str) -> Result<Vec<Node>> {
        let words = tokenize(text);
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read()?;
        let fts = read_txn.open_multimap_table(FTS_INDEX)?;
        let nodes_table = read_txn.open_table(NODES)?;

        let mut scores: HashMap<String, u32> = HashMap::new();
        for word in &words {
            for id in fts.get(word.as_str())? {
                *scores.entry(id?.value().to_string()).or_insert(0) += 1;
            }
        }

        let mut results = Vec::new();
        for (id, score) in scores {
            if let Some(bytes) = nodes_table.get(id.as_str())? {
                let stored = Self::deserialize_stored_node(bytes.value())?;
                drop(bytes);
                let tags = self.load_tags(&id)?;
                results.push((stored.into_node(tags), score));
            }
        }

        results.sort_by(|a, b| {
            a.0.is_superseded()
                .cmp(&b.0.is_superseded())
                .then(b.1.cmp(&a.1))
                .then(b.0.created_at.cmp(&a.0.created_at))
        });
        Ok(results.into_iter().map(|(n, _)| n).collect())
    }

    fn resolve_id(&self, prefix: &str) -> Result<String> {
        if prefix.chars().count() == 26 {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(NODES)?;
            return if table.get(prefix)?.is_some() {
                Ok(prefix.to_string())
            } else {
                Err(Error::not_found(format!("node {prefix}")))
            };
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODES)?;
        let mut matches = Vec::new();
        for item in table.range(prefix.to_string().as_str()..)? {
            let (key, _) = item?;
            let key = key.value().to_string();
            if !key.starts_with(prefix) {
                break;
            }
            matches.push(key);
        }

        match matches.len() {
            0 => Err(Error::not_found(format!("node prefix {prefix}"))),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Err(Error::Ambiguous {
                prefix: prefix.to_string(),
                candidates: matches,
            }),
        }
    }

    fn create_edge(&self, from: &str, to: &str, kind: EdgeKind) -> Result<Edge> {
        let from = self.resolve_id(from)?;
        let to = self.resolve_id(to)?;

        for existing in self.get_edges(&from, Direction::Out)? {
            if existing.to_id == to && existing.kind == kind {
                return Ok(existing);
            }
        }

        let write_txn = self.db.begin_write()?;
        {
            let nodes = write_txn.open_table(NODES)?;
            if nodes.get(from.as_str())?.is_none() {
                return Err(Error::not_found(format!("node {from}")));
            }
            if nodes.get(to.as_str())?.is_none() {
                return Err(Error::not_found(format!("node {to}")));
            }
        }

        let edge = Edge::new(from.clone(), to.clone(), kind, "{}".to_string());
        {
            let mut edges = write_txn.open_table(EDGES)?;
            edges.insert(edge.id.as_str(), bincode::serialize(&edge)?.as_slice())?;
        }
        {
            let mut from_idx = write_txn.open_multimap_table(EDGES_BY_FROM)?;
            from_idx.insert(from.as_str(), edge.id.as_str())?;
        }
        {
            let mut to_idx = write_txn.open_multimap_table(EDGES_BY_TO)?;
            to_idx.insert(to.as_str(), edge.id.as_str())?;
        }
        self.adjust_counter(&write_txn, STATS_EDGE_COUNT, 1)?;
        write_txn.commit()?;
        Ok(edge)
    }

    fn delete_edge(&self, from: &str, to: &str, kind: Option<EdgeKind>) -> Result<()> {
        let from = self.resolve_id(from)?;
        let to = self.resolve_id(to)?;
        let candidates = self.get_edges(&from, Direction::Out)?;

        let write_txn = self.db.begin_write()?;
        let mut removed = 0i64;
        for edge in candidates {
            if edge.to_id != to {
                continue;
            }
            if let Some(kind) = kind {
                if edge.kind != kind {
                    continue;
                }
            }
            {
                let mut edges = write_txn.open_table(EDGES)?;
                edges.remove(edge.id.as_str())?;
            }
            {
                let mut from_idx = write_txn.open_multimap_table(EDGES_BY_FROM)?;
                from_idx.remove(edge.from_id.as_str(), edge.id.as_str())?;
            }
            {
                let mut to_idx = write_txn.open_multimap_table(EDGES_BY_TO)?;
                to_idx.remove(edge.to_id.as_str(), edge.id.as_str())?;
            }
            removed += 1;
        }
        self.adjust_counter(&write_txn, STATS_EDGE_COUNT, -removed)?;
        write_txn.commit()?;
        Ok(())
    }

    fn get_edges(&self, id: &str, direction: Direction) -> Result<Vec<Edge>> {
        let canonical = self.resolve_id(id)?;
        let read_txn = self.db.begin_read()?;
        let edges_table = read_txn.open_table(EDGES)?;

        let mut ids: Vec<String> = Vec::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            let idx = read_txn.open_multimap_table(EDGES_BY_FROM)?;
            for id in idx.get(canonical.as_str())? {
                ids.push(id?.value().to_string());
            }
        }
        if matches!(direction, Direction::In | Direction::Both) {
            let idx = read_txn.open_multimap_table(EDGES_BY_TO)?;
            for id in idx.get(canonical.as_str())? {
                ids.push(id?.value().to_string());
            }
        }

        let mut edges = Vec::new();
        for id in ids {
            if let Some(bytes) = edges_table.get(id.as_str())? {
                edges.push(bincode::deserialize(bytes.value())?);
            }
        }
        Ok(edges)
    }

    fn add_tag(&self, node_id: &str, tag: &str) -> Result<()> {
        let canonical = self.resolve_id(node_id)?;
        let write_txn = self.db.begin_write()?;
        {
            let nodes = write_txn.open_table(NODES)?;
            if nodes.get(canonical.as_str())?.is_none() {
                return Err(Error::not_found(format!("node {node_id}")));
            }
        }
        {
            let mut tags_by_node = write_txn.open_multimap_table(TAGS_BY_NODE)?;
            tags_by_node.insert(canonical.as_str(), tag)?;
        }
        {
            let mut nodes_by_tag = write_txn.open_multimap_table(NODES_BY_TAG)?;
            nodes_by_tag.insert(tag, canonical.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove_tag(&self, node_id: &str, tag: &str) -> Result<()> {
        let canonical = self.resolve_id(node_id)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut tags_by_node = write_txn.open_multimap_table(TAGS_BY_NODE)?;
            tags_by_node.remove(canonical.as_str(), tag)?;
        }
        {
            let mut nodes_by_tag = write_txn.open_multimap_table(NODES_BY_TAG)?;
            nodes_by_tag.remove(tag, canonical.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_tags(&self, node_id: &str) -> Result<Vec<String>> {
        let canonical = self.resolve_id(node_id)?;
        self.load_tags(&canonical)
    }

    fn list_all_tags(&self) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_multimap_table(NODES_BY_TAG)?;
        let mut tags: Vec<String> = Vec::new();
        for entry in table.iter()? {
            let (tag, _) = entry?;
            tags.push(tag.value().to_string());
        }
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    fn list_tags_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .list_all_tags()?
            .into_iter()
            .filter(|t| t.starts_with(prefix))
            .collect())
    }

    fn set_pending(&self, key: &str, value: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_pending(&self, key: &str) -> Result<String> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING)?;
        table
            .get(key)?
            .map(|v| v.value().to_string())
            .ok_or_else(|| Error::not_found(format!("pending key {key}")))
    }

    fn delete_pending(&self, key: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn changes_since(&self, since_version: u64) -> Result<(Vec<Node>, u64)> {
        let read_txn = self.db.begin_read()?;
        let nodes_table = read_txn.open_table(NODES)?;
        let mut changed_ids: Vec<String> = Vec::new();
        let mut max_version = since_version;

        for item in nodes_table.iter()? {
            let (key, value) = item?;
            let stored = Self::deserialize_stored_node(value.value())?;
            if stored.sync_version > since_version {
                max_version = max_version.max(stored.sync_version);
                changed_ids.push(key.value().to_string());
            }
        }
        drop(nodes_table);
        drop(read_txn);

        let mut nodes = Vec::new();
        for id in changed_ids {
            if let Some(node) = self.read_node_row(&id)? {
                nodes.push(node);
            }
        }
        nodes.sort_by_key(|n| n.sync_version);
        Ok((nodes, max_version))
    }

    fn put_node_from_sync(&self, node: &Node) -> Result<()> {
        let old = self.read_node_row(&node.id)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut nodes = write_txn.open_table(NODES)?;
            nodes.insert(node.id.as_str(), Self::serialize_node(node)?.as_slice())?;
        }
        self.index_node(&write_txn, node, old.as_ref())?;
        {
            let mut tags_by_node = write_txn.open_multimap_table(TAGS_BY_NODE)?;
            let mut nodes_by_tag = write_txn.open_multimap_table(NODES_BY_TAG)?;
            if let Some(old) = &old {
                for tag in &old.tags {
                    if !node.tags.contains(tag) {
                        tags_by_node.remove(node.id.as_str(), tag.as_str())?;
                        nodes_by_tag.remove(tag.as_str(), node.id.as_str())?;
                    }
                }
            }
            for tag in &node.tags {
                tags_by_node.insert(node.id.as_str(), tag.as_str())?;
                nodes_by_tag.insert(tag.as_str(), node.id.as_str())?;
            }
        }
        if old.is_none() {
            self.adjust_counter(&write_txn, STATS_NODE_COUNT, 1)?;
            self.adjust_counter(&write_txn, STATS_TOTAL_TOKENS, node.token_estimate as i64)?;
        } else {
            let old_tokens = old.as_ref().unwrap().token_estimate as i64;
            self.adjust_counter(
                &write_txn,
                STATS_TOTAL_TOKENS,
                node.token_estimate as i64 - old_tokens,
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn tombstones_since(&self, since_version: u64) -> Result<Vec<(String, u64)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TOMBSTONES)?;
        let mut out = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            let tombstone: Tombstone = bincode::deserialize(value.value())?;
            if tombstone.sync_version > since_version {
                out.push((key.value().to_string(), tombstone.sync_version));
            }
        }
        out.sort_by_key(|(_, v)| *v);
        Ok(out)
    }

    fn next_sync_version(&self) -> Result<u64> {
        let write_txn = self.db.begin_write()?;
        let v = self.next_sync_version_locked(&write_txn)?;
        write_txn.commit()?;
        Ok(v)
    }

    fn get_view(&self, name: &str) -> Result<View> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VIEWS)?;
        table
            .get(name)?
            .map(|v| bincode::deserialize(v.value()).map_err(Error::from))
            .transpose()?
            .ok_or_else(|| Error::not_found(format!("view {name}")))
    }

    fn put_view(&self, view: &View) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(VIEWS)?;
            table.insert(view.name.as_str(), bincode::serialize(view)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn stats(&self) -> Result<StorageStats> {
        let mut node_counts_by_kind = HashMap::new();
        {
            let read_txn = self.db.begin_read()?;
            let kind_idx = read_txn.open_multimap_table(NODES_BY_KIND)?;
            for kind in NodeKind::all() {
                let count = kind_idx.get(kind.as_str())?.count() as u64;
                node_counts_by_kind.insert(*kind, count);
            }
        }
        let unique_tags = self.list_all_tags()?.len() as u64;

        Ok(StorageStats {
            total_nodes: self.read_counter(STATS_NODE_COUNT)?,
            total_tokens: self.read_counter(STATS_TOTAL_TOKENS)?,
            total_edges: self.read_counter(STATS_EDGE_COUNT)?,
            unique_tags,
            node_counts_by_kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (RedbStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();
        (store, dir)
    }

    fn create(store: &RedbStore, content: &str) -> Node {
        store
            .create_node(CreateNode {
                kind: NodeKind::Fact,
                content: content.to_string(),
                summary: None,
                metadata: None,
                tags: vec![],
            })
            .unwrap()
    }

    #[test]
    fn create_and_get_round_trip() {
        let (store, _dir) = open_store();
        let node = store
            .create_node(CreateNode {
                kind: NodeKind::Fact,
                content: "The sky is blue".to_string(),
                summary: None,
                metadata: None,
                tags: vec!["tier:pinned".to_string()],
            })
            .unwrap();
        assert_eq!(node.token_estimate, 3);
        let fetched = store.get_node(&node.id).unwrap();
        assert_eq!(fetched.tags, vec!["tier:pinned".to_string()]);
    }

    #[test]
    fn empty_content_is_rejected() {
        let (store, _dir) = open_store();
        let result = store.create_node(CreateNode {
            kind: NodeKind::Fact,
            content: "   ".to_string(),
            summary: None,
            metadata: None,
            tags: vec![],
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn delete_cascades_to_edges_and_tags() {
        let (store, _dir) = open_store();
        let a = create(&store, "Node A");
        let b = create(&store, "Node B");
        store.add_tag(&a.id, "tier:pinned").unwrap();
        store.create_edge(&a.id, &b.id, EdgeKind::DependsOn).unwrap();

        store.delete_node(&a.id).unwrap();

        assert!(store.get_node(&a.id).is_err());
        assert!(store.get_edges(&b.id, Direction::In).unwrap().is_empty());
        assert!(store.get_tags(&a.id).is_err());
    }

    #[test]
    fn create_edge_is_idempotent() {
        let (store, _dir) = open_store();
        let a = create(&store, "A");
        let b = create(&store, "B");
        let e1 = store.create_edge(&a.id, &b.id, EdgeKind::DependsOn).unwrap();
        let e2 = store.create_edge(&a.id, &b.id, EdgeKind::DependsOn).unwrap();
        assert_eq!(e1.id, e2.id);
        assert_eq!(store.get_edges(&a.id, Direction::Out).unwrap().len(), 1);
    }

    #[test]
    fn resolve_id_prefix_and_ambiguity() {
        let (store, _dir) = open_store();
        let a = create(&store, "A");
        let full = store.resolve_id(&a.id).unwrap();
        assert_eq!(full, a.id);

        let prefix = &a.id[..8];
        assert_eq!(store.resolve_id(prefix).unwrap(), a.id);
    }

    #[test]
    fn list_nodes_excludes_superseded_by_default() {
        let (store, _dir) = open_store();
        let a = create(&store, "Old fact");
        let b = create(&store, "New fact");
        store.supersede_node(&a.id, &b.id).unwrap();

        let results = store.list_nodes(NodeFilter::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, b.id);

        let with_superseded = store
            .list_nodes(NodeFilter::new().include_superseded())
            .unwrap();
        assert_eq!(with_superseded.len(), 2);
    }

    #[test]
    fn supersede_node_sets_lineage_and_stays_readable() {
        let (store, _dir) = open_store();
        let a = create(&store, "Old fact");
        let b = create(&store, "New fact");
        let updated = store.supersede_node(&a.id, &b.id).unwrap();
        assert_eq!(updated.superseded_by, Some(b.id.clone()));
        assert!(updated.is_superseded());

        let reread = store.get_node(&a.id).unwrap();
        assert_eq!(reread.superseded_by, Some(b.id));
    }

    #[test]
    fn supersede_node_rejects_self_reference() {
        let (store, _dir) = open_store();
        let a = create(&store, "Old fact");
        assert!(store.supersede_node(&a.id, &a.id).is_err());
    }

    #[test]
    fn supersede_node_rejects_missing_replacement() {
        let (store, _dir) = open_store();
        let a = create(&store, "Old fact");
        assert!(store.supersede_node(&a.id, "nonexistent").is_err());
    }

    #[test]
    fn find_by_type_and_content_skips_superseded_node() {
        let (store, _dir) = open_store();
        let a = store
            .create_node(CreateNode {
                kind: NodeKind::Fact,
                content: "duplicate content".to_string(),
                summary: None,
                metadata: None,
                tags: vec![],
            })
            .unwrap();
        let b = create(&store, "New fact");
        store.supersede_node(&a.id, &b.id).unwrap();

        assert!(store
            .find_by_type_and_content(NodeKind::Fact, "duplicate content")
            .unwrap()
            .is_none());
    }

    #[test]
    fn search_ranks_by_word_match_count() {
        let (store, _dir) = open_store();
        create(&store, "rust is a systems language");
        create(&store, "rust rust everywhere");
        let results = store.search("rust").unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("everywhere"));
    }
}
