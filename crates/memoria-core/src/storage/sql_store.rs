//! Network backend — the same `Store` contract against a shared Postgres
//! database instead of a local `redb` file, for the multi-device/team
//! deployment mode. Built against `sqlx`, whose pool/async ergonomics fit
//! the rest of this workspace's tokio stack.
//!
//! Full-text search uses Postgres's own `tsvector`/`GIN` machinery instead
//! of the embedded backend's hand-rolled inverted index; the two backends
//! only need to agree on observable search behavior, not implementation.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::{Error, Result};
use crate::id::new_id;
use crate::storage::filters::{NodeFilter, StorageStats};
use crate::storage::traits::{CreateNode, Store, UpdateNode};
use crate::types::{Direction, Edge, EdgeKind, Node, NodeKind, View};

pub struct SqlStore {
    pool: PgPool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id              TEXT PRIMARY KEY,
    type            TEXT NOT NULL,
    content         TEXT NOT NULL,
    summary         TEXT,
    token_estimate  INTEGER NOT NULL,
    superseded_by   TEXT,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL,
    metadata        TEXT NOT NULL DEFAULT '{}',
    sync_version    BIGINT NOT NULL,
    search_vector   TSVECTOR
);
CREATE INDEX IF NOT EXISTS nodes_type_idx ON nodes (type);
CREATE INDEX IF NOT EXISTS nodes_sync_version_idx ON nodes (sync_version);
CREATE INDEX IF NOT EXISTS nodes_search_idx ON nodes USING GIN (search_vector);

CREATE TABLE IF NOT EXISTS tags (
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    tag     TEXT NOT NULL,
    PRIMARY KEY (node_id, tag)
);
CREATE INDEX IF NOT EXISTS tags_tag_idx ON tags (tag);

CREATE TABLE IF NOT EXISTS edges (
    id          TEXT PRIMARY KEY,
    from_id     TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    to_id       TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    type        TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL,
    metadata    TEXT NOT NULL DEFAULT '{}',
    UNIQUE (from_id, to_id, type)
);
CREATE INDEX IF NOT EXISTS edges_from_idx ON edges (from_id);
CREATE INDEX IF NOT EXISTS edges_to_idx ON edges (to_id);

CREATE TABLE IF NOT EXISTS tombstones (
    id            TEXT PRIMARY KEY,
    deleted_at    TIMESTAMPTZ NOT NULL,
    sync_version  BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS tombstones_sync_version_idx ON tombstones (sync_version);

CREATE TABLE IF NOT EXISTS pending (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS views (
    name       TEXT PRIMARY KEY,
    query      TEXT NOT NULL,
    budget     INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_counter (
    id   BOOLEAN PRIMARY KEY DEFAULT TRUE,
    value BIGINT NOT NULL
);
INSERT INTO sync_counter (id, value) VALUES (TRUE, 0) ON CONFLICT DO NOTHING;
"#;

impl SqlStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::Fatal(e.to_string()))?;
        let store = SqlStore { pool };
        if store.get_view_async("default").await.is_err() {
            store.put_view_async(&View::default_view()).await?;
        }
        Ok(store)
    }

    async fn next_sync_version_async(&self) -> Result<u64> {
        let row = sqlx::query(
            "UPDATE sync_counter SET value = value + 1 WHERE id = TRUE RETURNING value",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("value") as u64)
    }

    async fn row_to_node(&self, row: &sqlx::postgres::PgRow) -> Result<Node> {
        let id: String = row.try_get("id")?;
        let kind_str: String = row.try_get("type")?;
        let tags = sqlx::query("SELECT tag FROM tags WHERE node_id = $1 ORDER BY tag")
            .bind(&id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| r.get::<String, _>("tag"))
            .collect();
        Ok(Node {
            id,
            kind: NodeKind::parse(&kind_str)
                .ok_or_else(|| Error::Fatal(format!("unknown node kind {kind_str}")))?,
            content: row.try_get("content")?,
            summary: row.try_get("summary")?,
            token_estimate: row.try_get::<i32, _>("token_estimate")? as u32,
            superseded_by: row.try_get("superseded_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            metadata: row.try_get("metadata")?,
            sync_version: row.try_get::<i64, _>("sync_version")? as u64,
            tags,
        })
    }

    async fn fetch_node(&self, id: &str) -> Result<Option<Node>> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.row_to_node(&row).await?)),
            None => Ok(None),
        }
    }

    async fn row_to_edge(row: sqlx::postgres::PgRow) -> Result<Edge> {
        let kind_str: String = row.try_get("type")?;
        Ok(Edge {
            id: row.try_get("id")?,
            from_id: row.try_get("from_id")?,
            to_id: row.try_get("to_id")?,
            kind: EdgeKind::parse(&kind_str)
                .ok_or_else(|| Error::Fatal(format!("unknown edge kind {kind_str}")))?,
            created_at: row.try_get("created_at")?,
            metadata: row.try_get("metadata")?,
        })
    }

    async fn resolve_id_async(&self, prefix: &str) -> Result<String> {
        if prefix.chars().count() == 26 {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT id FROM nodes WHERE id = $1")
                    .bind(prefix)
                    .fetch_optional(&self.pool)
                    .await?;
            return exists
                .map(|(id,)| id)
                .ok_or_else(|| Error::not_found(format!("node {prefix}")));
        }

        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM nodes WHERE id LIKE $1 || '%' ORDER BY id")
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?;
        match rows.len() {
            0 => Err(Error::not_found(format!("node prefix {prefix}"))),
            1 => Ok(rows.into_iter().next().unwrap().0),
            _ => Err(Error::Ambiguous {
                prefix: prefix.to_string(),
                candidates: rows.into_iter().map(|(id,)| id).collect(),
            }),
        }
    }

    async fn get_view_async(&self, name: &str) -> Result<View> {
        let row = sqlx::query("SELECT * FROM views WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(format!("view {name}")))?;
        Ok(View {
            name: row.try_get("name")?,
            query: row.try_get("query")?,
            budget: row.try_get::<i32, _>("budget")? as u32,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn put_view_async(&self, view: &View) -> Result<()> {
        sqlx::query(
            "INSERT INTO views (name, query, budget, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (name) DO UPDATE SET query = $2, budget = $3, updated_at = $5",
        )
        .bind(&view.name)
        .bind(&view.query)
        .bind(view.budget as i32)
        .bind(view.created_at)
        .bind(view.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// The `Store` trait's methods are synchronous (the embedded `redb` backend
/// is never async); network calls here block the current thread on a
/// `tokio::runtime::Handle` so callers never need to know which backend
/// they're talking to.
fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
}

impl Store for SqlStore {
    fn create_node(&self, input: CreateNode) -> Result<Node> {
        block_on(async {
            let content = input.content.trim().to_string();
            if content.is_empty() {
                return Err(Error::InvalidInput("content must not be empty".into()));
            }
            let metadata = input.metadata.unwrap_or_else(|| "{}".to_string());
            let mut node = Node::new(input.kind, content, input.summary, metadata);
            let mut tags = input.tags;
            tags.sort();
            tags.dedup();
            node.tags = tags;
            node.sync_version = self.next_sync_version_async().await?;

            sqlx::query(
                "INSERT INTO nodes \
                 (id, type, content, summary, token_estimate, superseded_by, \
                  created_at, updated_at, metadata, sync_version, search_vector) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10, to_tsvector('english', $3))",
            )
            .bind(&node.id)
            .bind(node.kind.as_str())
            .bind(&node.content)
            .bind(&node.summary)
            .bind(node.token_estimate as i32)
            .bind(&node.superseded_by)
            .bind(node.created_at)
            .bind(node.updated_at)
            .bind(&node.metadata)
            .bind(node.sync_version as i64)
            .execute(&self.pool)
            .await?;

            for tag in &node.tags {
                sqlx::query("INSERT INTO tags (node_id, tag) VALUES ($1, $2)")
                    .bind(&node.id)
                    .bind(tag)
                    .execute(&self.pool)
                    .await?;
            }
            Ok(node)
        })
    }

    fn find_by_type_and_content(&self, kind: NodeKind, content: &str) -> Result<Option<Node>> {
        block_on(async {
            let row = sqlx::query(
                "SELECT * FROM nodes WHERE type = $1 AND content = $2 AND superseded_by IS NULL \
                 LIMIT 1",
            )
            .bind(kind.as_str())
            .bind(content)
            .fetch_optional(&self.pool)
            .await?;
            match row {
                Some(row) => Ok(Some(self.row_to_node(&row).await?)),
                None => Ok(None),
            }
        })
    }

    fn get_node(&self, id: &str) -> Result<Node> {
        block_on(async {
            let canonical = self.resolve_id_async(id).await?;
            self.fetch_node(&canonical)
                .await?
                .ok_or_else(|| Error::not_found(format!("node {id}")))
        })
    }

    fn update_node(&self, id: &str, patch: UpdateNode) -> Result<Node> {
        block_on(async {
            let canonical = self.resolve_id_async(id).await?;
            let mut node = self
                .fetch_node(&canonical)
                .await?
                .ok_or_else(|| Error::not_found(format!("node {id}")))?;

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
            node.sync_version = self.next_sync_version_async().await?;

            sqlx::query(
                "UPDATE nodes SET type=$2, content=$3, summary=$4, token_estimate=$5, \
                 updated_at=$6, metadata=$7, sync_version=$8, \
                 search_vector = to_tsvector('english', $3) WHERE id=$1",
            )
            .bind(&node.id)
            .bind(node.kind.as_str())
            .bind(&node.content)
            .bind(&node.summary)
            .bind(node.token_estimate as i32)
            .bind(node.updated_at)
            .bind(&node.metadata)
            .bind(node.sync_version as i64)
            .execute(&self.pool)
            .await?;

            Ok(node)
        })
    }

    fn supersede_node(&self, id: &str, replacement_id: &str) -> Result<Node> {
        block_on(async {
            let canonical = self.resolve_id_async(id).await?;
            let replacement = self.resolve_id_async(replacement_id).await?;
            if replacement == canonical {
                return Err(Error::InvalidInput("a node cannot supersede itself".into()));
            }
            if self.fetch_node(&replacement).await?.is_none() {
                return Err(Error::not_found(format!("node {replacement_id}")));
            }
            let mut node = self
                .fetch_node(&canonical)
                .await?
                .ok_or_else(|| Error::not_found(format!("node {id}")))?;
            node.superseded_by = Some(replacement);
            node.updated_at = Utc::now();
            node.sync_version = self.next_sync_version_async().await?;

            sqlx::query(
                "UPDATE nodes SET superseded_by=$2, updated_at=$3, sync_version=$4 WHERE id=$1",
            )
            .bind(&node.id)
            .bind(&node.superseded_by)
            .bind(node.updated_at)
            .bind(node.sync_version as i64)
            .execute(&self.pool)
            .await?;

            Ok(node)
        })
    }

    fn delete_node(&self, id: &str) -> Result<()> {
        block_on(async {
            let canonical = self.resolve_id_async(id).await?;
            if self.fetch_node(&canonical).await?.is_none() {
                return Err(Error::not_found(format!("node {id}")));
            }
            let sync_version = self.next_sync_version_async().await?;
            // ON DELETE CASCADE drops incident edges and owned tags.
            sqlx::query("DELETE FROM nodes WHERE id = $1")
                .bind(&canonical)
                .execute(&self.pool)
                .await?;
            sqlx::query(
                "INSERT INTO tombstones (id, deleted_at, sync_version) VALUES ($1, $2, $3)",
            )
            .bind(&canonical)
            .bind(Utc::now())
            .bind(sync_version as i64)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<Node>> {
        block_on(async {
            let mut sql = String::from("SELECT DISTINCT nodes.* FROM nodes");
            if filter.tag.is_some() {
                sql.push_str(" JOIN tags ON tags.node_id = nodes.id");
            }
            sql.push_str(" WHERE 1=1");
            if !filter.include_superseded {
                sql.push_str(" AND nodes.superseded_by IS NULL");
            }
            if filter.kind.is_some() {
                sql.push_str(" AND nodes.type = $1");
            }
            if filter.tag.is_some() {
                sql.push_str(" AND tags.tag = $2");
            }
            if filter.since.is_some() {
                sql.push_str(" AND nodes.created_at >= $3");
            }
            sql.push_str(" ORDER BY nodes.created_at DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }

            let mut query = sqlx::query(&sql);
            if let Some(kind) = filter.kind {
                query = query.bind(kind.as_str());
            }
            if let Some(ref tag) = filter.tag {
                query = query.bind(tag);
            }
            if let Some(since) = filter.since {
                query = query.bind(since);
            }

            let rows = query.fetch_all(&self.pool).await?;
            let mut nodes = Vec::with_capacity(rows.len());
            for row in rows {
                nodes.push(self.row_to_node(&row).await?);
            }
            Ok(nodes)
        })
    }

    fn search(&self, text: &str) -> Result<Vec<Node>> {
        block_on(async {
            let rows = sqlx::query(
                "SELECT *, ts_rank(search_vector, plainto_tsquery('english', $1)) AS rank \
                 FROM nodes WHERE search_vector @@ plainto_tsquery('english', $1) \
                 ORDER BY superseded_by IS NOT NULL, rank DESC",
            )
            .bind(text)
            .fetch_all(&self.pool)
            .await?;
            let mut nodes = Vec::with_capacity(rows.len());
            for row in rows {
                nodes.push(self.row_to_node(&row).await?);
            }
            Ok(nodes)
        })
    }

    fn resolve_id(&self, prefix: &str) -> Result<String> {
        block_on(self.resolve_id_async(prefix))
    }

    fn create_edge(&self, from: &str, to: &str, kind: EdgeKind) -> Result<Edge> {
        block_on(async {
            let from = self.resolve_id_async(from).await?;
            let to = self.resolve_id_async(to).await?;

            if self.fetch_node(&from).await?.is_none() {
                return Err(Error::not_found(format!("node {from}")));
            }
            if self.fetch_node(&to).await?.is_none() {
                return Err(Error::not_found(format!("node {to}")));
            }

            if let Some(row) = sqlx::query(
                "SELECT * FROM edges WHERE from_id=$1 AND to_id=$2 AND type=$3",
            )
            .bind(&from)
            .bind(&to)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?
            {
                return Self::row_to_edge(row).await;
            }

            let edge = Edge::new(from, to, kind, "{}".to_string());
            sqlx::query(
                "INSERT INTO edges (id, from_id, to_id, type, created_at, metadata) \
                 VALUES ($1,$2,$3,$4,$5,$6)",
            )
            .bind(&edge.id)
            .bind(&edge.from_id)
            .bind(&edge.to_id)
            .bind(edge.kind.as_str())
            .bind(edge.created_at)
            .bind(&edge.metadata)
            .execute(&self.pool)
            .await?;
            Ok(edge)
        })
    }

    fn delete_edge(&self, from: &str, to: &str, kind: Option<EdgeKind>) -> Result<()> {
        block_on(async {
            let from = self.resolve_id_async(from).await?;
            let to = self.resolve_id_async(to).await?;
            match kind {
                Some(kind) => {
                    sqlx::query("DELETE FROM edges WHERE from_id=$1 AND to_id=$2 AND type=$3")
                        .bind(&from)
                        .bind(&to)
                        .bind(kind.as_str())
                        .execute(&self.pool)
                        .await?;
                }
                None => {
                    sqlx::query("DELETE FROM edges WHERE from_id=$1 AND to_id=$2")
                        .bind(&from)
                        .bind(&to)
                        .execute(&self.pool)
                        .await?;
                }
            }
            Ok(())
        })
    }

    fn get_edges(&self, id: &str, direction: Direction) -> Result<Vec<Edge>> {
        block_on(async {
            let canonical = self.resolve_id_async(id).await?;
            let sql = match direction {
                Direction::Out => "SELECT * FROM edges WHERE from_id = $1",
                Direction::In => "SELECT * FROM edges WHERE to_id = $1",
                Direction::Both => "SELECT * FROM edges WHERE from_id = $1 OR to_id = $1",
            };
            let rows = sqlx::query(sql)
                .bind(&canonical)
                .fetch_all(&self.pool)
                .await?;
            let mut edges = Vec::with_capacity(rows.len());
            for row in rows {
                edges.push(Self::row_to_edge(row).await?);
            }
            Ok(edges)
        })
    }

    fn add_tag(&self, node_id: &str, tag: &str) -> Result<()> {
        block_on(async {
            let canonical = self.resolve_id_async(node_id).await?;
            if self.fetch_node(&canonical).await?.is_none() {
                return Err(Error::not_found(format!("node {node_id}")));
            }
            sqlx::query(
                "INSERT INTO tags (node_id, tag) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(&canonical)
            .bind(tag)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn remove_tag(&self, node_id: &str, tag: &str) -> Result<()> {
        block_on(async {
            let canonical = self.resolve_id_async(node_id).await?;
            sqlx::query("DELETE FROM tags WHERE node_id = $1 AND tag = $2")
                .bind(&canonical)
                .bind(tag)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn get_tags(&self, node_id: &str) -> Result<Vec<String>> {
        block_on(async {
            let canonical = self.resolve_id_async(node_id).await?;
            let rows: Vec<(String,)> =
                sqlx::query_as("SELECT tag FROM tags WHERE node_id = $1 ORDER BY tag")
                    .bind(&canonical)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows.into_iter().map(|(t,)| t).collect())
        })
    }

    fn list_all_tags(&self) -> Result<Vec<String>> {
        block_on(async {
            let rows: Vec<(String,)> =
                sqlx::query_as("SELECT DISTINCT tag FROM tags ORDER BY tag")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows.into_iter().map(|(t,)| t).collect())
        })
    }

    fn list_tags_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        block_on(async {
            let rows: Vec<(String,)> = sqlx::query_as(
                "SELECT DISTINCT tag FROM tags WHERE tag LIKE $1 || '%' ORDER BY tag",
            )
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|(t,)| t).collect())
        })
    }

    fn set_pending(&self, key: &str, value: &str) -> Result<()> {
        block_on(async {
            sqlx::query(
                "INSERT INTO pending (key, value) VALUES ($1, $2) \
                 ON CONFLICT (key) DO UPDATE SET value = $2",
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn get_pending(&self, key: &str) -> Result<String> {
        block_on(async {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT value FROM pending WHERE key = $1")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
            row.map(|(v,)| v)
                .ok_or_else(|| Error::not_found(format!("pending key {key}")))
        })
    }

    fn delete_pending(&self, key: &str) -> Result<()> {
        block_on(async {
            sqlx::query("DELETE FROM pending WHERE key = $1")
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn changes_since(&self, since_version: u64) -> Result<(Vec<Node>, u64)> {
        block_on(async {
            let rows = sqlx::query("SELECT * FROM nodes WHERE sync_version > $1 ORDER BY sync_version")
                .bind(since_version as i64)
                .fetch_all(&self.pool)
                .await?;
            let mut max_version = since_version;
            let mut nodes = Vec::with_capacity(rows.len());
            for row in rows {
                let node = self.row_to_node(&row).await?;
                max_version = max_version.max(node.sync_version);
                nodes.push(node);
            }
            Ok((nodes, max_version))
        })
    }

    fn put_node_from_sync(&self, node: &Node) -> Result<()> {
        block_on(async {
            sqlx::query(
                "INSERT INTO nodes \
                 (id, type, content, summary, token_estimate, superseded_by, \
                  created_at, updated_at, metadata, sync_version, search_vector) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10, to_tsvector('english', $3)) \
                 ON CONFLICT (id) DO UPDATE SET \
                   type=$2, content=$3, summary=$4, token_estimate=$5, superseded_by=$6, \
                   updated_at=$8, metadata=$9, sync_version=$10, \
                   search_vector = to_tsvector('english', $3)",
            )
            .bind(&node.id)
            .bind(node.kind.as_str())
            .bind(&node.content)
            .bind(&node.summary)
            .bind(node.token_estimate as i32)
            .bind(&node.superseded_by)
            .bind(node.created_at)
            .bind(node.updated_at)
            .bind(&node.metadata)
            .bind(node.sync_version as i64)
            .execute(&self.pool)
            .await?;

            sqlx::query("DELETE FROM tags WHERE node_id = $1")
                .bind(&node.id)
                .execute(&self.pool)
                .await?;
            for tag in &node.tags {
                sqlx::query("INSERT INTO tags (node_id, tag) VALUES ($1, $2)")
                    .bind(&node.id)
                    .bind(tag)
                    .execute(&self.pool)
                    .await?;
            }
            Ok(())
        })
    }

    fn tombstones_since(&self, since_version: u64) -> Result<Vec<(String, u64)>> {
        block_on(async {
            let rows: Vec<(String, i64)> = sqlx::query_as(
                "SELECT id, sync_version FROM tombstones WHERE sync_version > $1 \
                 ORDER BY sync_version",
            )
            .bind(since_version as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|(id, v)| (id, v as u64)).collect())
        })
    }

    fn next_sync_version(&self) -> Result<u64> {
        block_on(self.next_sync_version_async())
    }

    fn get_view(&self, name: &str) -> Result<View> {
        block_on(self.get_view_async(name))
    }

    fn put_view(&self, view: &View) -> Result<()> {
        block_on(self.put_view_async(view))
    }

    fn stats(&self) -> Result<StorageStats> {
        block_on(async {
            let total_nodes: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM nodes WHERE superseded_by IS NULL")
                    .fetch_one(&self.pool)
                    .await?;
            let total_tokens: (Option<i64>,) = sqlx::query_as(
                "SELECT SUM(token_estimate) FROM nodes WHERE superseded_by IS NULL",
            )
            .fetch_one(&self.pool)
            .await?;
            let total_edges: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM edges")
                .fetch_one(&self.pool)
                .await?;
            let unique_tags: (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT tag) FROM tags")
                .fetch_one(&self.pool)
                .await?;
            let by_kind: Vec<(String, i64)> = sqlx::query_as(
                "SELECT type, COUNT(*) FROM nodes WHERE superseded_by IS NULL GROUP BY type",
            )
            .fetch_all(&self.pool)
            .await?;

            let mut node_counts_by_kind = std::collections::HashMap::new();
            for (kind, count) in by_kind {
                if let Some(kind) = NodeKind::parse(&kind) {
                    node_counts_by_kind.insert(kind, count as u64);
                }
            }

            Ok(StorageStats {
                total_nodes: total_nodes.0 as u64,
                total_tokens: total_tokens.0.unwrap_or(0) as u64,
                total_edges: total_edges.0 as u64,
                unique_tags: unique_tags.0 as u64,
                node_counts_by_kind,
            })
        })
    }
}
