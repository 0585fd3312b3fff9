use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::Result;
use crate::query::{parse_query, Query};
use crate::storage::Store;
use crate::types::{tier_priority, Direction, Edge, Node, NodeKind};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ComposeRequest {
    pub query: Option<String>,
    pub ids: Option<Vec<String>>,
    pub seed: Option<String>,
    #[serde(rename = "depth")]
    pub seed_depth: u32,
    pub budget: u32,
    pub project: Option<String>,
    #[serde(rename = "edges")]
    pub include_edges: bool,
    pub include_reference_stats: bool,
    pub include_superseded: bool,
}

/// A node placed into a composed view, annotated with the tier it sorted
/// into — the renderer groups by this rather than re-deriving it.
#[derive(Debug, Clone, Serialize)]
pub struct ComposedNode {
    pub node: Node,
    pub tier: u8,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceStats {
    pub total: usize,
    /// Keyed by `NodeKind::as_str()` — a bare `HashMap<NodeKind, _>` isn't
    /// valid JSON-object-key material.
    pub by_kind: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeResult {
    pub nodes: Vec<ComposedNode>,
    pub edges: Vec<Edge>,
    pub reference_stats: Option<ReferenceStats>,
    pub total_tokens: u32,
    pub budget: u32,
    pub skipped: usize,
    pub generated_at: DateTime<Utc>,
}

pub fn compose(store: &dyn Store, req: &ComposeRequest) -> Result<ComposeResult> {
    let mut candidates = load_candidates(store, req)?;

    candidates.sort_by(|a, b| {
        let ta = tier_priority(&a.tags);
        let tb = tier_priority(&b.tags);
        ta.cmp(&tb).then(b.created_at.cmp(&a.created_at))
    });

    let scope = req.project.as_deref().unwrap_or("");
    candidates.retain(|n| in_project_scope(n, scope));

    let mut running_total: u32 = 0;
    let mut skipped = 0usize;
    let mut packed: Vec<ComposedNode> = Vec::new();
    for node in candidates {
        if running_total + node.token_estimate <= req.budget {
            running_total += node.token_estimate;
            let tier = tier_priority(&node.tags);
            packed.push(ComposedNode { node, tier });
        } else {
            skipped += 1;
        }
    }

    let edges = if req.include_edges {
        collect_internal_edges(store, &packed)?
    } else {
        Vec::new()
    };

    let reference_stats = if req.include_reference_stats {
        Some(compute_reference_stats(store, scope, req.include_superseded)?)
    } else {
        None
    };

    Ok(ComposeResult {
        nodes: packed,
        edges,
        reference_stats,
        total_tokens: running_total,
        budget: req.budget,
        skipped,
        generated_at: Utc::now(),
    })
}

fn load_candidates(store: &dyn Store, req: &ComposeRequest) -> Result<Vec<Node>> {
    if let Some(ids) = &req.ids {
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            nodes.push(store.get_node(id)?);
        }
        return Ok(nodes);
    }

    if let Some(seed) = &req.seed {
        return seed_bfs(store, seed, req.seed_depth);
    }

    let query: Query = match &req.query {
        Some(q) if !q.trim().is_empty() => {
            parse_query(q).map_err(|e| crate::error::Error::InvalidInput(e.to_string()))?
        }
        _ => Query::empty(),
    };
    query.execute(store, req.include_superseded)
}

fn seed_bfs(store: &dyn Store, seed: &str, depth: u32) -> Result<Vec<Node>> {
    let root = store.resolve_id(seed)?;
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(root.clone());
    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    queue.push_back((root, 0));

    while let Some((id, d)) = queue.pop_front() {
        if d >= depth {
            continue;
        }
        for edge in store.get_edges(&id, Direction::Both)? {
            let neighbor = if edge.from_id == id {
                edge.to_id
            } else {
                edge.from_id
            };
            if visited.insert(neighbor.clone()) {
                queue.push_back((neighbor, d + 1));
            }
        }
    }

    let mut nodes = Vec::with_capacity(visited.len());
    for id in visited {
        nodes.push(store.get_node(&id)?);
    }
    Ok(nodes)
}

/// A node passes if it has no `project:*` tag, or has `project:global`, or
/// has `project:X` where X case-insensitively equals `scope`. An empty
/// scope means "global and unscoped only".
fn in_project_scope(node: &Node, scope: &str) -> bool {
    let project_tags: Vec<&str> = node
        .tags
        .iter()
        .filter_map(|t| t.strip_prefix("project:"))
        .collect();
    if project_tags.is_empty() {
        return true;
    }
    project_tags
        .iter()
        .any(|p| p.eq_ignore_ascii_case("global") || p.eq_ignore_ascii_case(scope))
}

fn collect_internal_edges(store: &dyn Store, nodes: &[ComposedNode]) -> Result<Vec<Edge>> {
    let included: HashSet<&str> = nodes.iter().map(|n| n.node.id.as_str()).collect();
    let mut edges = Vec::new();
    let mut seen = HashSet::new();
    for n in nodes {
        for edge in store.get_edges(&n.node.id, Direction::Out)? {
            if included.contains(edge.to_id.as_str()) && seen.insert(edge.id.clone()) {
                edges.push(edge);
            }
        }
    }
    Ok(edges)
}

fn compute_reference_stats(
    store: &dyn Store,
    scope: &str,
    include_superseded: bool,
) -> Result<ReferenceStats> {
    let query =
        parse_query("tag:tier:reference").map_err(|e| crate::error::Error::Fatal(e.to_string()))?;
    let nodes = query.execute(store, include_superseded)?;
    let mut stats = ReferenceStats::default();
    for node in nodes {
        if !in_project_scope(&node, scope) {
            continue;
        }
        stats.total += 1;
        *stats.by_kind.entry(node.kind.as_str().to_string()).or_insert(0) += 1;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CreateNode, RedbStore};
    use crate::types::NodeKind;
    use tempfile::TempDir;

    fn open_store() -> (RedbStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();
        (store, dir)
    }

    fn create(store: &RedbStore, content: &str, tags: Vec<&str>) -> Node {
        store
            .create_node(CreateNode {
                kind: NodeKind::Fact,
                content: content.to_string(),
                summary: None,
                metadata: None,
                tags: tags.into_iter().map(String::from).collect(),
            })
            .unwrap()
    }

    #[test]
    fn budget_packing_skips_on_overflow_without_reordering() {
        let (store, _dir) = open_store();
        create(&store, &"x".repeat(400), vec!["tier:pinned"]);
        create(&store, "small", vec!["tier:pinned"]);

        let req = ComposeRequest {
            budget: 20,
            ..Default::default()
        };
        let result = compose(&store, &req).unwrap();
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].node.content, "small");
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn project_scope_excludes_other_projects() {
        let (store, _dir) = open_store();
        create(&store, "acme fact", vec!["project:acme"]);
        create(&store, "global fact", vec!["project:global"]);
        create(&store, "unscoped fact", vec![]);

        let req = ComposeRequest {
            budget: 4000,
            project: Some("beta".to_string()),
            ..Default::default()
        };
        let result = compose(&store, &req).unwrap();
        let contents: Vec<&str> = result
            .nodes
            .iter()
            .map(|n| n.node.content.as_str())
            .collect();
        assert!(!contents.contains(&"acme fact"));
        assert!(contents.contains(&"global fact"));
        assert!(contents.contains(&"unscoped fact"));
    }

    #[test]
    fn tier_priority_orders_before_recency() {
        let (store, _dir) = open_store();
        create(&store, "working note", vec!["tier:working"]);
        create(&store, "pinned note", vec!["tier:pinned"]);

        let req = ComposeRequest {
            budget: 4000,
            ..Default::default()
        };
        let result = compose(&store, &req).unwrap();
        assert_eq!(result.nodes[0].node.content, "pinned note");
    }
}
