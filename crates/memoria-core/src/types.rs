use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{estimate_tokens, new_id};

/// A knowledge fragment — the atomic unit stored in the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// 26-character, time-sortable identifier.
    pub id: String,

    #[serde(rename = "type")]
    pub kind: NodeKind,

    /// Non-empty, trimmed content.
    pub content: String,

    pub summary: Option<String>,

    /// Derived: `max(1, len(content)/4)` if content is non-empty, else 0.
    pub token_estimate: u32,

    /// Id of the node that replaces this one, if superseded.
    pub superseded_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Opaque JSON string. Defaults to `"{}"`. Never validated by the core.
    pub metadata: String,

    /// Monotone per-store counter, bumped on every local mutation; the sync
    /// watermark.
    pub sync_version: u64,

    /// Derived set of tags; populated by the Store on read, not persisted
    /// as part of the node's own record.
    pub tags: Vec<String>,
}

/// The fixed node type vocabulary. Closed — never extended at runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Fact,
    Decision,
    Pattern,
    Observation,
    Hypothesis,
    Task,
    Summary,
    Source,
    OpenQuestion,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Fact => "fact",
            NodeKind::Decision => "decision",
            NodeKind::Pattern => "pattern",
            NodeKind::Observation => "observation",
            NodeKind::Hypothesis => "hypothesis",
            NodeKind::Task => "task",
            NodeKind::Summary => "summary",
            NodeKind::Source => "source",
            NodeKind::OpenQuestion => "open-question",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fact" => Some(NodeKind::Fact),
            "decision" => Some(NodeKind::Decision),
            "pattern" => Some(NodeKind::Pattern),
            "observation" => Some(NodeKind::Observation),
            "hypothesis" => Some(NodeKind::Hypothesis),
            "task" => Some(NodeKind::Task),
            "summary" => Some(NodeKind::Summary),
            "source" => Some(NodeKind::Source),
            "open-question" | "open_question" => Some(NodeKind::OpenQuestion),
            _ => None,
        }
    }

    pub fn all() -> &'static [NodeKind] {
        &[
            NodeKind::Fact,
            NodeKind::Decision,
            NodeKind::Pattern,
            NodeKind::Observation,
            NodeKind::Hypothesis,
            NodeKind::Task,
            NodeKind::Summary,
            NodeKind::Source,
            NodeKind::OpenQuestion,
        ]
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for NodeKind {
    fn default() -> Self {
        NodeKind::Fact
    }
}

/// A directed, typed relation between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    pub created_at: DateTime<Utc>,
    pub metadata: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    DerivedFrom,
    DependsOn,
    Supersedes,
    RelatesTo,
    ChildOf,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::DerivedFrom => "DERIVED_FROM",
            EdgeKind::DependsOn => "DEPENDS_ON",
            EdgeKind::Supersedes => "SUPERSEDES",
            EdgeKind::RelatesTo => "RELATES_TO",
            EdgeKind::ChildOf => "CHILD_OF",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DERIVED_FROM" => Some(EdgeKind::DerivedFrom),
            "DEPENDS_ON" => Some(EdgeKind::DependsOn),
            "SUPERSEDES" => Some(EdgeKind::Supersedes),
            "RELATES_TO" => Some(EdgeKind::RelatesTo),
            "CHILD_OF" => Some(EdgeKind::ChildOf),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction to read edges from, relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
}

/// A single-key-value scratchpad entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pending {
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// A named `(query, budget)` pair. `default` always exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct View {
    pub name: String,
    pub query: String,
    pub budget: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl View {
    pub fn default_view() -> Self {
        let now = Utc::now();
        View {
            name: "default".to_string(),
            query: String::new(),
            budget: 4000,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Reserved tier tags meaningful to the view composer.
pub fn tier_priority(tags: &[String]) -> u8 {
    if tags.iter().any(|t| t == "tier:pinned") {
        0
    } else if tags.iter().any(|t| t == "tier:reference") {
        1
    } else if tags.iter().any(|t| t == "tier:working") {
        2
    } else {
        3
    }
}

impl Node {
    /// Construct a fresh node, assigning id, timestamps and token estimate.
    /// `content` must already be validated non-empty by the caller (the
    /// Store does this before calling `new`).
    pub fn new(kind: NodeKind, content: String, summary: Option<String>, metadata: String) -> Self {
        let now = Utc::now();
        let token_estimate = estimate_tokens(&content);
        Node {
            id: new_id(),
            kind,
            content,
            summary,
            token_estimate,
            superseded_by: None,
            created_at: now,
            updated_at: now,
            metadata,
            sync_version: 0,
            tags: Vec::new(),
        }
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }
}

impl Edge {
    pub fn new(from_id: String, to_id: String, kind: EdgeKind, metadata: String) -> Self {
        Edge {
            id: new_id(),
            from_id,
            to_id,
            kind,
            created_at: Utc::now(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_priority_orders_reserved_tags() {
        assert_eq!(tier_priority(&["tier:pinned".into()]), 0);
        assert_eq!(tier_priority(&["tier:reference".into()]), 1);
        assert_eq!(tier_priority(&["tier:working".into()]), 2);
        assert_eq!(tier_priority(&["project:acme".into()]), 3);
        assert_eq!(tier_priority(&[]), 3);
    }

    #[test]
    fn node_kind_round_trips_through_str() {
        for kind in NodeKind::all() {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(*kind));
        }
    }
}
