use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::types::NodeKind;

/// Filter criteria for `list_nodes`.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub kind: Option<NodeKind>,
    pub tag: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub include_superseded: bool,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn since(mut self, time: DateTime<Utc>) -> Self {
        self.since = Some(time);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn include_superseded(mut self) -> Self {
        self.include_superseded = true;
        self
    }
}

/// Aggregate counters backing `GET /api/status`.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub total_nodes: u64,
    pub total_tokens: u64,
    pub total_edges: u64,
    pub unique_tags: u64,
    pub node_counts_by_kind: HashMap<NodeKind, u64>,
}
