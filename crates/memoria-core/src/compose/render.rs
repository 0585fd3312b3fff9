//! Rendering for composed views: `render_text`, `render_markdown`,
//! `render_template`.

use crate::compose::engine::{ComposeResult, ComposedNode};
use crate::types::NodeKind;

const PREVIEW_CHARS: usize = 80;

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}

fn body_preview(node: &ComposedNode) -> String {
    truncate(&node.node.content, PREVIEW_CHARS)
}

fn tier_name(tier: u8) -> &'static str {
    match tier {
        0 => "pinned",
        1 => "reference",
        2 => "working",
        _ => "other",
    }
}

/// One line per node: `id [kind] preview`.
pub fn render_text(result: &ComposeResult) -> String {
    result
        .nodes
        .iter()
        .map(|n| format!("{} [{}] {}", n.node.id, n.node.kind, body_preview(n)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Commented header, usage primer, optional reference-availability line,
/// then sections grouped by tier then kind.
pub fn render_markdown(result: &ComposeResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "<!-- ctx: {} nodes, {} tokens, rendered at {} -->\n\n",
        result.nodes.len(),
        result.total_tokens,
        result.generated_at.to_rfc3339()
    ));
    out.push_str(
        "_This context was assembled automatically; it may be incomplete. \
         Prefer querying for more detail over assuming absence means non-existence._\n\n",
    );

    if let Some(stats) = &result.reference_stats {
        out.push_str(&format!(
            "Reference material available: {} node(s) tagged `tier:reference`.\n\n",
            stats.total
        ));
    }

    for section in group_by_tier_then_kind(&result.nodes) {
        out.push_str(&format!("## {}\n\n", tier_name(section.tier)));
        for (kind, nodes) in section.by_kind {
            out.push_str(&format!("### {kind}\n\n"));
            for node in nodes {
                out.push_str(&format!("- `{}` {}\n", node.node.id, body_preview(node)));
            }
            out.push('\n');
        }
    }

    if result.skipped > 0 {
        out.push_str(&format!(
            "_{} additional node(s) omitted to stay within the {}-token budget._\n",
            result.skipped, result.budget
        ));
    }

    out
}

struct TierSection<'a> {
    tier: u8,
    by_kind: Vec<(NodeKind, Vec<&'a ComposedNode>)>,
}

fn group_by_tier_then_kind(nodes: &[ComposedNode]) -> Vec<TierSection<'_>> {
    let mut sections: Vec<TierSection> = Vec::new();
    for node in nodes {
        let section = match sections.iter_mut().find(|s| s.tier == node.tier) {
            Some(s) => s,
            None => {
                sections.push(TierSection {
                    tier: node.tier,
                    by_kind: Vec::new(),
                });
                sections.last_mut().unwrap()
            }
        };
        match section.by_kind.iter_mut().find(|(k, _)| *k == node.node.kind) {
            Some((_, nodes)) => nodes.push(node),
            None => section.by_kind.push((node.node.kind, vec![node])),
        }
    }
    sections
}

/// `default` and `document` layouts. `document` additionally appends an
/// edge-summary section (`from → EDGE_TYPE → to`).
pub fn render_template(result: &ComposeResult, name: &str) -> Result<String, String> {
    match name {
        "default" => Ok(render_markdown(result)),
        "document" => {
            let mut out = render_markdown(result);
            if !result.edges.is_empty() {
                out.push_str("\n## Relations\n\n");
                for edge in &result.edges {
                    out.push_str(&format!(
                        "- {} → {} → {}\n",
                        edge.from_id, edge.kind, edge.to_id
                    ));
                }
            }
            Ok(out)
        }
        other => Err(format!("unknown template '{other}' — expected 'default' or 'document'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::engine::ComposeRequest;
    use crate::storage::{CreateNode, RedbStore, Store};
    use crate::types::NodeKind;
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample_result() -> ComposeResult {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(dir.path().join("t.redb")).unwrap();
        let node = store
            .create_node(CreateNode {
                kind: NodeKind::Fact,
                content: "The sky is blue".to_string(),
                summary: None,
                metadata: None,
                tags: vec!["tier:pinned".to_string()],
            })
            .unwrap();
        ComposeResult {
            nodes: vec![crate::compose::engine::ComposedNode { node, tier: 0 }],
            edges: vec![],
            reference_stats: None,
            total_tokens: 3,
            budget: 4000,
            skipped: 0,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn render_text_is_one_line_per_node() {
        let result = sample_result();
        let text = render_text(&result);
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("The sky is blue"));
    }

    #[test]
    fn render_markdown_includes_header_and_section() {
        let result = sample_result();
        let md = render_markdown(&result);
        assert!(md.starts_with("<!-- ctx: 1 nodes, 3 tokens"));
        assert!(md.contains("## pinned"));
    }

    #[test]
    fn render_template_rejects_unknown_name() {
        let result = sample_result();
        assert!(render_template(&result, "bogus").is_err());
    }

    #[test]
    fn long_content_is_truncated_in_preview() {
        assert_eq!(truncate(&"x".repeat(200), 80).chars().count(), 80);
    }

    #[test]
    fn seed_compose_request_shape_compiles() {
        let _ = ComposeRequest {
            seed: Some("abc".to_string()),
            seed_depth: 2,
            ..Default::default()
        };
    }
}
