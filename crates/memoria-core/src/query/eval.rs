use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::query::ast::{Expr, Key, Op, Predicate, Query};
use crate::storage::{NodeFilter, Store};
use crate::types::{Direction, Node};

impl Query {
    /// Runs this query against `store`, returning matching nodes.
    /// `include_superseded` mirrors the corresponding filter flag; when
    /// false the evaluator implicitly conjoins `superseded_by IS NULL`.
    pub fn execute(&self, store: &dyn Store, include_superseded: bool) -> Result<Vec<Node>> {
        let mut filter = NodeFilter::new();
        if include_superseded {
            filter = filter.include_superseded();
        }
        let candidates = store.list_nodes(filter)?;

        let Some(expr) = &self.expr else {
            return Ok(candidates);
        };

        let mut matched = Vec::new();
        for node in candidates {
            if eval_expr(expr, &node, store)? {
                matched.push(node);
            }
        }
        Ok(matched)
    }
}

fn eval_expr(expr: &Expr, node: &Node, store: &dyn Store) -> Result<bool> {
    match expr {
        Expr::And(l, r) => Ok(eval_expr(l, node, store)? && eval_expr(r, node, store)?),
        Expr::Or(l, r) => Ok(eval_expr(l, node, store)? || eval_expr(r, node, store)?),
        Expr::Not(inner) => Ok(!eval_expr(inner, node, store)?),
        Expr::Predicate(p) => eval_predicate(p, node, store),
    }
}

fn eval_predicate(p: &Predicate, node: &Node, store: &dyn Store) -> Result<bool> {
    match p.key {
        Key::Type => Ok(node.kind.as_str().eq_ignore_ascii_case(&p.value)),
        Key::Tag => Ok(node.tags.iter().any(|t| t == &p.value)),
        Key::Created => compare_timestamp(node.created_at, p.op, &p.value),
        Key::Updated => compare_timestamp(node.updated_at, p.op, &p.value),
        Key::Tokens => compare_tokens(node.token_estimate, p.op, &p.value),
        Key::Has => eval_has(p, node, store),
        Key::From => {
            let edges = store.get_edges(&p.value, Direction::Out)?;
            Ok(edges.iter().any(|e| e.to_id == node.id))
        }
        Key::To => {
            let edges = store.get_edges(&p.value, Direction::In)?;
            Ok(edges.iter().any(|e| e.from_id == node.id))
        }
    }
}

fn eval_has(p: &Predicate, node: &Node, store: &dyn Store) -> Result<bool> {
    match p.value.as_str() {
        "summary" => Ok(node.summary.is_some()),
        "edges" => Ok(!store.get_edges(&node.id, Direction::Both)?.is_empty()),
        other => Err(Error::InvalidInput(format!(
            "unknown has:{other} — expected 'summary' or 'edges'"
        ))),
    }
}

fn compare_tokens(token_estimate: u32, op: Option<Op>, value: &str) -> Result<bool> {
    let n: i64 = value
        .parse()
        .map_err(|_| Error::InvalidInput(format!("'{value}' is not a valid integer")))?;
    let lhs = token_estimate as i64;
    Ok(match op.unwrap_or(Op::Gt) {
        Op::Gt => lhs > n,
        Op::Lt => lhs < n,
        Op::Gte => lhs >= n,
        Op::Lte => lhs <= n,
    })
}

fn compare_timestamp(ts: DateTime<Utc>, op: Option<Op>, value: &str) -> Result<bool> {
    let threshold = parse_timestamp_value(value)?;
    Ok(match op.unwrap_or(Op::Gt) {
        Op::Gt => ts > threshold,
        Op::Lt => ts < threshold,
        Op::Gte => ts >= threshold,
        Op::Lte => ts <= threshold,
    })
}

/// Either an absolute `YYYY-MM-DD` date, or a relative duration (`7d`, `3w`,
/// a simple Go-style run like `1h30m`) measured back from now.
fn parse_timestamp_value(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(Utc
            .from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
    }

    if let Some(duration) = parse_duration(value) {
        return Ok(Utc::now() - duration);
    }

    Err(Error::InvalidInput(format!(
        "'{value}' is not a valid date (YYYY-MM-DD) or duration (e.g. 7d, 3w, 1h30m)"
    )))
}

/// Parses a sequence of `<number><unit>` pairs (units: w, d, h, m, s),
/// e.g. `7d`, `3w`, `1h30m`. Returns `None` if the string doesn't fully
/// match that shape.
fn parse_duration(value: &str) -> Option<chrono::Duration> {
    if value.is_empty() {
        return None;
    }
    let mut total = chrono::Duration::zero();
    let chars: Vec<char> = value.chars().collect();
    let mut i = 0;
    let mut consumed_any = false;

    while i < chars.len() {
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return None;
        }
        let n: i64 = chars[start..i].iter().collect::<String>().parse().ok()?;
        if i >= chars.len() {
            return None;
        }
        let unit = chars[i];
        i += 1;
        let part = match unit {
            'w' => chrono::Duration::weeks(n),
            'd' => chrono::Duration::days(n),
            'h' => chrono::Duration::hours(n),
            'm' => chrono::Duration::minutes(n),
            's' => chrono::Duration::seconds(n),
            _ => return None,
        };
        total = total + part;
        consumed_any = true;
    }

    if consumed_any {
        Some(total)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_duration_parses_days_and_weeks() {
        assert_eq!(parse_duration("7d"), Some(chrono::Duration::days(7)));
        assert_eq!(parse_duration("3w"), Some(chrono::Duration::weeks(3)));
        assert_eq!(
            parse_duration("1h30m"),
            Some(chrono::Duration::hours(1) + chrono::Duration::minutes(30))
        );
        assert_eq!(parse_duration("not-a-duration"), None);
    }

    #[test]
    fn token_comparison_defaults_to_greater_than() {
        assert!(compare_tokens(10, None, "5").unwrap());
        assert!(!compare_tokens(10, None, "10").unwrap());
        assert!(compare_tokens(10, Some(Op::Gte), "10").unwrap());
    }
}
