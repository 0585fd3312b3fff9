/// Parsed query language AST.

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Predicate(Predicate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Type,
    Tag,
    Created,
    Updated,
    Tokens,
    Has,
    From,
    To,
}

impl Key {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "type" => Some(Key::Type),
            "tag" => Some(Key::Tag),
            "created" => Some(Key::Created),
            "updated" => Some(Key::Updated),
            "tokens" => Some(Key::Tokens),
            "has" => Some(Key::Has),
            "from" => Some(Key::From),
            "to" => Some(Key::To),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub key: Key,
    pub op: Option<Op>,
    pub value: String,
}

/// A parsed query, ready to evaluate against a `Store`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub expr: Option<Expr>,
}

impl Query {
    /// The empty query (matches all non-superseded nodes).
    pub fn empty() -> Self {
        Query { expr: None }
    }
}
