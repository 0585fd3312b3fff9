use crate::query::ast::{Expr, Key, Op, Predicate, Query};
use crate::query::lexer::{tokenize, Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at byte {})", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

pub fn parse_query(input: &str) -> Result<Query, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Query::empty());
    }

    let tokens = tokenize(input);
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    parser.expect_eof()?;
    Ok(Query { expr: Some(expr) })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        match &self.peek().kind {
            TokenKind::Eof => Ok(()),
            TokenKind::RParen => Err(ParseError {
                message: "unbalanced parentheses: unexpected ')'".to_string(),
                position: self.peek().pos,
            }),
            other => Err(ParseError {
                message: format!("unexpected token {other:?}"),
                position: self.peek().pos,
            }),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            match &self.peek().kind {
                TokenKind::And => {
                    self.advance();
                    let right = self.parse_term()?;
                    left = Expr::And(Box::new(left), Box::new(right));
                }
                TokenKind::Or => {
                    self.advance();
                    let right = self.parse_term()?;
                    left = Expr::Or(Box::new(left), Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek().kind, TokenKind::Not) {
            self.advance();
            let inner = self.parse_factor()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_factor()
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                match self.peek().kind {
                    TokenKind::RParen => {
                        self.advance();
                        Ok(inner)
                    }
                    _ => Err(ParseError {
                        message: "unbalanced parentheses: missing ')'".to_string(),
                        position: self.peek().pos,
                    }),
                }
            }
            TokenKind::Word(word) => {
                let pos = self.peek().pos;
                self.advance();
                parse_predicate(&word, pos)
            }
            TokenKind::Eof => Err(ParseError {
                message: "unexpected end of query".to_string(),
                position: self.peek().pos,
            }),
            other => Err(ParseError {
                message: format!("unexpected token {other:?}"),
                position: self.peek().pos,
            }),
        }
    }
}

fn parse_predicate(word: &str, pos: usize) -> Result<Expr, ParseError> {
    let Some((key_str, rest)) = word.split_once(':') else {
        return Err(ParseError {
            message: format!("'{word}' is not a valid predicate (expected key:value)"),
            position: pos,
        });
    };

    let key = Key::parse(key_str).ok_or_else(|| ParseError {
        message: format!("unknown query key '{key_str}'"),
        position: pos,
    })?;

    if rest.is_empty() {
        return Err(ParseError {
            message: format!("predicate '{key_str}' is missing a value"),
            position: pos,
        });
    }

    let (op, value) = strip_op(rest);
    if value.is_empty() {
        return Err(ParseError {
            message: format!("predicate '{key_str}' is missing a value"),
            position: pos,
        });
    }

    Ok(Expr::Predicate(Predicate {
        key,
        op,
        value: value.to_string(),
    }))
}

fn strip_op(rest: &str) -> (Option<Op>, &str) {
    if let Some(v) = rest.strip_prefix(">=") {
        (Some(Op::Gte), v)
    } else if let Some(v) = rest.strip_prefix("<=") {
        (Some(Op::Lte), v)
    } else if let Some(v) = rest.strip_prefix('>') {
        (Some(Op::Gt), v)
    } else if let Some(v) = rest.strip_prefix('<') {
        (Some(Op::Lt), v)
    } else {
        (None, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_parses_to_none() {
        assert_eq!(parse_query("").unwrap(), Query::empty());
        assert_eq!(parse_query("   ").unwrap(), Query::empty());
    }

    #[test]
    fn and_or_are_left_associative() {
        let q = parse_query("tag:a AND tag:b OR tag:c").unwrap();
        match q.expr.unwrap() {
            Expr::Or(left, _) => assert!(matches!(*left, Expr::And(_, _))),
            other => panic!("expected Or at top level, got {other:?}"),
        }
    }

    #[test]
    fn parens_override_precedence() {
        let q = parse_query("tag:a AND (tag:b OR tag:c)").unwrap();
        match q.expr.unwrap() {
            Expr::And(_, right) => assert!(matches!(*right, Expr::Or(_, _))),
            other => panic!("expected And at top level, got {other:?}"),
        }
    }

    #[test]
    fn unknown_key_is_a_parse_error() {
        let err = parse_query("bogus:value").unwrap_err();
        assert!(err.message.contains("unknown query key"));
    }

    #[test]
    fn unbalanced_parens_is_a_parse_error() {
        assert!(parse_query("(tag:a AND tag:b").is_err());
        assert!(parse_query("tag:a)").is_err());
    }

    #[test]
    fn missing_value_is_a_parse_error() {
        assert!(parse_query("tag:").is_err());
    }

    #[test]
    fn colon_joined_value_is_preserved() {
        let q = parse_query("tag:project:acme").unwrap();
        match q.expr.unwrap() {
            Expr::Predicate(p) => assert_eq!(p.value, "project:acme"),
            other => panic!("expected predicate, got {other:?}"),
        }
    }

    #[test]
    fn comparison_operator_is_parsed() {
        let q = parse_query("tokens:>=100").unwrap();
        match q.expr.unwrap() {
            Expr::Predicate(p) => {
                assert_eq!(p.op, Some(Op::Gte));
                assert_eq!(p.value, "100");
            }
            other => panic!("expected predicate, got {other:?}"),
        }
    }
}
