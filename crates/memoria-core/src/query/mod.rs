//! Query DSL: lexer, recursive-descent parser, AST and a `Store`-backed
//! evaluator.

mod ast;
mod eval;
mod lexer;
mod parser;

pub use ast::{Expr, Key, Op, Predicate, Query};
pub use parser::{parse_query, ParseError};

#[cfg(test)]
mod proptests {
    use super::parse_query;
    use proptest::prelude::*;

    proptest! {
        // Any input — valid or garbage — must return a ParseError rather
        // than panic.
        #[test]
        fn parser_never_panics(input in "\\PC{0,80}") {
            let _ = parse_query(&input);
        }

        #[test]
        fn balanced_predicate_soup_never_panics(
            words in prop::collection::vec("[a-z]{1,6}:[a-z0-9]{1,6}", 0..8),
            joiners in prop::collection::vec(prop::sample::select(vec!["AND", "OR"]), 0..8),
        ) {
            let mut query = String::new();
            for (i, word) in words.iter().enumerate() {
                if i > 0 {
                    if let Some(j) = joiners.get(i - 1) {
                        query.push_str(j);
                        query.push(' ');
                    }
                }
                query.push_str(word);
                query.push(' ');
            }
            let _ = parse_query(&query);
        }
    }
}
