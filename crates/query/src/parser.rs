//! Recursive-descent parser.
//!
//! Grammar:
//!
//! ```text
//! expr = term (OR term | '-' term)*
//! term = fact+
//! fact = '(' expr ')' | tag
//! ```
//!
//! Parsing never fails. Unterminated quotes are recovered by the lexer, a
//! missing `)` is tolerated, stray operators are skipped, and tags past
//! the configured limit are silently dropped. The result is `None` when no
//! tag survives, which downstream treats as the match-everything query.

use crate::key::compute_cache_key;
use crate::lexer::{self, Token};
use crate::tree::QueryTree;

/// A parsed, canonicalized query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagQuery {
    root: Option<QueryTree>,
}

impl TagQuery {
    /// Parses a query string. `limit_tags` caps the number of tag leaves;
    /// `None` means unlimited.
    pub fn parse(input: &str, limit_tags: Option<usize>) -> Self {
        let tokens = lexer::tokenize(input);
        let mut parser = Parser { tokens: &tokens, pos: 0, limit: limit_tags, tags_emitted: 0 };
        TagQuery { root: parser.expr() }
    }

    /// The canonicalized tree; `None` for the empty query.
    pub fn root(&self) -> Option<&QueryTree> {
        self.root.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Canonical string form; the empty query renders as the empty string.
    pub fn canonical(&self) -> String {
        self.root.as_ref().map(QueryTree::canonical).unwrap_or_default()
    }

    /// SHA-256 cache key over the canonical form.
    pub fn cache_key(&self) -> String {
        compute_cache_key(&self.canonical())
    }

    /// Tag bind values in placeholder order.
    pub fn bind_values(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.collect_binds(&mut out);
        }
        out
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    limit: Option<usize>,
    tags_emitted: usize,
}

impl Parser<'_> {
    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    /// `expr = term (OR term | '-' term)*`.
    ///
    /// Terms after `OR` accumulate into a union; terms after `-` into an
    /// exclusion list applied to the whole union. Exclusions with no
    /// positive minuend are dropped.
    fn expr(&mut self) -> Option<QueryTree> {
        let mut or_terms = Vec::new();
        let mut minus_terms = Vec::new();

        if let Some(term) = self.term() {
            or_terms.push(term);
        }

        loop {
            match self.current() {
                Some(Token::Word(word)) if word == "OR" => {
                    self.advance();
                    if let Some(term) = self.term() {
                        or_terms.push(term);
                    }
                }
                Some(Token::Minus) => {
                    self.advance();
                    if let Some(term) = self.term() {
                        minus_terms.push(term);
                    }
                }
                _ => break,
            }
        }

        let positive = match or_terms.len() {
            0 => return None,
            1 => or_terms.remove(0),
            _ => QueryTree::or(or_terms),
        };

        if minus_terms.is_empty() {
            Some(positive)
        } else {
            let mut children = vec![positive];
            children.append(&mut minus_terms);
            Some(QueryTree::minus(children))
        }
    }

    /// `term = fact+`; stops before `OR`, `-`, `)` or end of input.
    fn term(&mut self) -> Option<QueryTree> {
        let mut facts = Vec::new();

        loop {
            match self.current() {
                Some(Token::Word(word)) if word == "OR" => break,
                Some(Token::Word(_) | Token::Tag(_) | Token::LParen) => {
                    if let Some(fact) = self.fact() {
                        facts.push(fact);
                    }
                }
                _ => break,
            }
        }

        match facts.len() {
            0 => None,
            1 => Some(facts.remove(0)),
            _ => Some(QueryTree::and(facts)),
        }
    }

    /// `fact = '(' expr ')' | tag`. Only called when the current token can
    /// start a fact, so it always consumes at least one token.
    fn fact(&mut self) -> Option<QueryTree> {
        match self.current() {
            Some(Token::LParen) => {
                self.advance();
                let inner = self.expr();
                if matches!(self.current(), Some(Token::RParen)) {
                    self.advance();
                }
                inner.map(QueryTree::paren)
            }
            Some(Token::Tag(text) | Token::Word(text)) => {
                let value = text.clone();
                self.advance();
                if self.limit.is_some_and(|limit| self.tags_emitted >= limit) {
                    return None;
                }
                self.tags_emitted += 1;
                Some(QueryTree::tag(value))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> TagQuery {
        TagQuery::parse(input, None)
    }

    #[test]
    fn empty_query() {
        let query = parse("");
        assert!(query.is_empty());
        assert_eq!(query.canonical(), "");
        assert!(query.bind_values().is_empty());
    }

    #[test]
    fn single_tag() {
        let query = parse("rust");
        assert_eq!(query.root(), Some(&QueryTree::tag("RUST")));
        assert_eq!(query.canonical(), "\"RUST\"");
    }

    #[test]
    fn juxtaposition_is_and() {
        let query = parse("foo bar");
        assert_eq!(query.canonical(), "\"BAR\" \"FOO\"");
        assert_eq!(query.bind_values(), vec!["BAR", "FOO"]);
    }

    #[test]
    fn or_with_duplicates() {
        let query = parse("a OR b OR a");
        assert_eq!(query.canonical(), "\"A\"OR\"A\"OR\"B\"");
    }

    #[test]
    fn exclusions_fold_into_minus() {
        let query = parse("a -b -c");
        assert_eq!(query.canonical(), "\"A\"-\"B\"-\"C\"");
        assert_eq!(query.bind_values(), vec!["A", "B", "C"]);
    }

    #[test]
    fn grouped_or_under_and() {
        let query = parse("(a OR b) c");
        assert_eq!(query.canonical(), "(\"A\"OR\"B\") \"C\"");
    }

    #[test]
    fn escaped_quote_literal() {
        let query = parse("\"ab\"\"cd\"");
        assert_eq!(query.root(), Some(&QueryTree::tag("AB\"CD")));
        assert_eq!(query.canonical(), "\"AB\"\"CD\"");
    }

    #[test]
    fn quoted_or_is_a_literal_tag() {
        let query = parse("a \"OR\" b");
        assert_eq!(query.canonical(), "\"A\" \"B\" \"OR\"");
    }

    #[test]
    fn missing_close_paren_is_tolerated() {
        assert_eq!(parse("(a b").canonical(), parse("(a b)").canonical());
    }

    #[test]
    fn stray_operators_are_skipped() {
        assert_eq!(parse("a OR OR b").canonical(), parse("a OR b").canonical());
        assert_eq!(parse("a - - b").canonical(), parse("a -b").canonical());
    }

    #[test]
    fn exclusion_without_minuend_is_dropped() {
        let query = parse("-a");
        assert!(query.is_empty());
    }

    #[test]
    fn redundant_parens_share_canonical_form() {
        let expected = parse("a b c").canonical();
        for input in ["(a b) c", "a (b c)", "a (b (c))"] {
            assert_eq!(parse(input).canonical(), expected, "input: {input}");
        }
    }

    #[test]
    fn or_permutations_share_cache_key() {
        let key = parse("a OR b OR c").cache_key();
        for input in ["b OR a OR c", "c OR b OR a", "(a OR b) OR c"] {
            assert_eq!(parse(input).cache_key(), key, "input: {input}");
        }
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let inputs = [
            "foo bar",
            "a OR b OR a",
            "a -b -c",
            "(a OR b) c",
            "a (b OR c) -d",
            "\"ab\"\"cd\" x",
            "((a b) OR c) -d -e",
        ];
        for input in inputs {
            let once = parse(input);
            let twice = TagQuery::parse(&once.canonical(), None);
            assert_eq!(once, twice, "input: {input}");
            assert_eq!(once.canonical(), twice.canonical(), "input: {input}");
        }
    }

    #[test]
    fn tag_limit_drops_excess() {
        let query = TagQuery::parse("a b c d e", Some(3));
        assert_eq!(query.bind_values().len(), 3);
        assert_eq!(query.canonical(), "\"A\" \"B\" \"C\"");
    }

    #[test]
    fn tag_limit_zero_means_everything_dropped() {
        let query = TagQuery::parse("a b", Some(0));
        assert!(query.is_empty());
    }

    #[test]
    fn limit_counts_tags_inside_groups() {
        let query = TagQuery::parse("(a b) c", Some(2));
        assert_eq!(query.bind_values(), vec!["A", "B"]);
    }
}
