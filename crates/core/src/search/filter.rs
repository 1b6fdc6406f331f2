//! Metadata filter expressions for search and listing.
//!
//! A filter is a boolean expression over equality predicates:
//!
//! ```text
//! expr    := and ( ("OR" | "||") and )*
//! and     := primary ( ("AND" | "&&") primary )*
//! primary := "(" expr ")" | field ("==" | "!=") literal
//! literal := 'str' | "str" | integer | float | true | false
//! ```
//!
//! Keywords are case-insensitive. A predicate on a field the record does not
//! carry evaluates to `false` for both operators.

use crate::error::{Error, Result};
use crate::record::MetadataValue;
use std::collections::HashMap;

/// Comparison operator of a single predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Compare {
        field: String,
        op: CompareOp,
        value: MetadataValue,
    },
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

impl FilterExpr {
    /// Parse a filter string. Errors are reported as `Validation`.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = lex(input)?;
        if tokens.is_empty() {
            return Err(Error::validation("invalid filter: empty expression"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::validation(format!(
                "invalid filter: unexpected {tok:?} at token {}",
                parser.pos
            )));
        }
        Ok(expr)
    }

    /// Evaluate against a record's metadata.
    pub fn matches(&self, metadata: &HashMap<String, MetadataValue>) -> bool {
        match self {
            FilterExpr::And(a, b) => a.matches(metadata) && b.matches(metadata),
            FilterExpr::Or(a, b) => a.matches(metadata) || b.matches(metadata),
            FilterExpr::Compare { field, op, value } => match metadata.get(field) {
                None => false,
                Some(actual) => {
                    let eq = values_equal(actual, value);
                    match op {
                        CompareOp::Eq => eq,
                        CompareOp::Ne => !eq,
                    }
                }
            },
        }
    }
}

/// Integer and float compare numerically; other variants only match their own kind.
fn values_equal(a: &MetadataValue, b: &MetadataValue) -> bool {
    match (a, b) {
        (MetadataValue::String(x), MetadataValue::String(y)) => x == y,
        (MetadataValue::Boolean(x), MetadataValue::Boolean(y)) => x == y,
        (MetadataValue::Integer(x), MetadataValue::Integer(y)) => x == y,
        (MetadataValue::Float(x), MetadataValue::Float(y)) => x == y,
        (MetadataValue::Integer(i), MetadataValue::Float(f))
        | (MetadataValue::Float(f), MetadataValue::Integer(i)) => *i as f64 == *f,
        _ => false,
    }
}

// ── Lexer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(MetadataValue),
    Eq,
    Ne,
    And,
    Or,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' | '!' | '&' | '|' => {
                let next = chars.get(i + 1).copied();
                let tok = match (c, next) {
                    ('=', Some('=')) => Token::Eq,
                    ('!', Some('=')) => Token::Ne,
                    ('&', Some('&')) => Token::And,
                    ('|', Some('|')) => Token::Or,
                    _ => {
                        return Err(Error::validation(format!(
                            "invalid filter: unexpected '{c}' at offset {i}"
                        )))
                    }
                };
                tokens.push(tok);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(Error::validation("invalid filter: unterminated string")),
                        Some('\\') if i + 1 < chars.len() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(MetadataValue::String(s)));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || matches!(chars[i], '.' | 'e' | 'E')
                        || (matches!(chars[i], '-' | '+') && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Literal(parse_number(&text)?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let tok = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "true" => Token::Literal(MetadataValue::Boolean(true)),
                    "false" => Token::Literal(MetadataValue::Boolean(false)),
                    _ => Token::Ident(word),
                };
                tokens.push(tok);
            }
            _ => {
                return Err(Error::validation(format!(
                    "invalid filter: unexpected '{c}' at offset {i}"
                )))
            }
        }
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Result<MetadataValue> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(MetadataValue::Integer(i));
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(MetadataValue::Float(f)),
        _ => Err(Error::validation(format!("invalid filter: bad number '{text}'"))),
    }
}

// ── Parser ─────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn parse_or(&mut self) -> Result<FilterExpr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpr> {
        let mut left = self.parse_primary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_primary()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<FilterExpr> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::validation("invalid filter: missing ')'")),
                }
            }
            Some(Token::Ident(field)) => {
                let op = match self.next() {
                    Some(Token::Eq) => CompareOp::Eq,
                    Some(Token::Ne) => CompareOp::Ne,
                    other => {
                        return Err(Error::validation(format!(
                            "invalid filter: expected '==' or '!=' after '{field}', got {other:?}"
                        )))
                    }
                };
                match self.next() {
                    Some(Token::Literal(value)) => Ok(FilterExpr::Compare { field, op, value }),
                    other => Err(Error::validation(format!(
                        "invalid filter: expected literal after '{field}', got {other:?}"
                    ))),
                }
            }
            other => Err(Error::validation(format!(
                "invalid filter: expected field or '(', got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn meta(pairs: Vec<(&str, MetadataValue)>) -> HashMap<String, MetadataValue> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn s(v: &str) -> MetadataValue {
        MetadataValue::String(v.to_string())
    }

    // ── Parsing ────────────────────────────────────────────────────────

    #[test]
    fn test_parse_single_predicate() {
        let f = FilterExpr::parse("meta == 'first'").unwrap();
        assert_eq!(
            f,
            FilterExpr::Compare {
                field: "meta".into(),
                op: CompareOp::Eq,
                value: s("first"),
            }
        );
    }

    #[test]
    fn test_parse_literals() {
        let cases = [
            ("n == 42", MetadataValue::Integer(42)),
            ("n == -7", MetadataValue::Integer(-7)),
            ("n == 2.5", MetadataValue::Float(2.5)),
            ("n == 1e3", MetadataValue::Float(1000.0)),
            ("n == TRUE", MetadataValue::Boolean(true)),
            ("n == \"dq\"", s("dq")),
            ("n == 'it\\'s'", s("it's")),
        ];
        for (input, expected) in cases {
            match FilterExpr::parse(input).unwrap() {
                FilterExpr::Compare { value, .. } => assert_eq!(value, expected, "{input}"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let f = FilterExpr::parse("a == 1 OR b == 2 AND c == 3").unwrap();
        assert!(matches!(f, FilterExpr::Or(_, ref rhs) if matches!(**rhs, FilterExpr::And(_, _))));
    }

    #[test]
    fn test_parse_errors_are_validation() {
        for bad in ["", "meta", "meta ==", "meta = 'x'", "(a == 1", "a == 1 b == 2", "a == 'x"] {
            let err = FilterExpr::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{bad}");
        }
    }

    // ── Evaluation ─────────────────────────────────────────────────────

    #[test]
    fn test_or_matches_either_side() {
        let f = FilterExpr::parse("meta == 'first' OR meta == 'second'").unwrap();
        assert!(f.matches(&meta(vec![("meta", s("first"))])));
        assert!(f.matches(&meta(vec![("meta", s("second"))])));
        assert!(!f.matches(&meta(vec![("meta", s("third"))])));
    }

    #[test]
    fn test_symbolic_combinators_and_parens() {
        let f = FilterExpr::parse("(kind == 'a' || kind == 'b') && live != false").unwrap();
        let m = meta(vec![("kind", s("b")), ("live", MetadataValue::Boolean(true))]);
        assert!(f.matches(&m));
        let m = meta(vec![("kind", s("b")), ("live", MetadataValue::Boolean(false))]);
        assert!(!f.matches(&m));
    }

    #[test]
    fn test_numeric_cross_type_equality() {
        let f = FilterExpr::parse("n == 3").unwrap();
        assert!(f.matches(&meta(vec![("n", MetadataValue::Float(3.0))])));
        assert!(!f.matches(&meta(vec![("n", s("3"))])));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let eq = FilterExpr::parse("x == 1").unwrap();
        let ne = FilterExpr::parse("x != 1").unwrap();
        let empty = HashMap::new();
        assert!(!eq.matches(&empty));
        assert!(!ne.matches(&empty));
    }
}
