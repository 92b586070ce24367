//! Tag filter expressions
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := not ("and" not)*
//! not     := "not" not | primary
//! primary := "(" expr ")" | "@tag"
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A parsed tag expression such as `@smoke and not (@wip or @flaky)`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TagExpr {
    /// The empty expression; matches every scenario
    #[default]
    All,
    Tag(String),
    Not(Box<TagExpr>),
    And(Box<TagExpr>, Box<TagExpr>),
    Or(Box<TagExpr>, Box<TagExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Not,
    Tag(String),
}

impl TagExpr {
    pub fn parse(expression: &str) -> Result<Self> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Ok(TagExpr::All);
        }

        let mut parser = ExprParser {
            expression,
            tokens,
            pos: 0,
        };
        let expr = parser.or()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Evaluate against a scenario's effective tags
    pub fn matches<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        match self {
            TagExpr::All => true,
            TagExpr::Tag(tag) => tags.iter().any(|t| t.as_ref() == tag),
            TagExpr::Not(inner) => !inner.matches(tags),
            TagExpr::And(a, b) => a.matches(tags) && b.matches(tags),
            TagExpr::Or(a, b) => a.matches(tags) || b.matches(tags),
        }
    }
}

impl FromStr for TagExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TagExpr::parse(s)
    }
}

impl fmt::Display for TagExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagExpr::All => Ok(()),
            TagExpr::Tag(tag) => write!(f, "{}", tag),
            TagExpr::Not(inner) => write!(f, "not ({})", inner),
            TagExpr::And(a, b) => write!(f, "({} and {})", a, b),
            TagExpr::Or(a, b) => write!(f, "({} or {})", a, b),
        }
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let spaced = expression.replace('(', " ( ").replace(')', " ) ");
    spaced
        .split_whitespace()
        .map(|word| match word {
            "(" => Ok(Token::Open),
            ")" => Ok(Token::Close),
            "and" => Ok(Token::And),
            "or" => Ok(Token::Or),
            "not" => Ok(Token::Not),
            tag if tag.starts_with('@') && tag.len() > 1 => Ok(Token::Tag(tag.to_string())),
            other => Err(Error::TagExpression {
                expression: expression.to_string(),
                reason: format!("expected a tag starting with '@', found '{}'", other),
            }),
        })
        .collect()
}

struct ExprParser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser<'_> {
    fn error(&self, reason: &str) -> Error {
        Error::TagExpression {
            expression: self.expression.to_string(),
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn or(&mut self) -> Result<TagExpr> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = TagExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<TagExpr> {
        let mut left = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.not()?;
            left = TagExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<TagExpr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(TagExpr::Not(Box::new(self.not()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<TagExpr> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Tag(tag)) => {
                self.pos += 1;
                Ok(TagExpr::Tag(tag))
            }
            Some(Token::Open) => {
                self.pos += 1;
                let inner = self.or()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(self.error("missing ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(_) => Err(self.error("expected a tag or '('")),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("", &["@any"], true ; "empty matches everything")]
    #[test_case("@smoke", &["@smoke", "@web"], true ; "single tag")]
    #[test_case("@smoke", &["@web"], false ; "missing tag")]
    #[test_case("not @wip", &["@wip"], false ; "negation")]
    #[test_case("@smoke and not @wip", &["@smoke"], true ; "and not")]
    #[test_case("@smoke and not @wip", &["@smoke", "@wip"], false ; "and not excluded")]
    #[test_case("@a or @b and @c", &["@a"], true ; "and binds tighter than or")]
    #[test_case("(@a or @b) and @c", &["@a"], false ; "parentheses")]
    #[test_case("not (@a or @b)", &["@c"], true ; "negated group")]
    fn test_matches(expression: &str, tags: &[&str], expected: bool) {
        let expr = TagExpr::parse(expression).unwrap();
        assert_eq!(expr.matches(tags), expected);
    }

    #[test_case("smoke" ; "tag without at sign")]
    #[test_case("@a and" ; "dangling operator")]
    #[test_case("(@a or @b" ; "unbalanced parenthesis")]
    #[test_case("@a @b" ; "missing operator")]
    fn test_rejects(expression: &str) {
        assert!(matches!(
            TagExpr::parse(expression),
            Err(Error::TagExpression { .. })
        ));
    }

    #[test]
    fn test_display_round_trips_precedence() {
        let expr: TagExpr = "@a or @b and not @c".parse().unwrap();
        assert_eq!(expr.to_string(), "(@a or (@b and not (@c)))");
        assert_eq!(TagExpr::parse(&expr.to_string()).unwrap(), expr);
    }
}
