//! Step expressions
//!
//! Compiles templates such as `I have {int} cucumber(s) in my belly/stomach`
//! into anchored regexes. Supported syntax:
//!
//! - `{type}` and `{name:type}` placeholders, `{}` for anything
//! - `(text)` optional text
//! - `a/b` alternation between adjacent words
//! - `\{`, `\(`, `\/`, `\\` escapes
//!
//! Templates that both start with `^` and end with `$` are taken as raw
//! regexes; each capture group becomes an anonymous placeholder. Anything
//! else is an expression, where `^` and `$` are literal text.

use regex::Regex;

use crate::error::{Error, Result};
use crate::params::ParameterTypes;

/// A typed slot in a compiled pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: Option<String>,
    /// Parameter type name; empty for `{}` and raw regex groups
    pub type_name: String,
    group: usize,
}

/// A compiled step pattern
#[derive(Debug, Clone)]
pub struct StepPattern {
    source: String,
    regex: Regex,
    placeholders: Vec<Placeholder>,
    key: String,
    sample: Option<String>,
}

#[derive(Debug)]
enum Token {
    Text(String),
    Space,
    Param {
        name: Option<String>,
        type_name: String,
    },
    Optional(String),
    Slash,
}

#[derive(Debug)]
enum Part {
    Text(String),
    Space,
    Param {
        name: Option<String>,
        type_name: String,
    },
    Optional(String),
    Alternation(Vec<String>),
}

impl StepPattern {
    pub fn compile(source: &str, types: &ParameterTypes) -> Result<Self> {
        if source.starts_with('^') && source.ends_with('$') {
            return Self::compile_regex(source);
        }

        let parts = group_alternations(source, tokenize(source)?)?;

        let mut regex = String::from("^");
        let mut key = String::new();
        let mut sample = Some(String::new());
        let mut placeholders = Vec::new();
        let mut group = 1;

        for part in parts {
            match part {
                Part::Text(text) => {
                    regex.push_str(&regex::escape(&text));
                    key.push_str(&escape_key(&text));
                    push_sample(&mut sample, &text);
                }
                Part::Space => {
                    regex.push(' ');
                    key.push(' ');
                    push_sample(&mut sample, " ");
                }
                Part::Optional(text) => {
                    regex.push_str(&format!("(?:{})?", regex::escape(&text)));
                    key.push_str(&format!("({})", escape_key(&text)));
                }
                Part::Alternation(alternatives) => {
                    let escaped: Vec<String> = alternatives.iter().map(|a| regex::escape(a)).collect();
                    regex.push_str(&format!("(?:{})", escaped.join("|")));
                    let keyed: Vec<String> = alternatives.iter().map(|a| escape_key(a)).collect();
                    key.push_str(&keyed.join("/"));
                    push_sample(&mut sample, &alternatives[0]);
                }
                Part::Param { name, type_name } => {
                    let param = types
                        .get(&type_name)
                        .ok_or_else(|| Error::UnknownParameterType(type_name.clone()))?;
                    let inner_groups = Regex::new(param.regex())?.captures_len() - 1;

                    regex.push('(');
                    regex.push_str(param.regex());
                    regex.push(')');
                    key.push_str(&format!("{{{}}}", type_name));
                    match param.sample() {
                        Some(s) => push_sample(&mut sample, s),
                        None => sample = None,
                    }

                    placeholders.push(Placeholder {
                        name,
                        type_name,
                        group,
                    });
                    group += 1 + inner_groups;
                }
            }
        }
        regex.push('$');

        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(&regex)?,
            placeholders,
            key,
            sample,
        })
    }

    fn compile_regex(source: &str) -> Result<Self> {
        let regex = Regex::new(source)?;
        let placeholders = regex
            .capture_names()
            .enumerate()
            .skip(1)
            .map(|(group, name)| Placeholder {
                name: name.map(str::to_string),
                type_name: String::new(),
                group,
            })
            .collect();

        Ok(Self {
            source: source.to_string(),
            regex,
            placeholders,
            key: source.to_string(),
            sample: None,
        })
    }

    /// Raw placeholder substrings in left-to-right order, or `None` when the
    /// line does not match. Raw regex groups that did not participate
    /// capture the empty string.
    pub fn captures(&self, text: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(text)?;
        Some(
            self.placeholders
                .iter()
                .map(|p| {
                    caps.get(p.group)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default()
                })
                .collect(),
        )
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Equivalence key: the template with placeholder names dropped and
    /// whitespace collapsed
    pub fn key(&self) -> &str {
        &self.key
    }

    /// A line this pattern accepts, when every placeholder type has a sample
    pub fn sample(&self) -> Option<&str> {
        self.sample.as_deref()
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

fn invalid(source: &str, reason: &str) -> Error {
    Error::InvalidPattern {
        pattern: source.to_string(),
        reason: reason.to_string(),
    }
}

fn push_sample(sample: &mut Option<String>, text: &str) {
    if let Some(s) = sample.as_mut() {
        s.push_str(text);
    }
}

fn escape_key(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '{' | '}' | '(' | ')' | '/' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn flush(text: &mut String, tokens: &mut Vec<Token>) {
    if !text.is_empty() {
        tokens.push(Token::Text(std::mem::take(text)));
    }
}

fn read_until<I>(chars: &mut I, close: char, source: &str) -> Result<String>
where
    I: Iterator<Item = char>,
{
    let mut body = String::new();
    while let Some(c) = chars.next() {
        match c {
            c if c == close => return Ok(body),
            '\\' => match chars.next() {
                Some(next) => body.push(next),
                None => return Err(invalid(source, "trailing backslash")),
            },
            '{' | '}' | '(' | ')' => {
                return Err(invalid(source, "placeholders and optional text cannot be nested"))
            }
            _ => body.push(c),
        }
    }
    Err(invalid(source, &format!("missing '{}'", close)))
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut chars = source.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => text.push(next),
                None => return Err(invalid(source, "trailing backslash")),
            },
            '{' => {
                flush(&mut text, &mut tokens);
                let body = read_until(&mut chars, '}', source)?;
                let (name, type_name) = match body.split_once(':') {
                    Some((name, type_name)) => {
                        let name = name.trim();
                        if name.is_empty() {
                            return Err(invalid(source, "placeholder name cannot be empty"));
                        }
                        (Some(name.to_string()), type_name.trim().to_string())
                    }
                    None => (None, body.trim().to_string()),
                };
                tokens.push(Token::Param { name, type_name });
            }
            '(' => {
                flush(&mut text, &mut tokens);
                let body = read_until(&mut chars, ')', source)?;
                if body.is_empty() {
                    return Err(invalid(source, "optional text cannot be empty"));
                }
                tokens.push(Token::Optional(body));
            }
            '/' => {
                flush(&mut text, &mut tokens);
                tokens.push(Token::Slash);
            }
            '}' | ')' => return Err(invalid(source, &format!("unbalanced '{}'", c))),
            c if c.is_whitespace() => {
                flush(&mut text, &mut tokens);
                if !matches!(tokens.last(), Some(Token::Space)) {
                    tokens.push(Token::Space);
                }
            }
            _ => text.push(c),
        }
    }
    flush(&mut text, &mut tokens);
    Ok(tokens)
}

fn group_alternations(source: &str, tokens: Vec<Token>) -> Result<Vec<Part>> {
    let mut parts: Vec<Part> = Vec::new();
    let mut tokens = tokens.into_iter();

    while let Some(token) = tokens.next() {
        match token {
            Token::Slash => {
                let right = match tokens.next() {
                    Some(Token::Text(text)) => text,
                    _ => return Err(invalid(source, "alternation needs a word on both sides of '/'")),
                };
                match parts.pop() {
                    Some(Part::Text(left)) => parts.push(Part::Alternation(vec![left, right])),
                    Some(Part::Alternation(mut alternatives)) => {
                        alternatives.push(right);
                        parts.push(Part::Alternation(alternatives));
                    }
                    _ => return Err(invalid(source, "alternation needs a word on both sides of '/'")),
                }
            }
            Token::Text(text) => parts.push(Part::Text(text)),
            Token::Space => parts.push(Part::Space),
            Token::Param { name, type_name } => parts.push(Part::Param { name, type_name }),
            Token::Optional(text) => parts.push(Part::Optional(text)),
        }
    }
    Ok(parts)
}
