//! Placeholder parameter types
//!
//! A parameter type pairs a recognition regex with a transformer that turns
//! the matched text into a [`ParamValue`]. The built-ins mirror Cucumber
//! expressions: `{int}`, `{float}`, `{word}`, `{string}` and the anonymous
//! `{}`. Custom types (for example `{currency}`) are defined once, before any
//! step pattern that uses them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result, StepError};

/// Converts a recognized substring into a typed value
pub type Transformer = Arc<dyn Fn(&str) -> std::result::Result<ParamValue, String> + Send + Sync>;

/// A converted placeholder value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Json(serde_json::Value),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Bool(_) => "bool",
            ParamValue::Text(_) => "text",
            ParamValue::Json(_) => "json",
        }
    }

    pub fn as_int(&self) -> std::result::Result<i64, StepError> {
        match self {
            ParamValue::Int(v) => Ok(*v),
            other => Err(mismatch("int", other)),
        }
    }

    /// Integers widen to floats; nothing else converts
    pub fn as_float(&self) -> std::result::Result<f64, StepError> {
        match self {
            ParamValue::Float(v) => Ok(*v),
            ParamValue::Int(v) => Ok(*v as f64),
            other => Err(mismatch("float", other)),
        }
    }

    pub fn as_bool(&self) -> std::result::Result<bool, StepError> {
        match self {
            ParamValue::Bool(v) => Ok(*v),
            other => Err(mismatch("bool", other)),
        }
    }

    pub fn as_str(&self) -> std::result::Result<&str, StepError> {
        match self {
            ParamValue::Text(v) => Ok(v.as_str()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
            ParamValue::Json(v) => write!(f, "{}", v),
        }
    }
}

fn mismatch(wanted: &str, value: &ParamValue) -> StepError {
    StepError::Argument(format!(
        "expected {} argument, got {} '{}'",
        wanted,
        value.type_name(),
        value
    ))
}

/// A named placeholder type
#[derive(Clone)]
pub struct ParameterType {
    name: String,
    regex: String,
    transformer: Transformer,
    sample: Option<String>,
}

impl fmt::Debug for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterType")
            .field("name", &self.name)
            .field("regex", &self.regex)
            .field("sample", &self.sample)
            .finish()
    }
}

impl ParameterType {
    pub fn new<F>(name: &str, regex: &str, transformer: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<ParamValue, String> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            regex: regex.to_string(),
            transformer: Arc::new(transformer),
            sample: None,
        }
    }

    /// A value-free enumeration, e.g. `{visibility}` for `visible|hidden`
    pub fn one_of(name: &str, choices: &[&str]) -> Self {
        let regex = choices
            .iter()
            .map(|c| regex::escape(c))
            .collect::<Vec<_>>()
            .join("|");
        let sample = choices.first().map(|c| c.to_string());
        let mut param = Self::new(name, &regex, |s| Ok(ParamValue::Text(s.to_string())));
        param.sample = sample;
        param
    }

    /// Example text accepted by the regex, used to probe for overlapping
    /// step patterns at registration time
    pub fn with_sample(mut self, sample: &str) -> Self {
        self.sample = Some(sample.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn regex(&self) -> &str {
        &self.regex
    }

    pub fn sample(&self) -> Option<&str> {
        self.sample.as_deref()
    }

    /// Convert a substring this type's regex accepted
    pub fn transform(&self, input: &str) -> std::result::Result<ParamValue, StepError> {
        (self.transformer)(input).map_err(|reason| StepError::Conversion {
            type_name: self.name.clone(),
            input: input.to_string(),
            reason,
        })
    }
}

/// The set of parameter types known to a registry
#[derive(Debug, Clone)]
pub struct ParameterTypes {
    types: HashMap<String, ParameterType>,
}

impl Default for ParameterTypes {
    fn default() -> Self {
        let mut types = HashMap::new();
        for param in builtins() {
            types.insert(param.name.clone(), param);
        }
        Self { types }
    }
}

impl ParameterTypes {
    /// Define a custom type; names are unique and the regex must compile
    pub fn define(&mut self, param: ParameterType) -> Result<()> {
        if self.types.contains_key(&param.name) {
            return Err(Error::DuplicateParameterType(param.name));
        }
        if param.name.is_empty() || param.name.contains(['{', '}', ':', '(', ')']) {
            return Err(Error::InvalidPattern {
                pattern: param.name.clone(),
                reason: "parameter type names cannot be empty or contain '{}:()'".to_string(),
            });
        }
        let anchored = Regex::new(&format!("^(?:{})$", param.regex))?;
        if let Some(sample) = param.sample() {
            if !anchored.is_match(sample) {
                return Err(Error::InvalidPattern {
                    pattern: param.regex.clone(),
                    reason: format!("sample '{}' is not accepted by {{{}}}", sample, param.name),
                });
            }
        }
        self.types.insert(param.name.clone(), param);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterType> {
        self.types.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn builtins() -> Vec<ParameterType> {
    vec![
        ParameterType::new("int", r"-?\d+", |s| {
            s.parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|e| e.to_string())
        })
        .with_sample("42"),
        ParameterType::new("float", r"-?\d*\.?\d+", |s| {
            s.parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|e| e.to_string())
        })
        .with_sample("4.2"),
        ParameterType::new("word", r"[^\s]+", |s| Ok(ParamValue::Text(s.to_string())))
            .with_sample("word"),
        ParameterType::new(
            "string",
            r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#,
            |s| Ok(ParamValue::Text(unquote(s))),
        )
        .with_sample("\"text\""),
        ParameterType::new("", ".*", |s| Ok(ParamValue::Text(s.to_string()))).with_sample("anything"),
    ]
}

fn unquote(quoted: &str) -> String {
    let quote = quoted.chars().next().unwrap_or('"');
    let inner = quoted
        .get(1..quoted.len().saturating_sub(1))
        .unwrap_or_default();
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) if next == quote || next == '\\' => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("int", "-17", ParamValue::Int(-17))]
    #[test_case("float", "42.50", ParamValue::Float(42.5))]
    #[test_case("float", ".5", ParamValue::Float(0.5))]
    #[test_case("word", "alice", ParamValue::Text("alice".into()))]
    #[test_case("string", r#""say \"hi\"""#, ParamValue::Text("say \"hi\"".into()))]
    #[test_case("string", r"'it\'s'", ParamValue::Text("it's".into()) ; "single quoted")]
    fn test_builtin_transform(name: &str, input: &str, expected: ParamValue) {
        let types = ParameterTypes::default();
        let value = types.get(name).unwrap().transform(input).unwrap();
        assert_eq!(value, expected);
    }

    #[test]
    fn test_custom_currency_type() {
        let mut types = ParameterTypes::default();
        types
            .define(
                ParameterType::new("currency", r"\$\d+\.?\d*", |s| {
                    s.trim_start_matches('$')
                        .parse::<f64>()
                        .map(ParamValue::Float)
                        .map_err(|e| e.to_string())
                })
                .with_sample("$1.00"),
            )
            .unwrap();

        let currency = types.get("currency").unwrap();
        assert_eq!(currency.transform("$12.50").unwrap(), ParamValue::Float(12.5));
    }

    #[test]
    fn test_conversion_error() {
        let param = ParameterType::new("even", r"\d+", |s| {
            let n: i64 = s.parse().map_err(|_| "not a number".to_string())?;
            if n % 2 == 0 {
                Ok(ParamValue::Int(n))
            } else {
                Err(format!("{} is odd", n))
            }
        });
        let err = param.transform("3").unwrap_err();
        assert_eq!(
            err,
            StepError::Conversion {
                type_name: "even".into(),
                input: "3".into(),
                reason: "3 is odd".into(),
            }
        );
    }

    #[test]
    fn test_define_rejects_duplicates_and_bad_samples() {
        let mut types = ParameterTypes::default();
        let dup = ParameterType::new("int", r"\d+", |s| Ok(ParamValue::Text(s.into())));
        assert!(matches!(types.define(dup), Err(Error::DuplicateParameterType(_))));

        let bad = ParameterType::new("color", "red|blue", |s| Ok(ParamValue::Text(s.into())))
            .with_sample("green");
        assert!(matches!(types.define(bad), Err(Error::InvalidPattern { .. })));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(ParamValue::Int(3).as_float().unwrap(), 3.0);
        assert!(ParamValue::Float(3.5).as_int().is_err());
        assert_eq!(ParamValue::Text("x".into()).as_str().unwrap(), "x");
        assert_eq!(
            ParamValue::Text("x".into()).as_bool().unwrap_err().kind(),
            crate::error::ErrorKind::Argument
        );
    }
}
