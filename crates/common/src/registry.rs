//! Step registry
//!
//! Step definitions are collected by a [`StepRegistryBuilder`], checked for
//! equivalence as they are registered, and frozen into a [`StepRegistry`]
//! that is shared read-only by every scenario.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result, StepError};
use crate::params::{ParamValue, ParameterType, ParameterTypes};
use crate::pattern::StepPattern;
use crate::types::{DataTable, ScenarioLine};

/// Outcome of a single handler invocation
pub type StepResult = std::result::Result<(), StepError>;

/// Executes one scenario line against the world
///
/// Plain functions of the shape
/// `fn(&mut W, StepArgs) -> BoxFuture<'_, StepResult>` implement this
/// automatically.
#[async_trait]
pub trait StepHandler<W>: Send + Sync {
    async fn call(&self, world: &mut W, args: StepArgs) -> StepResult;
}

#[async_trait]
impl<W, F> StepHandler<W> for F
where
    W: Send + 'static,
    F: for<'a> Fn(&'a mut W, StepArgs) -> BoxFuture<'a, StepResult> + Send + Sync,
{
    async fn call(&self, world: &mut W, args: StepArgs) -> StepResult {
        (self)(world, args).await
    }
}

/// Keyword a definition was registered under
///
/// Matching is on text only; the kind is reported in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Given,
    When,
    Then,
    /// Any keyword
    Step,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionKind::Given => write!(f, "Given"),
            DefinitionKind::When => write!(f, "When"),
            DefinitionKind::Then => write!(f, "Then"),
            DefinitionKind::Step => write!(f, "Step"),
        }
    }
}

/// A registered pattern and its handler
pub struct StepDefinition<W> {
    kind: DefinitionKind,
    pattern: StepPattern,
    handler: Arc<dyn StepHandler<W>>,
    location: &'static Location<'static>,
}

impl<W> StepDefinition<W> {
    pub fn kind(&self) -> DefinitionKind {
        self.kind
    }

    pub fn pattern(&self) -> &StepPattern {
        &self.pattern
    }

    /// Source location of the registering call, `file:line`
    pub fn location(&self) -> String {
        format!("{}:{}", self.location.file(), self.location.line())
    }
}

impl<W> fmt::Debug for StepDefinition<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("kind", &self.kind)
            .field("pattern", &self.pattern.source())
            .field("location", &self.location())
            .finish()
    }
}

/// Two patterns that both accept some line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlap {
    pub pattern: String,
    pub other: String,
    /// A line both patterns accept
    pub sample: String,
}

/// Collects step definitions before the registry is frozen
pub struct StepRegistryBuilder<W> {
    types: ParameterTypes,
    definitions: Vec<StepDefinition<W>>,
    overlaps: Vec<Overlap>,
}

impl<W> Default for StepRegistryBuilder<W> {
    fn default() -> Self {
        Self {
            types: ParameterTypes::default(),
            definitions: Vec::new(),
            overlaps: Vec::new(),
        }
    }
}

impl<W: Send + 'static> StepRegistryBuilder<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a custom placeholder type. Must precede the patterns using it.
    pub fn define_parameter_type(&mut self, param: ParameterType) -> Result<&mut Self> {
        debug!(name = param.name(), regex = param.regex(), "Defining parameter type");
        self.types.define(param)?;
        Ok(self)
    }

    #[track_caller]
    pub fn given<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Self>
    where
        H: StepHandler<W> + 'static,
    {
        self.register(DefinitionKind::Given, pattern, handler)
    }

    #[track_caller]
    pub fn when<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Self>
    where
        H: StepHandler<W> + 'static,
    {
        self.register(DefinitionKind::When, pattern, handler)
    }

    #[track_caller]
    pub fn then<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Self>
    where
        H: StepHandler<W> + 'static,
    {
        self.register(DefinitionKind::Then, pattern, handler)
    }

    #[track_caller]
    pub fn step<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Self>
    where
        H: StepHandler<W> + 'static,
    {
        self.register(DefinitionKind::Step, pattern, handler)
    }

    /// Register a pattern. Fails with [`Error::DuplicatePattern`] when an
    /// equivalent pattern exists; overlapping but distinct patterns are
    /// accepted and logged.
    #[track_caller]
    pub fn register<H>(&mut self, kind: DefinitionKind, pattern: &str, handler: H) -> Result<&mut Self>
    where
        H: StepHandler<W> + 'static,
    {
        let location = Location::caller();
        let compiled = StepPattern::compile(pattern, &self.types)?;
        self.insert(StepDefinition {
            kind,
            pattern: compiled,
            handler: Arc::new(handler),
            location,
        })?;
        Ok(self)
    }

    /// Merge another builder's definitions, e.g. a library of built-in steps.
    /// A parameter type both sides define must have the same regex.
    pub fn extend(&mut self, other: StepRegistryBuilder<W>) -> Result<&mut Self> {
        for name in other.types.names() {
            let Some(param) = other.types.get(name) else {
                continue;
            };
            match self.types.get(name) {
                None => self.types.define(param.clone())?,
                Some(existing) if existing.regex() == param.regex() => {}
                Some(_) => return Err(Error::DuplicateParameterType(name.to_string())),
            }
        }
        for definition in other.definitions {
            let compiled = StepPattern::compile(definition.pattern.source(), &self.types)?;
            self.insert(StepDefinition {
                pattern: compiled,
                ..definition
            })?;
        }
        Ok(self)
    }

    fn insert(&mut self, definition: StepDefinition<W>) -> Result<()> {
        let compiled = &definition.pattern;
        if let Some(existing) = self
            .definitions
            .iter()
            .find(|d| d.pattern.key() == compiled.key())
        {
            return Err(Error::DuplicatePattern {
                pattern: compiled.source().to_string(),
                existing: existing.pattern.source().to_string(),
            });
        }

        for existing in &self.definitions {
            let probes = [
                (compiled.sample(), &existing.pattern),
                (existing.pattern.sample(), compiled),
            ];
            let hit = probes
                .into_iter()
                .find_map(|(sample, other)| sample.filter(|s| other.is_match(s)));
            if let Some(sample) = hit {
                warn!(
                    pattern = compiled.source(),
                    other = existing.pattern.source(),
                    sample = sample,
                    "Step patterns overlap; matching lines will be ambiguous"
                );
                self.overlaps.push(Overlap {
                    pattern: compiled.source().to_string(),
                    other: existing.pattern.source().to_string(),
                    sample: sample.to_string(),
                });
            }
        }

        debug!(kind = %definition.kind, pattern = compiled.source(), "Registered step");
        self.definitions.push(definition);
        Ok(())
    }

    pub fn build(self) -> StepRegistry<W> {
        debug!(definitions = self.definitions.len(), "Step registry frozen");
        StepRegistry {
            types: self.types,
            definitions: self.definitions,
            overlaps: self.overlaps,
        }
    }
}

/// Frozen, read-only set of step definitions
pub struct StepRegistry<W> {
    types: ParameterTypes,
    definitions: Vec<StepDefinition<W>>,
    overlaps: Vec<Overlap>,
}

impl<W: Send + 'static> StepRegistry<W> {
    pub fn builder() -> StepRegistryBuilder<W> {
        StepRegistryBuilder::new()
    }
}

impl<W> StepRegistry<W> {
    /// Find the unique definition accepting `text`
    pub fn lookup(&self, text: &str) -> std::result::Result<StepMatch<'_, W>, StepError> {
        let mut found: Vec<(&StepDefinition<W>, Vec<String>)> = self
            .definitions
            .iter()
            .filter_map(|d| d.pattern.captures(text).map(|caps| (d, caps)))
            .collect();

        match found.len() {
            0 => Err(StepError::NoMatch {
                line: text.to_string(),
            }),
            1 => {
                let (definition, captures) = found.remove(0);
                Ok(StepMatch {
                    definition,
                    captures,
                    types: &self.types,
                })
            }
            _ => Err(StepError::Ambiguous {
                line: text.to_string(),
                candidates: found
                    .iter()
                    .map(|(d, _)| d.pattern.source().to_string())
                    .collect(),
            }),
        }
    }

    pub fn definitions(&self) -> &[StepDefinition<W>] {
        &self.definitions
    }

    /// Pattern pairs detected as overlapping at registration
    pub fn overlaps(&self) -> &[Overlap] {
        &self.overlaps
    }

    pub fn parameter_types(&self) -> &ParameterTypes {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl<W> fmt::Debug for StepRegistry<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("definitions", &self.definitions)
            .field("overlaps", &self.overlaps)
            .finish()
    }
}

/// Result of a successful lookup
pub struct StepMatch<'r, W> {
    definition: &'r StepDefinition<W>,
    captures: Vec<String>,
    types: &'r ParameterTypes,
}

impl<'r, W> StepMatch<'r, W> {
    pub fn definition(&self) -> &'r StepDefinition<W> {
        self.definition
    }

    /// Raw placeholder substrings, left to right
    pub fn captures(&self) -> &[String] {
        &self.captures
    }

    /// Convert the captures into typed arguments
    pub fn arguments(&self, line: &ScenarioLine) -> std::result::Result<StepArgs, StepError> {
        let placeholders = self.definition.pattern.placeholders();
        let mut args = Vec::with_capacity(placeholders.len());

        for (placeholder, raw) in placeholders.iter().zip(&self.captures) {
            let param = self
                .types
                .get(&placeholder.type_name)
                .ok_or_else(|| StepError::Conversion {
                    type_name: placeholder.type_name.clone(),
                    input: raw.clone(),
                    reason: "unknown parameter type".to_string(),
                })?;
            args.push(Argument {
                name: placeholder.name.clone(),
                type_name: placeholder.type_name.clone(),
                raw: raw.clone(),
                value: param.transform(raw)?,
            });
        }

        Ok(StepArgs {
            args,
            table: line.table.clone(),
            doc_string: line.doc_string.as_ref().map(|d| d.content.clone()),
        })
    }
}

impl<W: Send> StepMatch<'_, W> {
    pub async fn call(&self, world: &mut W, args: StepArgs) -> StepResult {
        self.definition.handler.call(world, args).await
    }
}

/// A converted placeholder value with its origin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Argument {
    pub name: Option<String>,
    pub type_name: String,
    pub raw: String,
    pub value: ParamValue,
}

/// Arguments handed to a step handler
#[derive(Debug, Clone, Default)]
pub struct StepArgs {
    args: Vec<Argument>,
    table: Option<DataTable>,
    doc_string: Option<String>,
}

impl StepArgs {
    pub fn new(args: Vec<Argument>) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }

    pub fn with_table(mut self, table: DataTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_doc_string(mut self, content: impl Into<String>) -> Self {
        self.doc_string = Some(content.into());
        self
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.args.iter()
    }

    pub fn get(&self, index: usize) -> std::result::Result<&Argument, StepError> {
        self.args.get(index).ok_or_else(|| {
            StepError::Argument(format!(
                "no argument at position {} (step has {})",
                index,
                self.args.len()
            ))
        })
    }

    pub fn named(&self, name: &str) -> std::result::Result<&Argument, StepError> {
        self.args
            .iter()
            .find(|a| a.name.as_deref() == Some(name))
            .ok_or_else(|| StepError::Argument(format!("no argument named '{}'", name)))
    }

    pub fn value(&self, index: usize) -> std::result::Result<&ParamValue, StepError> {
        self.get(index).map(|a| &a.value)
    }

    pub fn int(&self, index: usize) -> std::result::Result<i64, StepError> {
        self.value(index)?.as_int()
    }

    pub fn float(&self, index: usize) -> std::result::Result<f64, StepError> {
        self.value(index)?.as_float()
    }

    pub fn bool(&self, index: usize) -> std::result::Result<bool, StepError> {
        self.value(index)?.as_bool()
    }

    pub fn text(&self, index: usize) -> std::result::Result<&str, StepError> {
        self.value(index)?.as_str()
    }

    /// The matched substring, before conversion
    pub fn raw(&self, index: usize) -> std::result::Result<&str, StepError> {
        self.get(index).map(|a| a.raw.as_str())
    }

    pub fn table(&self) -> std::result::Result<&DataTable, StepError> {
        self.table
            .as_ref()
            .ok_or_else(|| StepError::Argument("step has no data table".to_string()))
    }

    pub fn doc_string(&self) -> std::result::Result<&str, StepError> {
        self.doc_string
            .as_deref()
            .ok_or_else(|| StepError::Argument("step has no doc string".to_string()))
    }
}
