//! Core types for parsed features and scenarios

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// What a scenario line does, derived from its keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// `Given`: a precondition
    Given,
    /// `When`: an action
    When,
    /// `Then`: an assertion
    Then,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Given => write!(f, "given"),
            StepKind::When => write!(f, "when"),
            StepKind::Then => write!(f, "then"),
        }
    }
}

/// A Gherkin data table attached to a step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTable {
    pub rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn headers(&self) -> &[String] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rows after the header, each keyed by column name
    pub fn hashes(&self) -> Vec<HashMap<String, String>> {
        let headers = self.headers();
        self.rows
            .iter()
            .skip(1)
            .map(|row| {
                headers
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// A doc string attached to a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocString {
    #[serde(default)]
    pub media_type: Option<String>,
    pub content: String,
}

/// One step of a scenario, immutable once parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioLine {
    /// Keyword as written (`Given`, `And`, `*`, ...)
    pub keyword: String,
    /// Effective kind; `And`/`But`/`*` inherit from the previous step
    pub kind: StepKind,
    pub text: String,
    /// 1-based line in the feature file
    pub line: usize,
    #[serde(default)]
    pub table: Option<DataTable>,
    #[serde(default)]
    pub doc_string: Option<DocString>,
}

impl ScenarioLine {
    pub fn new(kind: StepKind, text: impl Into<String>) -> Self {
        let keyword = match kind {
            StepKind::Given => "Given",
            StepKind::When => "When",
            StepKind::Then => "Then",
        };
        Self {
            keyword: keyword.to_string(),
            kind,
            text: text.into(),
            line: 0,
            table: None,
            doc_string: None,
        }
    }

    /// `Given I am on "/login"` style rendering for reports and logs
    pub fn display(&self) -> String {
        format!("{} {}", self.keyword, self.text)
    }
}

/// A single behavioral example, background steps already prepended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub feature: String,
    /// Effective tags (feature + scenario + examples), including the `@`
    #[serde(default)]
    pub tags: Vec<String>,
    pub path: PathBuf,
    pub line: usize,
    pub steps: Vec<ScenarioLine>,
}

impl Scenario {
    /// Stable identifier, `path:line`
    pub fn id(&self) -> String {
        format!("{}:{}", self.path.display(), self.line)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A parsed feature file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub path: PathBuf,
    pub scenarios: Vec<Scenario>,
}
