//! Gherkin feature file parser
//!
//! Supports the subset used by browser test suites: `Feature`, `Background`,
//! `Scenario`/`Example`, `Scenario Outline`/`Scenario Template` with
//! `Examples`, tags, comments, data tables and doc strings. `Rule:` lines
//! are accepted and only close the current block.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::types::{DataTable, DocString, Feature, Scenario, ScenarioLine, StepKind};

/// `<column>` references inside outline steps, names and tables
static COLUMN_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>\s][^<>]*)>").unwrap());

const STEP_KEYWORDS: &[(&str, Option<StepKind>)] = &[
    ("Given ", Some(StepKind::Given)),
    ("When ", Some(StepKind::When)),
    ("Then ", Some(StepKind::Then)),
    ("And ", None),
    ("But ", None),
    ("* ", None),
];

/// Parse a single feature file
pub fn parse_feature(source: &str, path: &Path) -> Result<Feature> {
    let mut parser = Parser::new(path);
    let mut last = 0;
    for (index, raw) in source.lines().enumerate() {
        last = index + 1;
        parser.line(last, raw)?;
    }
    parser.finish(last)
}

/// Load every `.feature` file under the given files or directories.
///
/// Directories are walked recursively in file-name order so that scenario
/// order is stable between runs. Files with no content are skipped.
pub fn load_features(paths: &[PathBuf]) -> Result<Vec<Feature>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("feature path not found: {}", path.display()),
            )));
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let is_feature = entry
                .path()
                .extension()
                .map(|ext| ext == "feature")
                .unwrap_or(false);
            if entry.file_type().is_file() && is_feature {
                files.push(entry.into_path());
            }
        }
    }

    let mut features = Vec::new();
    for file in files {
        let source = std::fs::read_to_string(&file)?;
        if is_blank(&source) {
            debug!("Skipping empty feature file {}", file.display());
            continue;
        }
        features.push(parse_feature(&source, &file)?);
    }

    debug!("Loaded {} feature file(s)", features.len());
    Ok(features)
}

fn is_blank(source: &str) -> bool {
    source
        .lines()
        .map(str::trim)
        .all(|l| l.is_empty() || l.starts_with('#'))
}

fn parse_error(path: &Path, line: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        file: path.display().to_string(),
        line,
        message: message.into(),
    }
}

struct Draft {
    name: String,
    tags: Vec<String>,
    line: usize,
    steps: Vec<ScenarioLine>,
}

struct Examples {
    tags: Vec<String>,
    header: Option<Vec<String>>,
    rows: Vec<(usize, Vec<String>)>,
}

enum Section {
    None,
    Background,
    Scenario(Draft),
    Outline(Draft, Vec<Examples>),
}

struct DocBlock {
    fence: &'static str,
    indent: usize,
    media_type: Option<String>,
    lines: Vec<String>,
}

struct Parser<'a> {
    path: &'a Path,
    feature: Option<Feature>,
    background: Vec<ScenarioLine>,
    has_background: bool,
    section: Section,
    pending_tags: Vec<String>,
    last_kind: Option<StepKind>,
    doc: Option<DocBlock>,
}

impl<'a> Parser<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            feature: None,
            background: Vec::new(),
            has_background: false,
            section: Section::None,
            pending_tags: Vec::new(),
            last_kind: None,
            doc: None,
        }
    }

    fn line(&mut self, number: usize, raw: &str) -> Result<()> {
        if self.doc.is_some() {
            return self.doc_line(number, raw);
        }

        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }

        if trimmed.starts_with('@') {
            return self.tags(number, trimmed);
        }

        if let Some(name) = strip_keyword(trimmed, &["Feature:"]) {
            return self.feature(number, name);
        }

        if self.feature.is_none() {
            return Err(parse_error(self.path, number, "expected 'Feature:'"));
        }

        if strip_keyword(trimmed, &["Rule:"]).is_some() {
            self.finish_section()?;
            self.pending_tags.clear();
            return Ok(());
        }

        if strip_keyword(trimmed, &["Background:"]).is_some() {
            return self.background(number);
        }

        if let Some(name) = strip_keyword(trimmed, &["Scenario Outline:", "Scenario Template:"]) {
            self.finish_section()?;
            let draft = self.draft(number, name);
            self.section = Section::Outline(draft, Vec::new());
            return Ok(());
        }

        if let Some(name) = strip_keyword(trimmed, &["Scenario:", "Example:"]) {
            self.finish_section()?;
            let draft = self.draft(number, name);
            self.section = Section::Scenario(draft);
            return Ok(());
        }

        if strip_keyword(trimmed, &["Examples:", "Scenarios:"]).is_some() {
            let tags = std::mem::take(&mut self.pending_tags);
            return match &mut self.section {
                Section::Outline(_, examples) => {
                    examples.push(Examples {
                        tags,
                        header: None,
                        rows: Vec::new(),
                    });
                    Ok(())
                }
                _ => Err(parse_error(
                    self.path,
                    number,
                    "'Examples:' outside of a Scenario Outline",
                )),
            };
        }

        if trimmed.starts_with('|') {
            return self.table_row(number, trimmed);
        }

        if trimmed.starts_with("\"\"\"") || trimmed.starts_with("```") {
            return self.open_doc(number, raw, trimmed);
        }

        for (keyword, kind) in STEP_KEYWORDS {
            if let Some(text) = trimmed.strip_prefix(keyword) {
                return self.step(number, keyword.trim(), *kind, text.trim());
            }
        }

        self.free_text(number, trimmed)
    }

    fn tags(&mut self, number: usize, trimmed: &str) -> Result<()> {
        for token in trimmed.split_whitespace() {
            if token.starts_with('#') {
                break;
            }
            if !token.starts_with('@') || token.len() == 1 {
                return Err(parse_error(
                    self.path,
                    number,
                    format!("invalid tag '{}'", token),
                ));
            }
            self.pending_tags.push(token.to_string());
        }
        Ok(())
    }

    fn feature(&mut self, number: usize, name: &str) -> Result<()> {
        if self.feature.is_some() {
            return Err(parse_error(
                self.path,
                number,
                "only one 'Feature:' is allowed per file",
            ));
        }
        self.feature = Some(Feature {
            name: name.to_string(),
            description: String::new(),
            tags: std::mem::take(&mut self.pending_tags),
            path: self.path.to_path_buf(),
            scenarios: Vec::new(),
        });
        Ok(())
    }

    fn background(&mut self, number: usize) -> Result<()> {
        self.finish_section()?;
        let has_scenarios = self
            .feature
            .as_ref()
            .map(|f| !f.scenarios.is_empty())
            .unwrap_or(false);
        if self.has_background {
            return Err(parse_error(self.path, number, "duplicate 'Background:'"));
        }
        if has_scenarios {
            return Err(parse_error(
                self.path,
                number,
                "'Background:' must come before the first scenario",
            ));
        }
        self.pending_tags.clear();
        self.has_background = true;
        self.last_kind = None;
        self.section = Section::Background;
        Ok(())
    }

    fn draft(&mut self, number: usize, name: &str) -> Draft {
        self.last_kind = None;
        Draft {
            name: name.to_string(),
            tags: std::mem::take(&mut self.pending_tags),
            line: number,
            steps: Vec::new(),
        }
    }

    fn step(&mut self, number: usize, keyword: &str, kind: Option<StepKind>, text: &str) -> Result<()> {
        let kind = kind.or(self.last_kind).unwrap_or(StepKind::Given);
        self.last_kind = Some(kind);

        let line = ScenarioLine {
            keyword: keyword.to_string(),
            kind,
            text: text.to_string(),
            line: number,
            table: None,
            doc_string: None,
        };

        match &mut self.section {
            Section::Background => self.background.push(line),
            Section::Scenario(draft) => draft.steps.push(line),
            Section::Outline(draft, examples) if examples.is_empty() => draft.steps.push(line),
            Section::Outline(..) => {
                return Err(parse_error(self.path, number, "steps cannot follow 'Examples:'"))
            }
            Section::None => {
                return Err(parse_error(self.path, number, "step outside of a scenario"))
            }
        }
        Ok(())
    }

    fn table_row(&mut self, number: usize, trimmed: &str) -> Result<()> {
        let path = self.path;
        let cells = parse_row(trimmed)
            .ok_or_else(|| parse_error(path, number, "malformed table row"))?;

        if let Section::Outline(_, examples) = &mut self.section {
            if let Some(block) = examples.last_mut() {
                match &block.header {
                    None => block.header = Some(cells),
                    Some(header) if header.len() != cells.len() => {
                        return Err(parse_error(
                            path,
                            number,
                            format!("expected {} cells, found {}", header.len(), cells.len()),
                        ));
                    }
                    Some(_) => block.rows.push((number, cells)),
                }
                return Ok(());
            }
        }

        match self.last_step_mut() {
            Some(step) => {
                let table = step.table.get_or_insert_with(DataTable::default);
                if let Some(first) = table.rows.first() {
                    if first.len() != cells.len() {
                        return Err(parse_error(
                            path,
                            number,
                            format!("expected {} cells, found {}", first.len(), cells.len()),
                        ));
                    }
                }
                table.rows.push(cells);
                Ok(())
            }
            None => Err(parse_error(path, number, "table row without a step")),
        }
    }

    fn open_doc(&mut self, number: usize, raw: &str, trimmed: &str) -> Result<()> {
        if self.last_step_mut().is_none() {
            return Err(parse_error(self.path, number, "doc string without a step"));
        }
        let fence = if trimmed.starts_with("```") { "```" } else { "\"\"\"" };
        let media_type = trimmed[fence.len()..].trim();
        self.doc = Some(DocBlock {
            fence,
            indent: raw.chars().take_while(|c| c.is_whitespace()).count(),
            media_type: (!media_type.is_empty()).then(|| media_type.to_string()),
            lines: Vec::new(),
        });
        Ok(())
    }

    fn doc_line(&mut self, number: usize, raw: &str) -> Result<()> {
        let Some(mut doc) = self.doc.take() else {
            return Ok(());
        };

        if raw.trim() != doc.fence {
            doc.lines.push(strip_indent(raw, doc.indent));
            self.doc = Some(doc);
            return Ok(());
        }

        let path = self.path;
        match self.last_step_mut() {
            Some(step) => {
                step.doc_string = Some(DocString {
                    media_type: doc.media_type,
                    content: doc.lines.join("\n"),
                });
                Ok(())
            }
            None => Err(parse_error(path, number, "doc string without a step")),
        }
    }

    fn free_text(&mut self, number: usize, trimmed: &str) -> Result<()> {
        match &self.section {
            Section::None => {
                if let Some(feature) = self.feature.as_mut() {
                    if feature.scenarios.is_empty() {
                        if !feature.description.is_empty() {
                            feature.description.push('\n');
                        }
                        feature.description.push_str(trimmed);
                    }
                }
                Ok(())
            }
            Section::Background if self.background.is_empty() => Ok(()),
            Section::Scenario(draft) | Section::Outline(draft, _) if draft.steps.is_empty() => Ok(()),
            _ => Err(parse_error(
                self.path,
                number,
                format!("unexpected line '{}'", trimmed),
            )),
        }
    }

    fn last_step_mut(&mut self) -> Option<&mut ScenarioLine> {
        match &mut self.section {
            Section::Background => self.background.last_mut(),
            Section::Scenario(draft) => draft.steps.last_mut(),
            Section::Outline(draft, examples) if examples.is_empty() => draft.steps.last_mut(),
            _ => None,
        }
    }

    fn finish_section(&mut self) -> Result<()> {
        let section = std::mem::replace(&mut self.section, Section::None);
        let Some(feature) = self.feature.as_mut() else {
            return Ok(());
        };

        match section {
            Section::None | Section::Background => {}
            Section::Scenario(draft) => {
                let steps = self
                    .background
                    .iter()
                    .cloned()
                    .chain(draft.steps)
                    .collect();
                feature.scenarios.push(Scenario {
                    name: draft.name,
                    feature: feature.name.clone(),
                    tags: merge_tags(&[feature.tags.as_slice(), draft.tags.as_slice()]),
                    path: self.path.to_path_buf(),
                    line: draft.line,
                    steps,
                });
            }
            Section::Outline(draft, examples) => {
                let expanded = expand_outline(self.path, feature, &self.background, draft, examples)?;
                feature.scenarios.extend(expanded);
            }
        }
        Ok(())
    }

    fn finish(mut self, last_line: usize) -> Result<Feature> {
        if self.doc.is_some() {
            return Err(parse_error(self.path, last_line, "unterminated doc string"));
        }
        self.finish_section()?;
        let path = self.path;
        self.feature
            .ok_or_else(|| parse_error(path, last_line.max(1), "missing 'Feature:'"))
    }
}

fn expand_outline(
    path: &Path,
    feature: &Feature,
    background: &[ScenarioLine],
    draft: Draft,
    examples: Vec<Examples>,
) -> Result<Vec<Scenario>> {
    if examples.is_empty() {
        return Err(parse_error(
            path,
            draft.line,
            "Scenario Outline has no 'Examples:'",
        ));
    }

    let mut scenarios = Vec::new();
    let mut ordinal = 0;

    for block in examples {
        let Some(header) = block.header else {
            continue;
        };

        for (line, row) in block.rows {
            ordinal += 1;
            let values: HashMap<&str, String> =
                header.iter().map(String::as_str).zip(row).collect();
            // Single pass, so substituted values are never re-expanded
            let substitute = |text: &str| -> String {
                COLUMN_REF
                    .replace_all(text, |caps: &regex::Captures<'_>| match values.get(&caps[1]) {
                        Some(value) => value.clone(),
                        None => caps[0].to_string(),
                    })
                    .into_owned()
            };

            let steps = background
                .iter()
                .cloned()
                .chain(draft.steps.iter().map(|step| ScenarioLine {
                    text: substitute(step.text.as_str()),
                    table: step.table.as_ref().map(|table| {
                        DataTable::new(
                            table
                                .rows
                                .iter()
                                .map(|r| r.iter().map(|c| substitute(c.as_str())).collect())
                                .collect(),
                        )
                    }),
                    doc_string: step.doc_string.as_ref().map(|doc| DocString {
                        media_type: doc.media_type.clone(),
                        content: substitute(doc.content.as_str()),
                    }),
                    ..step.clone()
                }))
                .collect();

            let mut name = substitute(draft.name.as_str());
            if name == draft.name {
                name = format!("{} (example {})", draft.name, ordinal);
            }

            scenarios.push(Scenario {
                name,
                feature: feature.name.clone(),
                tags: merge_tags(&[
                    feature.tags.as_slice(),
                    draft.tags.as_slice(),
                    block.tags.as_slice(),
                ]),
                path: path.to_path_buf(),
                line,
                steps,
            });
        }
    }

    Ok(scenarios)
}

fn merge_tags(groups: &[&[String]]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in groups.iter().flat_map(|g| g.iter()) {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

fn strip_keyword<'s>(line: &'s str, keywords: &[&str]) -> Option<&'s str> {
    keywords
        .iter()
        .find_map(|kw| line.strip_prefix(kw))
        .map(str::trim)
}

fn strip_indent(raw: &str, indent: usize) -> String {
    let mut rest = raw;
    for _ in 0..indent {
        match rest.chars().next() {
            Some(c) if c.is_whitespace() => rest = &rest[c.len_utf8()..],
            _ => break,
        }
    }
    rest.to_string()
}

fn parse_row(trimmed: &str) -> Option<Vec<String>> {
    let inner = trimmed.strip_prefix('|')?.strip_suffix('|')?;
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('|') => cell.push('|'),
                Some('n') => cell.push('\n'),
                Some('\\') => cell.push('\\'),
                Some(other) => {
                    cell.push('\\');
                    cell.push(other);
                }
                None => cell.push('\\'),
            },
            '|' => {
                cells.push(cell.trim().to_string());
                cell.clear();
            }
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    Some(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<Feature> {
        parse_feature(source, Path::new("features/checkout.feature"))
    }

    #[test]
    fn test_parse_scenarios_with_background() {
        let feature = parse(
            r##"
@web
Feature: Checkout
  Customers pay for their cart.

  Background:
    Given I am on "/cart"

  @smoke
  Scenario: Pay by card
    When I enter $42.50 as payment
    And I click "#pay"
    Then I should see "Thank you"
    But I should not see "Error"

  Scenario: Empty cart
    Then I should see "Your cart is empty"
"##,
        )
        .unwrap();

        assert_eq!(feature.name, "Checkout");
        assert_eq!(feature.description, "Customers pay for their cart.");
        assert_eq!(feature.scenarios.len(), 2);

        let pay = &feature.scenarios[0];
        assert_eq!(pay.tags, vec!["@web".to_string(), "@smoke".to_string()]);
        assert_eq!(pay.steps.len(), 5);
        assert_eq!(pay.steps[0].text, "I am on \"/cart\"");
        assert_eq!(pay.steps[2].keyword, "And");
        assert_eq!(pay.steps[2].kind, StepKind::When);
        assert_eq!(pay.steps[2].text, "I click \"#pay\"");
        assert_eq!(pay.steps[4].kind, StepKind::Then);
        assert_eq!(pay.line, 10);

        let empty = &feature.scenarios[1];
        assert_eq!(empty.tags, vec!["@web".to_string()]);
        assert_eq!(empty.steps.len(), 2);
    }

    #[test]
    fn test_outline_expansion() {
        let feature = parse(
            r#"
Feature: Login
  Scenario Outline: Login as <user>
    Given I am logged in as <user>
    Then I should see "<greeting>"

    @admins
    Examples:
      | user  | greeting      |
      | alice | Hello, Alice  |

    Examples:
      | user | greeting   |
      | bob  | Hello, Bob |
"#,
        )
        .unwrap();

        assert_eq!(feature.scenarios.len(), 2);
        assert_eq!(feature.scenarios[0].name, "Login as alice");
        assert_eq!(feature.scenarios[0].tags, vec!["@admins".to_string()]);
        assert_eq!(feature.scenarios[0].steps[1].text, "I should see \"Hello, Alice\"");
        assert_eq!(feature.scenarios[1].name, "Login as bob");
        assert_eq!(feature.scenarios[1].line, 14);
    }

    #[test]
    fn test_outline_without_placeholder_in_name() {
        let feature = parse(
            "Feature: F\n  Scenario Outline: Totals\n    Then the total is <n>\n    Examples:\n      | n |\n      | 1 |\n      | 2 |\n",
        )
        .unwrap();
        assert_eq!(feature.scenarios[0].name, "Totals (example 1)");
        assert_eq!(feature.scenarios[1].name, "Totals (example 2)");
    }

    #[test]
    fn test_outline_values_are_not_re_expanded() {
        let feature = parse(
            "Feature: F\n  Scenario Outline: Markup\n    Then <a> then <b> then <c>\n    Examples:\n      | a   | b |\n      | <b> | x |\n",
        )
        .unwrap();
        assert_eq!(feature.scenarios[0].steps[0].text, "<b> then x then <c>");
    }

    #[test]
    fn test_tables_and_doc_strings() {
        let feature = parse(
            r#"
Feature: Data
  Scenario: Attachments
    Given these users:
      | name  | role  |
      | alice | admin |
      | a\|b  | x     |
    When I post:
      """json
      {
        "ok": true
      }
      """
"#,
        )
        .unwrap();

        let steps = &feature.scenarios[0].steps;
        let table = steps[0].table.as_ref().unwrap();
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[2][0], "a|b");

        let doc = steps[1].doc_string.as_ref().unwrap();
        assert_eq!(doc.media_type.as_deref(), Some("json"));
        assert_eq!(doc.content, "{\n  \"ok\": true\n}");
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = parse("Feature: F\n  Scenario: S\n    Given a\n  Examples:\n").unwrap_err();
        match err {
            Error::Parse { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error: {other}"),
        }

        assert!(parse("Given a step before any feature").is_err());
        assert!(parse("Feature: F\n  Scenario Outline: O\n    Given <x>\n").is_err());
        assert!(parse("Feature: F\n  Scenario: S\n    Given a\n      \"\"\"\n      open").is_err());
    }

    #[test]
    fn test_load_features_walks_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let nested = tmp.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(tmp.path().join("b.feature"), "Feature: B\n  Scenario: b\n    Given x\n").unwrap();
        std::fs::write(nested.join("a.feature"), "Feature: A\n  Scenario: a\n    Given y\n").unwrap();
        std::fs::write(tmp.path().join("empty.feature"), "# nothing here\n").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "Feature: ignored").unwrap();

        let features = load_features(&[tmp.path().to_path_buf()]).unwrap();
        let names: Vec<_> = features.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }
}
