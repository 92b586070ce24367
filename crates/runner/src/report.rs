//! Scenario results and report writers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use stepdeck_common::{ErrorKind, Scenario, ScenarioLine, StepError};

use crate::error::{RunnerError, RunnerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioStatus::Passed => write!(f, "passed"),
            ScenarioStatus::Failed => write!(f, "failed"),
            ScenarioStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl From<&StepError> for StepFailure {
    fn from(err: &StepError) -> Self {
        let (expected, actual) = match err.expectation() {
            Some((e, a)) => (Some(e.to_string()), Some(a.to_string())),
            None => (None, None),
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            expected,
            actual,
        }
    }
}

/// Outcome of one scenario line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub keyword: String,
    pub text: String,
    pub line: usize,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
}

impl StepOutcome {
    pub fn passed(line: &ScenarioLine, duration_ms: u64) -> Self {
        Self::new(line, StepStatus::Passed, duration_ms, None)
    }

    pub fn failed(line: &ScenarioLine, duration_ms: u64, err: &StepError) -> Self {
        Self::new(line, StepStatus::Failed, duration_ms, Some(err.into()))
    }

    pub fn skipped(line: &ScenarioLine) -> Self {
        Self::new(line, StepStatus::Skipped, 0, None)
    }

    fn new(line: &ScenarioLine, status: StepStatus, duration_ms: u64, error: Option<StepFailure>) -> Self {
        Self {
            keyword: line.keyword.clone(),
            text: line.text.clone(),
            line: line.line,
            status,
            duration_ms,
            error,
        }
    }
}

/// The failure that ended a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFailure {
    /// Failing line, absent for setup and teardown failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub kind: ErrorKind,
    pub message: String,
}

/// A file captured during a scenario, e.g. a failure screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub media_type: String,
    pub path: PathBuf,
    pub sha256: String,
}

impl Attachment {
    /// Write `data` under `dir` and record its digest. The name is reduced
    /// to a single file name so it always lands inside `dir`.
    pub fn write(dir: &Path, name: &str, media_type: &str, data: &[u8]) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let name = file_name(name);
        let path = dir.join(&name);
        std::fs::write(&path, data)?;

        let mut hasher = Sha256::new();
        hasher.update(data);

        Ok(Self {
            name,
            media_type: media_type.to_string(),
            path,
            sha256: hex::encode(hasher.finalize()),
        })
    }
}

fn file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '-');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// `path:line`
    pub id: String,
    pub feature: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    pub steps: Vec<StepOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ScenarioFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ScenarioResult {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            id: scenario.id(),
            feature: scenario.feature.clone(),
            name: scenario.name.clone(),
            tags: scenario.tags.clone(),
            status: ScenarioStatus::Passed,
            duration_ms: 0,
            steps: Vec::with_capacity(scenario.steps.len()),
            error: None,
            attachments: Vec::new(),
        }
    }

    /// A scenario that never ran; every line is skipped
    pub fn skipped(scenario: &Scenario) -> Self {
        let mut result = Self::new(scenario);
        result.status = ScenarioStatus::Skipped;
        result.steps = scenario.steps.iter().map(StepOutcome::skipped).collect();
        result
    }

    /// A scenario that could not run to completion for reasons outside any
    /// single line
    pub fn aborted(scenario: &Scenario, err: &StepError) -> Self {
        let mut result = Self::skipped(scenario);
        result.fail(None, err);
        result
    }

    /// Mark failed; the first failure wins
    pub fn fail(&mut self, line: Option<&ScenarioLine>, err: &StepError) {
        self.status = ScenarioStatus::Failed;
        if self.error.is_none() {
            self.error = Some(ScenarioFailure {
                step: line.map(ScenarioLine::display),
                line: line.map(|l| l.line),
                kind: err.kind(),
                message: err.to_string(),
            });
        }
    }

    pub fn failed_step(&self) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub scenarios: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn new(started_at: DateTime<Utc>, duration_ms: u64, scenarios: Vec<ScenarioResult>) -> Self {
        let count = |status: ScenarioStatus| scenarios.iter().filter(|s| s.status == status).count();
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at,
            duration_ms,
            total: scenarios.len(),
            passed: count(ScenarioStatus::Passed),
            failed: count(ScenarioStatus::Failed),
            skipped: count(ScenarioStatus::Skipped),
            scenarios,
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Where a report goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    /// Colored per-scenario console output
    Pretty,
    /// Console table of results
    Summary,
    Json(PathBuf),
    Junit(PathBuf),
    Yaml(PathBuf),
}

impl ReportFormat {
    pub fn is_console(&self) -> bool {
        matches!(self, ReportFormat::Pretty | ReportFormat::Summary)
    }

    /// Resolve a relative report path against the output directory
    pub fn resolve(&self, output_dir: &Path) -> Self {
        let join = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                output_dir.join(p)
            }
        };
        match self {
            ReportFormat::Json(p) => ReportFormat::Json(join(p)),
            ReportFormat::Junit(p) => ReportFormat::Junit(join(p)),
            ReportFormat::Yaml(p) => ReportFormat::Yaml(join(p)),
            other => other.clone(),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = RunnerError;

    fn from_str(s: &str) -> RunnerResult<Self> {
        let (kind, path) = match s.split_once(':') {
            Some((kind, path)) if !path.is_empty() => (kind, Some(PathBuf::from(path))),
            Some(_) => return Err(RunnerError::ReportFormat(s.to_string())),
            None => (s, None),
        };
        match (kind, path) {
            ("pretty", None) => Ok(ReportFormat::Pretty),
            ("summary", None) => Ok(ReportFormat::Summary),
            ("json", path) => Ok(ReportFormat::Json(path.unwrap_or_else(|| "report.json".into()))),
            ("junit", path) => Ok(ReportFormat::Junit(path.unwrap_or_else(|| "junit.xml".into()))),
            ("yaml", path) => Ok(ReportFormat::Yaml(path.unwrap_or_else(|| "report.yaml".into()))),
            _ => Err(RunnerError::ReportFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Pretty => write!(f, "pretty"),
            ReportFormat::Summary => write!(f, "summary"),
            ReportFormat::Json(p) => write!(f, "json:{}", p.display()),
            ReportFormat::Junit(p) => write!(f, "junit:{}", p.display()),
            ReportFormat::Yaml(p) => write!(f, "yaml:{}", p.display()),
        }
    }
}

/// Write every file-based report; console formats are left to the caller.
/// Returns the paths written.
pub fn write_reports(
    suite: &SuiteResult,
    formats: &[ReportFormat],
    output_dir: &Path,
) -> RunnerResult<Vec<PathBuf>> {
    let mut written = Vec::new();

    for format in formats.iter().map(|f| f.resolve(output_dir)) {
        let (path, content) = match &format {
            ReportFormat::Json(path) => (path.clone(), serde_json::to_string_pretty(suite)?),
            ReportFormat::Yaml(path) => (path.clone(), serde_yaml::to_string(suite)?),
            ReportFormat::Junit(path) => (path.clone(), junit_xml(suite)),
            ReportFormat::Pretty | ReportFormat::Summary => continue,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        info!("Report written to: {}", path.display());
        written.push(path);
    }

    Ok(written)
}

/// Render JUnit XML, one `<testsuite>` per feature in first-seen order
pub fn junit_xml(suite: &SuiteResult) -> String {
    let mut features: Vec<(&str, Vec<&ScenarioResult>)> = Vec::new();
    for scenario in &suite.scenarios {
        match features.iter_mut().find(|(name, _)| *name == scenario.feature) {
            Some((_, list)) => list.push(scenario),
            None => features.push((scenario.feature.as_str(), vec![scenario])),
        }
    }

    let seconds = |ms: u64| format!("{:.3}", ms as f64 / 1000.0);
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuites name=\"stepdeck\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{}\">\n",
        suite.total,
        suite.failed,
        suite.skipped,
        seconds(suite.duration_ms)
    ));

    for (feature, scenarios) in features {
        let failures = scenarios.iter().filter(|s| s.status == ScenarioStatus::Failed).count();
        let skipped = scenarios.iter().filter(|s| s.status == ScenarioStatus::Skipped).count();
        let time: u64 = scenarios.iter().map(|s| s.duration_ms).sum();
        xml.push_str(&format!(
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{}\">\n",
            escape_xml(feature),
            scenarios.len(),
            failures,
            skipped,
            seconds(time)
        ));

        for scenario in scenarios {
            xml.push_str(&format!(
                "    <testcase classname=\"{}\" name=\"{}\" time=\"{}\"",
                escape_xml(feature),
                escape_xml(&scenario.name),
                seconds(scenario.duration_ms)
            ));
            match (scenario.status, &scenario.error) {
                (ScenarioStatus::Failed, Some(err)) => {
                    let body = match &err.step {
                        Some(step) => format!("{}\n{}", step, err.message),
                        None => err.message.clone(),
                    };
                    xml.push_str(&format!(
                        ">\n      <failure type=\"{}\" message=\"{}\">{}</failure>\n    </testcase>\n",
                        err.kind,
                        escape_xml(&err.message),
                        escape_xml(&body)
                    ));
                }
                (ScenarioStatus::Failed, None) => {
                    xml.push_str(">\n      <failure type=\"other\"/>\n    </testcase>\n");
                }
                (ScenarioStatus::Skipped, _) => {
                    xml.push_str(">\n      <skipped/>\n    </testcase>\n");
                }
                (ScenarioStatus::Passed, _) => xml.push_str("/>\n"),
            }
        }
        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepdeck_common::StepKind;
    use tempfile::TempDir;
    use test_case::test_case;

    fn scenario(name: &str, feature: &str) -> Scenario {
        Scenario {
            name: name.to_string(),
            feature: feature.to_string(),
            tags: vec!["@web".to_string()],
            path: PathBuf::from("features/cart.feature"),
            line: 3,
            steps: vec![
                ScenarioLine::new(StepKind::Given, "an empty cart"),
                ScenarioLine::new(StepKind::Then, "the total is \"$0 & <none>\""),
            ],
        }
    }

    fn sample_suite() -> SuiteResult {
        let passed = ScenarioResult::new(&scenario("Empty", "Cart"));
        let mut failed = ScenarioResult::new(&scenario("Totals", "Cart"));
        let line = ScenarioLine::new(StepKind::Then, "the total is \"$0 & <none>\"");
        let err = StepError::assertion("total", "$0", "$5");
        failed.steps.push(StepOutcome::failed(&line, 3, &err));
        failed.fail(Some(&line), &err);
        let skipped = ScenarioResult::skipped(&scenario("Later", "Checkout"));
        SuiteResult::new(Utc::now(), 12, vec![passed, failed, skipped])
    }

    #[test_case("pretty", ReportFormat::Pretty)]
    #[test_case("summary", ReportFormat::Summary)]
    #[test_case("json", ReportFormat::Json("report.json".into()))]
    #[test_case("junit:out/junit.xml", ReportFormat::Junit("out/junit.xml".into()))]
    #[test_case("yaml:r.yaml", ReportFormat::Yaml("r.yaml".into()))]
    fn test_parse_format(input: &str, expected: ReportFormat) {
        assert_eq!(input.parse::<ReportFormat>().unwrap(), expected);
    }

    #[test_case("html" ; "unknown kind")]
    #[test_case("json:" ; "empty path")]
    #[test_case("pretty:out.txt" ; "console with path")]
    fn test_reject_format(input: &str) {
        assert!(input.parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_suite_counts() {
        let suite = sample_suite();
        assert_eq!((suite.total, suite.passed, suite.failed, suite.skipped), (3, 1, 1, 1));
        assert!(!suite.success());

        let failure = suite.scenarios[1].error.as_ref().unwrap();
        assert_eq!(failure.kind, ErrorKind::Assertion);
        assert_eq!(failure.step.as_deref(), Some("Then the total is \"$0 & <none>\""));
        let step = suite.scenarios[1].failed_step().unwrap();
        assert_eq!(step.error.as_ref().unwrap().actual.as_deref(), Some("$5"));
        assert!(suite.scenarios[2]
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Skipped));
    }

    #[test]
    fn test_junit_groups_by_feature_and_escapes() {
        let xml = junit_xml(&sample_suite());
        assert!(xml.contains("<testsuite name=\"Cart\" tests=\"2\" failures=\"1\" skipped=\"0\""));
        assert!(xml.contains("<testsuite name=\"Checkout\" tests=\"1\" failures=\"0\" skipped=\"1\""));
        assert!(xml.contains("<failure type=\"assertion\""));
        assert!(xml.contains("&quot;$0 &amp; &lt;none&gt;&quot;"));
        assert!(xml.contains("<skipped/>"));
    }

    #[test]
    fn test_write_reports() {
        let tmp = TempDir::new().unwrap();
        let formats = vec![
            ReportFormat::Pretty,
            ReportFormat::Json("report.json".into()),
            ReportFormat::Yaml("nested/report.yaml".into()),
            ReportFormat::Junit("junit.xml".into()),
        ];
        let written = write_reports(&sample_suite(), &formats, tmp.path()).unwrap();
        assert_eq!(written.len(), 3);

        let json = std::fs::read_to_string(tmp.path().join("report.json")).unwrap();
        let parsed: SuiteResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.failed, 1);
        assert_eq!(parsed.scenarios[1].steps[0].error.as_ref().unwrap().kind, ErrorKind::Assertion);
        assert!(tmp.path().join("nested/report.yaml").exists());
    }

    #[test]
    fn test_attachment_digest() {
        let tmp = TempDir::new().unwrap();
        let attachment = Attachment::write(tmp.path(), "note.txt", "text/plain", b"hello").unwrap();
        assert_eq!(
            attachment.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(std::fs::read(&attachment.path).unwrap(), b"hello");
    }

    #[test_case("../../escape.png", "escape.png")]
    #[test_case("/etc/passwd", "etc-passwd")]
    #[test_case("..\\..\\win.png", "win.png")]
    #[test_case("cart page.png", "cart-page.png")]
    #[test_case("..", "attachment")]
    fn test_attachment_stays_in_dir(name: &str, expected: &str) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("scenario");
        let attachment = Attachment::write(&dir, name, "image/png", b"png").unwrap();
        assert_eq!(attachment.name, expected);
        assert_eq!(attachment.path, dir.join(expected));
        assert!(attachment.path.exists());
    }
}
