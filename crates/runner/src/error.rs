//! Error types for the scenario runner

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Common(#[from] stepdeck_common::Error),

    #[error("Web server failed to start: {0}")]
    ServerStartup(String),

    #[error("Web server health check failed after {attempts} attempts ({url})")]
    ServerHealthCheck { url: String, attempts: usize },

    #[error("Playwright not found. Install with: npm i -D playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Unknown profile '{name}' (available: {})", .available.join(", "))]
    UnknownProfile { name: String, available: Vec<String> },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid report format '{0}' (expected pretty, summary, json:<path>, junit:<path> or yaml:<path>)")]
    ReportFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
