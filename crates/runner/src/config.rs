//! Run profiles loaded from `stepdeck.toml`

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RunnerError, RunnerResult};
use crate::playwright::Browser;

pub const DEFAULT_PROFILE: &str = "default";

/// The whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

/// Execution options for one named profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Feature files or directories
    pub paths: Vec<PathBuf>,

    /// Concurrent scenario slots
    pub parallel: usize,

    /// Tag expression, e.g. `@smoke and not @wip`
    pub tags: Option<String>,

    /// Report formats (`pretty`, `summary`, `json:<path>`, ...)
    pub format: Vec<String>,

    /// Reports and attachments go here
    pub output_dir: PathBuf,

    pub step_timeout_ms: Option<u64>,

    pub scenario_timeout_ms: Option<u64>,

    pub fail_fast: bool,

    /// Match every line without running steps or starting resources
    pub dry_run: bool,

    pub browser: BrowserConfig,

    /// Application under test, started before the run
    pub web_server: Option<WebServerConfig>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from("features")],
            parallel: 1,
            tags: None,
            format: vec!["pretty".to_string()],
            output_dir: PathBuf::from("stepdeck-results"),
            step_timeout_ms: Some(30_000),
            scenario_timeout_ms: None,
            fail_fast: false,
            dry_run: false,
            browser: BrowserConfig::default(),
            web_server: None,
        }
    }
}

impl Profile {
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }

    pub fn scenario_timeout(&self) -> Option<Duration> {
        self.scenario_timeout_ms.map(Duration::from_millis)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.output_dir.join("artifacts")
    }

    fn validate(&self, name: &str) -> RunnerResult<()> {
        if self.parallel == 0 {
            return Err(RunnerError::InvalidConfig(format!(
                "profile '{}': parallel must be at least 1",
                name
            )));
        }
        if self.paths.is_empty() {
            return Err(RunnerError::InvalidConfig(format!(
                "profile '{}': no feature paths",
                name
            )));
        }
        if self.browser.viewport_width == 0 || self.browser.viewport_height == 0 {
            return Err(RunnerError::InvalidConfig(format!(
                "profile '{}': viewport must be non-empty",
                name
            )));
        }
        Ok(())
    }
}

/// Browser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub browser: Browser,
    pub headless: bool,
    pub base_url: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Limit for each driver command (navigation, waits, clicks)
    pub action_timeout_ms: u64,
    /// Limit for starting a browser and for waiting on a free one
    pub launch_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            base_url: "http://127.0.0.1:8080".to_string(),
            viewport_width: 1280,
            viewport_height: 720,
            action_timeout_ms: 5_000,
            launch_timeout_ms: 30_000,
        }
    }
}

impl BrowserConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }
}

/// How to start the application under test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Polled until it answers with a 2xx status
    pub url: String,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}

impl ConfigFile {
    /// Load from `path`; a missing file yields no profiles
    pub fn load(path: &Path) -> RunnerResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            for (name, profile) in &config.profiles {
                profile.validate(name)?;
            }
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Look up a profile. `default` falls back to built-in settings when
    /// the file does not define it.
    pub fn profile(&self, name: &str) -> RunnerResult<Profile> {
        match self.profiles.get(name) {
            Some(profile) => Ok(profile.clone()),
            None if name == DEFAULT_PROFILE => Ok(Profile::default()),
            None => Err(RunnerError::UnknownProfile {
                name: name.to_string(),
                available: self.names(),
            }),
        }
    }

    /// Profile names, always including `default`
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        if !self.profiles.contains_key(DEFAULT_PROFILE) {
            names.insert(0, DEFAULT_PROFILE.to_string());
        }
        names
    }
}
