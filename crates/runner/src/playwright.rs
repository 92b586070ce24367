//! Playwright browser automation
//!
//! Each [`PlaywrightDriver`] owns a `node` process running an embedded
//! driver script. Requests and responses are newline-delimited JSON on the
//! child's stdin/stdout; every request carries an id and is answered in
//! order.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use stepdeck_common::StepError;

use crate::config::BrowserConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::pool::Resource;

const DRIVER_SCRIPT: &str = include_str!("driver.js");

/// Headroom over the driver-side action timeout before the round-trip
/// itself is considered hung
const ROUND_TRIP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Element states understood by [`PlaywrightDriver::wait_for`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Handshake {
    ready: bool,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Check that `node` can load the `playwright` package
pub async fn ensure_playwright() -> RunnerResult<()> {
    let status = Command::new("node")
        .args(["-e", "require.resolve('playwright')"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(RunnerError::PlaywrightNotFound),
    }
}

/// One browser with a single page, driven over JSON lines
pub struct PlaywrightDriver {
    id: usize,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_request: u64,
    action_timeout: Duration,
    /// Set when the process stopped answering; the pool replaces it
    broken: bool,
}

impl PlaywrightDriver {
    /// Start the driver and wait for the browser to come up
    pub async fn launch(config: &BrowserConfig, id: usize) -> RunnerResult<Self> {
        info!(
            "Launching {} driver #{} ({})",
            config.browser.as_str(),
            id,
            if config.headless { "headless" } else { "headed" }
        );

        let mut command = Command::new("node");
        command
            .args(["-e", DRIVER_SCRIPT])
            .env("STEPDECK_BROWSER", config.browser.as_str())
            .env("STEPDECK_HEADLESS", if config.headless { "1" } else { "0" })
            .env("STEPDECK_VIEWPORT_WIDTH", config.viewport_width.to_string())
            .env("STEPDECK_VIEWPORT_HEIGHT", config.viewport_height.to_string())
            .env("STEPDECK_ACTION_TIMEOUT_MS", config.action_timeout_ms.to_string());

        Self::start(command, id, config.launch_timeout(), config.action_timeout()).await
    }

    /// Spawn any process speaking the driver protocol and wait for its
    /// readiness line
    async fn start(
        mut command: Command,
        id: usize,
        launch_timeout: Duration,
        action_timeout: Duration,
    ) -> RunnerResult<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Driver(format!("failed to spawn driver: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::Driver("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Driver("driver stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(driver = id, "{}", line);
                }
            });
        }

        let mut stdout = BufReader::new(stdout).lines();
        let handshake = tokio::time::timeout(launch_timeout, async {
            while let Some(line) = stdout.next_line().await? {
                if let Ok(handshake) = serde_json::from_str::<Handshake>(&line) {
                    return Ok(Some(handshake));
                }
            }
            Ok::<_, std::io::Error>(None)
        })
        .await
        .map_err(|_| {
            RunnerError::Driver(format!(
                "browser did not start within {} ms",
                launch_timeout.as_millis()
            ))
        })??;

        match handshake {
            Some(Handshake {
                ready: true,
                version,
                ..
            }) => {
                debug!(driver = id, version = ?version, "Browser ready");
            }
            Some(Handshake { error, .. }) => {
                return Err(RunnerError::Driver(
                    error.unwrap_or_else(|| "browser failed to launch".to_string()),
                ))
            }
            None => {
                return Err(RunnerError::Driver(
                    "driver exited before the browser was ready".to_string(),
                ))
            }
        }

        Ok(Self {
            id,
            child,
            stdin,
            stdout,
            next_request: 0,
            action_timeout,
            broken: false,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// True once the driver stopped answering or an exchange was cut short
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Send one command and wait for its answer
    pub async fn request(&mut self, op: &str, params: Value) -> Result<Value, StepError> {
        if self.broken {
            return Err(StepError::Resource(format!("browser driver #{} is not responding", self.id)));
        }

        self.next_request += 1;
        let id = self.next_request;
        let mut message = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        message.insert("id".to_string(), json!(id));
        message.insert("op".to_string(), json!(op));
        let line = format!("{}\n", Value::Object(message));

        let limit = self.action_timeout + ROUND_TRIP_GRACE;
        // Cleared only once the reply is read. If this future is dropped
        // mid-exchange the pipe may hold a partial request or a late reply,
        // so the driver must not be reused.
        self.broken = true;
        let exchange = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.flush().await?;
            loop {
                match self.stdout.next_line().await? {
                    Some(line) => match serde_json::from_str::<Response>(&line) {
                        Ok(response) if response.id == Some(id) => return Ok(Some(response)),
                        Ok(_) => continue,
                        Err(_) => debug!(driver = self.id, "{}", line),
                    },
                    None => return Ok::<_, std::io::Error>(None),
                }
            }
        };

        let exchanged = tokio::time::timeout(limit, exchange).await;
        let response = match exchanged {
            Ok(Ok(Some(response))) => {
                self.broken = false;
                response
            }
            Ok(Ok(None)) => {
                return Err(StepError::Resource(format!("browser driver #{} exited", self.id)));
            }
            Ok(Err(e)) => {
                return Err(StepError::Resource(format!("browser driver #{}: {}", self.id, e)));
            }
            Err(_) => {
                return Err(StepError::Timeout {
                    what: format!("browser driver '{}'", op),
                    after_ms: limit.as_millis() as u64,
                });
            }
        };

        if response.ok {
            return Ok(response.value);
        }

        let message = response.error.unwrap_or_else(|| "unknown driver error".to_string());
        Err(match response.kind.as_deref() {
            Some("timeout") => StepError::Timeout {
                what: format!("{} ({})", op, message),
                after_ms: self.action_timeout.as_millis() as u64,
            },
            Some("not_found") => StepError::NotFound(message),
            _ => StepError::Other(format!("{}: {}", op, message)),
        })
    }

    pub async fn goto(&mut self, url: &str) -> Result<(), StepError> {
        self.request("goto", json!({ "url": url })).await.map(|_| ())
    }

    pub async fn click(&mut self, selector: &str) -> Result<(), StepError> {
        self.request("click", json!({ "selector": selector })).await.map(|_| ())
    }

    pub async fn fill(&mut self, selector: &str, value: &str) -> Result<(), StepError> {
        self.request("fill", json!({ "selector": selector, "value": value }))
            .await
            .map(|_| ())
    }

    /// Press a key on an element, or on the page when `selector` is `None`
    pub async fn press(&mut self, selector: Option<&str>, key: &str) -> Result<(), StepError> {
        self.request("press", json!({ "selector": selector, "key": key }))
            .await
            .map(|_| ())
    }

    pub async fn hover(&mut self, selector: &str) -> Result<(), StepError> {
        self.request("hover", json!({ "selector": selector })).await.map(|_| ())
    }

    pub async fn check(&mut self, selector: &str) -> Result<(), StepError> {
        self.request("check", json!({ "selector": selector })).await.map(|_| ())
    }

    pub async fn uncheck(&mut self, selector: &str) -> Result<(), StepError> {
        self.request("uncheck", json!({ "selector": selector })).await.map(|_| ())
    }

    pub async fn select(&mut self, selector: &str, value: &str) -> Result<(), StepError> {
        self.request("select", json!({ "selector": selector, "value": value }))
            .await
            .map(|_| ())
    }

    pub async fn wait_for(&mut self, selector: &str, state: WaitState) -> Result<(), StepError> {
        self.request("wait", json!({ "selector": selector, "state": state.as_str() }))
            .await
            .map(|_| ())
    }

    /// Inner text of the first match; `NotFound` when nothing matches
    pub async fn text(&mut self, selector: &str) -> Result<String, StepError> {
        let value = self.request("text", json!({ "selector": selector })).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn is_visible(&mut self, selector: &str) -> Result<bool, StepError> {
        let value = self.request("visible", json!({ "selector": selector })).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn count(&mut self, selector: &str) -> Result<usize, StepError> {
        let value = self.request("count", json!({ "selector": selector })).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    pub async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>, StepError> {
        let value = self
            .request("attribute", json!({ "selector": selector, "name": name }))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    pub async fn url(&mut self) -> Result<String, StepError> {
        let value = self.request("url", Value::Null).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn title(&mut self) -> Result<String, StepError> {
        let value = self.request("title", Value::Null).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// PNG bytes of the current page
    pub async fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>, StepError> {
        let value = self
            .request("screenshot", json!({ "full_page": full_page }))
            .await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| StepError::Other("screenshot returned no data".to_string()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| StepError::Other(format!("invalid screenshot data: {}", e)))
    }

    /// Evaluate a JavaScript expression in the page
    pub async fn evaluate(&mut self, expression: &str) -> Result<Value, StepError> {
        self.request("evaluate", json!({ "expression": expression })).await
    }
}

#[async_trait]
impl Resource for PlaywrightDriver {
    /// Fresh browser context and page for the next scenario
    async fn reset(&mut self) -> Result<(), StepError> {
        self.request("reset", Value::Null).await.map(|_| ())
    }

    async fn close(&mut self) -> Result<(), StepError> {
        if !self.broken {
            if let Err(e) = self.request("close", Value::Null).await {
                warn!("Driver #{} did not close cleanly: {}", self.id, e);
            }
        }
        match tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => self
                .child
                .kill()
                .await
                .map_err(|e| StepError::Resource(format!("failed to kill driver #{}: {}", self.id, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_names() {
        assert_eq!(Browser::default().as_str(), "chromium");
        let parsed: Browser = serde_json::from_str("\"webkit\"").unwrap();
        assert_eq!(parsed, Browser::Webkit);
    }

    #[test]
    fn test_response_decoding() {
        let ok: Response = serde_json::from_str(r#"{"id":3,"ok":true,"value":"Cart"}"#).unwrap();
        assert_eq!(ok.id, Some(3));
        assert_eq!(ok.value, json!("Cart"));

        let err: Response = serde_json::from_str(
            r##"{"id":4,"ok":false,"kind":"not_found","error":"no element matches '#x'"}"##,
        )
        .unwrap();
        assert!(!err.ok);
        assert_eq!(err.kind.as_deref(), Some("not_found"));
        assert_eq!(err.value, Value::Null);
    }

    #[test]
    fn test_driver_script_covers_every_op() {
        for op in [
            "goto", "click", "fill", "press", "hover", "check", "uncheck", "select", "wait",
            "text", "visible", "count", "attribute", "url", "title", "screenshot", "evaluate",
            "reset", "close",
        ] {
            assert!(DRIVER_SCRIPT.contains(&format!("{}:", op)) || DRIVER_SCRIPT.contains(&format!("'{}'", op)), "{}", op);
        }
    }

    fn fake_driver(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }

    async fn start_fake(script: &str) -> PlaywrightDriver {
        PlaywrightDriver::start(fake_driver(script), 1, Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let mut driver = start_fake(
            r##"
echo 'starting'
echo '{"ready":true,"version":"fake"}'
read line; echo 'console noise'; echo '{"id":7,"ok":true,"value":"stale"}'; echo '{"id":1,"ok":true,"value":"Cart"}'
read line; echo '{"id":2,"ok":false,"kind":"not_found","error":"no element matches #missing"}'
read line; echo '{"id":3,"ok":false,"kind":"timeout","error":"waiting for #spinner"}'
read line; echo '{"id":4,"ok":false,"error":"page crashed"}'
read line
"##,
        )
        .await;

        assert_eq!(driver.text("h1").await.unwrap(), "Cart");
        assert!(matches!(driver.text("#missing").await, Err(StepError::NotFound(_))));
        assert!(matches!(
            driver.wait_for("#spinner", WaitState::Hidden).await,
            Err(StepError::Timeout { .. })
        ));
        assert!(matches!(driver.title().await, Err(StepError::Other(_))));
        assert!(!driver.is_broken());

        assert!(matches!(driver.url().await, Err(StepError::Resource(_))));
        assert!(driver.is_broken());
        assert!(matches!(driver.reset().await, Err(StepError::Resource(_))));
    }

    #[tokio::test]
    async fn test_abandoned_request_breaks_driver() {
        let mut driver = start_fake(
            r#"
echo '{"ready":true}'
read line; sleep 5
"#,
        )
        .await;

        let abandoned = tokio::time::timeout(Duration::from_millis(100), driver.url()).await;
        assert!(abandoned.is_err());
        assert!(driver.is_broken());
        assert!(matches!(driver.title().await, Err(StepError::Resource(_))));
    }

    #[tokio::test]
    async fn test_failed_launch_is_reported() {
        let result = PlaywrightDriver::start(
            fake_driver(r#"echo '{"ready":false,"error":"chromium missing"}'"#),
            2,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .await;
        match result {
            Err(RunnerError::Driver(message)) => assert_eq!(message, "chromium missing"),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("launch should fail"),
        }
    }
}
