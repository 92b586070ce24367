//! Application under test: spawned before the run, stopped after it

use std::net::TcpListener;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::WebServerConfig;
use crate::error::{RunnerError, RunnerResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Handle to a running server process; stopping happens on drop too
pub struct WebServer {
    child: Option<Child>,
    url: String,
}

impl WebServer {
    /// Spawn the configured command and wait until its URL answers 2xx
    pub async fn start(config: &WebServerConfig) -> RunnerResult<Self> {
        info!("Starting web server: {} {}", config.command, config.args.join(" "));

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|e| {
            RunnerError::ServerStartup(format!("failed to spawn '{}': {}", config.command, e))
        })?;

        let mut server = Self {
            child: Some(child),
            url: config.url.clone(),
        };
        server
            .wait_for_healthy(Duration::from_millis(config.startup_timeout_ms))
            .await?;

        info!("Web server is healthy at {}", server.url);
        Ok(server)
    }

    async fn wait_for_healthy(&mut self, limit: Duration) -> RunnerResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < limit {
            attempts += 1;

            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.child = None;
                    return Err(RunnerError::ServerStartup(format!(
                        "server exited before becoming healthy ({})",
                        status
                    )));
                }
            }

            match client.get(&self.url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => debug!("Health check returned {}", resp.status()),
                Err(e) if e.is_connect() => {}
                Err(e) => warn!("Health check error: {}", e),
            }

            sleep(POLL_INTERVAL).await;
        }

        self.stop().await;
        Err(RunnerError::ServerHealthCheck {
            url: self.url.clone(),
            attempts,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// SIGTERM, then kill once the grace period runs out
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        info!("Stopping web server (pid: {:?})", child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && tokio::time::timeout(STOP_GRACE, child.wait()).await.is_ok()
                {
                    return;
                }
            }
        }

        if let Err(e) = child.kill().await {
            warn!("Failed to kill web server: {}", e);
        }
    }
}

impl Drop for WebServer {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Ask the OS for a port nobody is listening on
pub fn find_free_port() -> std::io::Result<u16> {
    Ok(TcpListener::bind("127.0.0.1:0")?.local_addr()?.port())
}
