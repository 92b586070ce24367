//! Per-scenario worlds and their lifecycle

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};

use stepdeck_common::{Scenario, StepError};

use crate::report::Attachment;

/// What a world knows about the scenario it serves
#[derive(Debug, Clone)]
pub struct ScenarioEnv {
    pub scenario: String,
    pub feature: String,
    pub tags: Vec<String>,
    /// Where attachments for this scenario are written
    pub artifacts_dir: PathBuf,
    /// Worker slot running the scenario, `0..parallel`
    pub slot: usize,
}

impl ScenarioEnv {
    pub fn new(scenario: &Scenario, artifacts_root: &std::path::Path, slot: usize) -> Self {
        Self {
            scenario: scenario.name.clone(),
            feature: scenario.feature.clone(),
            tags: scenario.tags.clone(),
            artifacts_dir: artifacts_root.join(slug(&format!(
                "{}-{}-{}",
                scenario.path.with_extension("").display(),
                scenario.name,
                scenario.line
            ))),
            slot,
        }
    }
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Mutable state threaded through every step of one scenario
///
/// A world is created for each scenario and never shared between
/// concurrently running scenarios. Run-wide state such as resource pools
/// lives in [`World::Shared`].
#[async_trait]
pub trait World: Sized + Send + 'static {
    type Shared: Send + Sync + 'static;

    /// Build the world before the first step; may acquire resources
    async fn setup(shared: &Self::Shared, env: &ScenarioEnv) -> Result<Self, StepError>;

    /// Release resources after the last step attempt
    async fn teardown(&mut self) -> Result<(), StepError> {
        Ok(())
    }

    /// Capture diagnostics after a failed step, before teardown
    async fn on_failure(&mut self, _env: &ScenarioEnv) -> Vec<Attachment> {
        Vec::new()
    }

    /// Files produced by steps, collected once before teardown
    fn take_attachments(&mut self) -> Vec<Attachment> {
        Vec::new()
    }

    /// Called once after every scenario has finished
    async fn after_all(_shared: &Self::Shared) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    Ready,
    TornDown,
}

/// Owns a world and enforces `Uninitialized -> Ready -> TornDown`
pub struct ScenarioContext<W: World> {
    state: ContextState,
    world: Option<W>,
    env: ScenarioEnv,
}

impl<W: World> ScenarioContext<W> {
    pub fn new(env: ScenarioEnv) -> Self {
        Self {
            state: ContextState::Uninitialized,
            world: None,
            env,
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn env(&self) -> &ScenarioEnv {
        &self.env
    }

    /// Build the world. A failed setup leaves nothing to release, so the
    /// context goes straight to `TornDown`.
    pub async fn setup(&mut self, shared: &W::Shared) -> Result<(), StepError> {
        if self.state != ContextState::Uninitialized {
            return Err(StepError::Resource(format!(
                "context for '{}' is already {:?}",
                self.env.scenario, self.state
            )));
        }

        match W::setup(shared, &self.env).await {
            Ok(world) => {
                self.world = Some(world);
                self.state = ContextState::Ready;
                debug!(scenario = %self.env.scenario, slot = self.env.slot, "World ready");
                Ok(())
            }
            Err(e) => {
                self.state = ContextState::TornDown;
                Err(e)
            }
        }
    }

    pub fn world_mut(&mut self) -> Result<&mut W, StepError> {
        match (self.state, self.world.as_mut()) {
            (ContextState::Ready, Some(world)) => Ok(world),
            (state, _) => Err(StepError::Resource(format!(
                "world for '{}' is not available ({:?})",
                self.env.scenario, state
            ))),
        }
    }

    pub async fn capture_failure(&mut self) -> Vec<Attachment> {
        match (self.state, self.world.as_mut()) {
            (ContextState::Ready, Some(world)) => world.on_failure(&self.env).await,
            _ => Vec::new(),
        }
    }

    pub fn take_attachments(&mut self) -> Vec<Attachment> {
        match (self.state, self.world.as_mut()) {
            (ContextState::Ready, Some(world)) => world.take_attachments(),
            _ => Vec::new(),
        }
    }

    /// Release the world. Runs at most once; later calls are no-ops.
    pub async fn teardown(&mut self) -> Result<(), StepError> {
        let previous = std::mem::replace(&mut self.state, ContextState::TornDown);
        if previous != ContextState::Ready {
            return Ok(());
        }

        let result = match self.world.as_mut() {
            Some(world) => world.teardown().await,
            None => Ok(()),
        };
        self.world = None;
        debug!(scenario = %self.env.scenario, ok = result.is_ok(), "World torn down");
        result
    }
}

impl<W: World> Drop for ScenarioContext<W> {
    fn drop(&mut self) {
        if self.state == ContextState::Ready {
            warn!(scenario = %self.env.scenario, "Scenario context dropped without teardown");
        }
    }
}
