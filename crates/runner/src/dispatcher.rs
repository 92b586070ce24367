//! Runs one scenario's lines against its world

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use stepdeck_common::{Scenario, ScenarioLine, StepError, StepRegistry, StepResult};

use crate::report::{ScenarioResult, ScenarioStatus, StepOutcome};
use crate::world::{ScenarioContext, ScenarioEnv, World};

/// Per-scenario execution limits
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub step_timeout: Option<Duration>,
    pub scenario_timeout: Option<Duration>,
    /// Match every line without running anything
    pub dry_run: bool,
    pub artifacts_dir: PathBuf,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            step_timeout: Some(Duration::from_secs(30)),
            scenario_timeout: None,
            dry_run: false,
            artifacts_dir: PathBuf::from("stepdeck-results/artifacts"),
        }
    }
}

/// Run a scenario to completion: set up the world, run each line in
/// order, skip everything after the first failure, and always tear down.
pub async fn run_scenario<W: World>(
    registry: &StepRegistry<W>,
    shared: &W::Shared,
    scenario: &Scenario,
    slot: usize,
    options: &DispatchOptions,
) -> ScenarioResult {
    let start = Instant::now();

    let mut result = if options.dry_run {
        dry_run(registry, scenario)
    } else {
        execute(registry, shared, scenario, slot, options).await
    };

    result.duration_ms = start.elapsed().as_millis() as u64;
    result
}

fn dry_run<W>(registry: &StepRegistry<W>, scenario: &Scenario) -> ScenarioResult {
    let mut result = ScenarioResult::new(scenario);
    result.status = ScenarioStatus::Skipped;

    for line in &scenario.steps {
        match registry.lookup(&line.text) {
            Ok(_) => result.steps.push(StepOutcome::skipped(line)),
            Err(e) => {
                result.steps.push(StepOutcome::failed(line, 0, &e));
                result.fail(Some(line), &e);
            }
        }
    }
    result
}

async fn execute<W: World>(
    registry: &StepRegistry<W>,
    shared: &W::Shared,
    scenario: &Scenario,
    slot: usize,
    options: &DispatchOptions,
) -> ScenarioResult {
    let env = ScenarioEnv::new(scenario, &options.artifacts_dir, slot);
    let deadline = options.scenario_timeout.map(|d| (tokio::time::Instant::now() + d, d));
    let mut ctx = ScenarioContext::<W>::new(env);

    debug!(scenario = %scenario.name, slot, "Setting up world");
    let setup = AssertUnwindSafe(ctx.setup(shared))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panicked("world setup", panic)));
    if let Err(e) = setup {
        warn!(scenario = %scenario.name, "World setup failed: {}", e);
        return ScenarioResult::aborted(scenario, &e);
    }

    let mut result = ScenarioResult::new(scenario);
    let mut failed = false;

    for line in &scenario.steps {
        if failed {
            result.steps.push(StepOutcome::skipped(line));
            continue;
        }

        let step_start = Instant::now();
        let outcome = run_line(registry, &mut ctx, line, options.step_timeout, deadline).await;
        let elapsed = step_start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                debug!(line = line.line, step = %line.text, elapsed, "Step passed");
                result.steps.push(StepOutcome::passed(line, elapsed));
            }
            Err(e) => {
                debug!(line = line.line, step = %line.text, kind = %e.kind(), "Step failed");
                result.steps.push(StepOutcome::failed(line, elapsed, &e));
                result.fail(Some(line), &e);
                failed = true;

                if !e.is_match_error() {
                    match AssertUnwindSafe(ctx.capture_failure()).catch_unwind().await {
                        Ok(attachments) => result.attachments.extend(attachments),
                        Err(panic) => {
                            let e = panicked("failure capture", panic);
                            warn!(scenario = %scenario.name, "{}", e);
                        }
                    }
                }
            }
        }
    }

    match std::panic::catch_unwind(AssertUnwindSafe(|| ctx.take_attachments())) {
        Ok(attachments) => result.attachments.extend(attachments),
        Err(panic) => warn!(scenario = %scenario.name, "{}", panicked("attachment collection", panic)),
    }
    let teardown = AssertUnwindSafe(ctx.teardown())
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panicked("world teardown", panic)));
    if let Err(e) = teardown {
        warn!(scenario = %scenario.name, "World teardown failed: {}", e);
        result.fail(None, &e);
    }

    result
}

async fn run_line<W: World>(
    registry: &StepRegistry<W>,
    ctx: &mut ScenarioContext<W>,
    line: &ScenarioLine,
    step_timeout: Option<Duration>,
    deadline: Option<(tokio::time::Instant, Duration)>,
) -> StepResult {
    let step = registry.lookup(&line.text)?;
    let args = step.arguments(line)?;
    let world = ctx.world_mut()?;

    let now = tokio::time::Instant::now();
    let step_limit = step_timeout.map(|d| (now + d, StepError::Timeout {
        what: format!("step '{}'", line.text),
        after_ms: d.as_millis() as u64,
    }));
    let scenario_limit = deadline.map(|(at, d)| (at, StepError::Timeout {
        what: "scenario deadline".to_string(),
        after_ms: d.as_millis() as u64,
    }));
    let limit = match (step_limit, scenario_limit) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    if let Some((at, err)) = &limit {
        if *at <= now {
            return Err(err.clone());
        }
    }

    let call = AssertUnwindSafe(step.call(world, args)).catch_unwind();
    let outcome = match limit {
        Some((at, err)) => match tokio::time::timeout_at(at, call).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(err),
        },
        None => call.await,
    };

    outcome.unwrap_or_else(|panic| Err(panicked("step", panic)))
}

/// Text carried by a panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

pub(crate) fn panicked(what: &str, panic: Box<dyn Any + Send>) -> StepError {
    StepError::Other(format!("{} panicked: {}", what, panic_message(&*panic)))
}
