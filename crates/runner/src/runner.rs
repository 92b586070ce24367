//! Suite runner: selects scenarios and schedules them on worker slots

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use stepdeck_common::{Feature, Scenario, StepError, StepRegistry, TagExpr};

use crate::dispatcher::{panicked, run_scenario, DispatchOptions};
use crate::report::{ScenarioResult, ScenarioStatus, SuiteResult};
use crate::world::World;

/// Options for a whole run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Concurrent scenario slots
    pub parallel: usize,
    pub tags: TagExpr,
    /// Case-insensitive scenario name substring
    pub name_filter: Option<String>,
    /// Stop scheduling after the first failed scenario
    pub fail_fast: bool,
    pub dispatch: DispatchOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallel: 1,
            tags: TagExpr::All,
            name_filter: None,
            fail_fast: false,
            dispatch: DispatchOptions::default(),
        }
    }
}

/// Runs scenarios against a frozen registry
pub struct Runner<W: World> {
    registry: Arc<StepRegistry<W>>,
    shared: Arc<W::Shared>,
    options: RunOptions,
}

impl<W: World> Runner<W> {
    pub fn new(registry: Arc<StepRegistry<W>>, shared: W::Shared, options: RunOptions) -> Self {
        Self {
            registry,
            shared: Arc::new(shared),
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn shared(&self) -> &W::Shared {
        &self.shared
    }

    /// Scenarios passing the tag and name filters, in source order
    pub fn select(&self, features: &[Feature]) -> Vec<Scenario> {
        let needle = self.options.name_filter.as_ref().map(|n| n.to_lowercase());
        features
            .iter()
            .flat_map(|f| f.scenarios.iter())
            .filter(|s| self.options.tags.matches(&s.tags))
            .filter(|s| {
                needle
                    .as_ref()
                    .map_or(true, |n| s.name.to_lowercase().contains(n.as_str()))
            })
            .cloned()
            .collect()
    }

    /// Run every selected scenario. Results come back in source order no
    /// matter which order the slots finished in.
    pub async fn run(&self, features: &[Feature]) -> SuiteResult {
        let scenarios = self.select(features);
        let started_at = Utc::now();
        let start = Instant::now();
        let parallel = self.options.parallel.max(1);

        info!(
            "Running {} scenario(s) on {} slot(s){}",
            scenarios.len(),
            parallel,
            if self.options.dispatch.dry_run { " (dry run)" } else { "" }
        );

        let semaphore = Arc::new(Semaphore::new(parallel));
        let slots = Arc::new(Mutex::new((0..parallel).rev().collect::<Vec<usize>>()));
        let stop = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let mut results: Vec<Option<ScenarioResult>> = (0..scenarios.len()).map(|_| None).collect();

        for (index, scenario) in scenarios.iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            if stop.load(Ordering::SeqCst) {
                debug!(scenario = %scenario.name, "Not scheduled after earlier failure");
                results[index] = Some(ScenarioResult::skipped(scenario));
                continue;
            }

            let registry = self.registry.clone();
            let shared = self.shared.clone();
            let options = self.options.dispatch.clone();
            let fail_fast = self.options.fail_fast;
            let slots = slots.clone();
            let stop = stop.clone();
            let scenario = scenario.clone();

            tasks.spawn(async move {
                let slot = SlotGuard::take(&slots);
                let run = run_scenario(&registry, &shared, &scenario, slot.id, &options);
                let result = AssertUnwindSafe(run).catch_unwind().await.unwrap_or_else(|panic| {
                    ScenarioResult::aborted(&scenario, &panicked("scenario", panic))
                });
                drop(slot);

                if fail_fast && result.status == ScenarioStatus::Failed {
                    stop.store(true, Ordering::SeqCst);
                }
                drop(permit);
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    log_result(&result);
                    results[index] = Some(result);
                }
                Err(e) => error!("Scenario task failed: {}", e),
            }
        }

        let scenarios: Vec<ScenarioResult> = results
            .into_iter()
            .zip(&scenarios)
            .map(|(result, scenario)| {
                result.unwrap_or_else(|| {
                    ScenarioResult::aborted(
                        scenario,
                        &StepError::Other("scenario task did not complete".to_string()),
                    )
                })
            })
            .collect();

        let suite = SuiteResult::new(started_at, start.elapsed().as_millis() as u64, scenarios);
        info!(
            "Results: {} passed, {} failed, {} skipped ({} ms)",
            suite.passed, suite.failed, suite.skipped, suite.duration_ms
        );
        suite
    }

    /// Release run-wide state such as resource pools
    pub async fn shutdown(&self) {
        W::after_all(&self.shared).await;
    }
}

/// Holds a worker slot and hands it back even if the scenario unwinds
struct SlotGuard {
    id: usize,
    free: Arc<Mutex<Vec<usize>>>,
}

impl SlotGuard {
    /// The semaphore permit held by the caller guarantees a free slot
    fn take(free: &Arc<Mutex<Vec<usize>>>) -> Self {
        let id = free.lock().pop().unwrap_or(0);
        Self {
            id,
            free: free.clone(),
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.free.lock().push(self.id);
    }
}

fn log_result(result: &ScenarioResult) {
    match result.status {
        ScenarioStatus::Passed => info!("✓ {} ({} ms)", result.name, result.duration_ms),
        ScenarioStatus::Skipped => debug!("- {}", result.name),
        ScenarioStatus::Failed => {
            let reason = result
                .error
                .as_ref()
                .map(|e| match &e.step {
                    Some(step) => format!("{}: {}", step, e.message),
                    None => e.message.clone(),
                })
                .unwrap_or_else(|| "unknown error".to_string());
            error!("✗ {} - {}", result.name, reason);
            if !result.attachments.is_empty() {
                warn!("  {} attachment(s) saved for {}", result.attachments.len(), result.id);
            }
        }
    }
}
