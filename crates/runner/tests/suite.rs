//! End-to-end runs of parsed features through the scheduler

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stepdeck_common::{
    ensure_eq, parse_feature, BoxFuture, ErrorKind, Feature, StepArgs, StepError, StepRegistry,
    StepResult, TagExpr,
};
use stepdeck_runner::{
    write_reports, DispatchOptions, ReportFormat, RunOptions, Runner, ScenarioEnv,
    ScenarioStatus, StepStatus, SuiteResult, World,
};

#[derive(Default)]
struct Bank {
    setups: AtomicUsize,
    teardowns: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    slots: Mutex<HashSet<usize>>,
    busy: Mutex<HashSet<usize>>,
    shared_slots: AtomicUsize,
}

struct Account {
    bank: Arc<Bank>,
    balance: i64,
    slot: usize,
    sticky: bool,
}

#[async_trait]
impl World for Account {
    type Shared = Arc<Bank>;

    async fn setup(shared: &Self::Shared, env: &ScenarioEnv) -> Result<Self, StepError> {
        if env.tags.iter().any(|t| t == "@closed") {
            return Err(StepError::Resource("account is closed".to_string()));
        }
        if env.tags.iter().any(|t| t == "@jammed") {
            panic!("vault door jammed");
        }
        shared.setups.fetch_add(1, Ordering::SeqCst);
        shared.slots.lock().insert(env.slot);
        if !shared.busy.lock().insert(env.slot) {
            shared.shared_slots.fetch_add(1, Ordering::SeqCst);
        }
        let active = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak.fetch_max(active, Ordering::SeqCst);
        Ok(Self {
            bank: shared.clone(),
            balance: 0,
            slot: env.slot,
            sticky: env.tags.iter().any(|t| t == "@sticky"),
        })
    }

    async fn teardown(&mut self) -> Result<(), StepError> {
        self.bank.busy.lock().remove(&self.slot);
        self.bank.active.fetch_sub(1, Ordering::SeqCst);
        self.bank.teardowns.fetch_add(1, Ordering::SeqCst);
        if self.sticky {
            panic!("ledger stuck");
        }
        Ok(())
    }
}

fn opened(world: &mut Account, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        world.balance = args.int(0)?;
        Ok(())
    })
}

fn deposit(world: &mut Account, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let amount = args.int(0)?;
        tokio::time::sleep(Duration::from_millis(args.int(1)? as u64)).await;
        world.balance += amount;
        Ok(())
    })
}

fn balance_is(world: &mut Account, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move { ensure_eq(args.int(0)?, world.balance, "balance") })
}

fn registry() -> Arc<StepRegistry<Account>> {
    let mut steps = StepRegistry::builder();
    steps
        .given("an account with {int}", opened)
        .unwrap()
        .when("I deposit {int} over {int} ms", deposit)
        .unwrap()
        .then("the balance should be {int}", balance_is)
        .unwrap();
    Arc::new(steps.build())
}

fn feature(source: &str) -> Vec<Feature> {
    vec![parse_feature(source, Path::new("features/bank.feature")).unwrap()]
}

async fn run(source: &str, options: RunOptions) -> (SuiteResult, Arc<Bank>) {
    let bank = Arc::new(Bank::default());
    let runner = Runner::new(registry(), bank.clone(), options);
    let suite = runner.run(&feature(source)).await;
    runner.shutdown().await;
    (suite, bank)
}

const DEPOSITS: &str = r#"
Feature: Deposits

  Scenario: Slow deposit
    Given an account with 10
    When I deposit 5 over 120 ms
    Then the balance should be 15

  Scenario: Quick deposit
    Given an account with 100
    When I deposit 1 over 5 ms
    Then the balance should be 101

  Scenario: Medium deposit
    Given an account with 0
    When I deposit 7 over 60 ms
    Then the balance should be 7

  Scenario: Empty deposit
    Given an account with 3
    When I deposit 0 over 1 ms
    Then the balance should be 3
"#;

#[tokio::test]
async fn test_parallel_scenarios_keep_independent_worlds() {
    let options = RunOptions {
        parallel: 2,
        ..RunOptions::default()
    };
    let (suite, bank) = run(DEPOSITS, options).await;

    assert!(suite.success(), "{:#?}", suite.scenarios);
    assert_eq!(suite.passed, 4);

    let names: Vec<&str> = suite.scenarios.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Slow deposit", "Quick deposit", "Medium deposit", "Empty deposit"]
    );

    assert_eq!(bank.setups.load(Ordering::SeqCst), 4);
    assert_eq!(bank.teardowns.load(Ordering::SeqCst), 4);
    assert!(bank.peak.load(Ordering::SeqCst) <= 2);
    assert!(bank.slots.lock().iter().all(|slot| *slot < 2));
}

#[tokio::test]
async fn test_failure_skips_remaining_lines_and_tears_down() {
    let source = r#"
Feature: Withdrawals

  Scenario: Wrong balance
    Given an account with 10
    Then the balance should be 11
    When I deposit 5 over 1 ms
    Then the balance should be 15
"#;
    let (suite, bank) = run(source, RunOptions::default()).await;

    let scenario = &suite.scenarios[0];
    assert_eq!(scenario.status, ScenarioStatus::Failed);
    let statuses: Vec<StepStatus> = scenario.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Passed, StepStatus::Failed, StepStatus::Skipped, StepStatus::Skipped]
    );

    let error = scenario.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Assertion);
    assert_eq!(error.line, Some(6));
    assert_eq!(bank.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unmatched_line_fails_without_running_handlers() {
    let source = r#"
Feature: Transfers

  Scenario: Unknown step
    Given an account with 10
    When I transfer 5 to savings
    Then the balance should be 5
"#;
    let (suite, bank) = run(source, RunOptions::default()).await;

    let scenario = &suite.scenarios[0];
    assert_eq!(scenario.status, ScenarioStatus::Failed);
    assert_eq!(scenario.error.as_ref().unwrap().kind, ErrorKind::NoMatch);
    assert_eq!(scenario.steps[2].status, StepStatus::Skipped);
    assert_eq!(bank.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_setup_failure_aborts_only_that_scenario() {
    let source = r#"
Feature: Accounts

  @closed
  Scenario: Closed account
    Given an account with 1

  Scenario: Open account
    Given an account with 1
    Then the balance should be 1
"#;
    let (suite, bank) = run(source, RunOptions::default()).await;

    assert_eq!(suite.scenarios[0].status, ScenarioStatus::Failed);
    assert_eq!(suite.scenarios[0].error.as_ref().unwrap().kind, ErrorKind::Resource);
    assert_eq!(suite.scenarios[1].status, ScenarioStatus::Passed);
    assert_eq!(bank.setups.load(Ordering::SeqCst), 1);
    assert_eq!(bank.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fail_fast_skips_unscheduled_scenarios() {
    let source = r#"
Feature: Fail fast

  Scenario: Broken
    Given an account with 1
    Then the balance should be 2

  Scenario: Never runs
    Given an account with 1

  Scenario: Never runs either
    Given an account with 1
"#;
    let options = RunOptions {
        fail_fast: true,
        ..RunOptions::default()
    };
    let (suite, bank) = run(source, options).await;

    let statuses: Vec<ScenarioStatus> = suite.scenarios.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![ScenarioStatus::Failed, ScenarioStatus::Skipped, ScenarioStatus::Skipped]
    );
    assert_eq!(bank.setups.load(Ordering::SeqCst), 1);
    assert!(!suite.success());
}

#[tokio::test]
async fn test_tag_and_name_filters() {
    let source = r#"
@bank
Feature: Filters

  @smoke
  Scenario: Smoke deposit
    Given an account with 1

  @smoke @wip
  Scenario: Smoke work in progress
    Given an account with 1

  Scenario: Regular deposit
    Given an account with 1
"#;
    let options = RunOptions {
        tags: TagExpr::parse("@smoke and not @wip").unwrap(),
        ..RunOptions::default()
    };
    let (suite, _) = run(source, options).await;
    let names: Vec<&str> = suite.scenarios.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Smoke deposit"]);

    let options = RunOptions {
        name_filter: Some("DEPOSIT".to_string()),
        ..RunOptions::default()
    };
    let (suite, _) = run(source, options).await;
    assert_eq!(suite.total, 2);
}

#[tokio::test]
async fn test_dry_run_touches_no_world() {
    let source = r#"
Feature: Dry run

  Scenario: All known
    Given an account with 1
    Then the balance should be 1

  Scenario: One unknown
    Given an account with 1
    When I close the account
"#;
    let options = RunOptions {
        dispatch: DispatchOptions {
            dry_run: true,
            ..DispatchOptions::default()
        },
        ..RunOptions::default()
    };
    let (suite, bank) = run(source, options).await;

    assert_eq!(suite.scenarios[0].status, ScenarioStatus::Skipped);
    assert_eq!(suite.scenarios[1].status, ScenarioStatus::Failed);
    assert_eq!(bank.setups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reports_are_written() {
    let tmp = tempfile::TempDir::new().unwrap();
    let options = RunOptions {
        parallel: 4,
        ..RunOptions::default()
    };
    let (suite, _) = run(DEPOSITS, options).await;

    let formats: Vec<ReportFormat> = ["pretty", "json", "junit:reports/junit.xml"]
        .iter()
        .map(|f| f.parse().unwrap())
        .collect();
    let written = write_reports(&suite, &formats, tmp.path()).unwrap();
    assert_eq!(written.len(), 2);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(tmp.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(json["passed"], 4);
    assert_eq!(json["scenarios"][0]["name"], "Slow deposit");

    let junit = std::fs::read_to_string(tmp.path().join("reports/junit.xml")).unwrap();
    assert!(junit.contains("tests=\"4\""));
}

const JAMMED: &str = r#"
Feature: Vault

  @jammed
  Scenario: First jam
    Given an account with 1

  @jammed
  Scenario: Second jam
    Given an account with 2

  Scenario: Slow open
    Given an account with 10
    When I deposit 5 over 80 ms
    Then the balance should be 15

  Scenario: Quick open
    Given an account with 20
    When I deposit 5 over 10 ms
    Then the balance should be 25
"#;

#[tokio::test]
async fn test_setup_panic_fails_scenario_and_frees_its_slot() {
    let options = RunOptions {
        parallel: 2,
        ..RunOptions::default()
    };
    let (suite, bank) = run(JAMMED, options).await;

    let statuses: Vec<ScenarioStatus> = suite.scenarios.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            ScenarioStatus::Failed,
            ScenarioStatus::Failed,
            ScenarioStatus::Passed,
            ScenarioStatus::Passed
        ]
    );
    let error = suite.scenarios[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Other);
    assert!(error.message.contains("vault door jammed"), "{}", error.message);

    assert_eq!(bank.shared_slots.load(Ordering::SeqCst), 0);
    assert!(bank.slots.lock().iter().all(|slot| *slot < 2));
    assert_eq!(bank.teardowns.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_setup_panic_triggers_fail_fast() {
    let options = RunOptions {
        parallel: 1,
        fail_fast: true,
        ..RunOptions::default()
    };
    let (suite, bank) = run(JAMMED, options).await;

    assert_eq!(suite.scenarios[0].status, ScenarioStatus::Failed);
    assert!(suite.scenarios[1..]
        .iter()
        .all(|s| s.status == ScenarioStatus::Skipped));
    assert_eq!(bank.setups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_teardown_panic_fails_scenario() {
    let source = r#"
Feature: Ledger

  @sticky
  Scenario: Stuck ledger
    Given an account with 4
    Then the balance should be 4
"#;
    let (suite, bank) = run(source, RunOptions::default()).await;

    let result = &suite.scenarios[0];
    assert_eq!(result.status, ScenarioStatus::Failed);
    assert!(result.steps.iter().all(|s| s.status == StepStatus::Passed));
    let error = result.error.as_ref().unwrap();
    assert!(error.message.contains("world teardown panicked: ledger stuck"), "{}", error.message);
    assert_eq!(bank.teardowns.load(Ordering::SeqCst), 1);
}
