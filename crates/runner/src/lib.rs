//! Stepdeck scenario runner
//!
//! Executes parsed scenarios against a frozen [`StepRegistry`]:
//!
//! ```text
//! Runner::run(features)
//!   ├── select        tag expression + name filter
//!   ├── schedule      up to `parallel` scenarios, one slot each
//!   └── run_scenario  per scenario
//!         ├── ScenarioContext::setup     World::setup (may lease a browser)
//!         ├── lines in order             lookup → arguments → handler
//!         │     first failure skips the rest
//!         ├── on failure                 World::on_failure attachments
//!         └── ScenarioContext::teardown  exactly once
//! ```
//!
//! The browser integration drives Playwright through a small Node script
//! speaking newline-delimited JSON; drivers are pooled and reset between
//! scenarios.
//!
//! [`StepRegistry`]: stepdeck_common::StepRegistry

pub mod browser;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod playwright;
pub mod pool;
pub mod report;
pub mod runner;
pub mod server;
pub mod world;

pub use browser::{browser_steps, BrowserShared, BrowserWorld};
pub use config::{BrowserConfig, ConfigFile, Profile, WebServerConfig, DEFAULT_PROFILE};
pub use dispatcher::{run_scenario, DispatchOptions};
pub use error::{RunnerError, RunnerResult};
pub use playwright::{Browser, PlaywrightDriver, WaitState};
pub use pool::{Lease, PoolStats, Resource, ResourcePool};
pub use report::{
    write_reports, Attachment, ReportFormat, ScenarioResult, ScenarioStatus, StepOutcome,
    StepStatus, SuiteResult,
};
pub use runner::{RunOptions, Runner};
pub use server::{find_free_port, WebServer};
pub use world::{ContextState, ScenarioContext, ScenarioEnv, World};
