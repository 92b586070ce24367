//! Stepdeck CLI
//!
//! The whole command surface is generic over the world type, so a project
//! can register its own steps and ship them in a custom binary:
//!
//! ```no_run
//! # use stepdeck_runner::{browser_steps, BrowserShared, Profile};
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     let mut steps = browser_steps().expect("browser steps");
//!     // steps.when("I add {int} item(s) to the cart", add_to_cart)?;
//!     stepdeck_cli::run_with(steps.build(), |profile: &Profile| {
//!         let browser = profile.browser.clone();
//!         let slots = profile.parallel;
//!         async move { Ok::<_, anyhow::Error>(BrowserShared::new(&browser, slots)) }
//!     })
//!     .await
//! }
//! ```

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use stepdeck_common::{StepRegistry, DEFAULT_CONFIG_FILE};
use stepdeck_runner::{Profile, World};

use commands::{check, profiles, run, steps};

/// Stepdeck - behavior-driven browser tests
#[derive(Parser, Debug)]
#[command(name = "stepdeck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true, env = "STEPDECK_CONFIG")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run scenarios
    Run(run::RunArgs),

    /// Check that every step line matches exactly one definition
    Check(check::CheckArgs),

    /// List registered step definitions
    Steps(steps::StepsArgs),

    /// List configured profiles
    Profiles(profiles::ProfilesArgs),
}

/// Exit status: 0 all passed, 1 a scenario failed, 2 the run itself failed
fn exit_status(outcome: anyhow::Result<bool>) -> u8 {
    match outcome {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            2
        }
    }
}

pub fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Dispatch an already parsed command line
pub async fn execute<W, F, Fut>(
    cli: Cli,
    registry: StepRegistry<W>,
    make_shared: F,
) -> anyhow::Result<bool>
where
    W: World,
    F: FnOnce(&Profile) -> Fut,
    Fut: Future<Output = anyhow::Result<W::Shared>>,
{
    match cli.command {
        Commands::Run(args) => run::execute(args, &cli.config, Arc::new(registry), make_shared).await,
        Commands::Check(args) => check::execute(args, &cli.config, &registry),
        Commands::Steps(args) => {
            steps::execute(args, &registry);
            Ok(true)
        }
        Commands::Profiles(args) => {
            profiles::execute(args, &cli.config)?;
            Ok(true)
        }
    }
}

/// Parse the process arguments, run the command and map the outcome to
/// an exit code
pub async fn run_with<W, F, Fut>(registry: StepRegistry<W>, make_shared: F) -> ExitCode
where
    W: World,
    F: FnOnce(&Profile) -> Fut,
    Fut: Future<Output = anyhow::Result<W::Shared>>,
{
    let cli = Cli::parse();
    init_logging(cli.verbose);
    ExitCode::from(exit_status(execute(cli, registry, make_shared).await))
}
