//! Stepdeck - Main Entry Point
//!
//! Runs feature files against the built-in browser steps.

use std::process::ExitCode;

use stepdeck_runner::{browser_steps, playwright::ensure_playwright, BrowserShared, Profile};

#[tokio::main]
async fn main() -> ExitCode {
    let steps = match browser_steps() {
        Ok(steps) => steps.build(),
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::from(2);
        }
    };

    stepdeck_cli::run_with(steps, |profile: &Profile| {
        let browser = profile.browser.clone();
        let slots = profile.parallel;
        let dry_run = profile.dry_run;
        async move {
            // Pools launch lazily, so a dry run needs no browser at all
            if !dry_run {
                ensure_playwright().await?;
            }
            Ok::<_, anyhow::Error>(BrowserShared::new(&browser, slots))
        }
    })
    .await
}
