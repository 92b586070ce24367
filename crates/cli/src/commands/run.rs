//! `stepdeck run`

use anyhow::{Context, Result};
use clap::Args;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use stepdeck_common::{StepRegistry, TagExpr};
use stepdeck_runner::{
    write_reports, DispatchOptions, Profile, ReportFormat, RunOptions, Runner, WebServer, World,
    DEFAULT_PROFILE,
};

use crate::output::{print_pretty, print_summary};

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Profile from the config file
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Tag expression, e.g. "@smoke and not @wip"
    #[arg(short, long)]
    pub tags: Option<String>,

    /// Only scenarios whose name contains this text (case-insensitive)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Concurrent scenarios
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Report format: pretty, summary, json[:path], junit[:path], yaml[:path]
    #[arg(short, long = "format")]
    pub formats: Vec<String>,

    /// Match every step without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Stop scheduling scenarios after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Feature files or directories (overrides the profile)
    pub paths: Vec<PathBuf>,
}

impl RunArgs {
    /// Command-line flags win over profile values
    pub fn apply(&self, profile: &mut Profile) {
        if let Some(tags) = &self.tags {
            profile.tags = Some(tags.clone());
        }
        if let Some(parallel) = self.parallel {
            profile.parallel = parallel.max(1);
        }
        if !self.formats.is_empty() {
            profile.format = self.formats.clone();
        }
        if self.fail_fast {
            profile.fail_fast = true;
        }
        if self.dry_run {
            profile.dry_run = true;
        }
    }

    pub fn run_options(&self, profile: &Profile) -> Result<RunOptions> {
        let tags = TagExpr::parse(profile.tags.as_deref().unwrap_or(""))?;
        Ok(RunOptions {
            parallel: profile.parallel,
            tags,
            name_filter: self.name.clone(),
            fail_fast: profile.fail_fast,
            dispatch: DispatchOptions {
                step_timeout: profile.step_timeout(),
                scenario_timeout: profile.scenario_timeout(),
                dry_run: profile.dry_run,
                artifacts_dir: profile.artifacts_dir(),
            },
        })
    }
}

pub fn report_formats(profile: &Profile) -> Result<Vec<ReportFormat>> {
    profile
        .format
        .iter()
        .map(|f| f.parse::<ReportFormat>().map_err(anyhow::Error::from))
        .collect()
}

/// Run the selected scenarios; `Ok(false)` means at least one failed
pub async fn execute<W, F, Fut>(
    args: RunArgs,
    config: &Path,
    registry: Arc<StepRegistry<W>>,
    make_shared: F,
) -> Result<bool>
where
    W: World,
    F: FnOnce(&Profile) -> Fut,
    Fut: Future<Output = Result<W::Shared>>,
{
    let mut profile = super::load_profile(config, &args.profile, &args.paths)?;
    args.apply(&mut profile);

    let options = args.run_options(&profile)?;
    let formats = report_formats(&profile)?;
    let features = super::load_features(&profile)?;

    // The application is only needed when steps actually run
    let mut server = match (&profile.web_server, profile.dry_run) {
        (Some(server), false) => Some(WebServer::start(server).await?),
        _ => None,
    };

    let shared = make_shared(&profile).await?;
    let runner = Runner::new(registry, shared, options);
    let suite = runner.run(&features).await;
    runner.shutdown().await;

    if let Some(server) = server.as_mut() {
        server.stop().await;
    }

    for format in &formats {
        match format {
            ReportFormat::Pretty => print_pretty(&suite),
            ReportFormat::Summary => print_summary(&suite),
            _ => {}
        }
    }

    let written = write_reports(&suite, &formats, &profile.output_dir)
        .with_context(|| format!("failed to write reports to {}", profile.output_dir.display()))?;
    for path in written {
        info!("Report: {}", path.display());
    }

    Ok(suite.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_profile() {
        let mut profile = Profile::default();
        profile.tags = Some("@smoke".to_string());

        let args = RunArgs {
            tags: Some("@regression".to_string()),
            parallel: Some(0),
            formats: vec!["summary".to_string(), "json".to_string()],
            fail_fast: true,
            ..RunArgs::default()
        };
        args.apply(&mut profile);

        assert_eq!(profile.tags.as_deref(), Some("@regression"));
        assert_eq!(profile.parallel, 1);
        assert!(profile.fail_fast);
        assert!(!profile.dry_run);
        assert_eq!(
            report_formats(&profile).unwrap(),
            vec![
                ReportFormat::Summary,
                ReportFormat::Json(PathBuf::from("report.json"))
            ]
        );
    }

    #[test]
    fn test_profile_values_kept_without_flags() {
        let mut profile = Profile::default();
        profile.parallel = 3;
        profile.tags = Some("@smoke".to_string());
        RunArgs::default().apply(&mut profile);

        assert_eq!(profile.parallel, 3);
        let options = RunArgs::default().run_options(&profile).unwrap();
        assert!(options.tags.matches(&["@smoke"]));
        assert!(!options.tags.matches(&["@wip"]));
        assert_eq!(options.dispatch.artifacts_dir, PathBuf::from("stepdeck-results/artifacts"));
    }

    #[test]
    fn test_bad_tag_expression_is_an_error() {
        let mut profile = Profile::default();
        profile.tags = Some("@smoke and".to_string());
        assert!(RunArgs::default().run_options(&profile).is_err());
    }

    #[test]
    fn test_bad_format_is_an_error() {
        let mut profile = Profile::default();
        profile.format = vec!["html".to_string()];
        assert!(report_formats(&profile).is_err());
    }

    #[test]
    fn test_dry_run_flag_reaches_profile() {
        let mut profile = Profile::default();
        let args = RunArgs {
            dry_run: true,
            ..RunArgs::default()
        };
        args.apply(&mut profile);

        assert!(profile.dry_run);
        assert!(args.run_options(&profile).unwrap().dispatch.dry_run);
    }
}
