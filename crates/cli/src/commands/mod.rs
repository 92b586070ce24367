//! CLI Commands

pub mod check;
pub mod profiles;
pub mod run;
pub mod steps;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use stepdeck_common::Feature;
use stepdeck_runner::{ConfigFile, Profile};

/// Load the named profile and swap in feature paths given on the
/// command line
pub fn load_profile(config: &Path, name: &str, paths: &[PathBuf]) -> Result<Profile> {
    let file = ConfigFile::load(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    let mut profile = file.profile(name)?;
    if !paths.is_empty() {
        profile.paths = paths.to_vec();
    }
    Ok(profile)
}

pub fn load_features(profile: &Profile) -> Result<Vec<Feature>> {
    let features = stepdeck_common::load_features(&profile.paths)?;
    let scenarios: usize = features.iter().map(|f| f.scenarios.len()).sum();
    tracing::debug!(
        "Loaded {} feature(s) with {} scenario(s)",
        features.len(),
        scenarios
    );
    Ok(features)
}
