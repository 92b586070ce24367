//! `stepdeck profiles`: list configured run profiles

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::Path;

use stepdeck_runner::{ConfigFile, Profile};

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug, Clone)]
pub struct ProfilesArgs {
    /// Listing format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
pub struct ProfileDisplay {
    pub name: String,
    pub paths: Vec<String>,
    pub parallel: usize,
    pub tags: Option<String>,
    pub browser: String,
    pub base_url: String,
    pub web_server: Option<String>,
}

impl ProfileDisplay {
    fn new(name: &str, profile: &Profile) -> Self {
        Self {
            name: name.to_string(),
            paths: profile.paths.iter().map(|p| p.display().to_string()).collect(),
            parallel: profile.parallel,
            tags: profile.tags.clone(),
            browser: format!(
                "{}{}",
                profile.browser.browser.as_str(),
                if profile.browser.headless { "" } else { " (headed)" }
            ),
            base_url: profile.browser.base_url.clone(),
            web_server: profile
                .web_server
                .as_ref()
                .map(|s| format!("{} {}", s.command, s.args.join(" ")).trim().to_string()),
        }
    }
}

impl TableDisplay for ProfileDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Paths", "Parallel", "Tags", "Browser", "Base URL", "Web server"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.paths.join(", "),
            self.parallel.to_string(),
            self.tags.clone().unwrap_or_else(|| "-".to_string()),
            self.browser.clone(),
            self.base_url.clone(),
            self.web_server.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

pub fn list(config: &ConfigFile) -> Result<Vec<ProfileDisplay>> {
    config
        .names()
        .iter()
        .map(|name| Ok(ProfileDisplay::new(name, &config.profile(name)?)))
        .collect()
}

pub fn execute(args: ProfilesArgs, config: &Path) -> Result<()> {
    let file = ConfigFile::load(config)?;
    print_list(&list(&file)?, args.output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_builtin_default_first() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stepdeck.toml");
        std::fs::write(
            &path,
            "[profiles.ci]\nparallel = 4\n\n[profiles.ci.browser]\nbrowser = \"webkit\"\nheadless = false\n",
        )
        .unwrap();

        let profiles = list(&ConfigFile::load(&path).unwrap()).unwrap();
        let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["default", "ci"]);
        assert_eq!(profiles[1].parallel, 4);
        assert_eq!(profiles[1].browser, "webkit (headed)");
        assert_eq!(profiles[0].browser, "chromium");
    }
}
