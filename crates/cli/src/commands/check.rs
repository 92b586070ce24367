//! `stepdeck check`: match every line without running anything

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};

use stepdeck_common::{Feature, StepError, StepRegistry, TagExpr};
use stepdeck_runner::DEFAULT_PROFILE;

use crate::output::{print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Profile from the config file
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Only check scenarios matching this tag expression
    #[arg(short, long)]
    pub tags: Option<String>,

    /// Feature files or directories (overrides the profile)
    pub paths: Vec<PathBuf>,
}

/// A scenario line no single definition accepts
#[derive(Debug, Serialize)]
pub struct Problem {
    pub location: String,
    pub scenario: String,
    pub step: String,
    pub problem: String,
}

impl TableDisplay for Problem {
    fn headers() -> Vec<&'static str> {
        vec!["Location", "Scenario", "Step", "Problem"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.location.clone(),
            self.scenario.clone(),
            self.step.clone(),
            self.problem.clone(),
        ]
    }
}

/// Look up every line of every selected scenario
pub fn find_problems<W>(registry: &StepRegistry<W>, features: &[Feature], tags: &TagExpr) -> Vec<Problem> {
    let mut problems = Vec::new();

    for scenario in features.iter().flat_map(|f| f.scenarios.iter()) {
        if !tags.matches(&scenario.tags) {
            continue;
        }
        for line in &scenario.steps {
            let problem = match registry.lookup(&line.text) {
                Ok(_) => continue,
                Err(StepError::Ambiguous { candidates, .. }) => {
                    format!("ambiguous: {}", candidates.join(" | "))
                }
                Err(StepError::NoMatch { .. }) => "undefined".to_string(),
                Err(e) => e.to_string(),
            };
            problems.push(Problem {
                location: format!("{}:{}", scenario.path.display(), line.line),
                scenario: scenario.name.clone(),
                step: line.display(),
                problem,
            });
        }
    }

    problems
}

pub fn execute<W>(args: CheckArgs, config: &Path, registry: &StepRegistry<W>) -> Result<bool> {
    let profile = super::load_profile(config, &args.profile, &args.paths)?;
    let tags = TagExpr::parse(args.tags.as_deref().or(profile.tags.as_deref()).unwrap_or(""))?;
    let features = super::load_features(&profile)?;

    for overlap in registry.overlaps() {
        print_warning(&format!(
            "'{}' and '{}' both match \"{}\"",
            overlap.pattern, overlap.other, overlap.sample
        ));
    }

    let problems = find_problems(registry, &features, &tags);
    if problems.is_empty() {
        let lines: usize = features
            .iter()
            .flat_map(|f| f.scenarios.iter())
            .filter(|s| tags.matches(&s.tags))
            .map(|s| s.steps.len())
            .sum();
        print_success(&format!("All {} step line(s) match exactly one definition", lines));
        Ok(true)
    } else {
        print_list(&problems, OutputFormat::Table);
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepdeck_common::{parse_feature, BoxFuture, StepArgs, StepResult};

    fn noop(_world: &mut (), _args: StepArgs) -> BoxFuture<'_, StepResult> {
        Box::pin(async { Ok(()) })
    }

    #[test]
    fn test_reports_undefined_and_ambiguous_lines() {
        let mut steps = StepRegistry::<()>::builder();
        steps
            .given("I am logged in as {word}", noop)
            .unwrap()
            .given("I am logged in as admin", noop)
            .unwrap()
            .when("I open the cart", noop)
            .unwrap();
        let registry = steps.build();

        let source = "\
Feature: Cart

  Scenario: Admin checkout
    Given I am logged in as admin
    When I open the cart
    Then I see 3 items

  @wip
  Scenario: Guest
    When I open the basket
";
        let feature = parse_feature(source, Path::new("cart.feature")).unwrap();

        let problems = find_problems(&registry, &[feature.clone()], &TagExpr::All);
        assert_eq!(problems.len(), 3);
        assert!(problems[0].problem.starts_with("ambiguous"));
        assert_eq!(problems[0].location, "cart.feature:4");
        assert_eq!(problems[1].problem, "undefined");
        assert_eq!(problems[1].step, "Then I see 3 items");

        let tags = TagExpr::parse("not @wip").unwrap();
        assert_eq!(find_problems(&registry, &[feature], &tags).len(), 2);
    }
}
