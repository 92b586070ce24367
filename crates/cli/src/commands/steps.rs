//! `stepdeck steps`: list registered step definitions

use clap::Args;
use serde::Serialize;

use stepdeck_common::{StepDefinition, StepRegistry};

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug, Clone)]
pub struct StepsArgs {
    /// Listing format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Only patterns containing this text
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StepDisplay {
    pub kind: String,
    pub pattern: String,
    pub parameters: Vec<String>,
    pub location: String,
}

impl<W> From<&StepDefinition<W>> for StepDisplay {
    fn from(def: &StepDefinition<W>) -> Self {
        Self {
            kind: def.kind().to_string(),
            pattern: def.pattern().source().to_string(),
            parameters: def
                .pattern()
                .placeholders()
                .iter()
                .map(|p| match (&p.name, p.type_name.as_str()) {
                    (Some(name), "") => name.clone(),
                    (Some(name), ty) => format!("{}:{}", name, ty),
                    (None, "") => "{}".to_string(),
                    (None, ty) => ty.to_string(),
                })
                .collect(),
            location: def.location(),
        }
    }
}

impl TableDisplay for StepDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Kind", "Pattern", "Parameters", "Defined at"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.kind.clone(),
            self.pattern.clone(),
            self.parameters.join(", "),
            self.location.clone(),
        ]
    }
}

pub fn list<W>(registry: &StepRegistry<W>, filter: Option<&str>) -> Vec<StepDisplay> {
    let needle = filter.map(str::to_lowercase);
    registry
        .definitions()
        .iter()
        .filter(|def| {
            needle
                .as_ref()
                .map_or(true, |n| def.pattern().source().to_lowercase().contains(n.as_str()))
        })
        .map(StepDisplay::from)
        .collect()
}

pub fn execute<W>(args: StepsArgs, registry: &StepRegistry<W>) {
    let steps = list(registry, args.filter.as_deref());
    print_list(&steps, args.output);
}
