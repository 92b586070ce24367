//! Stepdeck Common Library
//!
//! Feature parsing, tag filters, step expressions and the step registry
//! shared by the Stepdeck runner and CLI.

pub mod error;
pub mod gherkin;
pub mod params;
pub mod pattern;
pub mod registry;
pub mod tags;
pub mod types;

// Re-export commonly used types
pub use error::{ensure, ensure_eq, Error, ErrorKind, Result, StepError};
pub use gherkin::{load_features, parse_feature};
pub use params::{ParamValue, ParameterType, ParameterTypes};
pub use pattern::{Placeholder, StepPattern};
pub use registry::{
    Argument, DefinitionKind, Overlap, StepArgs, StepDefinition, StepHandler, StepMatch,
    StepRegistry, StepRegistryBuilder, StepResult,
};
pub use tags::TagExpr;
pub use types::*;

/// Handlers return boxed futures borrowing the world
pub use futures::future::BoxFuture;

/// Stepdeck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "stepdeck.toml";
