//! Browser world and built-in browser steps
//!
//! Every quoted argument may reference remembered values as `${name}`,
//! except the name a value is remembered under.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use stepdeck_common::{
    ensure, ensure_eq, ParameterType, StepArgs, StepError, StepRegistryBuilder, StepResult,
};

use crate::config::BrowserConfig;
use crate::playwright::{PlaywrightDriver, WaitState};
use crate::pool::{Lease, ResourcePool};
use crate::report::Attachment;
use crate::world::{ScenarioEnv, World};

/// Run-wide browser state: the driver pool and where the app lives
pub struct BrowserShared {
    pub pool: ResourcePool<PlaywrightDriver>,
    pub base_url: String,
}

impl BrowserShared {
    /// One driver per concurrent slot, launched on first use
    pub fn new(config: &BrowserConfig, slots: usize) -> Self {
        let launch = config.clone();
        let pool = ResourcePool::new(slots, config.launch_timeout(), move |id| {
            let launch = launch.clone();
            async move {
                PlaywrightDriver::launch(&launch, id)
                    .await
                    .map_err(|e| StepError::Resource(e.to_string()))
            }
        });

        Self {
            pool,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// A scenario's view of the browser
pub struct BrowserWorld {
    page: Option<Lease<PlaywrightDriver>>,
    base_url: String,
    artifacts_dir: PathBuf,
    values: HashMap<String, String>,
    attachments: Vec<Attachment>,
}

impl BrowserWorld {
    pub fn page(&mut self) -> Result<&mut PlaywrightDriver, StepError> {
        match self.page.as_mut() {
            Some(lease) => Ok(&mut **lease),
            None => Err(StepError::Resource("browser page already released".to_string())),
        }
    }

    /// Absolute URLs pass through; paths are joined to the base URL
    pub fn url_for(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else if target.starts_with('/') {
            format!("{}{}", self.base_url, target)
        } else {
            format!("{}/{}", self.base_url, target)
        }
    }

    pub fn remember(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn recall(&self, name: &str) -> Result<&str, StepError> {
        self.values
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| StepError::NotFound(format!("no remembered value '{}'", name)))
    }

    /// Replace `${name}` references with remembered values
    pub fn interpolate(&self, text: &str) -> Result<String, StepError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| StepError::Argument(format!("unterminated '${{' in '{}'", text)))?;
            out.push_str(self.recall(&after[..end])?);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Save bytes as an attachment of the current scenario
    pub fn attach(&mut self, name: &str, media_type: &str, data: &[u8]) -> Result<(), StepError> {
        let attachment = Attachment::write(&self.artifacts_dir, name, media_type, data)?;
        self.attachments.push(attachment);
        Ok(())
    }

    fn text_arg(&self, args: &StepArgs, index: usize) -> Result<String, StepError> {
        self.interpolate(args.text(index)?)
    }
}

#[async_trait]
impl World for BrowserWorld {
    type Shared = BrowserShared;

    async fn setup(shared: &Self::Shared, env: &ScenarioEnv) -> Result<Self, StepError> {
        let lease = shared.pool.acquire().await?;
        debug!(scenario = %env.scenario, driver = lease.id(), "Leased browser");
        Ok(Self {
            page: Some(lease),
            base_url: shared.base_url.clone(),
            artifacts_dir: env.artifacts_dir.clone(),
            values: HashMap::new(),
            attachments: Vec::new(),
        })
    }

    async fn teardown(&mut self) -> Result<(), StepError> {
        if let Some(lease) = self.page.take() {
            lease.release();
        }
        Ok(())
    }

    async fn on_failure(&mut self, env: &ScenarioEnv) -> Vec<Attachment> {
        let page = match self.page() {
            Ok(page) => page,
            Err(_) => return Vec::new(),
        };
        let screenshot = match page.screenshot(true).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(scenario = %env.scenario, "Failure screenshot not captured: {}", e);
                return Vec::new();
            }
        };
        match Attachment::write(&env.artifacts_dir, "failure.png", "image/png", &screenshot) {
            Ok(attachment) => vec![attachment],
            Err(e) => {
                warn!(scenario = %env.scenario, "Failure screenshot not saved: {}", e);
                Vec::new()
            }
        }
    }

    fn take_attachments(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.attachments)
    }

    async fn after_all(shared: &Self::Shared) {
        shared.pool.close().await;
    }
}

/// Registry builder preloaded with the browser steps
pub fn browser_steps() -> stepdeck_common::Result<StepRegistryBuilder<BrowserWorld>> {
    let mut steps = StepRegistryBuilder::new();
    steps.define_parameter_type(ParameterType::one_of("visibility", &["visible", "hidden"]))?;

    steps
        .given("I am on {string}", open)?
        .when("I go to {string}", open)?
        .when("I click {string}", click)?
        .when("I fill {string} with {string}", fill)?
        .when("I press {string}", press)?
        .when("I press {string} in {string}", press_in)?
        .when("I hover over {string}", hover)?
        .when("I check {string}", check)?
        .when("I uncheck {string}", uncheck)?
        .when("I select {string} from {string}", select)?
        .when("I wait for {string} to be {visibility}", wait_for)?
        .when("I wait {int} millisecond(s)", pause)?
        .when("I take a screenshot named {string}", screenshot)?
        .when("I remember the text of {string} as {word}", remember_text)?
        .then("{string} should be {visibility}", assert_visibility)?
        .then("{string} should have text {string}", assert_text)?
        .then("{string} should contain text {string}", assert_contains)?
        .then("there should be {int} {string} element(s)", assert_count)?
        .then("the {string} attribute of {string} should be {string}", assert_attribute)?
        .then("the URL should contain {string}", assert_url)?
        .then("the page title should be {string}", assert_title)?;

    Ok(steps)
}

fn open(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let url = world.url_for(&world.text_arg(&args, 0)?);
        world.page()?.goto(&url).await
    })
}

fn click(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let selector = world.text_arg(&args, 0)?;
        world.page()?.click(&selector).await
    })
}

fn fill(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let selector = world.text_arg(&args, 0)?;
        let value = world.text_arg(&args, 1)?;
        world.page()?.fill(&selector, &value).await
    })
}

fn press(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let key = world.text_arg(&args, 0)?;
        world.page()?.press(None, &key).await
    })
}

fn press_in(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let key = world.text_arg(&args, 0)?;
        let selector = world.text_arg(&args, 1)?;
        world.page()?.press(Some(&selector), &key).await
    })
}

fn hover(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let selector = world.text_arg(&args, 0)?;
        world.page()?.hover(&selector).await
    })
}

fn check(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let selector = world.text_arg(&args, 0)?;
        world.page()?.check(&selector).await
    })
}

fn uncheck(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let selector = world.text_arg(&args, 0)?;
        world.page()?.uncheck(&selector).await
    })
}

fn select(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let value = world.text_arg(&args, 0)?;
        let selector = world.text_arg(&args, 1)?;
        world.page()?.select(&selector, &value).await
    })
}

fn wait_for(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let selector = world.text_arg(&args, 0)?;
        let state = match args.text(1)? {
            "hidden" => WaitState::Hidden,
            _ => WaitState::Visible,
        };
        world.page()?.wait_for(&selector, state).await
    })
}

fn pause(_world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let ms = u64::try_from(args.int(0)?)
            .map_err(|_| StepError::Argument("wait time cannot be negative".to_string()))?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    })
}

fn screenshot(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let name = world.text_arg(&args, 0)?;
        let bytes = world.page()?.screenshot(true).await?;
        let file = if name.ends_with(".png") {
            name
        } else {
            format!("{}.png", name)
        };
        world.attach(&file, "image/png", &bytes)
    })
}

fn remember_text(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let selector = world.text_arg(&args, 0)?;
        let text = world.page()?.text(&selector).await?;
        world.remember(args.text(1)?, text.trim());
        Ok(())
    })
}

fn assert_visibility(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let selector = world.text_arg(&args, 0)?;
        let want_visible = args.text(1)? == "visible";
        let visible = world.page()?.is_visible(&selector).await?;
        let describe = |v: bool| if v { "visible" } else { "hidden" };
        if visible == want_visible {
            Ok(())
        } else {
            Err(StepError::assertion(
                format!("'{}' visibility", selector),
                describe(want_visible),
                describe(visible),
            ))
        }
    })
}

fn assert_text(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let expected = world.text_arg(&args, 1)?;
        let selector = world.text_arg(&args, 0)?;
        let actual = world.page()?.text(&selector).await?;
        ensure_eq(expected.as_str(), actual.trim(), &format!("text of '{}'", selector))
    })
}

fn assert_contains(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let expected = world.text_arg(&args, 1)?;
        let selector = world.text_arg(&args, 0)?;
        let actual = world.page()?.text(&selector).await?;
        if actual.contains(&expected) {
            Ok(())
        } else {
            Err(StepError::assertion(
                format!("text of '{}' should contain", selector),
                expected,
                actual.trim(),
            ))
        }
    })
}

fn assert_count(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let expected = args.int(0)?;
        let selector = world.text_arg(&args, 1)?;
        let actual = world.page()?.count(&selector).await? as i64;
        ensure_eq(expected, actual, &format!("number of '{}' elements", selector))
    })
}

fn assert_attribute(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let name = world.text_arg(&args, 0)?;
        let selector = world.text_arg(&args, 1)?;
        let expected = world.text_arg(&args, 2)?;
        let actual = world.page()?.attribute(&selector, &name).await?;
        ensure_eq(
            Some(expected),
            actual,
            &format!("'{}' attribute of '{}'", name, selector),
        )
    })
}

fn assert_url(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let expected = world.text_arg(&args, 0)?;
        let url = world.page()?.url().await?;
        ensure(
            url.contains(&expected),
            format!("URL '{}' should contain '{}'", url, expected),
        )
    })
}

fn assert_title(world: &mut BrowserWorld, args: StepArgs) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let expected = world.text_arg(&args, 0)?;
        let title = world.page()?.title().await?;
        ensure_eq(expected, title, "page title")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> BrowserWorld {
        BrowserWorld {
            page: None,
            base_url: "http://127.0.0.1:3000".to_string(),
            artifacts_dir: std::env::temp_dir().join("stepdeck-browser-tests"),
            values: HashMap::new(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_url_for() {
        let world = world();
        assert_eq!(world.url_for("/login"), "http://127.0.0.1:3000/login");
        assert_eq!(world.url_for("cart"), "http://127.0.0.1:3000/cart");
        assert_eq!(world.url_for("https://example.com/x"), "https://example.com/x");
    }

    #[test]
    fn test_interpolate_remembered_values() {
        let mut world = world();
        world.remember("order", "A-17");
        assert_eq!(world.interpolate("Order ${order} placed").unwrap(), "Order A-17 placed");
        assert_eq!(world.interpolate("plain").unwrap(), "plain");
        assert_eq!(
            world.interpolate("${missing}").unwrap_err().kind(),
            stepdeck_common::ErrorKind::NotFound
        );
        assert_eq!(
            world.interpolate("${order").unwrap_err().kind(),
            stepdeck_common::ErrorKind::Argument
        );
    }

    #[test]
    fn test_released_page_is_a_resource_error() {
        let mut world = world();
        assert_eq!(world.page().err().unwrap().kind(), stepdeck_common::ErrorKind::Resource);
    }

    #[test]
    fn test_browser_steps_are_unambiguous() {
        let registry = browser_steps().unwrap().build();
        assert!(registry.overlaps().is_empty(), "{:?}", registry.overlaps());

        for line in [
            "I am on \"/login\"",
            "I fill \"#email\" with \"a@b.c\"",
            "I press \"Enter\"",
            "I press \"Enter\" in \"#search\"",
            "I wait for \".spinner\" to be hidden",
            "I wait 250 milliseconds",
            "\"#cart\" should be visible",
            "there should be 3 \".item\" elements",
            "there should be 1 \".item\" element",
            "the \"href\" attribute of \"a.home\" should be \"/\"",
        ] {
            assert!(registry.lookup(line).is_ok(), "{}", line);
        }
    }

    #[tokio::test]
    async fn test_steps_without_page_fail_cleanly() {
        let registry = browser_steps().unwrap().build();
        let line = stepdeck_common::ScenarioLine::new(
            stepdeck_common::StepKind::When,
            "I click \"#buy\"",
        );
        let step = registry.lookup(&line.text).unwrap();
        let args = step.arguments(&line).unwrap();

        let mut world = world();
        let err = step.call(&mut world, args).await.unwrap_err();
        assert_eq!(err.kind(), stepdeck_common::ErrorKind::Resource);
    }

    #[tokio::test]
    async fn test_selectors_are_interpolated() {
        let registry = browser_steps().unwrap().build();
        for text in [
            "I click \"${row}\"",
            "I press \"Enter\" in \"${row}\"",
            "I hover over \"${row}\"",
            "I check \"${row}\"",
            "I uncheck \"${row}\"",
            "I wait for \"${row}\" to be visible",
            "\"${row}\" should be hidden",
            "there should be 2 \"${row}\" elements",
        ] {
            let line = stepdeck_common::ScenarioLine::new(stepdeck_common::StepKind::When, text);
            let step = registry.lookup(&line.text).unwrap();

            let mut blank = world();
            let err = step.call(&mut blank, step.arguments(&line).unwrap()).await.unwrap_err();
            assert_eq!(err.kind(), stepdeck_common::ErrorKind::NotFound, "{}", text);

            let mut primed = world();
            primed.remember("row", "#order-17");
            let err = step.call(&mut primed, step.arguments(&line).unwrap()).await.unwrap_err();
            assert_eq!(err.kind(), stepdeck_common::ErrorKind::Resource, "{}", text);
        }
    }
}
