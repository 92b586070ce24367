//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use stepdeck_runner::{ScenarioResult, ScenarioStatus, StepStatus, SuiteResult};

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No items found.");
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

fn status_mark(status: ScenarioStatus) -> colored::ColoredString {
    match status {
        ScenarioStatus::Passed => "✓".green(),
        ScenarioStatus::Failed => "✗".red(),
        ScenarioStatus::Skipped => "-".yellow(),
    }
}

/// Feature-grouped console report with every line of every scenario
pub fn print_pretty(suite: &SuiteResult) {
    let mut feature: Option<&str> = None;

    for scenario in &suite.scenarios {
        if feature != Some(scenario.feature.as_str()) {
            feature = Some(scenario.feature.as_str());
            println!("\n{} {}", "Feature:".bold(), scenario.feature);
        }
        print_scenario(scenario);
    }

    println!();
    print_totals(suite);
}

fn print_scenario(scenario: &ScenarioResult) {
    let tags = if scenario.tags.is_empty() {
        String::new()
    } else {
        format!(" {}", scenario.tags.join(" ").dimmed())
    };
    println!(
        "  {} {}{} {}",
        status_mark(scenario.status),
        scenario.name,
        tags,
        format!("({} ms)", scenario.duration_ms).dimmed()
    );

    for step in &scenario.steps {
        let line = format!("{} {}", step.keyword, step.text);
        match step.status {
            StepStatus::Passed => println!("      {} {}", "✓".green(), line),
            StepStatus::Skipped => println!("      {} {}", "-".yellow(), line.dimmed()),
            StepStatus::Failed => {
                println!("      {} {}", "✗".red(), line.red());
                if let Some(err) = &step.error {
                    println!("          {}", err.message.red());
                }
            }
        }
    }

    // Setup and teardown failures have no failed line to hang off
    if let Some(err) = &scenario.error {
        if err.line.is_none() {
            println!("      {} {}", "✗".red(), err.message.red());
        }
    }

    for attachment in &scenario.attachments {
        println!("      {} {}", "📎".dimmed(), attachment.path.display());
    }
}

/// One table row per scenario
pub fn print_summary(suite: &SuiteResult) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Feature", "Scenario", "Status", "Duration", "Error"]);

    for scenario in &suite.scenarios {
        let color = match scenario.status {
            ScenarioStatus::Passed => Color::Green,
            ScenarioStatus::Failed => Color::Red,
            ScenarioStatus::Skipped => Color::Yellow,
        };
        let error = scenario
            .error
            .as_ref()
            .map(|e| match e.line {
                Some(line) => format!("line {}: {}", line, e.message),
                None => e.message.clone(),
            })
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&scenario.feature),
            Cell::new(&scenario.name),
            Cell::new(scenario.status).fg(color),
            Cell::new(format!("{} ms", scenario.duration_ms)),
            Cell::new(error),
        ]);
    }

    println!("{table}");
    print_totals(suite);
}

fn print_totals(suite: &SuiteResult) {
    let line = format!(
        "{} scenarios ({} passed, {} failed, {} skipped) in {:.2}s",
        suite.total,
        suite.passed,
        suite.failed,
        suite.skipped,
        suite.duration_ms as f64 / 1000.0
    );
    if suite.success() {
        println!("{}", line.green());
    } else {
        println!("{}", line.red());
    }
}
