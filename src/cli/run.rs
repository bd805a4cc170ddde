//! Runs one test definition and prints a per-command summary.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

use testrig::config::TestDefinition;
use testrig::logging::{LogListener, Logger};
use testrig::orchestrator::{Orchestrator, RunSummary};
use testrig::report::{create_report_dir, ReportDirectory};
use testrig::stages::Verdict;

#[derive(Args)]
pub struct RunCommand {
    #[arg(help = "Test definition file (YAML)")]
    pub testfile: PathBuf,

    #[arg(
        short,
        long,
        default_value = ".",
        help = "Directory where the run's report directory is created"
    )]
    pub reports: PathBuf,

    #[arg(short, long, help = "Show debug output, including command output lines")]
    pub verbose: bool,
}

impl RunCommand {
    /// Returns true when no command was classified as a failure.
    pub fn execute(self) -> Result<bool> {
        let log = Logger::new("testrig");
        let mut orchestrator = Orchestrator::new(log.clone());
        LogListener::attach(orchestrator.events(), &log.child("events"));

        let (definition, test_dir) = orchestrator
            .read_file(&self.testfile)
            .with_context(|| format!("Failed to read {}", self.testfile.display()))?;
        let report_dir = create_report_dir(
            &self.reports,
            &definition.name,
            &definition.version,
            orchestrator.events(),
        )
        .context("Failed to create report directory")?;

        orchestrator.load(definition, &test_dir, &report_dir)?;
        let summary = orchestrator.run_all()?;

        if let Some(definition) = orchestrator.definition() {
            print_summary(definition, &report_dir, &summary);
        }
        Ok(!summary.has_failures())
    }
}

fn print_summary(definition: &TestDefinition, report_dir: &ReportDirectory, summary: &RunSummary) {
    println!();
    println!(
        "{}",
        style(format!("{} {}", definition.name, definition.version))
            .bold()
            .cyan()
    );
    println!("{}", style("─".repeat(60)).dim());

    for outcome in &summary.outcomes {
        let verdict = match outcome.verdict {
            Verdict::Pass => style(outcome.verdict.to_string()).green().bold(),
            Verdict::Fail => style(outcome.verdict.to_string()).red().bold(),
            Verdict::Unknown => style(outcome.verdict.to_string()).yellow(),
        };
        println!(
            "  {:<8} {}  {}",
            verdict,
            outcome.script.trim_end(),
            style(format!("-> {}", outcome.result)).dim()
        );
    }

    println!("{}", style("─".repeat(60)).dim());
    println!(
        "{} passed, {} failed, {} unknown",
        style(summary.count(Verdict::Pass)).green(),
        style(summary.count(Verdict::Fail)).red(),
        style(summary.count(Verdict::Unknown)).yellow()
    );
    println!("Report: {}", style(report_dir.root.display()).dim());
}
