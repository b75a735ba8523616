//! Command-line interface for the report engine

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use rtg_orchestrator::{ReportFilters, ReportOptions, ReportType};

/// rtg - generate threat-model reports from templates and live project data
#[derive(Parser, Debug)]
#[command(
    name = "rtg",
    version,
    about = "Report generation engine for threat models",
    long_about = "Resolves a report template, gathers project data, and asks a completion \
                  backend to write the report. Runs one-off reports, batches across many \
                  projects, or a scheduler for recurring runs.\n\n\
                  Configuration comes from config/default.toml, config/$ENV.toml, \
                  config/local.toml and RTG__* environment variables."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler until interrupted
    Run,

    /// Generate a single report and print it
    #[command(visible_alias = "g")]
    Generate(GenerateArgs),

    /// Generate one report per target and print the job as JSON
    #[command(visible_alias = "b")]
    Batch(BatchArgs),

    /// Print engine health, cache and backend status
    Health(HealthArgs),
}

/// Arguments shared by report-producing commands
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Report type (project_portfolio, component_inventory, safeguard_status,
    /// threat_model_summary, or a custom name)
    #[arg(long, short = 't')]
    pub report_type: String,

    /// Template id (UUID or API id)
    #[arg(long, short = 'T')]
    pub template_id: String,

    /// Completion backend to use instead of the configured one
    #[arg(long)]
    pub provider: Option<String>,

    /// Model to request from the backend
    #[arg(long, requires = "provider")]
    pub model: Option<String>,

    /// Completion deadline in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl ReportArgs {
    pub fn report_type(&self) -> ReportType {
        ReportType::from(self.report_type.as_str())
    }

    pub fn filters(&self) -> ReportFilters {
        match &self.provider {
            Some(provider) => ReportFilters::default().with_provider(provider, self.model.clone()),
            None => ReportFilters::default(),
        }
    }

    pub fn options(&self) -> ReportOptions {
        match self.timeout_ms {
            Some(ms) => ReportOptions::default().with_timeout(Duration::from_millis(ms)),
            None => ReportOptions::default(),
        }
    }
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub report: ReportArgs,

    /// Project to scope the report to; omit for a portfolio-wide report
    #[arg(long)]
    pub target: Option<String>,

    /// Print warnings and backend details to stderr
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    #[command(flatten)]
    pub report: ReportArgs,

    /// Project ids, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub targets: Vec<String>,

    /// Override the configured concurrency limit
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Only print the duration estimate
    #[arg(long)]
    pub estimate: bool,
}

#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Print metrics in Prometheus text format instead
    #[arg(long)]
    pub prometheus: bool,

    /// Also probe every completion backend
    #[arg(long)]
    pub probe: bool,
}
