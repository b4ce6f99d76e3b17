use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::AuditConfig;
use crate::error::Result;
use crate::ruleset::{self, RunSummary, Ruleset};

#[derive(Parser)]
#[command(name = "stigscan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Audit a running Kubernetes cluster against DISA STIG compliance rules")]
#[command(
    long_about = "Connects to a Kubernetes cluster, runs the DISA Kubernetes STIG rule catalogue against its live state and reports a verdict per check. Rules that need node access create short-lived privileged diagnostics pods and remove them afterwards."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the audit configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Kubeconfig context to audit (defaults to the current context)
    #[arg(long, global = true, value_name = "CONTEXT")]
    pub context: Option<String>,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the rule catalogue against the cluster
    Run {
        /// Output format for the run summary
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// List the rules in the shipped catalogue
    Rules {
        /// Output the catalogue in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Initialize logging based on verbosity level
    pub fn init_logging(&self) {
        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }
}

/// Dispatch the parsed command. Returns the process exit code.
pub async fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run { output } => {
            let config = match &cli.config {
                Some(path) => AuditConfig::load(path)?,
                None => AuditConfig::default(),
            };

            let client = match &cli.context {
                Some(context) => crate::kubernetes::client_with_context(context).await?,
                None => crate::kubernetes::client().await?,
            };

            let ruleset = Ruleset::register(client, &config, cli.context.as_deref())?;
            let summary = ruleset.run().await;

            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Text => print_summary(&summary),
            }

            Ok(if summary.has_findings() { 1 } else { 0 })
        }
        Commands::Rules { json } => {
            let catalogue = ruleset::catalogue();
            if json {
                println!("{}", serde_json::to_string_pretty(&catalogue)?);
            } else {
                println!(
                    "{} {} ({} rules)",
                    ruleset::RULESET_ID,
                    ruleset::RULESET_VERSION,
                    catalogue.len()
                );
                for rule in &catalogue {
                    println!("  {}  [{}]  {}", rule.id, rule.severity.to_cat(), rule.name);
                }
            }
            Ok(0)
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} {} — finished {}",
        summary.ruleset_id,
        summary.ruleset_version,
        summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for result in &summary.results {
        println!();
        println!(
            "{} [{}] {}",
            result.rule_id,
            result.severity.to_cat(),
            result.rule_name
        );
        for check in &result.check_results {
            if check.target.is_empty() {
                println!("  {:>8}  {}", check.status.as_str(), check.message);
            } else {
                println!(
                    "  {:>8}  {} ({})",
                    check.status.as_str(),
                    check.message,
                    check.target
                );
            }
        }
    }

    println!();
    let counts = summary.counts();
    let line = counts
        .iter()
        .map(|(status, count)| format!("{status}: {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("totals: {line}");
}
