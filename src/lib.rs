//! # stigscan
//!
//! A Rust-based CLI that audits running Kubernetes clusters against the
//! DISA Kubernetes STIG.
//!
//! ## How an audit works
//!
//! - **Live cluster state**: rules read pods, namespaces and nodes through
//!   the Kubernetes API and judge their configuration
//! - **Node access**: rules that inspect node files create short-lived
//!   privileged diagnostics pods, run commands in them over the exec
//!   subresource and delete them afterwards
//! - **Operator config**: a YAML file can skip rules with a justification
//!   or pass per-rule options such as accepted exceptions
//! - **Deterministic catalogue**: the assembled ruleset is checked against
//!   the revision's expected rule count before anything runs
//!
//! ## Example
//!
//! ```rust,no_run
//! use stigscan::config::AuditConfig;
//! use stigscan::ruleset::Ruleset;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = stigscan::kubernetes::client().await?;
//! let ruleset = Ruleset::register(client, &AuditConfig::default(), None)?;
//! let summary = ruleset.run().await;
//! println!("{}", serde_json::to_string_pretty(&summary)?);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod kubernetes;
pub mod retry;
pub mod rule;
pub mod ruleset;

// Re-export commonly used types
pub use error::{Error, Result};
pub use rule::{CheckResult, Rule, RuleResult, Status, Target};
pub use ruleset::{RunSummary, Ruleset};

/// The current version of the CLI tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
