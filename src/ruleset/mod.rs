//! Rule registry for the DISA Kubernetes STIG ruleset.
//!
//! [`Ruleset::register`] assembles the ordered rule list for one ruleset
//! revision: concrete rules bound to a cluster client with their parsed
//! options, fixed skips for rules that cannot apply here, and a retry
//! decorator around every rule that runs commands on nodes. Operator skip
//! overrides then replace whole rules, and the final list length is checked
//! against the revision's expected count so a registration bug fails the run
//! before any rule executes.

pub mod options;
pub mod retryerrors;
pub mod rules;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::Client;
use serde::Serialize;

use crate::config::{AuditConfig, SkipConfig};
use crate::kubernetes::pod::{PodContext, SimplePodContext};
use crate::rule::retryable::RetryableRule;
use crate::rule::{CheckResult, Rule, RuleResult, SeverityLevel, SkipRule, Status, Target};

pub const RULESET_ID: &str = "disa-kubernetes-stig";
pub const RULESET_VERSION: &str = "v1r1";

/// Number of rules revision v1r1 registers. Changes only with the catalogue.
pub const EXPECTED_RULE_COUNT: usize = 12;

/// Error type for ruleset construction.
#[derive(Debug, thiserror::Error)]
pub enum RulesetError {
    #[error("registered {actual} rules for {RULESET_ID} {RULESET_VERSION}, expected {expected}")]
    UnexpectedRuleCount { expected: usize, actual: usize },

    #[error("invalid options for rule {rule_id}: {source}")]
    InvalidOptions {
        rule_id: &'static str,
        #[source]
        source: options::OptionsError,
    },
}

/// Identity row for one catalogue entry, used by rule listings.
#[derive(Debug, Clone, Serialize)]
pub struct RuleDescription {
    pub id: &'static str,
    pub name: &'static str,
    pub severity: SeverityLevel,
}

/// The full v1r1 catalogue in registration order.
pub fn catalogue() -> Vec<RuleDescription> {
    vec![
        RuleDescription {
            id: rules::ID_242376,
            name: rules::NAME_242376,
            severity: SeverityLevel::Medium,
        },
        RuleDescription {
            id: "242384",
            name: "The Kubernetes Scheduler must have secure binding",
            severity: SeverityLevel::Medium,
        },
        RuleDescription {
            id: rules::ID_242390,
            name: rules::NAME_242390,
            severity: SeverityLevel::High,
        },
        RuleDescription {
            id: "242396",
            name: "Kubernetes Kubectl cp command must give expected access and results",
            severity: SeverityLevel::Medium,
        },
        RuleDescription {
            id: rules::ID_242400,
            name: rules::NAME_242400,
            severity: SeverityLevel::Medium,
        },
        RuleDescription {
            id: rules::ID_242414,
            name: rules::NAME_242414,
            severity: SeverityLevel::Medium,
        },
        RuleDescription {
            id: rules::ID_242415,
            name: rules::NAME_242415,
            severity: SeverityLevel::High,
        },
        RuleDescription {
            id: "242437",
            name: "Kubernetes must have a pod security policy set",
            severity: SeverityLevel::High,
        },
        RuleDescription {
            id: rules::ID_242442,
            name: rules::NAME_242442,
            severity: SeverityLevel::Medium,
        },
        RuleDescription {
            id: rules::ID_242449,
            name: rules::NAME_242449,
            severity: SeverityLevel::Medium,
        },
        RuleDescription {
            id: rules::ID_242453,
            name: rules::NAME_242453,
            severity: SeverityLevel::Medium,
        },
        RuleDescription {
            id: "254801",
            name: "Kubernetes must enable PodSecurity admission controller on static pods and Kubelets",
            severity: SeverityLevel::High,
        },
    ]
}

/// An assembled, runnable ruleset revision.
pub struct Ruleset {
    rules: Vec<Box<dyn Rule>>,
}

impl Ruleset {
    /// Assemble the v1r1 rule list against a live cluster.
    ///
    /// `kube_context` is the kubeconfig context the client was built from,
    /// when one was selected explicitly; node-exec rules pass it to their
    /// fallback transport.
    pub fn register(
        client: Client,
        config: &AuditConfig,
        kube_context: Option<&str>,
    ) -> Result<Self, RulesetError> {
        let mut pod_context =
            SimplePodContext::new(client.clone(), config.ops_pod_labels.clone());
        if let Some(context) = kube_context {
            pod_context = pod_context.with_kube_context(context);
        }
        let context: Arc<dyn PodContext> = Arc::new(pod_context);

        let host_port_options = options::parse(config.rule_args(rules::ID_242414))
            .map_err(|source| RulesetError::InvalidOptions {
                rule_id: rules::ID_242414,
                source,
            })?;
        let secret_env_options = options::parse(config.rule_args(rules::ID_242415))
            .map_err(|source| RulesetError::InvalidOptions {
                rule_id: rules::ID_242415,
                source,
            })?;
        let file_owner_options = options::parse(config.rule_args(rules::ID_242453))
            .map_err(|source| RulesetError::InvalidOptions {
                rule_id: rules::ID_242453,
                source,
            })?;

        let retrying = |rule: Box<dyn Rule>| -> Box<dyn Rule> {
            Box::new(
                RetryableRule::new(rule)
                    .with_condition(retryerrors::ops_pod_condition())
                    .with_max_retries(config.max_retries),
            )
        };

        let rules: Vec<Box<dyn Rule>> = vec![
            Box::new(rules::Rule242376::new(client.clone())),
            Box::new(SkipRule::new(
                "242384",
                "The Kubernetes Scheduler must have secure binding",
                "The kube-scheduler binds to localhost by default since Kubernetes v1.23.",
                Status::Skipped,
            )),
            Box::new(rules::Rule242390::new(client.clone())),
            Box::new(SkipRule::new(
                "242396",
                "Kubernetes Kubectl cp command must give expected access and results",
                "The rule concerns kubectl installations on client machines and cannot be audited from within the cluster.",
                Status::Skipped,
            )),
            Box::new(rules::Rule242400::new(client.clone())),
            Box::new(rules::Rule242414::new(client.clone(), host_port_options)),
            Box::new(rules::Rule242415::new(client.clone(), secret_env_options)),
            Box::new(SkipRule::new(
                "242437",
                "Kubernetes must have a pod security policy set",
                "Pod security policies were removed in Kubernetes v1.25; pod security admission replaces them.",
                Status::Skipped,
            )),
            Box::new(rules::Rule242442::new(client.clone())),
            retrying(Box::new(rules::Rule242449::new(
                client.clone(),
                context.clone(),
                &config.ops_namespace,
            ))),
            retrying(Box::new(rules::Rule242453::new(
                client.clone(),
                context.clone(),
                &config.ops_namespace,
                file_owner_options,
            ))),
            Box::new(SkipRule::new(
                "254801",
                "Kubernetes must enable PodSecurity admission controller on static pods and Kubelets",
                "Static pod manifests on nodes are covered by the pod security admission checks of the managed control plane.",
                Status::Skipped,
            )),
        ];

        let rules = apply_skip_overrides(rules, &config.skip_overrides());
        ensure_expected_count(&rules)?;
        Ok(Self { rules })
    }

    /// Run every rule in order and collect the results.
    ///
    /// A harness-level error from a rule becomes a single Errored check
    /// result, so one broken rule never truncates the report.
    pub async fn run(&self) -> RunSummary {
        let mut results = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            log::info!("running rule {} ({})", rule.id(), rule.name());
            let result = match rule.run().await {
                Ok(result) => result,
                Err(err) => {
                    log::error!("rule {} failed to run: {err:#}", rule.id());
                    RuleResult {
                        rule_id: rule.id().to_string(),
                        rule_name: rule.name().to_string(),
                        severity: rule.severity(),
                        check_results: vec![CheckResult::errored(
                            format!("rule execution failed: {err:#}"),
                            Target::new(),
                        )],
                    }
                }
            };
            results.push(result);
        }

        RunSummary {
            ruleset_id: RULESET_ID,
            ruleset_version: RULESET_VERSION,
            finished_at: Utc::now(),
            results,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Replace every rule an operator skipped with an Accepted skip carrying
/// the operator's justification. Unmatched override ids are ignored here;
/// the config surface stays forward compatible with catalogue changes.
fn apply_skip_overrides(
    rules: Vec<Box<dyn Rule>>,
    overrides: &BTreeMap<&str, &SkipConfig>,
) -> Vec<Box<dyn Rule>> {
    rules
        .into_iter()
        .map(|rule| match overrides.get(rule.id()) {
            Some(skip) => {
                log::info!("rule {} skipped by operator config", rule.id());
                Box::new(SkipRule::new(
                    rule.id(),
                    rule.name(),
                    skip.justification.clone(),
                    Status::Accepted,
                )) as Box<dyn Rule>
            }
            None => rule,
        })
        .collect()
}

fn ensure_expected_count(rules: &[Box<dyn Rule>]) -> Result<(), RulesetError> {
    if rules.len() != EXPECTED_RULE_COUNT {
        return Err(RulesetError::UnexpectedRuleCount {
            expected: EXPECTED_RULE_COUNT,
            actual: rules.len(),
        });
    }
    Ok(())
}

/// Results of one full audit run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub ruleset_id: &'static str,
    pub ruleset_version: &'static str,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<RuleResult>,
}

impl RunSummary {
    /// Check result counts per status, over all rules.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            for check in &result.check_results {
                *counts.entry(check.status.as_str()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// True when any check failed or errored.
    pub fn has_findings(&self) -> bool {
        self.results.iter().any(|result| {
            result
                .check_results
                .iter()
                .any(|check| matches!(check.status, Status::Failed | Status::Errored))
        })
    }
}
