//! Core types for compliance rules and their results.
//!
//! A [`Rule`] is one compliance check. Running it produces a [`RuleResult`]
//! holding an ordered sequence of [`CheckResult`] verdicts, each tied to a
//! [`Target`] describing the inspected object. These types are created once
//! per run and never mutated afterwards.

pub mod retryable;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Verdict of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The inspected object satisfies the rule.
    Passed,
    /// The inspected object violates the rule.
    Failed,
    /// The check could not complete because of a runtime error.
    Errored,
    /// A known violation accepted with a documented justification.
    Accepted,
    /// The rule does not apply and was not evaluated.
    Skipped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Accepted => "accepted",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a rule, following the STIG CAT levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl SeverityLevel {
    /// Convert to the STIG CAT level string.
    pub fn to_cat(&self) -> &'static str {
        match self {
            Self::High => "CAT I",
            Self::Medium => "CAT II",
            Self::Low => "CAT III",
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Ordered key/value identifier of the object a check result refers to.
///
/// Targets are immutable; [`Target::with`] returns a new value with the pair
/// appended, so a base target can be reused safely across loop iterations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target(Vec<(String, String)>);

impl Target {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Return a new target with `key`/`value` appended.
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = self.0.clone();
        entries.push((key.into(), value.into()));
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.entries() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{key}: {value}")?;
            first = false;
        }
        Ok(())
    }
}

/// One verdict with its message and target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: Status,
    pub message: String,
    pub target: Target,
}

impl CheckResult {
    pub fn passed(message: impl Into<String>, target: Target) -> Self {
        Self {
            status: Status::Passed,
            message: message.into(),
            target,
        }
    }

    pub fn failed(message: impl Into<String>, target: Target) -> Self {
        Self {
            status: Status::Failed,
            message: message.into(),
            target,
        }
    }

    pub fn errored(message: impl Into<String>, target: Target) -> Self {
        Self {
            status: Status::Errored,
            message: message.into(),
            target,
        }
    }

    pub fn accepted(message: impl Into<String>, target: Target) -> Self {
        Self {
            status: Status::Accepted,
            message: message.into(),
            target,
        }
    }

    pub fn skipped(message: impl Into<String>, target: Target) -> Self {
        Self {
            status: Status::Skipped,
            message: message.into(),
            target,
        }
    }
}

/// Result of one rule invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: SeverityLevel,
    pub check_results: Vec<CheckResult>,
}

impl RuleResult {
    /// True when every check result is `Errored`.
    ///
    /// An empty result set is not considered errored.
    pub fn all_errored(&self) -> bool {
        !self.check_results.is_empty()
            && self
                .check_results
                .iter()
                .all(|c| c.status == Status::Errored)
    }
}

/// One compliance check.
///
/// Implementations inspect live cluster state and report zero or more
/// verdicts. A returned `Err` means the harness itself failed; check-level
/// findings (including `Errored`) are ordinary results, not errors.
#[async_trait]
pub trait Rule: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn severity(&self) -> SeverityLevel;
    async fn run(&self) -> anyhow::Result<RuleResult>;
}

/// Build a [`RuleResult`] for `rule` from the given check results.
pub fn result(rule: &dyn Rule, check_results: Vec<CheckResult>) -> RuleResult {
    RuleResult {
        rule_id: rule.id().to_string(),
        rule_name: rule.name().to_string(),
        severity: rule.severity(),
        check_results,
    }
}

/// A rule that always yields a single Skipped or Accepted verdict.
///
/// Used both for catalogue entries that are universally inapplicable
/// (status `Skipped`) and for operator overrides (status `Accepted`).
pub struct SkipRule {
    id: String,
    name: String,
    justification: String,
    status: Status,
}

impl SkipRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        justification: impl Into<String>,
        status: Status,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            justification: justification.into(),
            status,
        }
    }
}

#[async_trait]
impl Rule for SkipRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn severity(&self) -> SeverityLevel {
        SeverityLevel::Medium
    }

    async fn run(&self) -> anyhow::Result<RuleResult> {
        let check = CheckResult {
            status: self.status,
            message: self.justification.clone(),
            target: Target::new(),
        };
        Ok(result(self, vec![check]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_with_returns_new_value() {
        let base = Target::new().with("kind", "pod").with("name", "etcd-0");
        let extended = base.with("details", "containerName: etcd");

        assert_eq!(base.get("details"), None);
        assert_eq!(extended.get("details"), Some("containerName: etcd"));
        assert_eq!(extended.get("kind"), Some("pod"));
    }

    #[test]
    fn target_preserves_insertion_order() {
        let target = Target::new()
            .with("kind", "pod")
            .with("name", "kube-proxy")
            .with("namespace", "kube-system");

        let keys: Vec<&str> = target.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["kind", "name", "namespace"]);
        assert_eq!(
            target.to_string(),
            "kind: pod, name: kube-proxy, namespace: kube-system"
        );
    }

    #[tokio::test]
    async fn skip_rule_yields_single_verdict() {
        let rule = SkipRule::new(
            "242437",
            "Kubernetes must have a pod security policy set",
            "PSPs are removed in K8s version 1.25.",
            Status::Skipped,
        );

        let result = rule.run().await.unwrap();
        assert_eq!(result.rule_id, "242437");
        assert_eq!(result.check_results.len(), 1);
        assert_eq!(result.check_results[0].status, Status::Skipped);
        assert_eq!(
            result.check_results[0].message,
            "PSPs are removed in K8s version 1.25."
        );
    }

    #[test]
    fn all_errored_requires_non_empty_uniform_errors() {
        let target = Target::new();
        let mut rr = RuleResult {
            rule_id: "1".into(),
            rule_name: "test".into(),
            severity: SeverityLevel::Medium,
            check_results: vec![],
        };
        assert!(!rr.all_errored());

        rr.check_results = vec![
            CheckResult::errored("boom", target.clone()),
            CheckResult::errored("boom again", target.clone()),
        ];
        assert!(rr.all_errored());

        rr.check_results.push(CheckResult::passed("fine", target));
        assert!(!rr.all_errored());
    }
}
