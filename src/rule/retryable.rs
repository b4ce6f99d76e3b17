//! Rule decorator that re-runs a rule after transient infrastructure errors.
//!
//! Rules that exec into nodes depend on short-lived helper pods; a scan can
//! hit the narrow window where the pod is gone before the command lands.
//! Those failures surface as all-`Errored` results whose messages match a
//! known pattern, and re-running the whole rule is the correct recovery.
//! Partial results are never discarded: a run that produced any non-errored
//! verdict is returned as-is.

use async_trait::async_trait;
use regex::Regex;

use crate::rule::{Rule, RuleResult, SeverityLevel};

/// An ordered set of patterns classifying an error message as transient.
#[derive(Debug, Clone)]
pub struct RetryCondition {
    patterns: Vec<Regex>,
}

impl RetryCondition {
    pub fn from_regexes(patterns: impl IntoIterator<Item = Regex>) -> Self {
        Self {
            patterns: patterns.into_iter().collect(),
        }
    }

    /// True when `message` matches any pattern in the set.
    pub fn matches(&self, message: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(message))
    }
}

/// Decorator wrapping a base rule with a bounded retry policy.
///
/// Identity and severity are forwarded to the base rule; only `run` is
/// intercepted.
pub struct RetryableRule {
    base: Box<dyn Rule>,
    conditions: Vec<RetryCondition>,
    max_retries: u32,
}

impl RetryableRule {
    pub fn new(base: Box<dyn Rule>) -> Self {
        Self {
            base,
            conditions: Vec::new(),
            max_retries: 1,
        }
    }

    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn should_retry(&self, result: &RuleResult) -> bool {
        result.all_errored()
            && result.check_results.iter().any(|check| {
                self.conditions
                    .iter()
                    .any(|condition| condition.matches(&check.message))
            })
    }
}

#[async_trait]
impl Rule for RetryableRule {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn severity(&self) -> SeverityLevel {
        self.base.severity()
    }

    async fn run(&self) -> anyhow::Result<RuleResult> {
        let mut attempt: u32 = 0;
        loop {
            let result = self.base.run().await?;

            if attempt >= self.max_retries || !self.should_retry(&result) {
                return Ok(result);
            }

            attempt += 1;
            log::info!(
                "rule {} returned retryable errors, retrying (attempt {}/{})",
                self.base.id(),
                attempt,
                self.max_retries
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{CheckResult, Status, Target, result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Yields scripted results in order, then repeats the last one.
    struct ScriptedRule {
        calls: AtomicUsize,
        script: Vec<Vec<CheckResult>>,
    }

    impl ScriptedRule {
        fn new(script: Vec<Vec<CheckResult>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Rule for ScriptedRule {
        fn id(&self) -> &str {
            "242404"
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn severity(&self) -> SeverityLevel {
            SeverityLevel::Medium
        }

        async fn run(&self) -> anyhow::Result<RuleResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let idx = call.min(self.script.len() - 1);
            Ok(result(self, self.script[idx].clone()))
        }
    }

    /// Forwards to a shared [`ScriptedRule`] so tests can inspect the call
    /// counter after handing the rule to the decorator.
    struct SharedRule(std::sync::Arc<ScriptedRule>);

    #[async_trait]
    impl Rule for SharedRule {
        fn id(&self) -> &str {
            self.0.id()
        }

        fn name(&self) -> &str {
            self.0.name()
        }

        fn severity(&self) -> SeverityLevel {
            self.0.severity()
        }

        async fn run(&self) -> anyhow::Result<RuleResult> {
            self.0.run().await
        }
    }

    fn ops_pod_condition() -> RetryCondition {
        RetryCondition::from_regexes([Regex::new(r#"pods? ".*" not found"#).unwrap()])
    }

    fn errored_not_found() -> Vec<CheckResult> {
        vec![CheckResult::errored(
            r#"pods "stigscan-ops-abc12" not found"#,
            Target::new(),
        )]
    }

    fn passed() -> Vec<CheckResult> {
        vec![CheckResult::passed("all good", Target::new())]
    }

    #[tokio::test]
    async fn retries_until_success_counting_invocations() {
        let base = std::sync::Arc::new(ScriptedRule::new(vec![
            errored_not_found(),
            errored_not_found(),
            errored_not_found(),
            passed(),
        ]));
        let rule = RetryableRule::new(Box::new(SharedRule(base.clone())))
            .with_condition(ops_pod_condition())
            .with_max_retries(5);

        let result = rule.run().await.unwrap();
        assert_eq!(result.check_results[0].status, Status::Passed);
        // Three retryable failures plus the successful attempt.
        assert_eq!(base.calls(), 4);
    }

    #[tokio::test]
    async fn stops_when_budget_exhausted() {
        let base = std::sync::Arc::new(ScriptedRule::new(vec![errored_not_found()]));
        let rule = RetryableRule::new(Box::new(SharedRule(base.clone())))
            .with_condition(ops_pod_condition())
            .with_max_retries(2);

        let result = rule.run().await.unwrap();
        assert_eq!(result.check_results[0].status, Status::Errored);
        // Initial attempt plus two retries.
        assert_eq!(base.calls(), 3);
    }

    #[tokio::test]
    async fn partial_results_are_not_retried() {
        let mixed = vec![
            CheckResult::passed("node ok", Target::new()),
            CheckResult::errored(r#"pods "stigscan-ops-xyz" not found"#, Target::new()),
        ];
        let base = std::sync::Arc::new(ScriptedRule::new(vec![mixed]));
        let rule = RetryableRule::new(Box::new(SharedRule(base.clone())))
            .with_condition(ops_pod_condition())
            .with_max_retries(5);

        let result = rule.run().await.unwrap();
        assert_eq!(result.check_results.len(), 2);
        assert_eq!(base.calls(), 1);
    }

    #[tokio::test]
    async fn unmatched_errors_are_not_retried() {
        let base = std::sync::Arc::new(ScriptedRule::new(vec![vec![CheckResult::errored(
            "permission denied",
            Target::new(),
        )]]));
        let rule = RetryableRule::new(Box::new(SharedRule(base.clone())))
            .with_condition(ops_pod_condition())
            .with_max_retries(5);

        let result = rule.run().await.unwrap();
        assert_eq!(result.check_results[0].status, Status::Errored);
        assert_eq!(base.calls(), 1);
    }

    #[tokio::test]
    async fn identity_is_forwarded() {
        let base = std::sync::Arc::new(ScriptedRule::new(vec![passed()]));
        let rule = RetryableRule::new(Box::new(SharedRule(base)));
        assert_eq!(rule.id(), "242404");
        assert_eq!(rule.severity(), SeverityLevel::Medium);
    }
}
