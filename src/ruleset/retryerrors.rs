//! Known-transient error patterns for rules that exec into nodes.
//!
//! These match the exact message shapes produced by the pod lifecycle and
//! exec layers when a diagnostics pod disappears mid-rule. They are versioned
//! with the ruleset: a new pattern means a new class of transient failure was
//! diagnosed, not a loosening of the retry policy.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::rule::retryable::RetryCondition;

pub static OPS_POD_NOT_FOUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"pods? ".*" not found"#).unwrap());

pub static CONTAINER_NOT_FOUND_ON_NODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"container ".*" not found on node ".*""#).unwrap());

pub static CONTAINER_FILE_NOT_FOUND_ON_NODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"file ".*" not found on node ".*""#).unwrap());

pub static CONTAINER_NOT_READY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"container ".*" not \(yet\) (running|ready)"#).unwrap());

/// The condition applied to every rule that runs commands on nodes.
pub fn ops_pod_condition() -> RetryCondition {
    RetryCondition::from_regexes([
        OPS_POD_NOT_FOUND.clone(),
        CONTAINER_NOT_FOUND_ON_NODE.clone(),
        CONTAINER_FILE_NOT_FOUND_ON_NODE.clone(),
        CONTAINER_NOT_READY.clone(),
    ])
}
