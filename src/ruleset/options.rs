//! Per-rule option types and their validation.
//!
//! Operators pass free-form `args` per rule in the audit config; each rule
//! declares a concrete options type that those args are marshaled into.
//! Validation failures abort ruleset construction so a typo in an accepted
//! exception never silently widens a rule.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Error type for option parsing.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("Failed to parse rule options: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid rule options: {0}")]
    Invalid(String),
}

/// Options a rule accepts from the audit config.
pub trait RuleOption: DeserializeOwned + Default {
    /// Human-readable problems with these options; empty means valid.
    fn validate(&self) -> Vec<String>;
}

/// Marshal config `args` into a rule's options type and validate it.
///
/// `None` yields the type's defaults, which must themselves be valid.
pub fn parse<O: RuleOption>(args: Option<&serde_json::Value>) -> Result<O, OptionsError> {
    let options = match args {
        Some(value) => serde_json::from_value(value.clone())?,
        None => O::default(),
    };
    let problems = options.validate();
    if !problems.is_empty() {
        return Err(OptionsError::Invalid(problems.join("; ")));
    }
    Ok(options)
}

/// Label selectors identifying a pod an operator has accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPodSelector {
    #[serde(default)]
    pub pod_match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub namespace_match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub justification: Option<String>,
}

impl AcceptedPodSelector {
    fn validate(&self, idx: usize) -> Vec<String> {
        let mut problems = Vec::new();
        if self.pod_match_labels.is_empty() {
            problems.push(format!("acceptedPods[{idx}]: podMatchLabels must not be empty"));
        }
        if self.namespace_match_labels.is_empty() {
            problems.push(format!(
                "acceptedPods[{idx}]: namespaceMatchLabels must not be empty"
            ));
        }
        problems
    }
}

/// Options for the host-port rule: pods allowed to bind ports below 1024.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedHostPortsOptions {
    #[serde(default)]
    pub accepted_pods: Vec<AcceptedHostPortPod>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedHostPortPod {
    #[serde(flatten)]
    pub selector: AcceptedPodSelector,
    /// Host ports the acceptance covers; empty accepts any port.
    #[serde(default)]
    pub ports: Vec<i32>,
}

impl RuleOption for AcceptedHostPortsOptions {
    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (idx, accepted) in self.accepted_pods.iter().enumerate() {
            problems.extend(accepted.selector.validate(idx));
            for port in &accepted.ports {
                if !(0..=65535).contains(port) {
                    problems.push(format!("acceptedPods[{idx}]: port {port} out of range"));
                }
            }
        }
        problems
    }
}

/// Options for the secret-env rule: pods allowed to inject secrets via
/// environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedSecretEnvOptions {
    #[serde(default)]
    pub accepted_pods: Vec<AcceptedSecretEnvPod>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedSecretEnvPod {
    #[serde(flatten)]
    pub selector: AcceptedPodSelector,
    /// Environment variable names the acceptance covers; empty accepts all.
    #[serde(default)]
    pub environment_variables: Vec<String>,
}

impl RuleOption for AcceptedSecretEnvOptions {
    fn validate(&self) -> Vec<String> {
        self.accepted_pods
            .iter()
            .enumerate()
            .flat_map(|(idx, accepted)| accepted.selector.validate(idx))
            .collect()
    }
}

/// Options for file-owner rules: the users and groups a node file may
/// belong to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedFileOwnerOptions {
    #[serde(default = "default_owner")]
    pub users: Vec<String>,
    #[serde(default = "default_owner")]
    pub groups: Vec<String>,
}

fn default_owner() -> Vec<String> {
    vec!["root".to_string()]
}

impl Default for ExpectedFileOwnerOptions {
    fn default() -> Self {
        Self {
            users: default_owner(),
            groups: default_owner(),
        }
    }
}

impl RuleOption for ExpectedFileOwnerOptions {
    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.users.is_empty() {
            problems.push("expectedFileOwner: users must not be empty".to_string());
        }
        if self.groups.is_empty() {
            problems.push("expectedFileOwner: groups must not be empty".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_args_yield_valid_defaults() {
        let options: AcceptedHostPortsOptions = parse(None).unwrap();
        assert!(options.accepted_pods.is_empty());

        let owner: ExpectedFileOwnerOptions = parse(None).unwrap();
        assert_eq!(owner.users, vec!["root"]);
        assert_eq!(owner.groups, vec!["root"]);
    }

    #[test]
    fn host_port_options_parse_camel_case() {
        let args = json!({
            "acceptedPods": [{
                "podMatchLabels": {"app": "node-exporter"},
                "namespaceMatchLabels": {"kubernetes.io/metadata.name": "monitoring"},
                "justification": "exporter binds 443 on the host",
                "ports": [443]
            }]
        });

        let options: AcceptedHostPortsOptions = parse(Some(&args)).unwrap();
        assert_eq!(options.accepted_pods.len(), 1);
        assert_eq!(options.accepted_pods[0].ports, vec![443]);
        assert_eq!(
            options.accepted_pods[0]
                .selector
                .pod_match_labels
                .get("app")
                .map(String::as_str),
            Some("node-exporter")
        );
    }

    #[test]
    fn empty_selectors_fail_validation() {
        let args = json!({
            "acceptedPods": [{
                "podMatchLabels": {},
                "namespaceMatchLabels": {}
            }]
        });

        let err = parse::<AcceptedHostPortsOptions>(Some(&args)).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("podMatchLabels"), "got: {text}");
        assert!(text.contains("namespaceMatchLabels"), "got: {text}");
    }

    #[test]
    fn out_of_range_port_fails_validation() {
        let args = json!({
            "acceptedPods": [{
                "podMatchLabels": {"app": "x"},
                "namespaceMatchLabels": {"team": "y"},
                "ports": [70000]
            }]
        });

        let err = parse::<AcceptedHostPortsOptions>(Some(&args)).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn malformed_args_are_a_parse_error() {
        let args = json!({"acceptedPods": "not-a-list"});
        let err = parse::<AcceptedSecretEnvOptions>(Some(&args)).unwrap_err();
        assert!(matches!(err, OptionsError::Parse(_)));
    }

    #[test]
    fn empty_owner_lists_fail_validation() {
        let args = json!({"users": [], "groups": ["root"]});
        let err = parse::<ExpectedFileOwnerOptions>(Some(&args)).unwrap_err();
        assert!(err.to_string().contains("users"));
    }
}
