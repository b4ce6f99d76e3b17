//! The Kubernetes API server must have Alpha APIs disabled.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;

use crate::kubernetes::utils::{command_flag_values, component_pods, list_pods};
use crate::rule::{CheckResult, Rule, RuleResult, SeverityLevel, Target, result};

pub const ID: &str = "242400";
pub const NAME: &str = "The Kubernetes API server must have Alpha APIs disabled";

const COMPONENT: &str = "kube-apiserver";
const FLAG: &str = "feature-gates";

pub struct Rule242400 {
    client: Client,
}

impl Rule242400 {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Rule for Rule242400 {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        NAME
    }

    fn severity(&self) -> SeverityLevel {
        SeverityLevel::Medium
    }

    async fn run(&self) -> anyhow::Result<RuleResult> {
        let pods = list_pods(&self.client, Some("kube-system")).await?;
        Ok(result(self, check_pods(&pods)))
    }
}

/// Extract the AllAlpha entry from `--feature-gates` values.
///
/// Gates are comma-separated `Name=bool` pairs; the flag itself may repeat.
fn all_alpha_setting(values: &[String]) -> Option<String> {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .filter_map(|gate| gate.trim().strip_prefix("AllAlpha="))
        .map(str::to_string)
        .next_back()
}

fn check_pods(pods: &[Pod]) -> Vec<CheckResult> {
    let matched = component_pods(pods, COMPONENT);
    if matched.is_empty() {
        return vec![CheckResult::errored(
            format!("no {COMPONENT} pods found in namespace kube-system"),
            Target::new().with("kind", "Pod").with("selector", COMPONENT),
        )];
    }

    let mut checks = Vec::new();
    for pod in matched {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let target = Target::new()
            .with("kind", "Pod")
            .with("name", name)
            .with("namespace", "kube-system");

        let Some(container) = pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.iter().find(|c| c.name == COMPONENT))
        else {
            checks.push(CheckResult::errored(
                format!(r#"container "{COMPONENT}" not found"#),
                target,
            ));
            continue;
        };

        let values = command_flag_values(container, FLAG);
        // AllAlpha defaults to false, so an absent gate is compliant.
        checks.push(match all_alpha_setting(&values).as_deref() {
            None => CheckResult::passed(
                "Option feature-gates.AllAlpha not set, defaults to false.",
                target,
            ),
            Some("false") => CheckResult::passed(
                "Option feature-gates.AllAlpha set to allowed value.",
                target,
            ),
            Some(_) => CheckResult::failed(
                "Option feature-gates.AllAlpha set to not allowed value.",
                target,
            ),
        });
    }
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Status;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn apiserver_pod(command: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(format!("{COMPONENT}-node-1")),
                namespace: Some("kube-system".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: COMPONENT.to_string(),
                    command: Some(command.iter().map(|s| s.to_string()).collect()),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn absent_gate_passes_by_default() {
        let pods = vec![apiserver_pod(&["kube-apiserver"])];
        let checks = check_pods(&pods);
        assert_eq!(checks[0].status, Status::Passed);
        assert!(checks[0].message.contains("defaults to false"));
    }

    #[test]
    fn all_alpha_false_passes() {
        let pods = vec![apiserver_pod(&[
            "kube-apiserver",
            "--feature-gates=SomeGate=true,AllAlpha=false",
        ])];
        assert_eq!(check_pods(&pods)[0].status, Status::Passed);
    }

    #[test]
    fn all_alpha_true_fails() {
        let pods = vec![apiserver_pod(&[
            "kube-apiserver",
            "--feature-gates=AllAlpha=true",
        ])];
        assert_eq!(check_pods(&pods)[0].status, Status::Failed);
    }

    #[test]
    fn last_repeated_gate_wins() {
        let values = vec![
            "AllAlpha=true".to_string(),
            "AllAlpha=false".to_string(),
        ];
        assert_eq!(all_alpha_setting(&values).as_deref(), Some("false"));
    }
}
