//! The Kubernetes API server must have anonymous authentication disabled.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;

use crate::kubernetes::utils::{command_flag_values, component_pods, list_pods};
use crate::rule::{CheckResult, Rule, RuleResult, SeverityLevel, Target, result};

pub const ID: &str = "242390";
pub const NAME: &str = "The Kubernetes API server must have anonymous authentication disabled";

const COMPONENT: &str = "kube-apiserver";
const FLAG: &str = "anonymous-auth";

pub struct Rule242390 {
    client: Client,
}

impl Rule242390 {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Rule for Rule242390 {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        NAME
    }

    fn severity(&self) -> SeverityLevel {
        SeverityLevel::High
    }

    async fn run(&self) -> anyhow::Result<RuleResult> {
        let pods = list_pods(&self.client, Some("kube-system")).await?;
        Ok(result(self, check_pods(&pods)))
    }
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
        // anonymous-auth defaults to true, so an unset flag is a finding.
        checks.push(match values.as_slice() {
            [] => CheckResult::failed(format!("Option {FLAG} has not been set."), target),
            [value] if value == "false" => {
                CheckResult::passed(format!("Option {FLAG} set to allowed value."), target)
            }
            [_] => CheckResult::failed(format!("Option {FLAG} set to not allowed value."), target),
            _ => CheckResult::failed(format!("Option {FLAG} has been set more than once."), target),
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
    fn disabled_anonymous_auth_passes() {
        let pods = vec![apiserver_pod(&["kube-apiserver", "--anonymous-auth=false"])];
        assert_eq!(check_pods(&pods)[0].status, Status::Passed);
    }

    #[test]
    fn unset_flag_fails_because_default_is_true() {
        let pods = vec![apiserver_pod(&["kube-apiserver"])];
        let checks = check_pods(&pods);
        assert_eq!(checks[0].status, Status::Failed);
        assert!(checks[0].message.contains("has not been set"));
    }

    #[test]
    fn repeated_flag_fails() {
        let pods = vec![apiserver_pod(&[
            "kube-apiserver",
            "--anonymous-auth=false",
            "--anonymous-auth=true",
        ])];
        let checks = check_pods(&pods);
        assert_eq!(checks[0].status, Status::Failed);
        assert!(checks[0].message.contains("more than once"));
    }
}
