//! The Kubernetes Controller Manager must have the profiling flag disabled.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;

use crate::kubernetes::utils::{command_flag_values, component_pods, list_pods};
use crate::rule::{CheckResult, Rule, RuleResult, SeverityLevel, Target, result};

pub const ID: &str = "242376";
pub const NAME: &str =
    "The Kubernetes Controller Manager must have secure binding (profiling disabled)";

const COMPONENT: &str = "kube-controller-manager";
const FLAG: &str = "profiling";

pub struct Rule242376 {
    client: Client,
}

impl Rule242376 {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Rule for Rule242376 {
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
