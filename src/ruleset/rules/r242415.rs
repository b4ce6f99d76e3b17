//! Secrets in Kubernetes must not be stored as environment variables.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;

use crate::kubernetes::utils::{list_pods, matches_labels, namespace_labels};
use crate::rule::{CheckResult, Rule, RuleResult, SeverityLevel, Target, result};
use crate::ruleset::options::AcceptedSecretEnvOptions;

pub const ID: &str = "242415";
pub const NAME: &str = "Secrets in Kubernetes must not be stored as environment variables";

pub struct Rule242415 {
    client: Client,
    options: AcceptedSecretEnvOptions,
}

impl Rule242415 {
    pub fn new(client: Client, options: AcceptedSecretEnvOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl Rule for Rule242415 {
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
        let pods = list_pods(&self.client, None).await?;
        let namespaces = namespace_labels(&self.client).await?;
        Ok(result(self, check_pods(&pods, &namespaces, &self.options)))
    }
}

fn accepted_justification(
    pod: &Pod,
    namespaces: &BTreeMap<String, BTreeMap<String, String>>,
    options: &AcceptedSecretEnvOptions,
    variable: &str,
) -> Option<String> {
    let pod_labels = pod.metadata.labels.clone().unwrap_or_default();
    let ns_labels = pod
        .metadata
        .namespace
        .as_deref()
        .and_then(|ns| namespaces.get(ns))
        .cloned()
        .unwrap_or_default();

    options
        .accepted_pods
        .iter()
        .find(|accepted| {
            matches_labels(&accepted.selector.pod_match_labels, &pod_labels)
                && matches_labels(&accepted.selector.namespace_match_labels, &ns_labels)
                && (accepted.environment_variables.is_empty()
                    || accepted
                        .environment_variables
                        .iter()
                        .any(|name| name == variable))
        })
        .map(|accepted| {
            accepted
                .selector
                .justification
                .clone()
                .unwrap_or_else(|| "Accepted by audit configuration.".to_string())
        })
}

fn check_pods(
    pods: &[Pod],
    namespaces: &BTreeMap<String, BTreeMap<String, String>>,
    options: &AcceptedSecretEnvOptions,
) -> Vec<CheckResult> {
    let mut checks = Vec::new();
    for pod in pods {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let base = Target::new()
            .with("kind", "Pod")
            .with("name", name)
            .with("namespace", namespace);

        let mut secret_env = false;
        let containers = pod.spec.iter().flat_map(|s| s.containers.iter());
        for container in containers {
            for env in container.env.iter().flatten() {
                let from_secret = env
                    .value_from
                    .as_ref()
                    .is_some_and(|src| src.secret_key_ref.is_some());
                if !from_secret {
                    continue;
                }
                secret_env = true;

                let target = base
                    .with("containerName", &container.name)
                    .with("variableName", &env.name);
                checks.push(
                    match accepted_justification(pod, namespaces, options, &env.name) {
                        Some(justification) => CheckResult::accepted(justification, target),
                        None => CheckResult::failed(
                            "Pod uses environment to inject secret.",
                            target,
                        ),
                    },
                );
            }
        }

        if !secret_env {
            checks.push(CheckResult::passed(
                "Pod does not use environment to inject secret.",
                base,
            ));
        }
    }
    checks
}
