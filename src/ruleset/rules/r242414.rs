//! The Kubernetes cluster must use non-privileged host ports for user pods.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;

use crate::kubernetes::utils::{list_pods, matches_labels, namespace_labels};
use crate::rule::{CheckResult, Rule, RuleResult, SeverityLevel, Target, result};
use crate::ruleset::options::AcceptedHostPortsOptions;

pub const ID: &str = "242414";
pub const NAME: &str =
    "The Kubernetes cluster must use non-privileged host ports for user pods";

pub struct Rule242414 {
    client: Client,
    options: AcceptedHostPortsOptions,
}

impl Rule242414 {
    pub fn new(client: Client, options: AcceptedHostPortsOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl Rule for Rule242414 {
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
        let pods = list_pods(&self.client, None).await?;
        let namespaces = namespace_labels(&self.client).await?;
        Ok(result(self, check_pods(&pods, &namespaces, &self.options)))
    }
}

fn accepted_justification(
    pod: &Pod,
    namespaces: &BTreeMap<String, BTreeMap<String, String>>,
    options: &AcceptedHostPortsOptions,
    port: i32,
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
                && (accepted.ports.is_empty() || accepted.ports.contains(&port))
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
    options: &AcceptedHostPortsOptions,
) -> Vec<CheckResult> {
    let mut checks = Vec::new();
    for pod in pods {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let base = Target::new()
            .with("kind", "Pod")
            .with("name", name)
            .with("namespace", namespace);

        let mut privileged_ports = false;
        let containers = pod.spec.iter().flat_map(|s| s.containers.iter());
        for container in containers {
            for port in container.ports.iter().flatten() {
                let Some(host_port) = port.host_port else {
                    continue;
                };
                if host_port >= 1024 {
                    continue;
                }
                privileged_ports = true;

                let target = base
                    .with("containerName", &container.name)
                    .with("port", host_port.to_string());
                checks.push(
                    match accepted_justification(pod, namespaces, options, host_port) {
                        Some(justification) => CheckResult::accepted(justification, target),
                        None => {
                            CheckResult::failed("Container uses hostPort < 1024.", target)
                        }
                    },
                );
            }
        }

        if !privileged_ports {
            checks.push(CheckResult::passed(
                "Pod does not use hostPort < 1024.",
                base,
            ));
        }
    }
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Status;
    use crate::ruleset::options::{AcceptedHostPortPod, AcceptedPodSelector};
    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str, namespace: &str, labels: &[(&str, &str)], host_port: Option<i32>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    ports: host_port.map(|p| {
                        vec![ContainerPort {
                            container_port: p,
                            host_port: Some(p),
                            ..ContainerPort::default()
                        }]
                    }),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
            ..Pod::default()
        }
    }

    fn monitoring_namespaces() -> BTreeMap<String, BTreeMap<String, String>> {
        BTreeMap::from([(
            "monitoring".to_string(),
            BTreeMap::from([("team".to_string(), "observability".to_string())]),
        )])
    }

    #[test]
    fn pod_without_privileged_host_port_passes() {
        let pods = vec![pod("web", "default", &[], Some(8080))];
        let checks = check_pods(&pods, &BTreeMap::new(), &AcceptedHostPortsOptions::default());
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, Status::Passed);
    }

    #[test]
    fn privileged_host_port_fails() {
        let pods = vec![pod("edge", "default", &[], Some(443))];
        let checks = check_pods(&pods, &BTreeMap::new(), &AcceptedHostPortsOptions::default());
        assert_eq!(checks[0].status, Status::Failed);
        assert_eq!(checks[0].target.get("port"), Some("443"));
    }

    #[test]
    fn accepted_pod_yields_accepted_with_justification() {
        let pods = vec![pod(
            "node-exporter-x",
            "monitoring",
            &[("app", "node-exporter")],
            Some(443),
        )];
        let options = AcceptedHostPortsOptions {
            accepted_pods: vec![AcceptedHostPortPod {
                selector: AcceptedPodSelector {
                    pod_match_labels: BTreeMap::from([(
                        "app".to_string(),
                        "node-exporter".to_string(),
                    )]),
                    namespace_match_labels: BTreeMap::from([(
                        "team".to_string(),
                        "observability".to_string(),
                    )]),
                    justification: Some("exporter needs the node port".to_string()),
                },
                ports: vec![443],
            }],
        };

        let checks = check_pods(&pods, &monitoring_namespaces(), &options);
        assert_eq!(checks[0].status, Status::Accepted);
        assert_eq!(checks[0].message, "exporter needs the node port");
    }

    #[test]
    fn acceptance_is_port_scoped() {
        let pods = vec![pod(
            "node-exporter-x",
            "monitoring",
            &[("app", "node-exporter")],
            Some(80),
        )];
        let options = AcceptedHostPortsOptions {
            accepted_pods: vec![AcceptedHostPortPod {
                selector: AcceptedPodSelector {
                    pod_match_labels: BTreeMap::from([(
                        "app".to_string(),
                        "node-exporter".to_string(),
                    )]),
                    namespace_match_labels: BTreeMap::from([(
                        "team".to_string(),
                        "observability".to_string(),
                    )]),
                    justification: None,
                },
                ports: vec![443],
            }],
        };

        let checks = check_pods(&pods, &monitoring_namespaces(), &options);
        assert_eq!(checks[0].status, Status::Failed);
    }
}
