//! Kubernetes must remove old components after updated versions are installed.
//!
//! Two pods running different versions of the same image mean an old
//! component survived an update; the check compares image references per
//! repository across the control plane namespace.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;

use crate::kubernetes::utils::list_pods;
use crate::rule::{CheckResult, Rule, RuleResult, SeverityLevel, Target, result};

pub const ID: &str = "242442";
pub const NAME: &str =
    "Kubernetes must remove old components after updated versions have been installed";

pub struct Rule242442 {
    client: Client,
}

impl Rule242442 {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Rule for Rule242442 {
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
        Ok(result(self, check_images(&pods)))
    }
}

/// Strip tag or digest, leaving the repository part of an image reference.
fn image_repository(image: &str) -> &str {
    if let Some(idx) = image.find('@') {
        return &image[..idx];
    }
    // A colon after the last slash separates the tag; earlier colons belong
    // to a registry port.
    let after_slash = image.rfind('/').map_or(0, |i| i + 1);
    match image[after_slash..].find(':') {
        Some(idx) => &image[..after_slash + idx],
        None => image,
    }
}

fn check_images(pods: &[Pod]) -> Vec<CheckResult> {
    let mut versions: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for pod in pods {
        let statuses = pod
            .status
            .iter()
            .flat_map(|s| s.container_statuses.iter().flatten());
        for status in statuses {
            versions
                .entry(image_repository(&status.image))
                .or_default()
                .insert(status.image.as_str());
        }
    }

    let mut checks = Vec::new();
    for (repository, images) in &versions {
        if images.len() > 1 {
            checks.push(CheckResult::failed(
                "Image is used with more than one version.",
                Target::new()
                    .with("image", *repository)
                    .with("versions", images.iter().copied().collect::<Vec<_>>().join(", ")),
            ));
        }
    }

    if checks.is_empty() {
        checks.push(CheckResult::passed(
            "All found images use only one version.",
            Target::new().with("namespace", "kube-system"),
        ));
    }
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Status;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};

    fn pod_running_images(images: &[&str]) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(
                    images
                        .iter()
                        .map(|image| ContainerStatus {
                            name: "main".to_string(),
                            image: image.to_string(),
                            ..ContainerStatus::default()
                        })
                        .collect(),
                ),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn repository_split_handles_tags_digests_and_ports() {
        assert_eq!(
            image_repository("registry.k8s.io/kube-proxy:v1.31.0"),
            "registry.k8s.io/kube-proxy"
        );
        assert_eq!(
            image_repository("registry.k8s.io/kube-proxy@sha256:abcdef"),
            "registry.k8s.io/kube-proxy"
        );
        assert_eq!(
            image_repository("localhost:5000/coredns:1.11"),
            "localhost:5000/coredns"
        );
        assert_eq!(image_repository("busybox"), "busybox");
    }

    #[test]
    fn unique_versions_pass() {
        let pods = vec![
            pod_running_images(&["registry.k8s.io/kube-proxy:v1.31.0"]),
            pod_running_images(&["registry.k8s.io/coredns:1.11.1"]),
        ];
        let checks = check_images(&pods);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, Status::Passed);
    }

    #[test]
    fn mixed_versions_of_one_image_fail() {
        let pods = vec![
            pod_running_images(&["registry.k8s.io/kube-proxy:v1.31.0"]),
            pod_running_images(&["registry.k8s.io/kube-proxy:v1.30.2"]),
        ];
        let checks = check_images(&pods);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, Status::Failed);
        assert_eq!(
            checks[0].target.get("image"),
            Some("registry.k8s.io/kube-proxy")
        );
        assert!(checks[0].target.get("versions").unwrap().contains("v1.30.2"));
    }

    #[test]
    fn same_reference_across_pods_is_one_version() {
        let pods = vec![
            pod_running_images(&["registry.k8s.io/kube-proxy:v1.31.0"]),
            pod_running_images(&["registry.k8s.io/kube-proxy:v1.31.0"]),
        ];
        assert_eq!(check_images(&pods)[0].status, Status::Passed);
    }
}
