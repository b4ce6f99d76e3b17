//! Temporary pod lifecycle for rules that need a shell on a node.
//!
//! [`SimplePodContext`] creates a pod from a caller-supplied constructor,
//! waits for it to reach the `Running` phase and hands back a
//! [`RemoteExecutor`] bound to it. Deletion is idempotent: an already absent
//! pod counts as deleted, and a successful delete is confirmed by polling
//! until the API stops returning the object.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, Pod, PodSpec, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    Client,
    api::{Api, DeleteParams, PostParams},
};

use crate::kubernetes::exec::RemoteExecutor;
use crate::retry::{self, ProbeOutcome};

/// Container name every diagnostics pod uses.
pub const OPS_POD_CONTAINER: &str = "container";

/// Default image for diagnostics pods. Needs a shell and coreutils.
pub const OPS_POD_IMAGE: &str = "registry.k8s.io/e2e-test-images/busybox:1.36.1-1";

/// Node filesystem mount point inside diagnostics pods.
pub const OPS_POD_HOST_MOUNT: &str = "/host";

/// Creates and tears down short-lived pods.
#[async_trait]
pub trait PodContext: Send + Sync {
    /// Create the pod returned by `constructor` and wait until it is
    /// Running. The returned executor is only valid while the pod lives.
    async fn create(
        &self,
        constructor: &(dyn Fn() -> Pod + Send + Sync),
    ) -> anyhow::Result<RemoteExecutor>;

    /// Delete a pod and wait until it is gone. Absent pods are a success.
    async fn delete(&self, name: &str, namespace: &str) -> anyhow::Result<()>;
}

/// [`PodContext`] backed by a live cluster client.
pub struct SimplePodContext {
    client: Client,
    additional_pod_labels: BTreeMap<String, String>,
    kube_context: Option<String>,
    wait_interval: Duration,
    wait_timeout: Duration,
}

impl SimplePodContext {
    const WAIT_INTERVAL: Duration = Duration::from_secs(2);
    const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(client: Client, additional_pod_labels: BTreeMap<String, String>) -> Self {
        Self {
            client,
            additional_pod_labels,
            kube_context: None,
            wait_interval: Self::WAIT_INTERVAL,
            wait_timeout: Self::WAIT_TIMEOUT,
        }
    }

    /// Name the kubeconfig context the client was built from, so the exec
    /// fallback transport targets the same cluster.
    pub fn with_kube_context(mut self, context: impl Into<String>) -> Self {
        self.kube_context = Some(context.into());
        self
    }

    async fn wait_running(&self, name: &str, namespace: &str) -> anyhow::Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        retry::until(self.wait_timeout, self.wait_interval, || {
            let pods = pods.clone();
            let name = name.to_string();
            async move {
                match pods.get(&name).await {
                    Ok(pod) => running_outcome(&pod),
                    Err(err) => ProbeOutcome::Severe(anyhow::Error::new(err)),
                }
            }
        })
        .await?;
        Ok(())
    }

    async fn wait_deleted(&self, name: &str, namespace: &str) -> anyhow::Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        retry::until(self.wait_timeout, self.wait_interval, || {
            let pods = pods.clone();
            let name = name.to_string();
            async move {
                match pods.get(&name).await {
                    Ok(_) => ProbeOutcome::Minor(anyhow::anyhow!("pod {name} still present")),
                    Err(err) if is_not_found(&err) => ProbeOutcome::Done,
                    Err(err) => ProbeOutcome::Severe(anyhow::Error::new(err)),
                }
            }
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PodContext for SimplePodContext {
    async fn create(
        &self,
        constructor: &(dyn Fn() -> Pod + Send + Sync),
    ) -> anyhow::Result<RemoteExecutor> {
        let mut pod = constructor();
        merge_labels(&mut pod, &self.additional_pod_labels);

        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("pod constructor produced a pod without a name"))?;
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        pods.create(&PostParams::default(), &pod).await?;
        log::debug!("created pod {namespace}/{name}, waiting for Running");

        self.wait_running(&name, &namespace).await?;

        Ok(RemoteExecutor::for_pod(
            self.client.clone(),
            &namespace,
            &name,
            OPS_POD_CONTAINER,
            self.kube_context.as_deref(),
        ))
    }

    async fn delete(&self, name: &str, namespace: &str) -> anyhow::Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match pods.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(err) if is_not_found(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        self.wait_deleted(name, namespace).await
    }
}

/// Merge `additional` into the pod's labels without overwriting keys the
/// constructor already set.
fn merge_labels(pod: &mut Pod, additional: &BTreeMap<String, String>) {
    let labels = pod.metadata.labels.get_or_insert_with(BTreeMap::new);
    for (key, value) in additional {
        labels
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

/// Classify a fetched pod for the Running wait loop.
///
/// Anything but phase `Running` keeps polling; the error message carries the
/// pod's status conditions so a timeout explains what the pod was stuck on.
fn running_outcome(pod: &Pod) -> ProbeOutcome {
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("");
    if phase == "Running" {
        return ProbeOutcome::Done;
    }

    let conditions = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|c| serde_json::to_string(c).unwrap_or_default())
        .unwrap_or_default();
    ProbeOutcome::Minor(anyhow::anyhow!(
        "pod phase is {phase:?}, conditions: {conditions}"
    ))
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Build a privileged diagnostics pod with the node root mounted read-only
/// under [`OPS_POD_HOST_MOUNT`]. The name carries a random suffix so
/// concurrent rule runs never collide.
pub fn ops_pod(namespace: &str, node_name: Option<&str>) -> Pod {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let name = format!("stigscan-ops-{}", &suffix[..10]);

    Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/name".to_string(),
                "stigscan-ops".to_string(),
            )])),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            node_name: node_name.map(str::to_string),
            host_pid: Some(true),
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: OPS_POD_CONTAINER.to_string(),
                image: Some(OPS_POD_IMAGE.to_string()),
                command: Some(vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    "sleep 3600".to_string(),
                ]),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    ..SecurityContext::default()
                }),
                volume_mounts: Some(vec![VolumeMount {
                    name: "host-root".to_string(),
                    mount_path: OPS_POD_HOST_MOUNT.to_string(),
                    read_only: Some(true),
                    ..VolumeMount::default()
                }]),
                ..Container::default()
            }],
            volumes: Some(vec![Volume {
                name: "host-root".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: "/".to_string(),
                    type_: None,
                }),
                ..Volume::default()
            }]),
            ..PodSpec::default()
        }),
        status: None,
    }
}
