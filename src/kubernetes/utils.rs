//! Shared helpers for reading cluster state in rules.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Namespace, Node, Pod};
use kube::{
    Client,
    api::{Api, ListParams},
};

/// List pods in one namespace, or cluster-wide when `namespace` is `None`.
pub async fn list_pods(client: &Client, namespace: Option<&str>) -> anyhow::Result<Vec<Pod>> {
    let pods: Api<Pod> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let list = pods.list(&ListParams::default()).await?;
    Ok(list.items)
}

/// Names of all nodes in the cluster.
pub async fn list_node_names(client: &Client) -> anyhow::Result<Vec<String>> {
    let nodes: Api<Node> = Api::all(client.clone());
    let list = nodes.list(&ListParams::default()).await?;
    Ok(list
        .items
        .into_iter()
        .filter_map(|node| node.metadata.name)
        .collect())
}

/// Map of namespace name to its labels, for label-selector matching.
pub async fn namespace_labels(
    client: &Client,
) -> anyhow::Result<BTreeMap<String, BTreeMap<String, String>>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let list = namespaces.list(&ListParams::default()).await?;

    let mut out = BTreeMap::new();
    for ns in list.items {
        let Some(name) = ns.metadata.name else {
            continue;
        };
        out.insert(name, ns.metadata.labels.unwrap_or_default());
    }
    Ok(out)
}

/// Pods in `kube-system` whose name starts with `component-` (static control
/// plane pods are named `<component>-<node>`).
pub fn component_pods<'a>(pods: &'a [Pod], component: &str) -> Vec<&'a Pod> {
    let prefix = format!("{component}-");
    pods.iter()
        .filter(|pod| {
            pod.metadata
                .name
                .as_deref()
                .is_some_and(|name| name.starts_with(&prefix))
        })
        .collect()
}

/// All values of `--flag=value` (or bare `--flag`, yielding an empty string)
/// across the container's command and args.
///
/// Kubernetes component flags may legally appear more than once; callers
/// that require a singleton flag must check the returned length.
pub fn command_flag_values(container: &Container, flag: &str) -> Vec<String> {
    let prefix_eq = format!("--{flag}=");
    let bare = format!("--{flag}");

    let mut values = Vec::new();
    let command = container.command.iter().flatten();
    let args = container.args.iter().flatten();
    for word in command.chain(args) {
        if let Some(value) = word.strip_prefix(&prefix_eq) {
            values.push(value.to_string());
        } else if word == &bare {
            values.push(String::new());
        }
    }
    values
}

/// True when every key/value pair in `selector` is present in `labels`.
pub fn matches_labels(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}
