//! The kubelet configuration file must be owned by root.

use std::sync::Arc;

use async_trait::async_trait;
use kube::Client;

use crate::kubernetes::pod::PodContext;
use crate::kubernetes::utils::list_node_names;
use crate::rule::{CheckResult, Rule, RuleResult, SeverityLevel, Target, result};
use crate::ruleset::options::ExpectedFileOwnerOptions;
use crate::ruleset::rules::exec_on_node;

pub const ID: &str = "242453";
pub const NAME: &str = "The Kubernetes kubelet KubeConfig file must be owned by root";

const CONFIG_FILE: &str = "/var/lib/kubelet/config.yaml";

pub struct Rule242453 {
    client: Client,
    context: Arc<dyn PodContext>,
    ops_namespace: String,
    options: ExpectedFileOwnerOptions,
}

impl Rule242453 {
    pub fn new(
        client: Client,
        context: Arc<dyn PodContext>,
        ops_namespace: impl Into<String>,
        options: ExpectedFileOwnerOptions,
    ) -> Self {
        Self {
            client,
            context,
            ops_namespace: ops_namespace.into(),
            options,
        }
    }
}

fn stat_script(path: &str) -> String {
    format!("[ -f /host{path} ] && stat -c '%U %G' /host{path}")
}

/// Parse `stat -c '%U %G'` output and compare against the expected owners.
fn check_owner(node: &str, raw: &str, options: &ExpectedFileOwnerOptions) -> CheckResult {
    let target = Target::new()
        .with("kind", "Node")
        .with("name", node)
        .with("details", format!("fileName: {CONFIG_FILE}"));

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CheckResult::errored(
            format!(r#"file "{CONFIG_FILE}" not found on node "{node}""#),
            target,
        );
    }

    let mut parts = trimmed.split_whitespace();
    let (Some(user), Some(group), None) = (parts.next(), parts.next(), parts.next()) else {
        return CheckResult::errored(
            format!("unexpected stat output {trimmed:?} on node {node:?}"),
            target,
        );
    };

    let user_ok = options.users.iter().any(|u| u == user);
    let group_ok = options.groups.iter().any(|g| g == group);
    match (user_ok, group_ok) {
        (true, true) => CheckResult::passed("File has expected owners.", target),
        (false, _) => CheckResult::failed(
            format!(
                "File has unexpected owner user: {user}, expected one of: {}.",
                options.users.join(", ")
            ),
            target,
        ),
        (_, false) => CheckResult::failed(
            format!(
                "File has unexpected owner group: {group}, expected one of: {}.",
                options.groups.join(", ")
            ),
            target,
        ),
    }
}

#[async_trait]
impl Rule for Rule242453 {
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
        let nodes = list_node_names(&self.client).await?;
        if nodes.is_empty() {
            return Ok(result(
                self,
                vec![CheckResult::errored(
                    "no nodes found in the cluster",
                    Target::new().with("kind", "Node"),
                )],
            ));
        }

        let script = stat_script(CONFIG_FILE);
        let mut checks = Vec::new();
        for node in &nodes {
            match exec_on_node(&self.context, &self.ops_namespace, node, &script).await {
                Ok(output) => checks.push(check_owner(node, &output, &self.options)),
                Err(err) => checks.push(CheckResult::errored(
                    format!("{err:#}"),
                    Target::new().with("kind", "Node").with("name", node),
                )),
            }
        }
        Ok(result(self, checks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Status;
    use crate::ruleset::retryerrors::ops_pod_condition;

    #[test]
    fn root_owned_file_passes() {
        let options = ExpectedFileOwnerOptions::default();
        let check = check_owner("node-1", "root root\n", &options);
        assert_eq!(check.status, Status::Passed);
    }

    #[test]
    fn unexpected_user_fails_naming_expectations() {
        let options = ExpectedFileOwnerOptions::default();
        let check = check_owner("node-1", "kubelet root\n", &options);
        assert_eq!(check.status, Status::Failed);
        assert!(check.message.contains("owner user: kubelet"));
        assert!(check.message.contains("root"));
    }

    #[test]
    fn unexpected_group_fails() {
        let options = ExpectedFileOwnerOptions::default();
        let check = check_owner("node-1", "root wheel\n", &options);
        assert_eq!(check.status, Status::Failed);
        assert!(check.message.contains("owner group: wheel"));
    }

    #[test]
    fn configured_owners_widen_the_check() {
        let options = ExpectedFileOwnerOptions {
            users: vec!["root".to_string(), "kubelet".to_string()],
            groups: vec!["root".to_string()],
        };
        let check = check_owner("node-1", "kubelet root\n", &options);
        assert_eq!(check.status, Status::Passed);
    }

    #[test]
    fn missing_file_errors_with_retryable_message() {
        let options = ExpectedFileOwnerOptions::default();
        let check = check_owner("node-1", "", &options);
        assert_eq!(check.status, Status::Errored);
        assert!(ops_pod_condition().matches(&check.message));
    }
}
