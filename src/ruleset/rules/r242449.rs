//! The kubelet certificate authority file must have restrictive permissions.

use std::sync::Arc;

use async_trait::async_trait;
use kube::Client;

use crate::kubernetes::pod::PodContext;
use crate::kubernetes::utils::list_node_names;
use crate::rule::{CheckResult, Rule, RuleResult, SeverityLevel, Target, result};
use crate::ruleset::rules::exec_on_node;

pub const ID: &str = "242449";
pub const NAME: &str =
    "The Kubernetes kubelet certificate authority file must have file permissions set to 644 or more restrictive";

const CA_FILE: &str = "/etc/kubernetes/pki/ca.crt";
const MAX_PERMISSIONS: u32 = 0o644;

pub struct Rule242449 {
    client: Client,
    context: Arc<dyn PodContext>,
    ops_namespace: String,
}

impl Rule242449 {
    pub fn new(client: Client, context: Arc<dyn PodContext>, ops_namespace: impl Into<String>) -> Self {
        Self {
            client,
            context,
            ops_namespace: ops_namespace.into(),
        }
    }
}

fn stat_script(path: &str) -> String {
    format!("[ -f /host{path} ] && stat -c '%a' /host{path}")
}

/// Parse `stat -c '%a'` output and compare against the allowed maximum.
fn check_permissions(node: &str, raw: &str) -> CheckResult {
    let target = Target::new()
        .with("kind", "Node")
        .with("name", node)
        .with("details", format!("fileName: {CA_FILE}"));

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CheckResult::errored(
            format!(r#"file "{CA_FILE}" not found on node "{node}""#),
            target,
        );
    }

    let Ok(mode) = u32::from_str_radix(trimmed, 8) else {
        return CheckResult::errored(
            format!("unexpected stat output {trimmed:?} on node {node:?}"),
            target,
        );
    };

    if mode & !MAX_PERMISSIONS == 0 {
        CheckResult::passed("File has expected permissions.", target)
    } else {
        CheckResult::failed(
            format!("File has too permissive permissions: {trimmed}, expected: 644 or more restrictive."),
            target,
        )
    }
}

#[async_trait]
impl Rule for Rule242449 {
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

        let script = stat_script(CA_FILE);
        let mut checks = Vec::new();
        for node in &nodes {
            match exec_on_node(&self.context, &self.ops_namespace, node, &script).await {
                Ok(output) => checks.push(check_permissions(node, &output)),
                Err(err) => checks.push(CheckResult::errored(
                    format!("{err:#}"),
                    Target::new().with("kind", "Node").with("name", node),
                )),
            }
        }
        Ok(result(self, checks))
    }
}
