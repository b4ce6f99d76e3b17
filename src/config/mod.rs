//! Operator configuration for an audit run.
//!
//! The config file is YAML. It tunes the harness (retry budget, labels put
//! on diagnostics pods) and carries per-rule entries: a skip with a
//! justification, or free-form `args` a rule parses into its own options
//! type.
//!
//! ```yaml
//! maxRetries: 2
//! opsNamespace: kube-system
//! opsPodLabels:
//!   purpose: compliance-audit
//! rules:
//!   "242400":
//!     skip:
//!       enabled: true
//!       justification: "Alpha APIs are gated by an admission webhook."
//!   "242414":
//!     args:
//!       acceptedPods:
//!         - podMatchLabels: { app: node-exporter }
//!           namespaceMatchLabels: { kubernetes.io/metadata.name: monitoring }
//!           justification: "exporter binds 443 on the host"
//!           ports: [443]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Top-level audit configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditConfig {
    /// Retry budget for rules that run commands on nodes.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Namespace diagnostics pods are created in.
    #[serde(default = "default_ops_namespace")]
    pub ops_namespace: String,

    /// Labels merged into every diagnostics pod (rule-set labels win).
    #[serde(default)]
    pub ops_pod_labels: BTreeMap<String, String>,

    /// Per-rule configuration keyed by rule id.
    #[serde(default)]
    pub rules: BTreeMap<String, RuleConfig>,
}

fn default_max_retries() -> u32 {
    1
}

fn default_ops_namespace() -> String {
    "kube-system".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            ops_namespace: default_ops_namespace(),
            ops_pod_labels: BTreeMap::new(),
            rules: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub skip: Option<SkipConfig>,

    /// Free-form options, parsed by the rule itself.
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SkipConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub justification: String,
}

fn default_true() -> bool {
    true
}

impl AuditConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// The `args` block for a rule, if configured.
    pub fn rule_args(&self, rule_id: &str) -> Option<&serde_json::Value> {
        self.rules.get(rule_id).and_then(|r| r.args.as_ref())
    }

    /// Enabled skip overrides, keyed by rule id.
    pub fn skip_overrides(&self) -> BTreeMap<&str, &SkipConfig> {
        self.rules
            .iter()
            .filter_map(|(id, rule)| {
                rule.skip
                    .as_ref()
                    .filter(|skip| skip.enabled)
                    .map(|skip| (id.as_str(), skip))
            })
            .collect()
    }
}
