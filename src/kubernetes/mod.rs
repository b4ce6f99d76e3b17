//! Cluster access: client bootstrap, pod lifecycle, remote exec.

pub mod exec;
pub mod pod;
pub mod utils;

use kube::{Client, Config};

/// Error type for cluster client construction.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to create Kubernetes client: {0}")]
    ClientCreation(#[from] kube::Error),

    #[error("Failed to infer Kubernetes config: {0}")]
    ConfigError(#[from] kube::config::InferConfigError),

    #[error("Failed to read kubeconfig: {0}")]
    KubeconfigError(#[from] kube::config::KubeconfigError),
}

/// Build a client from the inferred environment (in-cluster config or the
/// default kubeconfig context).
pub async fn client() -> Result<Client, ClientError> {
    let config = Config::infer().await?;
    Ok(Client::try_from(config)?)
}

/// Build a client for a specific kubeconfig context.
pub async fn client_with_context(context: &str) -> Result<Client, ClientError> {
    let kubeconfig = kube::config::Kubeconfig::read()?;
    let config = Config::from_custom_kubeconfig(
        kubeconfig,
        &kube::config::KubeConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        },
    )
    .await?;
    Ok(Client::try_from(config)?)
}
