//! Remote command execution inside cluster pods.
//!
//! Commands run through the pod exec subresource: the shell binary is the
//! command, the script travels over stdin, stdout and stderr are captured
//! separately and the session never allocates a TTY. Two transports exist
//! behind [`ExecTransport`]: the native WebSocket streaming exec, and a
//! `kubectl exec` subprocess for API endpoints and proxies that reject the
//! WebSocket upgrade. [`FallbackTransport`] picks between them per attempt.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Client,
    api::{Api, AttachParams},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::retry::{self, ProbeOutcome};

/// Error text fragments that indicate a transient stream failure worth
/// retrying on the same transport.
const TRANSIENT_ERROR_MARKERS: [&str; 4] = [
    "timeout occurred",
    "operation timed out",
    "connection reset by peer",
    "context deadline exceeded",
];

/// Outcome of a single exec attempt.
///
/// Stream-level failures are carried in `error` so that whatever output the
/// remote side produced before the failure is still available to callers.
#[derive(Debug, Default)]
pub struct ExecAttempt {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<anyhow::Error>,
}

impl ExecAttempt {
    fn stream_error(error: anyhow::Error) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// One way of reaching a pod's exec subresource.
#[async_trait]
pub trait ExecTransport: Send + Sync {
    async fn run(&self, command: &str, stdin: &str) -> ExecAttempt;
}

/// Native streaming exec over the Kubernetes WebSocket protocol.
pub struct WebSocketTransport {
    client: Client,
    namespace: String,
    pod_name: String,
    container: String,
}

impl WebSocketTransport {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            pod_name: pod_name.into(),
            container: container.into(),
        }
    }
}

#[async_trait]
impl ExecTransport for WebSocketTransport {
    async fn run(&self, command: &str, stdin: &str) -> ExecAttempt {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = AttachParams::default()
            .container(&self.container)
            .stdin(true)
            .stdout(true)
            .stderr(true)
            .tty(false);

        let mut attached = match pods
            .exec(&self.pod_name, vec![command.to_string()], &params)
            .await
        {
            Ok(attached) => attached,
            Err(err) => return ExecAttempt::stream_error(anyhow::Error::new(err)),
        };

        let Some(mut writer) = attached.stdin() else {
            return ExecAttempt::stream_error(anyhow::anyhow!("exec session has no stdin stream"));
        };
        let Some(mut stdout_reader) = attached.stdout() else {
            return ExecAttempt::stream_error(anyhow::anyhow!("exec session has no stdout stream"));
        };
        let Some(mut stderr_reader) = attached.stderr() else {
            return ExecAttempt::stream_error(anyhow::anyhow!("exec session has no stderr stream"));
        };

        let payload = stdin.as_bytes().to_vec();
        let write = async move {
            writer.write_all(&payload).await?;
            // Half-close so the remote shell sees EOF on its stdin.
            writer.shutdown().await?;
            Ok::<_, std::io::Error>(())
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let (write_res, stdout_res, stderr_res) = tokio::join!(
            write,
            stdout_reader.read_to_end(&mut stdout),
            stderr_reader.read_to_end(&mut stderr),
        );
        let join_res = attached.join().await;

        let error = write_res
            .err()
            .map(anyhow::Error::new)
            .or_else(|| stdout_res.err().map(anyhow::Error::new))
            .or_else(|| stderr_res.err().map(anyhow::Error::new))
            .or_else(|| join_res.err().map(anyhow::Error::new));

        ExecAttempt {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            error,
        }
    }
}

/// Compatibility transport shelling out to `kubectl exec -i`.
///
/// kubectl negotiates its own streaming protocol with the API server, which
/// keeps exec working against endpoints where the direct WebSocket upgrade
/// is refused.
pub struct KubectlTransport {
    namespace: String,
    pod_name: String,
    container: String,
    context: Option<String>,
}

impl KubectlTransport {
    pub fn new(
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod_name: pod_name.into(),
            container: container.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn build_command(&self, command: &str) -> Command {
        let mut cmd = Command::new("kubectl");
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.arg("exec")
            .arg("-i")
            .arg("-n")
            .arg(&self.namespace)
            .arg(&self.pod_name)
            .arg("-c")
            .arg(&self.container)
            .arg("--")
            .arg(command)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        cmd
    }
}

#[async_trait]
impl ExecTransport for KubectlTransport {
    async fn run(&self, command: &str, stdin: &str) -> ExecAttempt {
        let mut cmd = self.build_command(command);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return ExecAttempt::stream_error(anyhow::Error::new(err)),
        };

        if let Some(mut child_stdin) = child.stdin.take() {
            if let Err(err) = child_stdin.write_all(stdin.as_bytes()).await {
                return ExecAttempt::stream_error(anyhow::Error::new(err));
            }
            // Dropping the handle closes the pipe.
        }

        match child.wait_with_output().await {
            Ok(output) => ExecAttempt {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                error: None,
            },
            Err(err) => ExecAttempt::stream_error(anyhow::Error::new(err)),
        }
    }
}

/// True when `error` reads like a refused protocol upgrade rather than a
/// failure of the command itself. Matches only negotiation failures
/// (upgrade refusal, HTTPS-proxy incompatibility): a mid-stream error on an
/// established session is not grounds for re-running the command on the
/// secondary transport.
pub fn is_upgrade_failure(error: &anyhow::Error) -> bool {
    let text = format!("{error:#}").to_lowercase();
    text.contains("unable to upgrade")
        || text.contains("upgrade request required")
        || text.contains("https proxy")
}

/// Tries the primary transport and falls through to the secondary only when
/// the primary failed to negotiate its protocol. Command failures and stream
/// errors mid-session are returned as-is; the secondary never masks them.
pub struct FallbackTransport {
    primary: Box<dyn ExecTransport>,
    secondary: Box<dyn ExecTransport>,
}

impl FallbackTransport {
    pub fn new(primary: Box<dyn ExecTransport>, secondary: Box<dyn ExecTransport>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl ExecTransport for FallbackTransport {
    async fn run(&self, command: &str, stdin: &str) -> ExecAttempt {
        let attempt = self.primary.run(command, stdin).await;
        match &attempt.error {
            Some(error) if is_upgrade_failure(error) => {
                log::debug!("exec upgrade refused, falling back to kubectl: {error:#}");
                self.secondary.run(command, stdin).await
            }
            _ => attempt,
        }
    }
}

/// Classify one attempt for the polling scheduler.
///
/// Any stderr output is terminal, even when the streams closed cleanly: the
/// remote command spoke on its error channel and re-running it will not
/// change that. The severe message carries the full invocation (command and
/// stdin payload) plus any concurrent stream error. Stream errors without
/// stderr are retried only when they carry one of the known transient
/// markers.
fn classify_attempt(
    command: &str,
    stdin: &str,
    attempt: ExecAttempt,
) -> (Option<String>, ProbeOutcome) {
    if !attempt.stderr.is_empty() {
        let mut message = format!(
            "command `{command} {stdin}` wrote to stderr: {}",
            attempt.stderr.trim_end()
        );
        if let Some(error) = &attempt.error {
            message.push_str(&format!(" (stream error: {error:#})"));
        }
        return (None, ProbeOutcome::Severe(anyhow::anyhow!(message)));
    }

    match attempt.error {
        Some(error) => {
            let text = format!("{error:#}").to_lowercase();
            if TRANSIENT_ERROR_MARKERS.iter().any(|m| text.contains(m)) {
                (None, ProbeOutcome::Minor(error))
            } else {
                (None, ProbeOutcome::Severe(error))
            }
        }
        None => (Some(attempt.stdout), ProbeOutcome::Done),
    }
}

/// Runs commands in one pod, retrying transient stream failures.
pub struct RemoteExecutor {
    transport: Arc<dyn ExecTransport>,
    wait_interval: Duration,
    wait_timeout: Duration,
}

impl RemoteExecutor {
    const WAIT_INTERVAL: Duration = Duration::from_secs(3);
    const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Bind an executor to a pod with the standard transport chain:
    /// WebSocket exec first, `kubectl exec` when the upgrade is refused.
    ///
    /// `kube_context` must name the same kubeconfig context the client was
    /// built from, so the fallback reaches the same cluster.
    pub fn for_pod(
        client: Client,
        namespace: &str,
        pod_name: &str,
        container: &str,
        kube_context: Option<&str>,
    ) -> Self {
        let primary = WebSocketTransport::new(client, namespace, pod_name, container);
        let mut secondary = KubectlTransport::new(namespace, pod_name, container);
        if let Some(context) = kube_context {
            secondary = secondary.with_context(context);
        }
        Self::with_transport(Arc::new(FallbackTransport::new(
            Box::new(primary),
            Box::new(secondary),
        )))
    }

    pub fn with_transport(transport: Arc<dyn ExecTransport>) -> Self {
        Self {
            transport,
            wait_interval: Self::WAIT_INTERVAL,
            wait_timeout: Self::WAIT_TIMEOUT,
        }
    }

    /// Run `command` with `stdin` as its input, returning captured stdout.
    pub async fn execute(&self, command: &str, stdin: &str) -> anyhow::Result<String> {
        let captured: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let slot = captured.clone();
        let transport = self.transport.clone();
        retry::until(self.wait_timeout, self.wait_interval, move || {
            let slot = slot.clone();
            let transport = transport.clone();
            let command = command.to_string();
            let stdin = stdin.to_string();
            async move {
                let attempt = transport.run(&command, &stdin).await;
                let (stdout, outcome) = classify_attempt(&command, &stdin, attempt);
                if let Some(stdout) = stdout {
                    *slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(stdout);
                }
                outcome
            }
        })
        .await?;

        let stdout = captured
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .unwrap_or_default();
        Ok(stdout)
    }
}
