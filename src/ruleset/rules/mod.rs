//! Rule bodies for the shipped DISA Kubernetes STIG catalogue.

mod r242376;
mod r242390;
mod r242400;
mod r242414;
mod r242415;
mod r242442;
mod r242449;
mod r242453;

pub use r242376::Rule242376;
pub use r242390::Rule242390;
pub use r242400::Rule242400;
pub use r242414::Rule242414;
pub use r242415::Rule242415;
pub use r242442::Rule242442;
pub use r242449::Rule242449;
pub use r242453::Rule242453;

pub use r242376::{ID as ID_242376, NAME as NAME_242376};
pub use r242390::{ID as ID_242390, NAME as NAME_242390};
pub use r242400::{ID as ID_242400, NAME as NAME_242400};
pub use r242414::{ID as ID_242414, NAME as NAME_242414};
pub use r242415::{ID as ID_242415, NAME as NAME_242415};
pub use r242442::{ID as ID_242442, NAME as NAME_242442};
pub use r242449::{ID as ID_242449, NAME as NAME_242449};
pub use r242453::{ID as ID_242453, NAME as NAME_242453};

use std::sync::Arc;

use crate::kubernetes::pod::{PodContext, ops_pod};

/// Run a shell script inside a fresh diagnostics pod pinned to `node`.
///
/// The pod is deleted exactly once on every exit path: after the script,
/// after a script failure, and after a failed create — the pod may have
/// been submitted even when the Running wait did not succeed, and a leaked
/// privileged pod must not survive the rule. When both the script (or the
/// create) and the deletion fail, the first error is reported.
pub(crate) async fn exec_on_node(
    context: &Arc<dyn PodContext>,
    namespace: &str,
    node: &str,
    script: &str,
) -> anyhow::Result<String> {
    let pod = ops_pod(namespace, Some(node));
    let pod_name = pod
        .metadata
        .name
        .clone()
        .ok_or_else(|| anyhow::anyhow!("diagnostics pod has no name"))?;

    let constructor = move || pod.clone();
    let executor = match context.create(&constructor).await {
        Ok(executor) => executor,
        Err(create_err) => {
            if let Err(delete_err) = context.delete(&pod_name, namespace).await {
                log::warn!(
                    "failed to delete diagnostics pod {namespace}/{pod_name}: {delete_err:#}"
                );
            }
            return Err(create_err);
        }
    };

    let exec_result = executor.execute("/bin/sh", script).await;
    let delete_result = context.delete(&pod_name, namespace).await;

    let output = exec_result?;
    delete_result?;
    Ok(output)
}
