use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use tracing::{debug, info};

use super::{ActionExecutor, ExecContext, ExecutionError, ExecutorTraits};
use crate::crd::{ChaosAction, ChaosExperimentSpec};
use crate::safety::TargetRef;

/// Image that can never be pulled; drives pod-failure containers into
/// ImagePullBackOff for the fault duration.
pub const UNRUNNABLE_IMAGE: &str = "chaos.invalid/unrunnable:pod-failure";

/// Annotation holding the original images of a pod under pod-failure,
/// consumed on restore.
pub const ANNOTATION_ORIGINAL_IMAGES: &str = "chaos.gushchin.dev/original-images";

fn pods(ctx: &ExecContext, namespace: &str) -> Api<Pod> {
    Api::namespaced(ctx.client.clone(), namespace)
}

/// A target that vanished between selection and delete already satisfies
/// a destructive action.
fn already_gone(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(resp) if resp.code == 404)
}

async fn delete_pod(
    ctx: &ExecContext,
    target: &TargetRef,
    params: DeleteParams,
) -> Result<bool, ExecutionError> {
    match pods(ctx, &target.namespace).delete(&target.name, &params).await {
        Ok(_) => Ok(true),
        Err(e) if already_gone(&e) => {
            info!(pod = %target.name, namespace = %target.namespace, "pod_already_gone");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/* ============================= POD KILL ============================= */

/// Deletes target pods with grace period zero unless the spec overrides it.
pub struct PodKillExecutor;

/// Grace period for pod-kill deletions.
pub fn kill_grace_period(spec: &ChaosExperimentSpec) -> u32 {
    spec.grace_period_seconds.unwrap_or(0).max(0) as u32
}

#[async_trait]
impl ActionExecutor for PodKillExecutor {
    fn action(&self) -> ChaosAction {
        ChaosAction::PodKill
    }

    fn traits(&self) -> ExecutorTraits {
        ExecutorTraits {
            destructive: true,
            ephemeral_container: false,
            cluster_scoped: false,
            rbac_verbs: &["get", "list", "watch", "delete"],
        }
    }

    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        let grace = kill_grace_period(ctx.spec());
        if delete_pod(ctx, target, DeleteParams::default().grace_period(grace)).await? {
            info!(pod = %target.name, namespace = %target.namespace, grace, "pod_killed");
        }
        Ok(())
    }
}

/* ============================= POD RESTART ============================= */

/// Deletes target pods with the default grace period so their controller
/// recreates them cleanly.
pub struct PodRestartExecutor;

#[async_trait]
impl ActionExecutor for PodRestartExecutor {
    fn action(&self) -> ChaosAction {
        ChaosAction::PodRestart
    }

    fn traits(&self) -> ExecutorTraits {
        ExecutorTraits {
            destructive: true,
            ephemeral_container: false,
            cluster_scoped: false,
            rbac_verbs: &["get", "list", "watch", "delete"],
        }
    }

    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        if delete_pod(ctx, target, DeleteParams::default()).await? {
            info!(pod = %target.name, namespace = %target.namespace, "pod_restarted");
        }
        Ok(())
    }
}

/* ============================= POD FAILURE ============================= */

/// Swaps container images for an unrunnable one for the fault duration,
/// then restores the originals.
pub struct PodFailureExecutor;

/// Map of container name to original image, captured before the swap.
pub fn original_images(pod: &Pod) -> BTreeMap<String, String> {
    pod.spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .filter_map(|c| c.image.clone().map(|img| (c.name.clone(), img)))
                .collect()
        })
        .unwrap_or_default()
}

/// Strategic-merge patch swapping every container onto the unrunnable image
/// and recording the originals in an annotation.
pub fn failure_patch(originals: &BTreeMap<String, String>) -> Result<serde_json::Value, ExecutionError> {
    let recorded = serde_json::to_string(originals)
        .map_err(|e| ExecutionError::fatal(format!("cannot encode original images: {e}")))?;
    let containers: Vec<serde_json::Value> = originals
        .keys()
        .map(|name| serde_json::json!({ "name": name, "image": UNRUNNABLE_IMAGE }))
        .collect();
    Ok(serde_json::json!({
        "metadata": { "annotations": { ANNOTATION_ORIGINAL_IMAGES: recorded } },
        "spec": { "containers": containers }
    }))
}

/// Strategic-merge patch restoring recorded images; the annotation is
/// cleared with a JSON null.
pub fn restore_patch(originals: &BTreeMap<String, String>) -> serde_json::Value {
    let containers: Vec<serde_json::Value> = originals
        .iter()
        .map(|(name, image)| serde_json::json!({ "name": name, "image": image }))
        .collect();
    serde_json::json!({
        "metadata": { "annotations": { ANNOTATION_ORIGINAL_IMAGES: null } },
        "spec": { "containers": containers }
    })
}

async fn restore_images(ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
    let api = pods(ctx, &target.namespace);
    let pod = api.get(&target.name).await?;

    let Some(recorded) = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_ORIGINAL_IMAGES))
    else {
        // Nothing recorded: restore already happened or the fault never
        // applied. Idempotent no-op.
        return Ok(());
    };

    let originals: BTreeMap<String, String> = serde_json::from_str(recorded)
        .map_err(|e| ExecutionError::fatal(format!("corrupt image record on {}: {e}", target.name)))?;

    api.patch(
        &target.name,
        &PatchParams::apply("kube-chaos"),
        &Patch::Strategic(restore_patch(&originals)),
    )
    .await?;

    debug!(pod = %target.name, "pod_failure_images_restored");
    Ok(())
}

#[async_trait]
impl ActionExecutor for PodFailureExecutor {
    fn action(&self) -> ChaosAction {
        ChaosAction::PodFailure
    }

    fn traits(&self) -> ExecutorTraits {
        ExecutorTraits {
            destructive: false,
            ephemeral_container: false,
            cluster_scoped: false,
            rbac_verbs: &["get", "list", "watch", "update", "patch"],
        }
    }

    async fn prepare(
        &self,
        ctx: &ExecContext,
        _targets: &[TargetRef],
    ) -> Result<(), ExecutionError> {
        if ctx.fault_duration().is_none() {
            return Err(ExecutionError::fatal("pod-failure requires a valid duration"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        let duration = ctx
            .fault_duration()
            .ok_or_else(|| ExecutionError::fatal("pod-failure requires a valid duration"))?;

        let api = pods(ctx, &target.namespace);
        let pod = api.get(&target.name).await?;
        let originals = original_images(&pod);
        if originals.is_empty() {
            return Err(ExecutionError::retryable(format!(
                "pod {}/{} has no images to fail",
                target.namespace, target.name
            )));
        }

        api.patch(
            &target.name,
            &PatchParams::apply("kube-chaos"),
            &Patch::Strategic(failure_patch(&originals)?),
        )
        .await?;

        info!(
            pod = %target.name,
            namespace = %target.namespace,
            containers = originals.len(),
            "pod_failure_injected"
        );

        tokio::time::sleep(duration).await;
        restore_images(ctx, target).await
    }

    async fn observe(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        restore_images(ctx, target).await
    }
}

/* ============================= TESTS ============================= */
