use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams};
use tracing::{info, warn};

use super::{ActionExecutor, ExecContext, ExecutionError, ExecutorTraits};
use crate::crd::{ChaosAction, DrainPolicy};
use crate::safety::TargetRef;

/* ============================= HELPERS ============================= */

/// DaemonSet pods restart on the same node immediately; draining them is
/// pointless churn.
pub fn is_daemonset_pod(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .into_iter()
        .flatten()
        .any(|owner| owner.kind == "DaemonSet")
}

/// Static mirror pods are managed by the kubelet and cannot be evicted.
pub fn is_mirror_pod(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key("kubernetes.io/config.mirror"))
}

pub fn is_evictable(pod: &Pod) -> bool {
    !is_daemonset_pod(pod) && !is_mirror_pod(pod)
}

fn cordon_patch(unschedulable: bool) -> serde_json::Value {
    serde_json::json!({ "spec": { "unschedulable": unschedulable } })
}

/* ============================= NODE DRAIN ============================= */

/// Cordon the node, then evict (or force-delete) its workloads per
/// `drainPolicy`. `observe` uncordons at experiment end when
/// `autoUncordon` is set.
pub struct NodeDrainExecutor;

impl NodeDrainExecutor {
    async fn set_unschedulable(
        &self,
        ctx: &ExecContext,
        node: &str,
        value: bool,
    ) -> Result<(), ExecutionError> {
        let nodes: Api<Node> = Api::all(ctx.client.clone());
        nodes
            .patch(
                node,
                &PatchParams::apply("kube-chaos"),
                &Patch::Merge(cordon_patch(value)),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ActionExecutor for NodeDrainExecutor {
    fn action(&self) -> ChaosAction {
        ChaosAction::NodeDrain
    }

    fn traits(&self) -> ExecutorTraits {
        ExecutorTraits {
            destructive: true,
            ephemeral_container: false,
            cluster_scoped: true,
            rbac_verbs: &["get", "list", "watch", "update", "patch"],
        }
    }

    async fn prepare(
        &self,
        ctx: &ExecContext,
        _targets: &[TargetRef],
    ) -> Result<(), ExecutionError> {
        if ctx.spec().drain_policy.is_none() {
            return Err(ExecutionError::fatal("node-drain requires drainPolicy"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        let policy = ctx.spec().drain_policy.unwrap_or_default();

        self.set_unschedulable(ctx, &target.name, true).await?;
        info!(node = %target.name, "node_cordoned");

        let pods: Api<Pod> = Api::all(ctx.client.clone());
        let on_node = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={}", target.name)))
            .await?;

        let mut evicted = 0usize;
        for pod in on_node.items.iter().filter(|p| is_evictable(p)) {
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
            let namespaced: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);

            let result = match policy {
                DrainPolicy::Graceful => namespaced
                    .evict(name, &EvictParams::default())
                    .await
                    .map(|_| ()),
                DrainPolicy::Force => namespaced
                    .delete(name, &DeleteParams::default().grace_period(0))
                    .await
                    .map(|_| ()),
            };

            match result {
                Ok(()) => evicted += 1,
                // Already gone: eviction goal met.
                Err(kube::Error::Api(resp)) if resp.code == 404 => {}
                // A PodDisruptionBudget refusing an eviction is transient.
                Err(kube::Error::Api(resp)) if resp.code == 429 => {
                    return Err(ExecutionError::retryable(format!(
                        "eviction of {namespace}/{name} blocked by disruption budget"
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(node = %target.name, evicted, policy = ?policy, "node_drained");
        Ok(())
    }

    async fn observe(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        if !ctx.spec().auto_uncordon_enabled() {
            return Ok(());
        }
        match self.set_unschedulable(ctx, &target.name, false).await {
            Ok(()) => {
                info!(node = %target.name, "node_uncordoned");
                Ok(())
            }
            Err(e) => {
                // Cleanup failure must not fail a succeeded drain; surface
                // it for the event recorder instead.
                warn!(node = %target.name, error = %e, "uncordon_failed");
                Err(e)
            }
        }
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn pod_owned_by(kind: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("p".into()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "apps/v1".into(),
                    kind: kind.into(),
                    name: "owner".into(),
                    uid: "uid".into(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_daemonset_pod_detected() {
        assert!(is_daemonset_pod(&pod_owned_by("DaemonSet")));
        assert!(!is_daemonset_pod(&pod_owned_by("ReplicaSet")));
        assert!(!is_daemonset_pod(&Pod::default()));
    }

    #[test]
    fn test_mirror_pod_detected() {
        let pod = Pod {
            metadata: ObjectMeta {
                annotations: Some(
                    [("kubernetes.io/config.mirror".to_string(), "hash".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(is_mirror_pod(&pod));
        assert!(!is_mirror_pod(&Pod::default()));
    }

    #[test]
    fn test_evictable_filters_both() {
        assert!(!is_evictable(&pod_owned_by("DaemonSet")));
        assert!(is_evictable(&pod_owned_by("ReplicaSet")));
        assert!(is_evictable(&Pod::default()));
    }

    #[test]
    fn test_cordon_patch_shape() {
        let patch = cordon_patch(true);
        assert_eq!(patch["spec"]["unschedulable"], true);
        let patch = cordon_patch(false);
        assert_eq!(patch["spec"]["unschedulable"], false);
    }

    #[test]
    fn test_drain_is_cluster_scoped_and_destructive() {
        let t = NodeDrainExecutor.traits();
        assert!(t.destructive);
        assert!(t.cluster_scoped);
        assert!(!t.ephemeral_container);
    }
}
