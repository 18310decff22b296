use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Capabilities, EphemeralContainer, Pod, SecurityContext};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

use super::ExecutionError;
use crate::safety::TargetRef;

/* ============================= CONTRACT ============================= */

/// What to run inside a target pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionSpec {
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Grants CAP_NET_ADMIN (tc, iptables).
    pub net_admin: bool,
}

/// Reference to a launched injection, used to wait and clean up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionHandle {
    pub pod: TargetRef,
    pub container_name: String,
}

/// Seam between executors and the ephemeral-container machinery, so the
/// core stays testable without a cluster.
#[async_trait]
pub trait InjectorClient: Send + Sync {
    async fn launch(
        &self,
        pod: &TargetRef,
        spec: &InjectionSpec,
    ) -> Result<InjectionHandle, ExecutionError>;

    /// Wait until the injected container terminates, bounded by `timeout`.
    async fn wait(
        &self,
        handle: &InjectionHandle,
        timeout: Duration,
    ) -> Result<(), ExecutionError>;

    /// Best-effort cleanup of the injection.
    async fn cleanup(&self, handle: &InjectionHandle) -> Result<(), ExecutionError>;
}

/* ============================= EPHEMERAL CONTAINERS ============================= */

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Real injector: attaches ephemeral containers through the
/// `ephemeralcontainers` subresource and polls their status.
pub struct EphemeralContainerInjector {
    client: Client,
}

impl EphemeralContainerInjector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl InjectorClient for EphemeralContainerInjector {
    async fn launch(
        &self,
        pod: &TargetRef,
        spec: &InjectionSpec,
    ) -> Result<InjectionHandle, ExecutionError> {
        let security_context = spec.net_admin.then(|| SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["NET_ADMIN".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        });

        let container = EphemeralContainer {
            name: spec.container_name.clone(),
            image: Some(spec.image.clone()),
            command: Some(spec.command.clone()),
            security_context,
            // Share the target's network and process view.
            target_container_name: None,
            ..Default::default()
        };

        let patch = serde_json::json!({
            "spec": {
                "ephemeralContainers": [container]
            }
        });

        self.pods(&pod.namespace)
            .patch_subresource(
                &pod.name,
                "ephemeralcontainers",
                &PatchParams::apply("kube-chaos"),
                &Patch::Strategic(&patch),
            )
            .await
            .map_err(|e| {
                // Launch failures are transient by contract (the pod may be
                // restarting or the kubelet slow to accept the patch).
                ExecutionError::retryable(format!(
                    "failed to launch ephemeral container in {}/{}: {e}",
                    pod.namespace, pod.name
                ))
            })?;

        debug!(
            pod = %pod.name,
            namespace = %pod.namespace,
            container = %spec.container_name,
            "ephemeral_container_launched"
        );

        Ok(InjectionHandle { pod: pod.clone(), container_name: spec.container_name.clone() })
    }

    async fn wait(
        &self,
        handle: &InjectionHandle,
        timeout: Duration,
    ) -> Result<(), ExecutionError> {
        let pods = self.pods(&handle.pod.namespace);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(ExecutionError::retryable(format!(
                    "ephemeral container {} in {}/{} did not finish within {timeout:?}",
                    handle.container_name, handle.pod.namespace, handle.pod.name
                )));
            }

            let pod = pods.get(&handle.pod.name).await.map_err(ExecutionError::from)?;
            let finished = pod
                .status
                .as_ref()
                .and_then(|s| s.ephemeral_container_statuses.as_ref())
                .into_iter()
                .flatten()
                .filter(|cs| cs.name == handle.container_name)
                .any(|cs| {
                    cs.state
                        .as_ref()
                        .is_some_and(|state| state.terminated.is_some())
                });

            if finished {
                debug!(
                    pod = %handle.pod.name,
                    container = %handle.container_name,
                    "ephemeral_container_finished"
                );
                return Ok(());
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn cleanup(&self, handle: &InjectionHandle) -> Result<(), ExecutionError> {
        // Ephemeral containers cannot be removed from a pod spec; the
        // injected commands are self-terminating.
        debug!(
            pod = %handle.pod.name,
            container = %handle.container_name,
            "ephemeral_container_left_terminated"
        );
        Ok(())
    }
}

/* ============================= TEST DOUBLE ============================= */


/* ============================= TESTS ============================= */
