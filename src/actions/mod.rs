pub mod injector;
pub mod network;
pub mod node;
pub mod pod;
pub mod stress;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::{Client, ResourceExt};
use thiserror::Error;

use crate::crd::{ChaosAction, ChaosExperiment, ChaosExperimentSpec};
use crate::safety::TargetRef;
use crate::validation;
use injector::InjectorClient;

/* ============================= ERRORS ============================= */

/// Execution failure taxonomy: retryable errors consume the retry budget,
/// fatal errors terminate the run immediately.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Fatal(String),
}

impl ExecutionError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        ExecutionError::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        ExecutionError::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Retryable(_))
    }

    /// Metrics label for `chaos_experiment_errors_total`.
    pub fn error_type(&self) -> &'static str {
        match self {
            ExecutionError::Retryable(_) => "retryable",
            ExecutionError::Fatal(_) => "fatal",
        }
    }
}

impl From<kube::Error> for ExecutionError {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(resp) => match resp.code {
                401 | 403 => ExecutionError::Fatal(format!("api access denied: {e}")),
                409 | 429 => ExecutionError::Retryable(format!("api conflict: {e}")),
                code if code >= 500 => ExecutionError::Retryable(format!("api error: {e}")),
                _ => ExecutionError::Retryable(format!("api error: {e}")),
            },
            _ => ExecutionError::Retryable(format!("request failed: {e}")),
        }
    }
}

/* ============================= CONTEXT ============================= */

/// Slack added on top of the fault duration when waiting on an ephemeral
/// container to finish.
pub const WAIT_SLACK: Duration = Duration::from_secs(30);

/// Everything an executor needs for one execution.
pub struct ExecContext {
    pub client: Client,
    pub injector: Arc<dyn InjectorClient>,
    pub experiment: Arc<ChaosExperiment>,
}

impl ExecContext {
    pub fn spec(&self) -> &ChaosExperimentSpec {
        &self.experiment.spec
    }

    pub fn target_namespace(&self) -> String {
        target_namespace(&self.experiment)
    }

    /// Fault duration from the spec; `None` when the action has no duration.
    pub fn fault_duration(&self) -> Option<Duration> {
        self.spec().duration.as_deref().and_then(validation::parse_duration)
    }

    /// Duration plus slack, bounding waits on ephemeral containers.
    pub fn wait_budget(&self) -> Duration {
        self.fault_duration().unwrap_or_default() + WAIT_SLACK
    }
}

/// The namespace an experiment injects faults into.
pub fn target_namespace(experiment: &ChaosExperiment) -> String {
    experiment
        .spec
        .namespace
        .clone()
        .or_else(|| experiment.namespace())
        .unwrap_or_else(|| "default".to_string())
}

/* ============================= EXECUTOR CONTRACT ============================= */

/// Capability flags an executor declares about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorTraits {
    /// Removes or evicts workloads rather than degrading them in place.
    pub destructive: bool,
    /// Delivers the fault through an ephemeral container.
    pub ephemeral_container: bool,
    /// Needs cluster-scoped RBAC (nodes).
    pub cluster_scoped: bool,
    /// Verbs the executor needs on its primary resource.
    pub rbac_verbs: &'static [&'static str],
}

/// Common contract for all fault actions: validate once, apply per target,
/// optionally clean up per target.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn action(&self) -> ChaosAction;

    fn traits(&self) -> ExecutorTraits;

    /// Validate action-specific parameters once per execution.
    async fn prepare(
        &self,
        _ctx: &ExecContext,
        _targets: &[TargetRef],
    ) -> Result<(), ExecutionError> {
        Ok(())
    }

    /// Apply the fault to one target. Must honor context cancellation via
    /// the reconciler's timeout wrapper.
    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError>;

    /// Post-step per target, e.g. restore images or uncordon a node.
    async fn observe(
        &self,
        _ctx: &ExecContext,
        _target: &TargetRef,
    ) -> Result<(), ExecutionError> {
        Ok(())
    }
}

/// Verb used in dry-run status messages: `DRY RUN: Would <verb> N pod(s)`.
pub fn dry_run_verb(action: ChaosAction) -> &'static str {
    match action {
        ChaosAction::PodKill => "delete",
        ChaosAction::PodRestart => "restart",
        ChaosAction::PodFailure => "fail",
        ChaosAction::PodDelay => "delay",
        ChaosAction::PodCpuStress | ChaosAction::PodMemoryStress => "stress",
        ChaosAction::PodNetworkLoss => "degrade",
        ChaosAction::PodDiskFill => "fill",
        ChaosAction::NetworkPartition => "partition",
        ChaosAction::NodeDrain => "drain",
    }
}

/* ============================= REGISTRY ============================= */

/// Dispatcher keyed by action name.
pub struct ExecutorRegistry {
    executors: HashMap<ChaosAction, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self { executors: HashMap::new() }
    }

    /// Registry with all ten built-in executors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(pod::PodKillExecutor));
        registry.register(Arc::new(pod::PodRestartExecutor));
        registry.register(Arc::new(pod::PodFailureExecutor));
        registry.register(Arc::new(stress::CpuStressExecutor));
        registry.register(Arc::new(stress::MemoryStressExecutor));
        registry.register(Arc::new(stress::DiskFillExecutor));
        registry.register(Arc::new(network::PodDelayExecutor));
        registry.register(Arc::new(network::NetworkLossExecutor));
        registry.register(Arc::new(network::NetworkPartitionExecutor));
        registry.register(Arc::new(node::NodeDrainExecutor));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(executor.action(), executor);
    }

    pub fn get(&self, action: ChaosAction) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(&action).cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/* ============================= TESTS ============================= */
