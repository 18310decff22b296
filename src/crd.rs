use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/* ============================= API GROUP ============================= */

pub const GROUP: &str = "chaos.gushchin.dev";
pub const VERSION: &str = "v1alpha1";

/// Finalizer placed on experiments so in-flight fault side effects
/// (cordoned nodes, iptables chains) are cleaned up before deletion.
pub const FINALIZER: &str = "chaos.gushchin.dev/cleanup";

/// Namespace annotation marking a namespace as production.
pub const ANNOTATION_PRODUCTION: &str = "chaos.gushchin.dev/production";

/// Namespace annotation marking a namespace as untouchable.
pub const ANNOTATION_EXCLUDE: &str = "chaos.gushchin.dev/exclude";

/// Pod label marking a pod as untouchable.
pub const LABEL_EXCLUDE: &str = "chaos.gushchin.dev/exclude";

/// Labels stamped on history records for indexed queries.
pub const LABEL_HISTORY_EXPERIMENT: &str = "chaos.gushchin.dev/experiment";
pub const LABEL_HISTORY_ACTION: &str = "chaos.gushchin.dev/action";
pub const LABEL_HISTORY_STATUS: &str = "chaos.gushchin.dev/status";

/* ============================= ACTION ENUM ============================= */

/// The fault-injection primitive an experiment applies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ChaosAction {
    PodKill,
    PodRestart,
    PodFailure,
    PodDelay,
    PodCpuStress,
    PodMemoryStress,
    PodNetworkLoss,
    PodDiskFill,
    NetworkPartition,
    NodeDrain,
}

pub const ALL_ACTIONS: [ChaosAction; 10] = [
    ChaosAction::PodKill,
    ChaosAction::PodRestart,
    ChaosAction::PodFailure,
    ChaosAction::PodDelay,
    ChaosAction::PodCpuStress,
    ChaosAction::PodMemoryStress,
    ChaosAction::PodNetworkLoss,
    ChaosAction::PodDiskFill,
    ChaosAction::NetworkPartition,
    ChaosAction::NodeDrain,
];

impl ChaosAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChaosAction::PodKill => "pod-kill",
            ChaosAction::PodRestart => "pod-restart",
            ChaosAction::PodFailure => "pod-failure",
            ChaosAction::PodDelay => "pod-delay",
            ChaosAction::PodCpuStress => "pod-cpu-stress",
            ChaosAction::PodMemoryStress => "pod-memory-stress",
            ChaosAction::PodNetworkLoss => "pod-network-loss",
            ChaosAction::PodDiskFill => "pod-disk-fill",
            ChaosAction::NetworkPartition => "network-partition",
            ChaosAction::NodeDrain => "node-drain",
        }
    }

    pub fn parse(s: &str) -> Option<ChaosAction> {
        ALL_ACTIONS.iter().copied().find(|a| a.as_str() == s)
    }

    /// Whether this action targets nodes rather than pods.
    pub fn targets_nodes(&self) -> bool {
        matches!(self, ChaosAction::NodeDrain)
    }

    /// The resource kind affected by this action, as reported in history.
    pub fn target_kind(&self) -> &'static str {
        if self.targets_nodes() { "Node" } else { "Pod" }
    }
}

impl std::fmt::Display for ChaosAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/* ============================= RETRY / DRAIN / PARTITION ============================= */

/// Backoff strategy between retry attempts of one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RetryBackoff {
    #[default]
    Exponential,
    Fixed,
}

/// How node-drain evicts workloads off the target node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DrainPolicy {
    /// Evict through the eviction API, honoring PodDisruptionBudgets.
    #[default]
    Graceful,
    /// Delete pods directly, bypassing disruption budgets.
    Force,
}

/// Traffic direction a network partition applies to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PartitionDirection {
    Ingress,
    Egress,
    #[default]
    Both,
}

/* ============================= TIME WINDOWS ============================= */

/// A time interval during which execution is permitted (timeWindows) or
/// forbidden (maintenanceWindows).
///
/// Two disjoint shapes: `recurring` windows repeat daily (optionally on a
/// weekday subset, in a named timezone) and may wrap past midnight;
/// `absolute` windows are one-shot RFC3339 intervals and carry neither a
/// timezone nor weekday fields.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TimeWindow {
    #[serde(rename_all = "camelCase")]
    Recurring {
        /// Start of the window as `HH:MM`.
        start: String,
        /// End of the window as `HH:MM`. `end <= start` wraps past midnight.
        end: String,
        /// Weekday subset as 3-letter lowercase tokens (`mon`..`sun`).
        /// Empty or omitted means every day.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days_of_week: Option<Vec<String>>,
        /// IANA timezone name; defaults to UTC.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Absolute {
        /// RFC3339 start instant (inclusive).
        start: String,
        /// RFC3339 end instant (exclusive).
        end: String,
    },
}

/* ============================= SPEC ============================= */

/// ChaosExperiment declares a recurring or one-shot fault injection.
///
/// The reconciler owns all status mutation; the spec is read-only to the
/// controller. Every execution passes the safety pipeline (maintenance and
/// allowed windows, exclusion, production gate, blast-radius cap) before
/// any fault is applied.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos.gushchin.dev",
    version = "v1alpha1",
    kind = "ChaosExperiment",
    plural = "chaosexperiments",
    status = "ChaosExperimentStatus",
    namespaced,
    shortname = "chaos"
)]
#[serde(rename_all = "camelCase")]
pub struct ChaosExperimentSpec {
    /// Fault action to perform.
    pub action: ChaosAction,

    /// Target namespace; defaults to the experiment's own namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Label selector for target resources; empty matches any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,

    /// Absolute cap on resources affected per execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Standard 5-field cron expression (or `@hourly`-style descriptor).
    /// When set the experiment recurs; when absent it fires once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Per-action fault duration, e.g. `30s`, `5m`, `1h30m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Wall-clock budget for the whole experiment; auto-stops when exceeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_duration: Option<String>,

    /// Evaluate everything but apply no fault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,

    /// Explicit opt-in required to target production-marked namespaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_production: Option<bool>,

    /// Upper bound (0-100) on affected ÷ selected per execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_percentage: Option<u32>,

    /// If non-empty, execution is only allowed inside one of these windows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_windows: Option<Vec<TimeWindow>>,

    /// Execution is blocked inside any of these windows, regardless of
    /// timeWindows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_windows: Option<Vec<TimeWindow>>,

    /// Retry budget per execution (0-10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Backoff strategy between retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<RetryBackoff>,

    /// Initial retry delay, e.g. `30s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<String>,

    /// Grace period override for pod-kill (seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<i64>,

    /// Number of CPU stress workers (pod-cpu-stress).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,

    /// Memory to allocate, e.g. `256M`, `1G` (pod-memory-stress).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<String>,

    /// Packet loss percentage 0-100 (pod-network-loss).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_percentage: Option<u32>,

    /// Sparse file size to write, e.g. `1G` (pod-disk-fill).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Eviction behavior for node-drain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_policy: Option<DrainPolicy>,

    /// Uncordon drained nodes when the experiment ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_uncordon: Option<bool>,

    /// Traffic direction for network-partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<PartitionDirection>,

    /// Partition targets: individual IPs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ips: Option<Vec<String>>,

    /// Partition targets: CIDR blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_cidrs: Option<Vec<String>>,

    /// Partition targets: ports or port ranges (`80`, `8000-8080`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ports: Option<Vec<String>>,

    /// Partition targets: protocols (`tcp`, `udp`, `icmp`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_protocols: Option<Vec<String>>,

    /// Partition targets: services whose cluster IPs are resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_services: Option<Vec<String>>,

    /// Partition targets: whole namespaces (resolved to pod IPs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespaces: Option<Vec<String>>,
}

impl ChaosExperimentSpec {
    /// Effective target count: `count` defaults to 1.
    pub fn effective_count(&self) -> u32 {
        self.count.unwrap_or(1)
    }

    /// Effective blast-radius percentage: defaults to 100 (no cap).
    pub fn effective_max_percentage(&self) -> u32 {
        self.max_percentage.unwrap_or(100)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run.unwrap_or(false)
    }

    pub fn allows_production(&self) -> bool {
        self.allow_production.unwrap_or(false)
    }

    pub fn effective_backoff(&self) -> RetryBackoff {
        self.retry_backoff.unwrap_or_default()
    }

    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(0)
    }

    pub fn auto_uncordon_enabled(&self) -> bool {
        self.auto_uncordon.unwrap_or(true)
    }
}

/* ============================= STATUS ============================= */

/// Lifecycle phase of an experiment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ExperimentPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Blocked,
}

impl std::fmt::Display for ExperimentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExperimentPhase::Pending => "Pending",
            ExperimentPhase::Running => "Running",
            ExperimentPhase::Succeeded => "Succeeded",
            ExperimentPhase::Failed => "Failed",
            ExperimentPhase::Blocked => "Blocked",
        };
        f.write_str(s)
    }
}

/// One observed condition on the experiment (Ready, Scheduled, WindowOpen,
/// BlastRadiusOK).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    /// "True" or "False", Kubernetes condition convention.
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_SCHEDULED: &str = "Scheduled";
pub const CONDITION_WINDOW_OPEN: &str = "WindowOpen";
pub const CONDITION_BLAST_RADIUS_OK: &str = "BlastRadiusOK";

/// ChaosExperimentStatus reports the observed execution state.
///
/// Written exclusively by the reconciler, once per reconcile.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChaosExperimentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ExperimentPhase>,

    /// ISO 8601 timestamp of the last execution attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_time: Option<String>,

    /// Human-readable outcome of the last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_result: Option<String>,

    /// Resources affected by the last execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_count: Option<u32>,

    /// Retries consumed by the current execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// ISO 8601 timestamp of the next retry attempt, if one is pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_time: Option<String>,

    /// The `.metadata.generation` that was last validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<ExperimentCondition>>,
}

/* ============================= HISTORY CRD ============================= */

/// Terminal status of one execution attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    DryRun,
    Blocked,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::DryRun => "dry-run",
            ExecutionStatus::Blocked => "blocked",
        }
    }
}

/// What caused an execution attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TriggeredBy {
    Manual,
    Schedule,
    Retry,
}

/// A resource touched (or, in dry-run, that would be touched) by an execution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AffectedResource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

/// ChaosExperimentHistory is an immutable audit record of one execution
/// attempt, owned by the experiment and pruned by retention.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chaos.gushchin.dev",
    version = "v1alpha1",
    kind = "ChaosExperimentHistory",
    plural = "chaosexperimenthistories",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ChaosExperimentHistorySpec {
    /// Name of the experiment that produced this record.
    pub experiment: String,

    pub experiment_namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_uid: Option<String>,

    pub action: ChaosAction,

    pub target_namespace: String,

    /// ISO 8601 timestamp of the execution attempt.
    pub execution_time: String,

    /// Wall-clock duration of the attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    pub status: ExecutionStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_resources: Vec<AffectedResource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub triggered_by: TriggeredBy,

    pub operator_version: String,
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn minimal_spec() -> ChaosExperimentSpec {
        ChaosExperimentSpec {
            action: ChaosAction::PodKill,
            namespace: None,
            selector: None,
            count: None,
            schedule: None,
            duration: None,
            experiment_duration: None,
            dry_run: None,
            allow_production: None,
            max_percentage: None,
            time_windows: None,
            maintenance_windows: None,
            max_retries: None,
            retry_backoff: None,
            retry_delay: None,
            grace_period_seconds: None,
            cpu: None,
            memory_size: None,
            loss_percentage: None,
            size: None,
            drain_policy: None,
            auto_uncordon: None,
            direction: None,
            target_ips: None,
            target_cidrs: None,
            target_ports: None,
            target_protocols: None,
            target_services: None,
            target_namespaces: None,
        }
    }

    #[test]
    fn test_crd_generates_valid_yaml() {
        let crd = ChaosExperiment::crd();
        let yaml = serde_yaml::to_string(&crd).expect("CRD should serialize to YAML");
        assert!(yaml.contains("chaos.gushchin.dev"));
        assert!(yaml.contains("ChaosExperiment"));
        assert!(yaml.contains("chaosexperiments"));
    }

    #[test]
    fn test_crd_api_group_and_version() {
        let crd = ChaosExperiment::crd();
        assert_eq!(crd.spec.group, "chaos.gushchin.dev");
        assert_eq!(crd.spec.versions[0].name, "v1alpha1");
    }

    #[test]
    fn test_crd_is_namespaced() {
        let crd = ChaosExperiment::crd();
        assert_eq!(crd.spec.scope, "Namespaced");
    }

    #[test]
    fn test_history_crd_names() {
        let crd = ChaosExperimentHistory::crd();
        assert_eq!(crd.spec.names.kind, "ChaosExperimentHistory");
        assert_eq!(crd.spec.names.plural, "chaosexperimenthistories");
    }

    #[test]
    fn test_two_crds_different_names() {
        assert_ne!(
            ChaosExperiment::crd().spec.names.kind,
            ChaosExperimentHistory::crd().spec.names.kind
        );
    }

    // ── action serde ──

    #[test]
    fn test_action_serializes_kebab_case() {
        let json = serde_json::to_string(&ChaosAction::PodCpuStress).unwrap();
        assert_eq!(json, r#""pod-cpu-stress""#);
        let json = serde_json::to_string(&ChaosAction::NetworkPartition).unwrap();
        assert_eq!(json, r#""network-partition""#);
    }

    #[test]
    fn test_action_roundtrip_all() {
        for action in ALL_ACTIONS {
            let json = serde_json::to_string(&action).unwrap();
            let back: ChaosAction = serde_json::from_str(&json).unwrap();
            assert_eq!(back, action);
            // serde name and as_str agree
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(ChaosAction::parse("pod-kill"), Some(ChaosAction::PodKill));
        assert_eq!(ChaosAction::parse("node-drain"), Some(ChaosAction::NodeDrain));
        assert_eq!(ChaosAction::parse("pod-explode"), None);
    }

    #[test]
    fn test_action_target_kind() {
        assert_eq!(ChaosAction::PodKill.target_kind(), "Pod");
        assert_eq!(ChaosAction::NodeDrain.target_kind(), "Node");
        assert!(ChaosAction::NodeDrain.targets_nodes());
        assert!(!ChaosAction::PodDelay.targets_nodes());
    }

    // ── time window serde ──

    #[test]
    fn test_recurring_window_tagged_shape() {
        let w = TimeWindow::Recurring {
            start: "22:00".into(),
            end: "02:00".into(),
            days_of_week: Some(vec!["tue".into()]),
            timezone: Some("Europe/Berlin".into()),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["type"], "recurring");
        assert_eq!(json["start"], "22:00");
        assert_eq!(json["daysOfWeek"][0], "tue");
        assert_eq!(json["timezone"], "Europe/Berlin");
    }

    #[test]
    fn test_absolute_window_tagged_shape() {
        let w = TimeWindow::Absolute {
            start: "2030-01-01T00:00:00Z".into(),
            end: "2030-01-01T01:00:00Z".into(),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["type"], "absolute");
        assert!(json.get("timezone").is_none());
        assert!(json.get("daysOfWeek").is_none());
    }

    #[test]
    fn test_window_deserialize_recurring() {
        let json = r#"{"type":"recurring","start":"09:00","end":"17:00"}"#;
        let w: TimeWindow = serde_json::from_str(json).unwrap();
        match w {
            TimeWindow::Recurring { start, end, days_of_week, timezone } => {
                assert_eq!(start, "09:00");
                assert_eq!(end, "17:00");
                assert!(days_of_week.is_none());
                assert!(timezone.is_none());
            }
            _ => panic!("expected recurring"),
        }
    }

    // ── spec defaults ──

    #[test]
    fn test_spec_effective_defaults() {
        let spec = minimal_spec();
        assert_eq!(spec.effective_count(), 1);
        assert_eq!(spec.effective_max_percentage(), 100);
        assert!(!spec.is_dry_run());
        assert!(!spec.allows_production());
        assert_eq!(spec.effective_backoff(), RetryBackoff::Exponential);
        assert_eq!(spec.effective_max_retries(), 0);
        assert!(spec.auto_uncordon_enabled());
    }

    #[test]
    fn test_spec_serde_roundtrip() {
        let spec = ChaosExperimentSpec {
            action: ChaosAction::PodCpuStress,
            namespace: Some("workloads".into()),
            count: Some(3),
            cpu: Some(2),
            duration: Some("5m".into()),
            schedule: Some("*/5 * * * *".into()),
            max_percentage: Some(30),
            ..minimal_spec()
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: ChaosExperimentSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action, ChaosAction::PodCpuStress);
        assert_eq!(back.count, Some(3));
        assert_eq!(back.cpu, Some(2));
        assert_eq!(back.schedule.as_deref(), Some("*/5 * * * *"));
    }

    #[test]
    fn test_spec_camel_case_field_names() {
        let spec = ChaosExperimentSpec {
            action: ChaosAction::PodNetworkLoss,
            loss_percentage: Some(40),
            experiment_duration: Some("15m".into()),
            max_retries: Some(3),
            ..minimal_spec()
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("lossPercentage"));
        assert!(json.contains("experimentDuration"));
        assert!(json.contains("maxRetries"));
        assert!(!json.contains("loss_percentage"));
    }

    #[test]
    fn test_spec_minimal_json_deserializes() {
        let json = r#"{"action":"pod-kill"}"#;
        let spec: ChaosExperimentSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.action, ChaosAction::PodKill);
        assert!(spec.selector.is_none());
        assert!(spec.schedule.is_none());
    }

    // ── status ──

    #[test]
    fn test_phase_default_is_pending() {
        assert_eq!(ExperimentPhase::default(), ExperimentPhase::Pending);
    }

    #[test]
    fn test_phase_serializes_pascal_case() {
        assert_eq!(
            serde_json::to_string(&ExperimentPhase::Blocked).unwrap(),
            r#""Blocked""#
        );
    }

    #[test]
    fn test_status_omits_none_fields() {
        let status = ChaosExperimentStatus {
            phase: Some(ExperimentPhase::Running),
            ..Default::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("phase"));
        assert!(!json.contains("retryCount"));
        assert!(!json.contains("lastError"));
        assert!(!json.contains("conditions"));
    }

    #[test]
    fn test_status_roundtrip() {
        let status = ChaosExperimentStatus {
            phase: Some(ExperimentPhase::Failed),
            last_run_time: Some("2026-03-01T12:00:00Z".into()),
            last_run_result: Some("executor failed".into()),
            affected_count: Some(2),
            retry_count: Some(3),
            last_error: Some("timeout".into()),
            next_retry_time: None,
            observed_generation: Some(4),
            conditions: Some(vec![ExperimentCondition {
                condition_type: CONDITION_READY.into(),
                status: "False".into(),
                reason: Some("RetriesExhausted".into()),
                message: None,
                last_transition_time: Some("2026-03-01T12:00:00Z".into()),
            }]),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains(r#""type":"Ready""#));
        let back: ChaosExperimentStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.phase, Some(ExperimentPhase::Failed));
        assert_eq!(back.retry_count, Some(3));
        assert_eq!(back.conditions.unwrap().len(), 1);
    }

    // ── history ──

    #[test]
    fn test_execution_status_serde_names() {
        assert_eq!(serde_json::to_string(&ExecutionStatus::DryRun).unwrap(), r#""dry-run""#);
        assert_eq!(serde_json::to_string(&ExecutionStatus::Success).unwrap(), r#""success""#);
        assert_eq!(ExecutionStatus::Blocked.as_str(), "blocked");
    }

    #[test]
    fn test_triggered_by_serde_names() {
        assert_eq!(serde_json::to_string(&TriggeredBy::Schedule).unwrap(), r#""schedule""#);
        assert_eq!(serde_json::to_string(&TriggeredBy::Manual).unwrap(), r#""manual""#);
    }

    #[test]
    fn test_history_spec_roundtrip() {
        let spec = ChaosExperimentHistorySpec {
            experiment: "kill-nginx".into(),
            experiment_namespace: "default".into(),
            experiment_uid: Some("abc-123".into()),
            action: ChaosAction::PodKill,
            target_namespace: "workloads".into(),
            execution_time: "2026-03-01T12:00:00Z".into(),
            duration: Some("1.2s".into()),
            status: ExecutionStatus::Success,
            affected_resources: vec![AffectedResource {
                kind: "Pod".into(),
                name: "nginx-abc".into(),
                namespace: "workloads".into(),
            }],
            error: None,
            triggered_by: TriggeredBy::Schedule,
            operator_version: "0.1.0".into(),
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains(r#""status":"success""#));
        assert!(json.contains("targetNamespace"));
        let back: ChaosExperimentHistorySpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.affected_resources.len(), 1);
        assert_eq!(back.triggered_by, TriggeredBy::Schedule);
    }

    #[test]
    fn test_history_empty_affected_omitted() {
        let spec = ChaosExperimentHistorySpec {
            experiment: "e".into(),
            experiment_namespace: "default".into(),
            experiment_uid: None,
            action: ChaosAction::PodDelay,
            target_namespace: "default".into(),
            execution_time: "2026-03-01T12:00:00Z".into(),
            duration: None,
            status: ExecutionStatus::Blocked,
            affected_resources: vec![],
            error: Some("outside allowed window".into()),
            triggered_by: TriggeredBy::Manual,
            operator_version: "0.1.0".into(),
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(!json.contains("affectedResources"));
    }
}
