use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ListParams, ObjectMeta};
use kube::{Client, Resource, ResourceExt};
use tracing::{info, warn};

use crate::crd::{
    ChaosExperiment, ChaosExperimentHistory, ChaosExperimentHistorySpec, ExecutionStatus,
    LABEL_HISTORY_ACTION, LABEL_HISTORY_EXPERIMENT, LABEL_HISTORY_STATUS, TriggeredBy,
};
use crate::safety::TargetRef;

/* ============================= CONSTANTS ============================= */

pub const DEFAULT_RETENTION: usize = 100;

/* ============================= OUTCOME ============================= */

/// Everything recorded about one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub affected: Vec<TargetRef>,
    pub error: Option<String>,
    pub triggered_by: TriggeredBy,
    pub execution_time: DateTime<Utc>,
    pub duration: Option<std::time::Duration>,
}

/* ============================= RECORD BUILDING ============================= */

/// Build the audit record for one attempt. The record carries indexable
/// labels and, when it lives in the experiment's own namespace, an owner
/// reference for garbage collection on experiment deletion.
pub fn build_record(
    experiment: &ChaosExperiment,
    outcome: &ExecutionOutcome,
    history_namespace: &str,
) -> ChaosExperimentHistory {
    let experiment_name = experiment.name_any();
    let experiment_namespace = experiment.namespace().unwrap_or_default();

    let mut labels = BTreeMap::new();
    labels.insert(LABEL_HISTORY_EXPERIMENT.to_string(), experiment_name.clone());
    labels.insert(
        LABEL_HISTORY_ACTION.to_string(),
        experiment.spec.action.as_str().to_string(),
    );
    labels.insert(
        LABEL_HISTORY_STATUS.to_string(),
        outcome.status.as_str().to_string(),
    );

    // Owner references cannot cross namespaces; retention pruning covers
    // records written elsewhere.
    let owner_references = (history_namespace == experiment_namespace)
        .then(|| experiment.controller_owner_ref(&()))
        .flatten()
        .map(|o: OwnerReference| vec![o]);

    let name = format!(
        "{experiment_name}-{}",
        outcome.execution_time.timestamp_millis()
    );

    ChaosExperimentHistory {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(history_namespace.to_string()),
            labels: Some(labels),
            owner_references,
            ..Default::default()
        },
        spec: ChaosExperimentHistorySpec {
            experiment: experiment_name,
            experiment_namespace,
            experiment_uid: experiment.meta().uid.clone(),
            action: experiment.spec.action,
            target_namespace: crate::actions::target_namespace(experiment),
            execution_time: outcome.execution_time.to_rfc3339(),
            duration: outcome.duration.map(|d| format!("{:.1}s", d.as_secs_f64())),
            status: outcome.status,
            affected_resources: outcome.affected.iter().map(TargetRef::to_affected).collect(),
            error: outcome.error.clone(),
            triggered_by: outcome.triggered_by,
            operator_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    }
}

/// Names of records to delete so only the newest `retention` remain.
/// RFC3339 execution times in UTC sort chronologically as strings.
pub fn prune_candidates(records: &[ChaosExperimentHistory], retention: usize) -> Vec<String> {
    if records.len() <= retention {
        return Vec::new();
    }
    let mut sorted: Vec<&ChaosExperimentHistory> = records.iter().collect();
    sorted.sort_by(|a, b| b.spec.execution_time.cmp(&a.spec.execution_time));
    sorted[retention..]
        .iter()
        .filter_map(|r| r.metadata.name.clone())
        .collect()
}

/* ============================= RECORDER ============================= */

/// Appends audit records and enforces per-experiment retention.
#[derive(Clone)]
pub struct HistoryRecorder {
    client: Client,
    namespace: String,
    retention: usize,
    enabled: bool,
}

impl HistoryRecorder {
    pub fn new(client: Client, namespace: impl Into<String>, retention: usize, enabled: bool) -> Self {
        Self { client, namespace: namespace.into(), retention, enabled }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Persist one attempt and prune old records beyond the retention limit.
    pub async fn record(
        &self,
        experiment: &ChaosExperiment,
        outcome: &ExecutionOutcome,
    ) -> Result<(), kube::Error> {
        if !self.enabled {
            return Ok(());
        }

        let api: Api<ChaosExperimentHistory> =
            Api::namespaced(self.client.clone(), &self.namespace);
        let record = build_record(experiment, outcome, &self.namespace);
        let record_name = record.name_any();

        api.create(&Default::default(), &record).await?;

        info!(
            record = %record_name,
            experiment = %experiment.name_any(),
            status = outcome.status.as_str(),
            "history_record_created"
        );

        self.prune(&api, &experiment.name_any()).await;
        Ok(())
    }

    /// Retention is best-effort: a failed delete is logged and retried on
    /// the next record.
    async fn prune(&self, api: &Api<ChaosExperimentHistory>, experiment_name: &str) {
        let selector = format!("{LABEL_HISTORY_EXPERIMENT}={experiment_name}");
        let existing = match api.list(&ListParams::default().labels(&selector)).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!(error = %e, experiment = %experiment_name, "history_list_failed");
                return;
            }
        };

        for name in prune_candidates(&existing, self.retention) {
            if let Err(e) = api.delete(&name, &Default::default()).await {
                warn!(error = %e, record = %name, "history_record_delete_failed");
            }
        }
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ChaosExperimentSpec;

    fn make_experiment(name: &str, namespace: &str, uid: Option<&str>) -> ChaosExperiment {
        let spec: ChaosExperimentSpec = serde_json::from_str(r#"{"action":"pod-kill"}"#).unwrap();
        let mut exp = ChaosExperiment::new(name, spec);
        exp.metadata.namespace = Some(namespace.to_string());
        exp.metadata.uid = uid.map(String::from);
        exp
    }

    fn outcome_at(millis: i64, status: ExecutionStatus) -> ExecutionOutcome {
        ExecutionOutcome {
            status,
            affected: vec![TargetRef::pod("nginx-1", "apps")],
            error: None,
            triggered_by: TriggeredBy::Manual,
            execution_time: DateTime::<Utc>::from_timestamp_millis(millis).unwrap(),
            duration: Some(std::time::Duration::from_millis(1500)),
        }
    }

    fn record_at(name: &str, time: &str) -> ChaosExperimentHistory {
        let mut record = build_record(
            &make_experiment("exp", "default", None),
            &outcome_at(0, ExecutionStatus::Success),
            "default",
        );
        record.metadata.name = Some(name.to_string());
        record.spec.execution_time = time.to_string();
        record
    }

    // ── build_record ──

    #[test]
    fn test_record_labels_indexable() {
        let exp = make_experiment("kill-nginx", "default", Some("uid-1"));
        let record = build_record(&exp, &outcome_at(1_700_000_000_000, ExecutionStatus::Success), "default");
        let labels = record.metadata.labels.unwrap();
        assert_eq!(labels[LABEL_HISTORY_EXPERIMENT], "kill-nginx");
        assert_eq!(labels[LABEL_HISTORY_ACTION], "pod-kill");
        assert_eq!(labels[LABEL_HISTORY_STATUS], "success");
    }

    #[test]
    fn test_record_name_embeds_timestamp() {
        let exp = make_experiment("kill-nginx", "default", None);
        let record = build_record(&exp, &outcome_at(1_700_000_000_000, ExecutionStatus::DryRun), "default");
        assert_eq!(record.name_any(), "kill-nginx-1700000000000");
    }

    #[test]
    fn test_record_owner_ref_same_namespace() {
        let exp = make_experiment("exp", "default", Some("uid-1"));
        let record = build_record(&exp, &outcome_at(0, ExecutionStatus::Success), "default");
        let owners = record.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "ChaosExperiment");
        assert_eq!(owners[0].uid, "uid-1");
    }

    #[test]
    fn test_record_no_owner_ref_across_namespaces() {
        let exp = make_experiment("exp", "default", Some("uid-1"));
        let record = build_record(&exp, &outcome_at(0, ExecutionStatus::Success), "chaos-system");
        assert!(record.metadata.owner_references.is_none());
        assert_eq!(record.metadata.namespace.as_deref(), Some("chaos-system"));
    }

    #[test]
    fn test_record_spec_fields() {
        let exp = make_experiment("exp", "default", Some("uid-9"));
        let outcome = ExecutionOutcome {
            error: Some("boom".into()),
            ..outcome_at(1_700_000_000_000, ExecutionStatus::Failure)
        };
        let record = build_record(&exp, &outcome, "default");
        assert_eq!(record.spec.experiment, "exp");
        assert_eq!(record.spec.experiment_uid.as_deref(), Some("uid-9"));
        assert_eq!(record.spec.status, ExecutionStatus::Failure);
        assert_eq!(record.spec.error.as_deref(), Some("boom"));
        assert_eq!(record.spec.affected_resources.len(), 1);
        assert_eq!(record.spec.duration.as_deref(), Some("1.5s"));
        assert_eq!(record.spec.operator_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_record_target_namespace_from_spec_override() {
        let mut exp = make_experiment("exp", "default", None);
        exp.spec.namespace = Some("workloads".into());
        let record = build_record(&exp, &outcome_at(0, ExecutionStatus::Success), "default");
        assert_eq!(record.spec.target_namespace, "workloads");
    }

    // ── retention ──

    #[test]
    fn test_prune_keeps_newest() {
        let records = vec![
            record_at("r1", "2026-03-01T10:00:00+00:00"),
            record_at("r2", "2026-03-01T12:00:00+00:00"),
            record_at("r3", "2026-03-01T11:00:00+00:00"),
            record_at("r4", "2026-03-01T09:00:00+00:00"),
        ];
        let doomed = prune_candidates(&records, 2);
        // Keep r2 (12:00) and r3 (11:00); delete r1 and r4.
        assert_eq!(doomed.len(), 2);
        assert!(doomed.contains(&"r1".to_string()));
        assert!(doomed.contains(&"r4".to_string()));
    }

    #[test]
    fn test_prune_under_limit_is_noop() {
        let records = vec![record_at("r1", "2026-03-01T10:00:00+00:00")];
        assert!(prune_candidates(&records, 100).is_empty());
    }

    #[test]
    fn test_prune_exact_limit_is_noop() {
        let records = vec![
            record_at("r1", "2026-03-01T10:00:00+00:00"),
            record_at("r2", "2026-03-01T11:00:00+00:00"),
        ];
        assert!(prune_candidates(&records, 2).is_empty());
    }

    #[test]
    fn test_prune_retention_invariant() {
        let records: Vec<_> = (0..150)
            .map(|i| record_at(&format!("r{i}"), &format!("2026-03-01T10:{:02}:{:02}+00:00", i / 60, i % 60)))
            .collect();
        let doomed = prune_candidates(&records, DEFAULT_RETENTION);
        assert_eq!(records.len() - doomed.len(), DEFAULT_RETENTION);
        // The newest record survives.
        assert!(!doomed.contains(&"r149".to_string()));
        // The oldest is pruned.
        assert!(doomed.contains(&"r0".to_string()));
    }
}
