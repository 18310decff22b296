mod common;

use chrono::{DateTime, Utc};
use common::make_experiment;

use kube_chaos::crd::{
    ChaosExperimentHistory, ExecutionStatus, LABEL_HISTORY_ACTION, LABEL_HISTORY_EXPERIMENT,
    LABEL_HISTORY_STATUS, TriggeredBy,
};
use kube_chaos::history::{DEFAULT_RETENTION, ExecutionOutcome, build_record, prune_candidates};
use kube_chaos::safety::TargetRef;

// ══════════════════════════════════════════════════════════════════
// History recorder integration: record shape and retention invariant
// ══════════════════════════════════════════════════════════════════

fn outcome(
    millis: i64,
    status: ExecutionStatus,
    affected: Vec<TargetRef>,
    triggered_by: TriggeredBy,
) -> ExecutionOutcome {
    ExecutionOutcome {
        status,
        affected,
        error: None,
        triggered_by,
        execution_time: DateTime::<Utc>::from_timestamp_millis(millis).unwrap(),
        duration: None,
    }
}

fn record_with_time(index: i64) -> ChaosExperimentHistory {
    let experiment = make_experiment(r#"{"action":"pod-kill"}"#);
    build_record(
        &experiment,
        &outcome(
            1_700_000_000_000 + index * 60_000,
            ExecutionStatus::Success,
            vec![],
            TriggeredBy::Schedule,
        ),
        "default",
    )
}

// ── record shape ──

#[test]
fn test_record_carries_query_labels() {
    let experiment = make_experiment(r#"{"action":"pod-kill"}"#);
    let record = build_record(
        &experiment,
        &outcome(
            1_700_000_000_000,
            ExecutionStatus::DryRun,
            vec![TargetRef::pod("nginx-1", "default")],
            TriggeredBy::Manual,
        ),
        "default",
    );

    let labels = record.metadata.labels.as_ref().unwrap();
    assert_eq!(labels[LABEL_HISTORY_EXPERIMENT], "test-experiment");
    assert_eq!(labels[LABEL_HISTORY_ACTION], "pod-kill");
    assert_eq!(labels[LABEL_HISTORY_STATUS], "dry-run");
}

#[test]
fn test_dry_run_record_lists_would_be_targets() {
    let experiment = make_experiment(r#"{"action":"pod-kill","count":3,"dryRun":true}"#);
    let targets = vec![
        TargetRef::pod("nginx-1", "default"),
        TargetRef::pod("nginx-4", "default"),
        TargetRef::pod("nginx-7", "default"),
    ];
    let record = build_record(
        &experiment,
        &outcome(1_700_000_000_000, ExecutionStatus::DryRun, targets, TriggeredBy::Manual),
        "default",
    );

    assert_eq!(record.spec.status, ExecutionStatus::DryRun);
    assert_eq!(record.spec.affected_resources.len(), 3);
    assert!(
        record
            .spec
            .affected_resources
            .iter()
            .all(|r| r.kind == "Pod" && r.namespace == "default")
    );
}

#[test]
fn test_blocked_record_has_error_and_no_targets() {
    let experiment = make_experiment(r#"{"action":"pod-kill"}"#);
    let mut blocked = outcome(1_700_000_000_000, ExecutionStatus::Blocked, vec![], TriggeredBy::Schedule);
    blocked.error = Some("execution is blocked by a maintenance window".into());
    let record = build_record(&experiment, &blocked, "default");

    assert_eq!(record.spec.status, ExecutionStatus::Blocked);
    assert!(record.spec.affected_resources.is_empty());
    assert!(record.spec.error.unwrap().contains("maintenance"));
    assert_eq!(record.spec.triggered_by, TriggeredBy::Schedule);
}

// ── retention invariant ──

#[test]
fn test_retention_keeps_newest_default_limit() {
    let records: Vec<_> = (0..130).map(record_with_time).collect();
    let doomed = prune_candidates(&records, DEFAULT_RETENTION);

    assert_eq!(doomed.len(), 30);
    // Newest 100 survive: indices 30..130.
    let newest = record_with_time(129).metadata.name.unwrap();
    let oldest = record_with_time(0).metadata.name.unwrap();
    assert!(!doomed.contains(&newest));
    assert!(doomed.contains(&oldest));
}

#[test]
fn test_retention_noop_at_or_below_limit() {
    let records: Vec<_> = (0..DEFAULT_RETENTION as i64).map(record_with_time).collect();
    assert!(prune_candidates(&records, DEFAULT_RETENTION).is_empty());
}

#[test]
fn test_record_names_unique_per_execution_time() {
    let a = record_with_time(0).metadata.name.unwrap();
    let b = record_with_time(1).metadata.name.unwrap();
    assert_ne!(a, b);
    assert!(a.starts_with("test-experiment-"));
}
