mod common;

use chrono::{DateTime, Utc};
use common::{make_candidates, make_experiment, make_namespace};
use rand::SeedableRng;
use rand::rngs::StdRng;

use kube_chaos::crd::{ANNOTATION_EXCLUDE, ANNOTATION_PRODUCTION};
use kube_chaos::safety::{self, SafetyRejection, max_allowed};

// ══════════════════════════════════════════════════════════════════
// Safety pipeline integration tests (no cluster required)
//
// Exercises the full gate sequence: windows → exclusion → production →
// blast radius → sampling, against the quantified invariants.
// ══════════════════════════════════════════════════════════════════

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn noon() -> DateTime<Utc> {
    utc("2026-03-02T12:00:00Z")
}

fn rng() -> StdRng {
    StdRng::seed_from_u64(1)
}

// ── approved-set invariants ──

#[test]
fn test_approved_set_bounded_by_count_and_percentage() {
    let experiment = make_experiment(
        r#"{"action":"pod-kill","count":4,"maxPercentage":60,"selector":{"app":"nginx"}}"#,
    );
    let verdict = safety::evaluate(
        &experiment.spec,
        noon(),
        &make_namespace("workloads", &[], &[]),
        make_candidates(10, 0, "workloads"),
        &mut rng(),
    )
    .unwrap();

    assert!(verdict.approved.len() as u32 <= 4);
    assert!(verdict.approved.len() as u32 <= max_allowed(60, verdict.candidate_count));
    assert_eq!(verdict.approved.len(), 4);
}

#[test]
fn test_excluded_pods_never_approved() {
    let experiment = make_experiment(r#"{"action":"pod-kill","count":10,"maxPercentage":100}"#);
    // pod-0..pod-4 excluded
    let verdict = safety::evaluate(
        &experiment.spec,
        noon(),
        &make_namespace("workloads", &[], &[]),
        make_candidates(12, 5, "workloads"),
        &mut rng(),
    )
    .unwrap();

    for target in &verdict.approved {
        let index: usize = target.name.trim_start_matches("pod-").parse().unwrap();
        assert!(index >= 5, "{} should have been excluded", target.name);
    }
    assert_eq!(verdict.candidate_count, 7);
}

#[test]
fn test_excluded_namespace_never_targeted() {
    let experiment = make_experiment(r#"{"action":"pod-kill"}"#);
    let err = safety::evaluate(
        &experiment.spec,
        noon(),
        &make_namespace("untouchable", &[(ANNOTATION_EXCLUDE, "true")], &[]),
        make_candidates(5, 0, "untouchable"),
        &mut rng(),
    )
    .unwrap_err();
    assert_eq!(err.reason(), "excluded-namespace");
    assert!(err.is_terminal());
}

#[test]
fn test_production_gate_blocks_without_opt_in() {
    let experiment = make_experiment(r#"{"action":"pod-kill"}"#);
    for ns in [
        make_namespace("production", &[], &[]),
        make_namespace("prod-eu", &[], &[]),
        make_namespace("payments-prod", &[], &[]),
        make_namespace("apps", &[(ANNOTATION_PRODUCTION, "true")], &[]),
        make_namespace("apps", &[], &[("environment", "production")]),
        make_namespace("apps", &[], &[("env", "prod")]),
    ] {
        let err = safety::evaluate(
            &experiment.spec,
            noon(),
            &ns,
            make_candidates(5, 0, "x"),
            &mut rng(),
        )
        .unwrap_err();
        assert_eq!(err.reason(), "production-gate");
    }
}

#[test]
fn test_production_gate_opt_in_passes() {
    let experiment = make_experiment(r#"{"action":"pod-kill","allowProduction":true}"#);
    let verdict = safety::evaluate(
        &experiment.spec,
        noon(),
        &make_namespace("production", &[], &[]),
        make_candidates(5, 0, "production"),
        &mut rng(),
    )
    .unwrap();
    assert_eq!(verdict.approved.len(), 1);
}

// ── blast radius ──

#[test]
fn test_blast_radius_exceeded_blocks_with_exact_message() {
    let experiment = make_experiment(r#"{"action":"pod-kill","count":5,"maxPercentage":30}"#);
    let err = safety::evaluate(
        &experiment.spec,
        noon(),
        &make_namespace("workloads", &[], &[]),
        make_candidates(10, 0, "workloads"),
        &mut rng(),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "count 5 exceeds maxPercentage 30% (max allowed: 3 pods out of 10)"
    );
}

#[test]
fn test_blast_radius_computed_after_exclusion() {
    // 20 matches, 10 excluded: 50% of the 10 survivors is 5.
    let experiment = make_experiment(r#"{"action":"pod-kill","count":6,"maxPercentage":50}"#);
    let err = safety::evaluate(
        &experiment.spec,
        noon(),
        &make_namespace("workloads", &[], &[]),
        make_candidates(20, 10, "workloads"),
        &mut rng(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        SafetyRejection::BlastRadiusExceeded { allowed: 5, candidates: 10, .. }
    ));
}

// ── window gates ──

#[test]
fn test_maintenance_window_overrides_allowed_window() {
    // Scenario: both windows open; the block is attributed to maintenance
    // and the requeue targets the maintenance close, not the allowed close.
    let experiment = make_experiment(
        r#"{
            "action": "pod-kill",
            "timeWindows": [{"type":"recurring","start":"08:00","end":"20:00"}],
            "maintenanceWindows": [{"type":"recurring","start":"11:30","end":"12:30"}]
        }"#,
    );
    let err = safety::evaluate(
        &experiment.spec,
        noon(),
        &make_namespace("workloads", &[], &[]),
        make_candidates(5, 0, "workloads"),
        &mut rng(),
    )
    .unwrap_err();
    assert_eq!(err.reason(), "maintenance-window");
    assert_eq!(err.requeue_at(), Some(utc("2026-03-02T12:30:00Z")));
}

#[test]
fn test_no_execution_inside_maintenance() {
    let experiment = make_experiment(
        r#"{
            "action": "pod-kill",
            "maintenanceWindows": [{
                "type": "absolute",
                "start": "2026-03-02T11:00:00Z",
                "end": "2026-03-02T13:00:00Z"
            }]
        }"#,
    );
    let err = safety::evaluate(
        &experiment.spec,
        noon(),
        &make_namespace("workloads", &[], &[]),
        make_candidates(5, 0, "workloads"),
        &mut rng(),
    )
    .unwrap_err();
    assert_eq!(err.reason(), "maintenance-window");
    // After the maintenance closes the same spec passes.
    let verdict = safety::evaluate(
        &experiment.spec,
        utc("2026-03-02T13:00:00Z"),
        &make_namespace("workloads", &[], &[]),
        make_candidates(5, 0, "workloads"),
        &mut rng(),
    );
    assert!(verdict.is_ok());
}

#[test]
fn test_outside_allowed_window_requeues_at_opening() {
    let experiment = make_experiment(
        r#"{
            "action": "pod-kill",
            "timeWindows": [{"type":"recurring","start":"22:00","end":"02:00"}]
        }"#,
    );
    let err = safety::evaluate(
        &experiment.spec,
        noon(),
        &make_namespace("workloads", &[], &[]),
        make_candidates(5, 0, "workloads"),
        &mut rng(),
    )
    .unwrap_err();
    assert_eq!(err.reason(), "outside-window");
    assert_eq!(err.requeue_at(), Some(utc("2026-03-02T22:00:00Z")));
    assert!(!err.is_terminal());
}

// ── sampling determinism ──

#[test]
fn test_same_seed_same_approved_set() {
    let experiment = make_experiment(r#"{"action":"pod-kill","count":3,"maxPercentage":100}"#);
    let ns = make_namespace("workloads", &[], &[]);
    let a = safety::evaluate(
        &experiment.spec,
        noon(),
        &ns,
        make_candidates(12, 0, "workloads"),
        &mut StdRng::seed_from_u64(99),
    )
    .unwrap();
    let b = safety::evaluate(
        &experiment.spec,
        noon(),
        &ns,
        make_candidates(12, 0, "workloads"),
        &mut StdRng::seed_from_u64(99),
    )
    .unwrap();
    assert_eq!(a.approved, b.approved);
}

#[test]
fn test_count_capped_by_available_candidates() {
    let experiment = make_experiment(r#"{"action":"pod-kill","count":3,"maxPercentage":100}"#);
    let verdict = safety::evaluate(
        &experiment.spec,
        noon(),
        &make_namespace("workloads", &[], &[]),
        make_candidates(2, 0, "workloads"),
        &mut rng(),
    )
    .unwrap();
    // count 3 against 2 candidates: cap silently at 2
    assert_eq!(verdict.approved.len(), 2);
}
