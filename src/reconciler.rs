use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::actions::injector::{EphemeralContainerInjector, InjectorClient};
use crate::actions::{self, ExecContext, ExecutionError, ExecutorRegistry, dry_run_verb};
use crate::crd::{
    CONDITION_BLAST_RADIUS_OK, CONDITION_READY, CONDITION_SCHEDULED, CONDITION_WINDOW_OPEN,
    ChaosAction, ChaosExperiment, ChaosExperimentHistory, ChaosExperimentStatus,
    ExecutionStatus, ExperimentCondition, ExperimentPhase, FINALIZER, LABEL_HISTORY_EXPERIMENT,
    TriggeredBy,
};
use crate::history::{ExecutionOutcome, HistoryRecorder};
use crate::metrics;
use crate::retry;
use crate::safety::{self, Candidate, SafetyRejection, TargetRef};
use crate::schedule;
use crate::validation;
use crate::{Error, Result};

/* ============================= CONFIG ============================= */

const MANAGER: &str = "kube-chaos";

/// Fallback requeue when nothing time-based is pending.
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(30);

/* ============================= CLOCK ============================= */

/// Injectable wall clock; window, schedule and retry arithmetic all go
/// through it so tests can pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/* ============================= CONTEXT ============================= */

/// Shared state handed to every reconcile.
pub struct Context {
    pub client: Client,
    pub registry: ExecutorRegistry,
    pub injector: Arc<dyn InjectorClient>,
    pub history: HistoryRecorder,
    pub clock: Arc<dyn Clock>,
    pub rng: Mutex<StdRng>,
    pub reporter: Reporter,
}

impl Context {
    pub fn new(client: Client, history: HistoryRecorder) -> Self {
        Self {
            injector: Arc::new(EphemeralContainerInjector::new(client.clone())),
            registry: ExecutorRegistry::with_defaults(),
            history,
            clock: Arc::new(SystemClock),
            rng: Mutex::new(StdRng::from_entropy()),
            reporter: Reporter {
                controller: MANAGER.into(),
                instance: None,
            },
            client,
        }
    }
}

/* ============================= PURE HELPERS ============================= */

/// Status message for a dry-run execution.
pub fn dry_run_message(action: ChaosAction, affected: usize) -> String {
    format!(
        "DRY RUN: Would {} {} {}(s)",
        dry_run_verb(action),
        affected,
        action.target_kind().to_lowercase()
    )
}

/// Instant at which `experimentDuration` expires, if configured.
pub fn experiment_deadline(experiment: &ChaosExperiment) -> Option<DateTime<Utc>> {
    let budget = experiment
        .spec
        .experiment_duration
        .as_deref()
        .and_then(validation::parse_duration)?;
    let created = experiment.meta().creation_timestamp.as_ref()?.0;
    Some(created + chrono::Duration::from_std(budget).ok()?)
}

/// Render a label selector map as `k1=v1,k2=v2`.
pub fn selector_string(selector: Option<&std::collections::BTreeMap<String, String>>) -> Option<String> {
    let selector = selector.filter(|s| !s.is_empty())?;
    Some(
        selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn condition(
    condition_type: &str,
    ok: bool,
    reason: &str,
    message: Option<String>,
    now: DateTime<Utc>,
) -> ExperimentCondition {
    ExperimentCondition {
        condition_type: condition_type.to_string(),
        status: if ok { "True" } else { "False" }.to_string(),
        reason: Some(reason.to_string()),
        message,
        last_transition_time: Some(now.to_rfc3339()),
    }
}

/// Retry budget already consumed entering this execution. Only an in-run
/// retry continuation carries the accumulated count; a fresh attempt (first
/// run, new scheduled fire, spec edit) starts with a full budget.
pub fn run_retry_count(pending_retry: Option<DateTime<Utc>>, previous: Option<u32>) -> u32 {
    if pending_retry.is_some() {
        previous.unwrap_or(0)
    } else {
        0
    }
}

fn parse_status_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/* ============================= STATUS WRITES ============================= */

async fn update_status(
    ctx: &Context,
    experiment: &ChaosExperiment,
    status: ChaosExperimentStatus,
) -> Result<()> {
    let api: Api<ChaosExperiment> = Api::namespaced(
        ctx.client.clone(),
        &experiment.namespace().unwrap_or_default(),
    );
    api.patch_status(
        &experiment.name_any(),
        &PatchParams::apply(MANAGER),
        &Patch::Merge(serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}

async fn publish_event(
    ctx: &Context,
    experiment: &ChaosExperiment,
    type_: EventType,
    reason: &str,
    note: String,
) {
    let recorder = Recorder::new(
        ctx.client.clone(),
        ctx.reporter.clone(),
        experiment.object_ref(&()),
    );
    let event = Event {
        type_,
        reason: reason.to_string(),
        note: Some(note),
        action: "Reconcile".to_string(),
        secondary: None,
    };
    if let Err(e) = recorder.publish(event).await {
        warn!(error = %e, experiment = %experiment.name_any(), "event_publish_failed");
    }
}

/* ============================= FINALIZER ============================= */

fn has_finalizer(experiment: &ChaosExperiment) -> bool {
    experiment
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == FINALIZER))
}

async fn add_finalizer(ctx: &Context, experiment: &ChaosExperiment) -> Result<()> {
    let api: Api<ChaosExperiment> = Api::namespaced(
        ctx.client.clone(),
        &experiment.namespace().unwrap_or_default(),
    );
    let mut finalizers = experiment.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());
    api.patch(
        &experiment.name_any(),
        &PatchParams::apply(MANAGER),
        &Patch::Merge(serde_json::json!({ "metadata": { "finalizers": finalizers } })),
    )
    .await?;
    info!(experiment = %experiment.name_any(), "finalizer_added");
    Ok(())
}

async fn remove_finalizer(ctx: &Context, experiment: &ChaosExperiment) -> Result<()> {
    let api: Api<ChaosExperiment> = Api::namespaced(
        ctx.client.clone(),
        &experiment.namespace().unwrap_or_default(),
    );
    let finalizers: Vec<String> = experiment
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();
    api.patch(
        &experiment.name_any(),
        &PatchParams::apply(MANAGER),
        &Patch::Merge(serde_json::json!({ "metadata": { "finalizers": finalizers } })),
    )
    .await?;
    info!(experiment = %experiment.name_any(), "finalizer_removed");
    Ok(())
}

/// Best-effort cleanup of cluster side effects (cordoned nodes, iptables
/// chains, swapped images) using the most recent history record's targets.
async fn cleanup_side_effects(ctx: &Context, experiment: &Arc<ChaosExperiment>) {
    let Some(executor) = ctx.registry.get(experiment.spec.action) else {
        return;
    };

    let api: Api<ChaosExperimentHistory> =
        Api::namespaced(ctx.client.clone(), ctx.history.namespace());
    let selector = format!("{LABEL_HISTORY_EXPERIMENT}={}", experiment.name_any());
    let records = match api.list(&ListParams::default().labels(&selector)).await {
        Ok(list) => list.items,
        Err(e) => {
            warn!(error = %e, "cleanup_history_lookup_failed");
            return;
        }
    };

    let latest = records
        .iter()
        .filter(|r| {
            matches!(
                r.spec.status,
                ExecutionStatus::Success | ExecutionStatus::Failure
            )
        })
        .max_by(|a, b| a.spec.execution_time.cmp(&b.spec.execution_time));
    let Some(latest) = latest else { return };

    let exec_ctx = ExecContext {
        client: ctx.client.clone(),
        injector: ctx.injector.clone(),
        experiment: experiment.clone(),
    };

    for resource in &latest.spec.affected_resources {
        let target = TargetRef {
            kind: resource.kind.clone(),
            name: resource.name.clone(),
            namespace: resource.namespace.clone(),
        };
        if let Err(e) = executor.observe(&exec_ctx, &target).await {
            warn!(
                target = %target.name,
                error = %e,
                "cleanup_side_effect_failed"
            );
        }
    }
}

async fn handle_deletion(
    ctx: &Context,
    experiment: &Arc<ChaosExperiment>,
) -> Result<Action> {
    info!(experiment = %experiment.name_any(), "handling_deletion");

    if has_finalizer(experiment) {
        cleanup_side_effects(ctx, experiment).await;
        remove_finalizer(ctx, experiment).await?;
    }

    Ok(Action::await_change())
}

/* ============================= CANDIDATE GATHERING ============================= */

async fn gather_candidates(
    ctx: &Context,
    experiment: &ChaosExperiment,
    target_namespace: &str,
) -> Result<Vec<Candidate>> {
    let selector = selector_string(experiment.spec.selector.as_ref());
    let mut params = ListParams::default();
    if let Some(selector) = &selector {
        params = params.labels(selector);
    }

    if experiment.spec.action.targets_nodes() {
        let nodes: Api<Node> = Api::all(ctx.client.clone());
        let list = nodes.list(&params).await?;
        Ok(list
            .items
            .iter()
            .map(|node| Candidate {
                target: TargetRef::node(node.name_any()),
                excluded: node
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(crate::crd::LABEL_EXCLUDE))
                    .map(String::as_str)
                    == Some("true"),
            })
            .collect())
    } else {
        let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), target_namespace);
        let list = pods.list(&params).await?;
        Ok(list.items.iter().map(Candidate::from_pod).collect())
    }
}

/* ============================= EXECUTION ============================= */

struct ExecutionResult {
    affected: Vec<TargetRef>,
    error: Option<ExecutionError>,
    auto_stopped: bool,
}

async fn run_execution(
    ctx: &Context,
    experiment: &Arc<ChaosExperiment>,
    targets: &[TargetRef],
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ExecutionResult {
    let Some(executor) = ctx.registry.get(experiment.spec.action) else {
        return ExecutionResult {
            affected: Vec::new(),
            error: Some(ExecutionError::fatal(format!(
                "no executor registered for action {}",
                experiment.spec.action
            ))),
            auto_stopped: false,
        };
    };

    let exec_ctx = ExecContext {
        client: ctx.client.clone(),
        injector: ctx.injector.clone(),
        experiment: experiment.clone(),
    };

    if let Err(e) = executor.prepare(&exec_ctx, targets).await {
        return ExecutionResult { affected: Vec::new(), error: Some(e), auto_stopped: false };
    }

    metrics::EXPERIMENTS_ACTIVE.inc();

    let budget = deadline.and_then(|d| (d - now).to_std().ok());
    let work = join_all(targets.iter().map(|t| executor.execute(&exec_ctx, t)));

    let (affected, error, auto_stopped) = match budget {
        Some(budget) => match tokio::time::timeout(budget, work).await {
            Ok(results) => split_results(targets, results),
            // experimentDuration elapsed mid-execution: the faults were in
            // flight, so every target counts as affected.
            Err(_) => (targets.to_vec(), None, true),
        },
        None => {
            let results = work.await;
            split_results(targets, results)
        }
    };

    metrics::EXPERIMENTS_ACTIVE.dec();

    // Post-step cleanup per affected target. A cleanup failure never fails
    // the experiment; it is logged and surfaced as an event.
    for target in &affected {
        if let Err(e) = executor.observe(&exec_ctx, target).await {
            warn!(target = %target.name, error = %e, "cleanup_step_failed");
            publish_event(
                ctx,
                experiment,
                EventType::Warning,
                "CleanupFailed",
                format!("cleanup on {} failed: {e}", target.name),
            )
            .await;
        }
    }

    ExecutionResult { affected, error, auto_stopped }
}

fn split_results(
    targets: &[TargetRef],
    results: Vec<std::result::Result<(), ExecutionError>>,
) -> (Vec<TargetRef>, Option<ExecutionError>, bool) {
    let mut affected = Vec::new();
    let mut error = None;
    for (target, result) in targets.iter().zip(results) {
        match result {
            Ok(()) => affected.push(target.clone()),
            Err(e) => {
                // Keep the first fatal error, else the first error seen.
                match (&error, e.is_retryable()) {
                    (None, _) => error = Some(e),
                    (Some(ExecutionError::Retryable(_)), false) => error = Some(e),
                    _ => {}
                }
            }
        }
    }
    (affected, error, false)
}

/* ============================= RECONCILE ============================= */

pub async fn reconcile(experiment: Arc<ChaosExperiment>, ctx: Arc<Context>) -> Result<Action> {
    let name = experiment.name_any();
    let namespace = experiment.namespace().unwrap_or_default();
    let now = ctx.clock.now();
    let generation = experiment.metadata.generation;
    let status = experiment.status.clone().unwrap_or_default();
    let generation_changed = status.observed_generation != generation;
    let phase = status.phase.unwrap_or_default();

    info!(experiment = %name, namespace = %namespace, phase = %phase, "reconcile_start");

    // ── Deletion: cancel side effects, then release the finalizer ──
    if experiment.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&ctx, &experiment).await;
    }

    if !has_finalizer(&experiment) {
        add_finalizer(&ctx, &experiment).await?;
    }

    // ── Validation (re-run when the generation moved) ──
    let report = validation::validate_experiment(&experiment.spec);
    if !report.is_valid() {
        let message = report
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        warn!(experiment = %name, error = %message, "validation_failed");
        publish_event(&ctx, &experiment, EventType::Warning, "ValidationFailed", message.clone())
            .await;
        update_status(
            &ctx,
            &experiment,
            ChaosExperimentStatus {
                phase: Some(ExperimentPhase::Blocked),
                last_error: Some(message.clone()),
                last_run_result: Some(format!("validation failed: {message}")),
                observed_generation: generation,
                conditions: Some(vec![condition(
                    CONDITION_READY,
                    false,
                    "ValidationFailed",
                    Some(message),
                    now,
                )]),
                ..status
            },
        )
        .await?;
        return Ok(Action::await_change());
    }

    // ── Finished one-shot experiments are a no-op ──
    if experiment.spec.schedule.is_none()
        && matches!(phase, ExperimentPhase::Succeeded | ExperimentPhase::Failed)
        && !generation_changed
    {
        return Ok(Action::await_change());
    }

    // ── experimentDuration auto-stop ──
    let deadline = experiment_deadline(&experiment);
    if let Some(deadline) = deadline
        && now >= deadline
    {
        if phase != ExperimentPhase::Succeeded {
            info!(experiment = %name, "experiment_duration_elapsed");
            cleanup_side_effects(&ctx, &experiment).await;
            publish_event(
                &ctx,
                &experiment,
                EventType::Normal,
                "AutoStopped",
                "experiment duration elapsed".to_string(),
            )
            .await;
            update_status(
                &ctx,
                &experiment,
                ChaosExperimentStatus {
                    phase: Some(ExperimentPhase::Succeeded),
                    last_run_result: Some("experiment duration elapsed; auto-stopped".to_string()),
                    observed_generation: generation,
                    next_retry_time: None,
                    conditions: Some(vec![condition(
                        CONDITION_READY,
                        true,
                        "AutoStopped",
                        None,
                        now,
                    )]),
                    ..status.clone()
                },
            )
            .await?;
        }
        return Ok(Action::await_change());
    }

    // ── Schedule gate ──
    let last_run = parse_status_time(status.last_run_time.as_deref());
    let pending_retry = if generation_changed {
        None
    } else {
        parse_status_time(status.next_retry_time.as_deref())
    };
    let retry_due = pending_retry.is_some_and(|t| now >= t);
    let mut triggered_by = TriggeredBy::Manual;
    if let Some(expr) = &experiment.spec.schedule {
        triggered_by = TriggeredBy::Schedule;
        let next = schedule::next_fire(expr, last_run, now)
            .ok()
            .flatten();
        match next {
            // A due retry belongs to the current scheduled run and takes
            // precedence over waiting for the next tick.
            Some(fire) if fire > now && !retry_due => {
                let mut conditions = vec![condition(
                    CONDITION_SCHEDULED,
                    true,
                    "WaitingForSchedule",
                    Some(format!("next fire at {}", fire.to_rfc3339())),
                    now,
                )];
                if generation_changed {
                    conditions.insert(0, condition(CONDITION_READY, true, "Validated", None, now));
                }
                update_status(
                    &ctx,
                    &experiment,
                    ChaosExperimentStatus {
                        observed_generation: generation,
                        // A finished run's count clears while waiting; only
                        // a pending retry keeps its accumulated count.
                        retry_count: if pending_retry.is_some() { status.retry_count } else { Some(0) },
                        next_retry_time: pending_retry.map(|t| t.to_rfc3339()),
                        conditions: Some(conditions),
                        ..status
                    },
                )
                .await?;
                let requeue = schedule::earliest(&[Some(fire), pending_retry, deadline])
                    .unwrap_or(fire);
                return Ok(Action::requeue(schedule::requeue_after(requeue, now)));
            }
            _ => {}
        }
    }

    // ── Retry wait gate ──
    if let Some(next_retry) = pending_retry
        && now < next_retry
    {
        return Ok(Action::requeue(schedule::requeue_after(next_retry, now)));
    }
    if retry_due {
        triggered_by = TriggeredBy::Retry;
    }
    let retry_count = run_retry_count(pending_retry, status.retry_count);

    // ── Safety pipeline ──
    let target_namespace = actions::target_namespace(&experiment);
    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    let ns_object = namespaces.get(&target_namespace).await?;
    let candidates = gather_candidates(&ctx, &experiment, &target_namespace).await?;

    let verdict = {
        let mut rng = ctx.rng.lock().await;
        safety::evaluate(&experiment.spec, now, &ns_object, candidates, &mut *rng)
    };

    let approved = match verdict {
        Err(rejection) => {
            return handle_rejection(&ctx, &experiment, rejection, status, generation, now).await;
        }
        Ok(v) => v,
    };

    // ── Dry-run short-circuit ──
    if experiment.spec.is_dry_run() {
        return handle_dry_run(&ctx, &experiment, generation, now, triggered_by, approved.approved)
            .await;
    }

    // ── Empty selection ──
    if approved.approved.is_empty() {
        let error = ExecutionError::retryable("no targets matched the selector");
        return handle_execution_error(
            &ctx, &experiment, generation, now, retry_count, triggered_by, error,
            Vec::new(), deadline,
        )
        .await;
    }

    // ── Execute ──
    let started = std::time::Instant::now();
    let result = run_execution(&ctx, &experiment, &approved.approved, deadline, now).await;
    let elapsed = started.elapsed();
    metrics::EXPERIMENT_DURATION
        .with_label_values(&[experiment.spec.action.as_str()])
        .observe(elapsed.as_secs_f64());

    match result.error {
        None => {
            handle_success(
                &ctx, &experiment, generation, now, triggered_by, result.affected, elapsed,
                result.auto_stopped,
            )
            .await
        }
        Some(error) => {
            handle_execution_error(
                &ctx, &experiment, generation, now, retry_count, triggered_by, error,
                result.affected, deadline,
            )
            .await
        }
    }
}

/* ============================= OUTCOME HANDLERS ============================= */

async fn handle_rejection(
    ctx: &Context,
    experiment: &Arc<ChaosExperiment>,
    rejection: SafetyRejection,
    status: ChaosExperimentStatus,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Action> {
    let name = experiment.name_any();
    let message = rejection.to_string();
    info!(experiment = %name, reason = rejection.reason(), "execution_blocked");

    // Record and count the block once per transition, not per requeue.
    let transitioned = status.phase != Some(ExperimentPhase::Blocked)
        || status.last_error.as_deref() != Some(message.as_str());
    if transitioned {
        metrics::EXPERIMENTS_TOTAL
            .with_label_values(&[experiment.spec.action.as_str(), "blocked"])
            .inc();
        publish_event(
            ctx,
            experiment,
            EventType::Warning,
            "ExecutionBlocked",
            message.clone(),
        )
        .await;
        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Blocked,
            affected: Vec::new(),
            error: Some(message.clone()),
            triggered_by: if experiment.spec.schedule.is_some() {
                TriggeredBy::Schedule
            } else {
                TriggeredBy::Manual
            },
            execution_time: now,
            duration: None,
        };
        if let Err(e) = ctx.history.record(experiment, &outcome).await {
            warn!(error = %e, "history_record_failed");
        }
    }

    let mut conditions = vec![condition(
        CONDITION_READY,
        false,
        "ExecutionBlocked",
        Some(message.clone()),
        now,
    )];
    match &rejection {
        SafetyRejection::BlastRadiusExceeded { .. } => conditions.push(condition(
            CONDITION_BLAST_RADIUS_OK,
            false,
            "BlastRadiusExceeded",
            Some(message.clone()),
            now,
        )),
        SafetyRejection::MaintenanceWindow { .. } | SafetyRejection::OutsideWindow { .. } => {
            conditions.push(condition(
                CONDITION_WINDOW_OPEN,
                false,
                rejection.reason(),
                None,
                now,
            ))
        }
        _ => {}
    }

    update_status(
        ctx,
        experiment,
        ChaosExperimentStatus {
            phase: Some(ExperimentPhase::Blocked),
            last_error: Some(message.clone()),
            last_run_result: Some(message),
            observed_generation: generation,
            conditions: Some(conditions),
            ..status
        },
    )
    .await?;

    match rejection.requeue_at() {
        Some(at) => Ok(Action::requeue(schedule::requeue_after(at, now))),
        None if rejection.is_terminal() => Ok(Action::await_change()),
        None => Ok(Action::requeue(DEFAULT_REQUEUE)),
    }
}

async fn handle_dry_run(
    ctx: &Context,
    experiment: &Arc<ChaosExperiment>,
    generation: Option<i64>,
    now: DateTime<Utc>,
    triggered_by: TriggeredBy,
    approved: Vec<TargetRef>,
) -> Result<Action> {
    let action = experiment.spec.action;
    let message = dry_run_message(action, approved.len());
    info!(experiment = %experiment.name_any(), affected = approved.len(), "dry_run_complete");

    metrics::EXPERIMENTS_TOTAL
        .with_label_values(&[action.as_str(), "dry-run"])
        .inc();

    let outcome = ExecutionOutcome {
        status: ExecutionStatus::DryRun,
        affected: approved.clone(),
        error: None,
        triggered_by,
        execution_time: now,
        duration: None,
    };
    if let Err(e) = ctx.history.record(experiment, &outcome).await {
        warn!(error = %e, "history_record_failed");
    }

    let scheduled = experiment.spec.schedule.is_some();
    update_status(
        ctx,
        experiment,
        ChaosExperimentStatus {
            phase: Some(if scheduled { ExperimentPhase::Pending } else { ExperimentPhase::Succeeded }),
            last_run_time: Some(now.to_rfc3339()),
            last_run_result: Some(message),
            affected_count: Some(approved.len() as u32),
            retry_count: Some(0),
            last_error: None,
            next_retry_time: None,
            observed_generation: generation,
            conditions: Some(vec![
                condition(CONDITION_READY, true, "DryRunComplete", None, now),
                condition(CONDITION_BLAST_RADIUS_OK, true, "WithinLimits", None, now),
            ]),
        },
    )
    .await?;

    next_tick(experiment, now)
}

#[allow(clippy::too_many_arguments)]
async fn handle_success(
    ctx: &Context,
    experiment: &Arc<ChaosExperiment>,
    generation: Option<i64>,
    now: DateTime<Utc>,
    triggered_by: TriggeredBy,
    affected: Vec<TargetRef>,
    elapsed: Duration,
    auto_stopped: bool,
) -> Result<Action> {
    let action = experiment.spec.action;
    let message = if auto_stopped {
        format!(
            "experiment duration elapsed during execution; {} {}(s) affected",
            affected.len(),
            action.target_kind().to_lowercase()
        )
    } else {
        format!(
            "{} {} {}(s)",
            past_tense(action),
            affected.len(),
            action.target_kind().to_lowercase()
        )
    };

    info!(
        experiment = %experiment.name_any(),
        affected = affected.len(),
        auto_stopped,
        "execution_succeeded"
    );

    metrics::EXPERIMENTS_TOTAL
        .with_label_values(&[action.as_str(), "success"])
        .inc();
    metrics::RESOURCES_AFFECTED
        .with_label_values(&[action.as_str(), action.target_kind()])
        .inc_by(affected.len() as u64);

    let outcome = ExecutionOutcome {
        status: ExecutionStatus::Success,
        affected: affected.clone(),
        error: None,
        triggered_by,
        execution_time: now,
        duration: Some(elapsed),
    };
    if let Err(e) = ctx.history.record(experiment, &outcome).await {
        warn!(error = %e, "history_record_failed");
    }

    publish_event(
        ctx,
        experiment,
        EventType::Normal,
        "ExecutionSucceeded",
        message.clone(),
    )
    .await;

    update_status(
        ctx,
        experiment,
        ChaosExperimentStatus {
            phase: Some(ExperimentPhase::Succeeded),
            last_run_time: Some(now.to_rfc3339()),
            last_run_result: Some(message),
            affected_count: Some(affected.len() as u32),
            retry_count: Some(0),
            last_error: None,
            next_retry_time: None,
            observed_generation: generation,
            conditions: Some(vec![
                condition(CONDITION_READY, true, "ExecutionSucceeded", None, now),
                condition(CONDITION_WINDOW_OPEN, true, "WindowOpen", None, now),
                condition(CONDITION_BLAST_RADIUS_OK, true, "WithinLimits", None, now),
            ]),
        },
    )
    .await?;

    if auto_stopped {
        return Ok(Action::await_change());
    }
    next_tick(experiment, now)
}

#[allow(clippy::too_many_arguments)]
async fn handle_execution_error(
    ctx: &Context,
    experiment: &Arc<ChaosExperiment>,
    generation: Option<i64>,
    now: DateTime<Utc>,
    retry_count: u32,
    triggered_by: TriggeredBy,
    error: ExecutionError,
    affected: Vec<TargetRef>,
    deadline: Option<DateTime<Utc>>,
) -> Result<Action> {
    let action = experiment.spec.action;
    let message = error.to_string();
    let max_retries = experiment.spec.effective_max_retries();

    metrics::EXPERIMENTS_TOTAL
        .with_label_values(&[action.as_str(), "failure"])
        .inc();
    metrics::EXPERIMENT_ERRORS
        .with_label_values(&[error.error_type()])
        .inc();

    let outcome = ExecutionOutcome {
        status: ExecutionStatus::Failure,
        affected: affected.clone(),
        error: Some(message.clone()),
        triggered_by,
        execution_time: now,
        duration: None,
    };
    if let Err(e) = ctx.history.record(experiment, &outcome).await {
        warn!(error = %e, "history_record_failed");
    }

    publish_event(
        ctx,
        experiment,
        EventType::Warning,
        "ExecutionFailed",
        message.clone(),
    )
    .await;

    let will_retry = error.is_retryable() && retry::has_budget(retry_count, max_retries);
    if will_retry {
        let next_count = retry_count + 1;
        let delay = retry::next_delay(&experiment.spec, next_count);
        let next_retry = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        warn!(
            experiment = %experiment.name_any(),
            retry = next_count,
            max_retries,
            delay_seconds = delay.as_secs(),
            error = %message,
            "execution_retry_scheduled"
        );

        update_status(
            ctx,
            experiment,
            ChaosExperimentStatus {
                phase: Some(ExperimentPhase::Running),
                last_run_time: Some(now.to_rfc3339()),
                last_run_result: Some(format!(
                    "attempt {next_count}/{max_retries} failed: {message}"
                )),
                affected_count: Some(affected.len() as u32),
                retry_count: Some(next_count),
                last_error: Some(message),
                next_retry_time: Some(next_retry.to_rfc3339()),
                observed_generation: generation,
                conditions: Some(vec![condition(
                    CONDITION_READY,
                    false,
                    "RetryScheduled",
                    None,
                    now,
                )]),
            },
        )
        .await?;

        let requeue = schedule::earliest(&[Some(next_retry), deadline]).unwrap_or(next_retry);
        return Ok(Action::requeue(schedule::requeue_after(requeue, now)));
    }

    let reason = if error.is_retryable() { "RetriesExhausted" } else { "FatalError" };
    warn!(experiment = %experiment.name_any(), reason, error = %message, "execution_failed");

    update_status(
        ctx,
        experiment,
        ChaosExperimentStatus {
            phase: Some(ExperimentPhase::Failed),
            last_run_time: Some(now.to_rfc3339()),
            last_run_result: Some(message.clone()),
            affected_count: Some(affected.len() as u32),
            retry_count: Some(retry_count),
            last_error: Some(message),
            next_retry_time: None,
            observed_generation: generation,
            conditions: Some(vec![condition(CONDITION_READY, false, reason, None, now)]),
        },
    )
    .await?;

    next_tick(experiment, now)
}

/// Requeue at the next cron tick for recurring experiments; one-shots are
/// finished and wait for a spec change.
fn next_tick(experiment: &ChaosExperiment, now: DateTime<Utc>) -> Result<Action> {
    let fire = experiment
        .spec
        .schedule
        .as_deref()
        .and_then(|expr| schedule::next_fire(expr, Some(now), now).ok().flatten());
    let candidates = [fire, experiment_deadline(experiment)];
    match schedule::earliest(&candidates) {
        Some(at) => Ok(Action::requeue(schedule::requeue_after(at, now))),
        None => Ok(Action::await_change()),
    }
}

fn past_tense(action: ChaosAction) -> &'static str {
    match action {
        ChaosAction::PodKill => "deleted",
        ChaosAction::PodRestart => "restarted",
        ChaosAction::PodFailure => "failed",
        ChaosAction::PodDelay => "delayed",
        ChaosAction::PodCpuStress | ChaosAction::PodMemoryStress => "stressed",
        ChaosAction::PodNetworkLoss => "degraded",
        ChaosAction::PodDiskFill => "filled",
        ChaosAction::NetworkPartition => "partitioned",
        ChaosAction::NodeDrain => "drained",
    }
}

/* ============================= ERROR POLICY ============================= */

pub fn error_policy(
    _experiment: Arc<ChaosExperiment>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    metrics::EXPERIMENT_ERRORS.with_label_values(&["reconcile"]).inc();
    warn!(error = %error, "reconcile_error");
    Action::requeue(Duration::from_secs(60))
}

/* ============================= TESTS ============================= */
