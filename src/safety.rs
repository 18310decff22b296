use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use rand::Rng;
use rand::seq::index;
use thiserror::Error;

use crate::crd::{
    ANNOTATION_EXCLUDE, ANNOTATION_PRODUCTION, AffectedResource, ChaosExperimentSpec,
    LABEL_EXCLUDE,
};
use crate::windows;

/* ============================= TARGETS ============================= */

/// A resource that survived (or is entering) the safety pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl TargetRef {
    pub fn pod(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { kind: "Pod".into(), name: name.into(), namespace: namespace.into() }
    }

    /// Nodes are cluster-scoped; the namespace field stays empty.
    pub fn node(name: impl Into<String>) -> Self {
        Self { kind: "Node".into(), name: name.into(), namespace: String::new() }
    }

    pub fn to_affected(&self) -> AffectedResource {
        AffectedResource {
            kind: self.kind.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// A selector match entering the pipeline, with its exclusion marking
/// already resolved so the pipeline itself stays free of API types.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub target: TargetRef,
    pub excluded: bool,
}

impl Candidate {
    pub fn from_pod(pod: &Pod) -> Self {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        Self { target: TargetRef::pod(name, namespace), excluded: is_excluded_pod(pod) }
    }
}

/* ============================= REJECTIONS ============================= */

/// Why the safety pipeline refused an execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SafetyRejection {
    #[error("execution is blocked by a maintenance window")]
    MaintenanceWindow { until: Option<DateTime<Utc>> },

    #[error("current time is outside every allowed window")]
    OutsideWindow { until: Option<DateTime<Utc>> },

    #[error("namespace {namespace:?} is excluded from chaos")]
    ExcludedNamespace { namespace: String },

    #[error("namespace {namespace:?} is marked as production; set allowProduction: true to proceed")]
    ProductionNamespace { namespace: String },

    #[error(
        "count {count} exceeds maxPercentage {max_percentage}% (max allowed: {allowed} pods out of {candidates})"
    )]
    BlastRadiusExceeded {
        count: u32,
        max_percentage: u32,
        allowed: u32,
        candidates: usize,
    },
}

impl SafetyRejection {
    /// Short machine-readable reason, used in status and metrics labels.
    pub fn reason(&self) -> &'static str {
        match self {
            SafetyRejection::MaintenanceWindow { .. } => "maintenance-window",
            SafetyRejection::OutsideWindow { .. } => "outside-window",
            SafetyRejection::ExcludedNamespace { .. } => "excluded-namespace",
            SafetyRejection::ProductionNamespace { .. } => "production-gate",
            SafetyRejection::BlastRadiusExceeded { .. } => "blast-radius-exceeded",
        }
    }

    /// Terminal rejections only clear when the spec (or namespace marking)
    /// changes. Window rejections clear on their own and blast radius
    /// re-evaluates as the candidate set moves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SafetyRejection::ExcludedNamespace { .. }
                | SafetyRejection::ProductionNamespace { .. }
        )
    }

    /// When to reconcile again for time-based rejections.
    pub fn requeue_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SafetyRejection::MaintenanceWindow { until }
            | SafetyRejection::OutsideWindow { until } => *until,
            _ => None,
        }
    }
}

/* ============================= NAMESPACE MARKING ============================= */

/// Name patterns that mark a namespace as production.
pub fn is_production_name(name: &str) -> bool {
    name == "production"
        || name.starts_with("prod-")
        || name.ends_with("-prod")
        || name.ends_with("-production")
}

fn annotation_is_true(annotations: Option<&std::collections::BTreeMap<String, String>>, key: &str) -> bool {
    annotations.and_then(|a| a.get(key)).map(String::as_str) == Some("true")
}

/// A namespace counts as production when annotated, labeled, or named so.
pub fn is_production_namespace(ns: &Namespace) -> bool {
    if annotation_is_true(ns.metadata.annotations.as_ref(), ANNOTATION_PRODUCTION) {
        return true;
    }
    if let Some(labels) = &ns.metadata.labels {
        if labels.get("environment").map(String::as_str) == Some("production")
            || labels.get("env").map(String::as_str) == Some("prod")
        {
            return true;
        }
    }
    ns.metadata
        .name
        .as_deref()
        .is_some_and(is_production_name)
}

pub fn is_excluded_namespace(ns: &Namespace) -> bool {
    annotation_is_true(ns.metadata.annotations.as_ref(), ANNOTATION_EXCLUDE)
}

pub fn is_excluded_pod(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_EXCLUDE))
        .map(String::as_str)
        == Some("true")
}

/* ============================= BLAST RADIUS ============================= */

/// Largest target count permitted by `maxPercentage` over `candidates`
/// survivors of exclusion filtering.
pub fn max_allowed(max_percentage: u32, candidates: usize) -> u32 {
    (max_percentage as u64 * candidates as u64 / 100) as u32
}

/// The blast-radius gate shared by the reconciler and the admission webhook.
pub fn blast_radius_check(
    count: u32,
    max_percentage: u32,
    candidates: usize,
) -> Result<(), SafetyRejection> {
    let allowed = max_allowed(max_percentage, candidates);
    if count > allowed {
        return Err(SafetyRejection::BlastRadiusExceeded {
            count,
            max_percentage,
            allowed,
            candidates,
        });
    }
    Ok(())
}

/* ============================= SAMPLING ============================= */

/// Choose at most `count` targets uniformly at random without replacement.
pub fn sample_targets<R: Rng + ?Sized>(
    candidates: &[TargetRef],
    count: u32,
    rng: &mut R,
) -> Vec<TargetRef> {
    let take = (count as usize).min(candidates.len());
    let mut picked: Vec<TargetRef> = index::sample(rng, candidates.len(), take)
        .iter()
        .map(|i| candidates[i].clone())
        .collect();
    // Stable output order keeps history records readable.
    picked.sort_by(|a, b| a.name.cmp(&b.name));
    picked
}

/* ============================= PIPELINE ============================= */

/// Approved output of the pipeline.
#[derive(Debug, Clone)]
pub struct SafetyVerdict {
    pub approved: Vec<TargetRef>,
    /// Candidate count after exclusion filtering, for status reporting.
    pub candidate_count: usize,
}

/// Run the ordered gate sequence; the first gate to reject wins.
///
/// An empty candidate set is not a rejection here: the reconciler
/// classifies it (transient under a schedule, terminal for one-shots).
pub fn evaluate<R: Rng + ?Sized>(
    spec: &ChaosExperimentSpec,
    now: DateTime<Utc>,
    target_namespace: &Namespace,
    candidates: Vec<Candidate>,
    rng: &mut R,
) -> Result<SafetyVerdict, SafetyRejection> {
    let maintenance = spec.maintenance_windows.as_deref().unwrap_or(&[]);
    if windows::is_within_any(maintenance, now) {
        return Err(SafetyRejection::MaintenanceWindow {
            until: windows::next_boundary(maintenance, now).map(|b| b.at),
        });
    }

    let allowed_windows = spec.time_windows.as_deref().unwrap_or(&[]);
    if !windows::allows(allowed_windows, now) {
        return Err(SafetyRejection::OutsideWindow {
            until: windows::next_boundary(allowed_windows, now).map(|b| b.at),
        });
    }

    if is_excluded_namespace(target_namespace) {
        return Err(SafetyRejection::ExcludedNamespace {
            namespace: target_namespace.metadata.name.clone().unwrap_or_default(),
        });
    }

    if is_production_namespace(target_namespace) && !spec.allows_production() {
        return Err(SafetyRejection::ProductionNamespace {
            namespace: target_namespace.metadata.name.clone().unwrap_or_default(),
        });
    }

    let filtered: Vec<TargetRef> = candidates
        .into_iter()
        .filter(|c| !c.excluded)
        .map(|c| c.target)
        .collect();

    if !filtered.is_empty() {
        // `count` means "up to N": a request larger than the candidate set
        // caps silently before the percentage check.
        let requested = spec.effective_count().min(filtered.len() as u32);
        blast_radius_check(requested, spec.effective_max_percentage(), filtered.len())?;
    }

    let approved = sample_targets(&filtered, spec.effective_count(), rng);
    Ok(SafetyVerdict { candidate_count: filtered.len(), approved })
}

/* ============================= TESTS ============================= */
