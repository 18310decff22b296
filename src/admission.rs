use k8s_openapi::api::core::v1::{Namespace, Service};

use crate::crd::ChaosExperimentSpec;
use crate::safety::{self, SafetyRejection};
use crate::validation;

/* ============================= TYPES ============================= */

/// Result of reviewing a ChaosExperiment at admission time.
#[derive(Debug, Clone)]
pub struct AdmissionVerdict {
    pub allowed: bool,
    pub message: Option<String>,
    pub warnings: Vec<String>,
}

impl AdmissionVerdict {
    fn allowed(warnings: Vec<String>) -> Self {
        Self { allowed: true, message: None, warnings }
    }

    fn denied(message: String, warnings: Vec<String>) -> Self {
        Self { allowed: false, message: Some(message), warnings }
    }
}

/* ============================= CORE LOGIC ============================= */

/// Review an experiment spec against everything checkable without cluster
/// lookups, plus the blast-radius gate when the webhook could count
/// candidates and the production gate when it could fetch the namespace.
pub fn review_experiment(
    spec: &ChaosExperimentSpec,
    target_namespace: Option<&Namespace>,
    candidate_count: Option<usize>,
) -> AdmissionVerdict {
    let report = validation::validate_experiment(spec);
    if !report.is_valid() {
        let message = report
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return AdmissionVerdict::denied(message, report.warnings);
    }

    let mut warnings = report.warnings;

    if let Some(ns) = target_namespace {
        if safety::is_excluded_namespace(ns) {
            return AdmissionVerdict::denied(
                SafetyRejection::ExcludedNamespace {
                    namespace: ns.metadata.name.clone().unwrap_or_default(),
                }
                .to_string(),
                warnings,
            );
        }
        if safety::is_production_namespace(ns) && !spec.allows_production() {
            return AdmissionVerdict::denied(
                SafetyRejection::ProductionNamespace {
                    namespace: ns.metadata.name.clone().unwrap_or_default(),
                }
                .to_string(),
                warnings,
            );
        }
    }

    if let Some(candidates) = candidate_count
        && candidates > 0
        && let Err(rejection) = safety::blast_radius_check(
            spec.effective_count(),
            spec.effective_max_percentage(),
            candidates,
        )
    {
        return AdmissionVerdict::denied(rejection.to_string(), warnings);
    }

    if spec
        .target_namespaces
        .as_ref()
        .is_some_and(|t| !t.is_empty())
    {
        warnings.push("targeting whole namespaces can partition many pods at once".to_string());
    }

    AdmissionVerdict::allowed(warnings)
}

/// Warnings for service-aware partition targets: headless services resolve
/// to every backing pod, and large endpoint sets mean a wide blast radius.
pub fn service_warnings(services: &[Service]) -> Vec<String> {
    services
        .iter()
        .filter_map(|svc| {
            let name = svc.metadata.name.as_deref().unwrap_or("unknown");
            let cluster_ip = svc
                .spec
                .as_ref()
                .and_then(|s| s.cluster_ip.as_deref())
                .unwrap_or("");
            if cluster_ip.is_empty() || cluster_ip == "None" {
                Some(format!(
                    "service {name:?} is headless; the partition applies to every backing pod"
                ))
            } else {
                None
            }
        })
        .collect()
}

/* ============================= ADMISSION REVIEW WIRE FORMAT ============================= */

/// Build the AdmissionReview response document, including user-facing
/// warnings.
pub fn admission_response(uid: &str, verdict: &AdmissionVerdict) -> serde_json::Value {
    let mut response = serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "response": {
            "uid": uid,
            "allowed": verdict.allowed
        }
    });

    if let Some(msg) = &verdict.message {
        response["response"]["status"] = serde_json::json!({ "message": msg });
    }
    if !verdict.warnings.is_empty() {
        response["response"]["warnings"] = serde_json::json!(verdict.warnings);
    }

    response
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn spec(json: &str) -> ChaosExperimentSpec {
        serde_json::from_str(json).unwrap()
    }

    fn production_namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn service(name: &str, cluster_ip: Option<&str>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: cluster_ip.map(String::from),
                ..Default::default()
            }),
            status: None,
        }
    }

    // ── validation denial ──

    #[test]
    fn test_valid_spec_allowed() {
        let verdict = review_experiment(&spec(r#"{"action":"pod-kill"}"#), None, None);
        assert!(verdict.allowed);
        assert!(verdict.message.is_none());
    }

    #[test]
    fn test_invalid_spec_denied_with_field_path() {
        let verdict = review_experiment(
            &spec(r#"{"action":"pod-kill","duration":"1d"}"#),
            None,
            None,
        );
        assert!(!verdict.allowed);
        assert!(verdict.message.unwrap().contains("spec.duration"));
    }

    #[test]
    fn test_multiple_errors_joined() {
        let verdict = review_experiment(
            &spec(r#"{"action":"pod-kill","duration":"1d","maxRetries":99}"#),
            None,
            None,
        );
        let msg = verdict.message.unwrap();
        assert!(msg.contains("spec.duration"));
        assert!(msg.contains("spec.maxRetries"));
    }

    // ── blast radius ──

    #[test]
    fn test_blast_radius_denial_message() {
        // Scenario: count 5, maxPercentage 30, 10 matching pods.
        let verdict = review_experiment(
            &spec(r#"{"action":"pod-kill","count":5,"maxPercentage":30}"#),
            None,
            Some(10),
        );
        assert!(!verdict.allowed);
        assert_eq!(
            verdict.message.unwrap(),
            "count 5 exceeds maxPercentage 30% (max allowed: 3 pods out of 10)"
        );
    }

    #[test]
    fn test_blast_radius_within_limit_allowed() {
        let verdict = review_experiment(
            &spec(r#"{"action":"pod-kill","count":3,"maxPercentage":30}"#),
            None,
            Some(10),
        );
        assert!(verdict.allowed);
    }

    #[test]
    fn test_blast_radius_skipped_without_candidate_count() {
        let verdict = review_experiment(
            &spec(r#"{"action":"pod-kill","count":5,"maxPercentage":30}"#),
            None,
            None,
        );
        assert!(verdict.allowed);
    }

    // ── production gate ──

    #[test]
    fn test_production_namespace_denied() {
        let ns = production_namespace("production");
        let verdict = review_experiment(&spec(r#"{"action":"pod-kill"}"#), Some(&ns), None);
        assert!(!verdict.allowed);
        assert_eq!(
            verdict.message.unwrap(),
            "namespace \"production\" is marked as production; set allowProduction: true to proceed"
        );
    }

    #[test]
    fn test_production_namespace_opt_in_allowed() {
        let ns = production_namespace("production");
        let verdict = review_experiment(
            &spec(r#"{"action":"pod-kill","allowProduction":true}"#),
            Some(&ns),
            None,
        );
        assert!(verdict.allowed);
    }

    // ── warnings ──

    #[test]
    fn test_dangerous_targets_warn_but_allow() {
        let verdict = review_experiment(
            &spec(
                r#"{"action":"network-partition","duration":"1m","targetIPs":["127.0.0.1"]}"#,
            ),
            None,
            None,
        );
        assert!(verdict.allowed);
        assert!(verdict.warnings.iter().any(|w| w.contains("loopback")));
    }

    #[test]
    fn test_namespace_targets_warn() {
        let verdict = review_experiment(
            &spec(
                r#"{"action":"network-partition","duration":"1m","targetNamespaces":["payments"]}"#,
            ),
            None,
            None,
        );
        assert!(verdict.allowed);
        assert!(verdict.warnings.iter().any(|w| w.contains("namespaces")));
    }

    #[test]
    fn test_headless_service_warning() {
        let warnings = service_warnings(&[
            service("db", Some("None")),
            service("web", Some("10.96.0.12")),
            service("mesh", None),
        ]);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("db"));
        assert!(warnings[1].contains("mesh"));
    }

    // ── wire format ──

    #[test]
    fn test_response_allowed_shape() {
        let verdict = AdmissionVerdict::allowed(vec![]);
        let resp = admission_response("uid-1", &verdict);
        assert_eq!(resp["response"]["uid"], "uid-1");
        assert_eq!(resp["response"]["allowed"], true);
        assert!(resp["response"].get("status").is_none());
        assert!(resp["response"].get("warnings").is_none());
    }

    #[test]
    fn test_response_denied_carries_message() {
        let verdict = AdmissionVerdict::denied("nope".into(), vec!["careful".into()]);
        let resp = admission_response("uid-2", &verdict);
        assert_eq!(resp["response"]["allowed"], false);
        assert_eq!(resp["response"]["status"]["message"], "nope");
        assert_eq!(resp["response"]["warnings"][0], "careful");
    }

    #[test]
    fn test_labels_do_not_affect_name_only_production_check() {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some("apps".into()),
                labels: Some(BTreeMap::from([(
                    "environment".to_string(),
                    "production".to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        let verdict = review_experiment(&spec(r#"{"action":"pod-kill"}"#), Some(&ns), None);
        assert!(!verdict.allowed);
    }
}
