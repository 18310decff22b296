#![allow(dead_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use kube_chaos::crd::{ChaosExperiment, ChaosExperimentSpec, LABEL_EXCLUDE};
use kube_chaos::safety::Candidate;

/// Build an experiment from spec JSON, namespaced to `default`.
pub fn make_experiment(spec_json: &str) -> ChaosExperiment {
    let spec: ChaosExperimentSpec = serde_json::from_str(spec_json).expect("spec deserializes");
    let mut experiment = ChaosExperiment::new("test-experiment", spec);
    experiment.metadata.namespace = Some("default".to_string());
    experiment
}

pub fn make_namespace(
    name: &str,
    annotations: &[(&str, &str)],
    labels: &[(&str, &str)],
) -> Namespace {
    let to_map = |kv: &[(&str, &str)]| -> Option<BTreeMap<String, String>> {
        if kv.is_empty() {
            None
        } else {
            Some(kv.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
        }
    };
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: to_map(annotations),
            labels: to_map(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn make_pod(name: &str, namespace: &str, labels: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: if labels.is_empty() {
                None
            } else {
                Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

/// `total` pods named `pod-0..` in `namespace`; the first `excluded` carry
/// the exclusion label.
pub fn make_candidates(total: usize, excluded: usize, namespace: &str) -> Vec<Candidate> {
    (0..total)
        .map(|i| {
            let labels: Vec<(&str, &str)> =
                if i < excluded { vec![(LABEL_EXCLUDE, "true")] } else { vec![] };
            Candidate::from_pod(&make_pod(&format!("pod-{i}"), namespace, &labels))
        })
        .collect()
}
