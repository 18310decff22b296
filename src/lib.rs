//! Chaos-engineering operator for Kubernetes: reconciles declarative
//! ChaosExperiment resources into safety-gated, recurring fault injections.

pub mod actions;
pub mod admission;
pub mod crd;
pub mod history;
pub mod metrics;
pub mod reconciler;
pub mod retry;
pub mod safety;
pub mod schedule;
pub mod validation;
pub mod windows;

use thiserror::Error;

/// Top-level operator error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(#[from] validation::ValidationError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
