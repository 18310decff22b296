use std::sync::LazyLock;

use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder};

/* ============================= REGISTRY ============================= */

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/* ============================= METRICS ============================= */

pub static EXPERIMENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "chaos_experiments_total",
            "Chaos experiment executions by action and outcome",
        ),
        &["action", "status"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static EXPERIMENT_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let h = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "chaos_experiment_duration_seconds",
            "Duration of chaos experiment executions in seconds",
        ),
        &["action"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

pub static RESOURCES_AFFECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "chaos_resources_affected_total",
            "Resources affected by chaos experiments",
        ),
        &["action", "resource_type"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static EXPERIMENT_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "chaos_experiment_errors_total",
            "Chaos experiment execution errors by error type",
        ),
        &["error_type"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static EXPERIMENTS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new(
        "chaos_experiments_active",
        "Experiments currently executing a fault",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

/* ============================= HELPERS ============================= */

/// Force-init all metrics so they appear on /metrics before first use.
pub fn force_init() {
    LazyLock::force(&EXPERIMENTS_TOTAL);
    LazyLock::force(&EXPERIMENT_DURATION);
    LazyLock::force(&RESOURCES_AFFECTED);
    LazyLock::force(&EXPERIMENT_ERRORS);
    LazyLock::force(&EXPERIMENTS_ACTIVE);
}

/// Render the registry in Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("metrics are not valid UTF-8: {e}")))
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metric_names_registered() {
        force_init();
        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        for expected in [
            "chaos_experiments_total",
            "chaos_experiment_duration_seconds",
            "chaos_resources_affected_total",
            "chaos_experiment_errors_total",
            "chaos_experiments_active",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_counters_accumulate() {
        force_init();
        let before = EXPERIMENTS_TOTAL
            .with_label_values(&["pod-kill", "success"])
            .get();
        EXPERIMENTS_TOTAL
            .with_label_values(&["pod-kill", "success"])
            .inc();
        let after = EXPERIMENTS_TOTAL
            .with_label_values(&["pod-kill", "success"])
            .get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_active_gauge_moves_both_ways() {
        force_init();
        let before = EXPERIMENTS_ACTIVE.get();
        EXPERIMENTS_ACTIVE.inc();
        EXPERIMENTS_ACTIVE.dec();
        assert_eq!(EXPERIMENTS_ACTIVE.get(), before);
    }

    #[test]
    fn test_render_contains_metric_names() {
        force_init();
        EXPERIMENT_ERRORS.with_label_values(&["retryable"]).inc();
        let body = render().expect("render succeeds");
        assert!(body.contains("chaos_experiment_errors_total"));
        assert!(body.contains("chaos_experiments_active"));
    }
}
