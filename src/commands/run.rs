use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::Controller;
use kube::Client;
use tokio::signal;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use crate::cli::RunArgs;
use kube_chaos::crd::{ChaosExperiment, ChaosExperimentHistory};
use kube_chaos::history::HistoryRecorder;
use kube_chaos::metrics;
use kube_chaos::reconciler;

/* ============================= STATE ============================= */

pub(crate) struct OperatorState {
    pub(crate) ready: bool,
}

/// The namespace the controller itself runs in; history records default
/// here.
fn controller_namespace() -> String {
    std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

/* ============================= ENTRY ============================= */

pub async fn run(args: RunArgs) -> Result<()> {
    println!("Starting chaos operator...\n");

    let client = Client::try_default()
        .await
        .context("Failed to load kubeconfig")?;

    // Verify actual cluster connectivity before starting the controller
    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    let history_namespace = args
        .history_namespace
        .clone()
        .unwrap_or_else(controller_namespace);
    let history = HistoryRecorder::new(
        client.clone(),
        history_namespace.clone(),
        args.history_retention,
        !args.disable_history,
    );

    let experiments: Api<ChaosExperiment> = Api::all(client.clone());
    let histories: Api<ChaosExperimentHistory> = Api::all(client.clone());

    let ctx = Arc::new(reconciler::Context::new(client.clone(), history));

    metrics::force_init();

    let addr: SocketAddr = args
        .metrics_addr
        .parse()
        .context("Invalid metrics bind address")?;

    println!("  CRD watch ................... ChaosExperiment.chaos.gushchin.dev/v1alpha1");
    println!("  History namespace ........... {history_namespace}");
    println!(
        "  History ..................... {} (retention {})",
        if args.disable_history { "disabled" } else { "enabled" },
        args.history_retention
    );
    println!("  Metrics server .............. http://{addr}");
    println!();
    println!("  Available endpoints:");
    println!("    GET /healthz .............. Liveness probe (always 200 OK)");
    println!(
        "    GET /readyz ............... Readiness probe (503 until first reconcile, then 200)"
    );
    println!("    GET /metrics .............. Prometheus metrics scrape endpoint");
    println!();
    println!("Operator running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    info!("chaos_operator_started");

    let operator_state = Arc::new(Mutex::new(OperatorState { ready: false }));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let http_state = operator_state.clone();
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle =
        tokio::spawn(async move { start_metrics_server(http_state, http_shutdown, addr).await });

    let controller_state = operator_state.clone();
    let controller = Controller::new(experiments, Default::default())
        .owns(histories, Default::default())
        .run(reconciler::reconcile, reconciler::error_policy, ctx)
        .for_each(move |result| {
            let state = controller_state.clone();
            async move {
                {
                    let mut s = state.lock().await;
                    if !s.ready {
                        s.ready = true;
                    }
                }
                match result {
                    Ok((_obj, _action)) => {}
                    Err(e) => {
                        warn!(error = %e, "reconcile_dispatch_error");
                        eprintln!("[ERROR] Reconcile dispatch: {e}");
                    }
                }
            }
        });

    // Use select! so Ctrl+C drops (cancels) the controller stream.
    // The kube Controller has no built-in shutdown hook, so dropping
    // the future is the only way to stop it cleanly.
    tokio::select! {
        _ = controller => {
            info!("chaos_controller_stream_ended");
            println!("\nController stream ended unexpectedly.");
        }
        _ = signal::ctrl_c() => {
            info!("shutdown_signal_received");
            println!("\n{}", "=".repeat(70));
            println!("Shutdown signal received. Stopping operator...");
            println!("{}", "=".repeat(70));
        }
    }

    let _ = shutdown_tx.send(());
    let _ = http_handle.await?;

    info!("chaos_operator_stopped");
    println!("Operator stopped.");

    Ok(())
}

/* ============================= HTTP SERVER ============================= */

pub(crate) fn build_operator_router(state: Arc<Mutex<OperatorState>>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || ready_handler(state.clone())
            }),
        )
}

async fn start_metrics_server(
    state: Arc<Mutex<OperatorState>>,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
) -> Result<()> {
    let app = build_operator_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind metrics server")?;

    info!(addr = %addr, "metrics_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<OperatorState>>) -> impl IntoResponse {
    let state = state.lock().await;
    if state.ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::render() {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error".to_string(),
        ),
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(ready: bool) -> Arc<Mutex<OperatorState>> {
        Arc::new(Mutex::new(OperatorState { ready }))
    }

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let app = build_operator_router(test_state(false));
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_readyz_when_ready() {
        let app = build_operator_router(test_state(true));
        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"READY");
    }

    #[tokio::test]
    async fn test_readyz_when_not_ready() {
        let app = build_operator_router(test_state(false));
        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_returns_ok() {
        let app = build_operator_router(test_state(false));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let app = build_operator_router(test_state(false));
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_controller_namespace_defaults() {
        // Without POD_NAMESPACE set, falls back to "default".
        if std::env::var("POD_NAMESPACE").is_err() {
            assert_eq!(controller_namespace(), "default");
        }
    }
}
