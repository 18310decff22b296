use std::net::SocketAddr;
use std::sync::LazyLock;

use anyhow::{Context as _, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use kube::api::ListParams;
use kube::{Api, Client};
use prometheus::{Encoder, Histogram, IntCounterVec, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::info;

use kube_chaos::admission::{self, AdmissionVerdict};
use kube_chaos::crd::ChaosExperiment;
use kube_chaos::reconciler::selector_string;
use kube_chaos::safety;

/* ============================= PROMETHEUS ============================= */

static WEBHOOK_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static WEBHOOK_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("webhook_requests_total", "Total admission webhook requests"),
        &["operation", "allowed"],
    )
    .expect("metric definition is valid");
    WEBHOOK_REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

static WEBHOOK_DENIALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "webhook_denials_total",
            "Total admission webhook denials by namespace",
        ),
        &["namespace"],
    )
    .expect("metric definition is valid");
    WEBHOOK_REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

static WEBHOOK_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(prometheus::HistogramOpts::new(
        "webhook_request_duration_seconds",
        "Duration of admission webhook request processing in seconds",
    ))
    .expect("metric definition is valid");
    WEBHOOK_REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

/* ============================= STATE ============================= */

#[derive(Clone)]
pub(crate) struct WebhookState {
    pub(crate) client: Client,
    pub(crate) ready: bool,
}

/* ============================= ENTRY: SERVE ============================= */

pub async fn serve(addr_str: &str, tls_cert: &str, tls_key: &str) -> Result<()> {
    println!("Starting admission webhook server...\n");
    info!("webhook_starting");

    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster")?;

    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    print!("  TLS ......................... ");
    validate_tls_files(tls_cert, tls_key)?;
    println!("loaded ({}, {})", tls_cert, tls_key);

    let addr: SocketAddr = addr_str.parse().context("Invalid address format")?;

    println!("  HTTPS server ................ https://{addr}");
    println!();
    println!("  Available endpoints:");
    println!("    POST /validate ............ Admission review handler");
    println!("    GET  /healthz ............. Liveness probe");
    println!("    GET  /readyz .............. Readiness probe");
    println!("    GET  /metrics ............. Prometheus metrics");
    println!();
    println!("Admission webhook running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    let state = WebhookState { client, ready: true };

    let tls_cert = tls_cert.to_string();
    let tls_key = tls_key.to_string();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let http_shutdown = shutdown_tx.subscribe();

    let http_handle = tokio::spawn(async move {
        start_https_server(state, http_shutdown, addr, &tls_cert, &tls_key).await
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    println!("\n{}", "=".repeat(70));
    println!("Shutdown signal received. Stopping webhook server...");
    println!("{}", "=".repeat(70));

    let _ = shutdown_tx.send(());
    let _ = http_handle.await?;

    info!("webhook_stopped");
    println!("Webhook server stopped.");
    Ok(())
}

/* ============================= TLS ============================= */

fn validate_tls_files(cert_path: &str, key_path: &str) -> Result<()> {
    if !std::path::Path::new(cert_path).exists() {
        anyhow::bail!("TLS certificate file not found: {}", cert_path);
    }
    if !std::path::Path::new(key_path).exists() {
        anyhow::bail!("TLS key file not found: {}", key_path);
    }
    Ok(())
}

/* ============================= HTTPS SERVER ============================= */

pub(crate) fn build_webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/validate", post(admission_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || ready_handler(state.clone())
            }),
        )
        .route("/metrics", get(webhook_metrics_handler))
        .with_state(state)
}

async fn start_https_server(
    state: WebhookState,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
    tls_cert: &str,
    tls_key: &str,
) -> Result<()> {
    let app = build_webhook_router(state);

    let rustls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(tls_cert, tls_key)
        .await
        .context("Failed to load TLS configuration")?;

    info!(addr = %addr, "https_server_started");

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        let _ = shutdown.recv().await;
        shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
    });

    axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn ready_handler(state: WebhookState) -> impl IntoResponse {
    if state.ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn webhook_metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = WEBHOOK_REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "metrics encoding error".to_string(),
            ),
        },
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error".to_string(),
        ),
    }
}

/* ============================= ADMISSION HANDLER ============================= */

async fn admission_handler(State(state): State<WebhookState>, body: String) -> impl IntoResponse {
    let _timer = WEBHOOK_DURATION.start_timer();

    let review: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            info!(error = %e, "invalid_admission_review");
            return (
                StatusCode::BAD_REQUEST,
                admission::admission_response(
                    "",
                    &AdmissionVerdict { allowed: true, message: None, warnings: Vec::new() },
                )
                .to_string(),
            );
        }
    };

    let uid = review["request"]["uid"].as_str().unwrap_or("").to_string();
    let operation = review["request"]["operation"]
        .as_str()
        .unwrap_or("UNKNOWN")
        .to_string();

    // Extract the experiment from the admission request.
    let experiment: ChaosExperiment =
        match serde_json::from_value(review["request"]["object"].clone()) {
            Ok(e) => e,
            Err(e) => {
                // Fail-open: the apiserver schema already rejects malformed
                // objects; an unparseable review should not block users.
                info!(error = %e, "failed_to_parse_experiment");
                WEBHOOK_REQUESTS.with_label_values(&[&operation, "true"]).inc();
                return (
                    StatusCode::OK,
                    admission::admission_response(
                        &uid,
                        &AdmissionVerdict { allowed: true, message: None, warnings: Vec::new() },
                    )
                    .to_string(),
                );
            }
        };

    let verdict = review_with_cluster_context(&state.client, &experiment).await;

    let allowed_str = if verdict.allowed { "true" } else { "false" };
    WEBHOOK_REQUESTS
        .with_label_values(&[&operation, allowed_str])
        .inc();

    if !verdict.allowed {
        let namespace = review["request"]["namespace"].as_str().unwrap_or("default");
        WEBHOOK_DENIALS.with_label_values(&[namespace]).inc();
        info!(
            namespace = %namespace,
            message = ?verdict.message,
            "admission_denied"
        );
    }

    (
        StatusCode::OK,
        admission::admission_response(&uid, &verdict).to_string(),
    )
}

/// Run the pure admission review, enriched with whatever cluster context
/// is reachable: the target namespace (production/exclusion gates), the
/// candidate pod count (blast radius) and targeted services (warnings).
/// Lookups that fail degrade to the pure checks.
async fn review_with_cluster_context(
    client: &Client,
    experiment: &ChaosExperiment,
) -> AdmissionVerdict {
    let target_namespace = kube_chaos::actions::target_namespace(experiment);

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns_object = namespaces.get(&target_namespace).await.ok();

    let candidate_count = if experiment.spec.action.targets_nodes() {
        None
    } else {
        let pods: Api<Pod> = Api::namespaced(client.clone(), &target_namespace);
        let mut params = ListParams::default();
        if let Some(selector) = selector_string(experiment.spec.selector.as_ref()) {
            params = params.labels(&selector);
        }
        match pods.list(&params).await {
            Ok(list) => Some(
                list.items
                    .iter()
                    .filter(|p| !safety::is_excluded_pod(p))
                    .count(),
            ),
            Err(_) => None,
        }
    };

    let mut verdict = admission::review_experiment(
        &experiment.spec,
        ns_object.as_ref(),
        candidate_count,
    );

    if verdict.allowed
        && let Some(names) = &experiment.spec.target_services
        && !names.is_empty()
    {
        let services: Api<Service> = Api::namespaced(client.clone(), &target_namespace);
        let mut targeted = Vec::new();
        for name in names {
            if let Ok(svc) = services.get(name).await {
                targeted.push(svc);
            }
        }
        verdict
            .warnings
            .extend(admission::service_warnings(&targeted));
    }

    verdict
}

/* ============================= CERT GENERATION ============================= */

pub fn generate_certs(service_name: &str, namespace: &str, output_dir: &str) -> Result<()> {
    println!("Generating self-signed TLS certificates...\n");

    let (ca_pem, cert_pem, key_pem) = generate_self_signed_certs(service_name, namespace)?;

    let output_path = std::path::Path::new(output_dir);
    if !output_path.exists() {
        std::fs::create_dir_all(output_path).context("Failed to create output directory")?;
    }

    let ca_path = output_path.join("ca.crt");
    let cert_path = output_path.join("tls.crt");
    let key_path = output_path.join("tls.key");

    std::fs::write(&ca_path, &ca_pem).context("Failed to write ca.crt")?;
    std::fs::write(&cert_path, &cert_pem).context("Failed to write tls.crt")?;
    std::fs::write(&key_path, &key_pem).context("Failed to write tls.key")?;

    println!("  CA certificate .............. {}", ca_path.display());
    println!("  Server certificate .......... {}", cert_path.display());
    println!("  Server key .................. {}", key_path.display());
    println!();
    println!("  SANs:");
    println!("    - {service_name}.{namespace}.svc");
    println!("    - {service_name}.{namespace}.svc.cluster.local");
    println!();
    println!("TLS certificates generated successfully.");

    Ok(())
}

pub fn generate_self_signed_certs(
    service_name: &str,
    namespace: &str,
) -> Result<(String, String, String)> {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};

    let mut ca_params = CertificateParams::default();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let mut ca_dn = DistinguishedName::new();
    ca_dn.push(DnType::CommonName, "kube-chaos-webhook-ca");
    ca_dn.push(DnType::OrganizationName, "kube-chaos");
    ca_params.distinguished_name = ca_dn;

    let ca_key = KeyPair::generate().context("Failed to generate CA key pair")?;
    let ca_cert = ca_params
        .self_signed(&ca_key)
        .context("Failed to self-sign CA certificate")?;

    let mut server_params = CertificateParams::default();
    let mut server_dn = DistinguishedName::new();
    server_dn.push(DnType::CommonName, format!("{service_name}.{namespace}.svc"));
    server_params.distinguished_name = server_dn;

    server_params.subject_alt_names = vec![
        SanType::DnsName(
            format!("{service_name}.{namespace}.svc")
                .try_into()
                .context("Invalid DNS name for SAN")?,
        ),
        SanType::DnsName(
            format!("{service_name}.{namespace}.svc.cluster.local")
                .try_into()
                .context("Invalid DNS name for SAN")?,
        ),
    ];

    let server_key = KeyPair::generate().context("Failed to generate server key pair")?;
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .context("Failed to sign server certificate")?;

    Ok((ca_cert.pem(), server_cert.pem(), server_key.serialize_pem()))
}

/* ============================= INSTALL CONFIG ============================= */

pub fn install_config(service_name: &str, namespace: &str, ca_bundle_path: &str) -> Result<()> {
    use base64::Engine;

    let ca_bytes = std::fs::read(ca_bundle_path).context("Failed to read CA bundle file")?;
    let ca_b64 = base64::engine::general_purpose::STANDARD.encode(&ca_bytes);

    let yaml = format!(
        r#"apiVersion: admissionregistration.k8s.io/v1
kind: ValidatingWebhookConfiguration
metadata:
  name: {service_name}
webhooks:
  - name: validate.chaos.gushchin.dev
    rules:
      - apiGroups: ["chaos.gushchin.dev"]
        resources: ["chaosexperiments"]
        apiVersions: ["v1alpha1"]
        operations: ["CREATE", "UPDATE"]
    clientConfig:
      service:
        name: {service_name}
        namespace: {namespace}
        path: /validate
      caBundle: {ca_b64}
    failurePolicy: Fail
    sideEffects: None
    admissionReviewVersions: ["v1"]
"#
    );

    println!("{yaml}");
    Ok(())
}

/* ============================= TESTS ============================= */
