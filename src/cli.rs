use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kube-chaos")]
#[command(about = "Kubernetes chaos-engineering operator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity and permissions
    Check,

    /// Manage the ChaosExperiment CRDs
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Start the chaos operator reconcile loop
    Run(RunArgs),

    /// Manage the admission webhook
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Bind address for the metrics/health HTTP server
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub metrics_addr: String,

    /// Namespace history records are written to (default: the controller's
    /// own namespace)
    #[arg(long)]
    pub history_namespace: Option<String>,

    /// Newest history records kept per experiment
    #[arg(long, default_value_t = 100)]
    pub history_retention: usize,

    /// Disable history records entirely
    #[arg(long)]
    pub disable_history: bool,
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print both CRD YAMLs to stdout
    Generate,

    /// Install the CRDs into the connected cluster
    Install,
}

#[derive(Subcommand)]
pub enum WebhookAction {
    /// Start the admission webhook HTTPS server
    Serve {
        #[arg(long, default_value = "0.0.0.0:8443")]
        addr: String,
        #[arg(long, default_value = "tls.crt")]
        tls_cert: String,
        #[arg(long, default_value = "tls.key")]
        tls_key: String,
    },
    /// Generate self-signed TLS certificates for development
    CertGenerate {
        #[arg(long, default_value = "kube-chaos-webhook")]
        service_name: String,
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long, default_value = ".")]
        output_dir: String,
    },
    /// Print the ValidatingWebhookConfiguration YAML
    InstallConfig {
        #[arg(long, default_value = "kube-chaos-webhook")]
        service_name: String,
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long)]
        ca_bundle_path: String,
    },
}
