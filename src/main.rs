mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, CrdAction, WebhookAction};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => commands::version::run(),
        Commands::Check => commands::check::run().await?,
        Commands::Crd { action } => match action {
            CrdAction::Generate => commands::crd::generate()?,
            CrdAction::Install => commands::crd::install().await?,
        },
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Webhook { action } => match action {
            WebhookAction::Serve { addr, tls_cert, tls_key } => {
                commands::webhook::serve(&addr, &tls_cert, &tls_key).await?
            }
            WebhookAction::CertGenerate { service_name, namespace, output_dir } => {
                commands::webhook::generate_certs(&service_name, &namespace, &output_dir)?
            }
            WebhookAction::InstallConfig { service_name, namespace, ca_bundle_path } => {
                commands::webhook::install_config(&service_name, &namespace, &ca_bundle_path)?
            }
        },
    }

    Ok(())
}
