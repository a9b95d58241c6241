//! autoops-webhook - mutating admission webhook for AutoOps clusters.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads configuration and creates the Kubernetes client
//! - Bootstraps the TLS identity when the webhook manages its own certificate
//! - Starts the health server and the TLS webhook listener

use std::process::ExitCode;
use std::sync::Arc;

use kube::Client;
use tracing::{error, info, warn};

use autoops_webhook::config::Config;
use autoops_webhook::health::{HealthState, run_health_server};
use autoops_webhook::identity::{IdentityOptions, SecretStore, ensure_identity};
use autoops_webhook::pki::CertificateInfo;
use autoops_webhook::webhooks::policies::mutator_for;
use autoops_webhook::webhooks::{WebhookServer, install_crypto_provider, webhook_router};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(()) => {
            info!("exited");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "exited with error");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("autoops_webhook=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    install_crypto_provider();

    let config = Config::from_env()?;
    info!(
        namespace = %config.namespace,
        listen_addr = %config.listen_addr,
        mutator = ?config.mutator,
        "Starting autoops-webhook"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    if let Some(identity) = &config.identity {
        let store = SecretStore::new(client.clone());
        let opts = IdentityOptions {
            ca: None,
            dns_names: identity.dns_names.clone(),
        };
        let record =
            ensure_identity(&store, &config.namespace, &identity.secret_name, &opts).await?;
        record
            .write_files(&config.cert_path, &config.key_path)
            .await?;
        info!(secret = %identity.secret_name, "TLS identity ready");
    }

    let health_state = Arc::new(HealthState::new());

    match tokio::fs::read_to_string(&config.cert_path)
        .await
        .map_err(autoops_webhook::Error::from)
        .and_then(|pem| CertificateInfo::from_pem(&pem))
    {
        Ok(cert) => {
            info!(
                common_name = %cert.common_name,
                dns_names = ?cert.dns_names,
                not_after = cert.not_after,
                "Serving certificate"
            );
            health_state.metrics.set_identity_not_after(cert.not_after);
        }
        Err(e) => warn!(error = %e, "Could not inspect serving certificate"),
    }

    // Start health server immediately so liveness works while TLS comes up
    let health_handle = {
        let health_state = health_state.clone();
        let addr = config.health_addr;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, addr).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let mutator = mutator_for(config.mutator, client);
    let router = webhook_router(mutator, Some(health_state.clone()));

    let result = WebhookServer::new(router, config.listen_addr, config.shutdown_grace_period)
        .with_health_state(health_state)
        .run(&config.cert_path, &config.key_path)
        .await;

    health_handle.abort();
    result?;
    Ok(())
}
