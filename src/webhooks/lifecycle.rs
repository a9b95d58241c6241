//! TLS listener lifecycle for the webhook.
//!
//! [`WebhookServer::run`] serves until SIGINT/SIGTERM, then drains in-flight
//! reviews for at most the configured grace period. Whichever comes first,
//! a listener failure or a shutdown signal, decides the result: a failure
//! is returned as-is, a signal is a normal exit.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::signal;
use tracing::{info, warn};

use crate::health::HealthState;

/// Extra time allowed past the grace period for the server future to unwind
const SHUTDOWN_SLACK: Duration = Duration::from_millis(500);

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Install the process-wide rustls crypto provider.
///
/// Safe to call repeatedly; only the first call has an effect.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// The webhook's TLS listener and its shutdown policy
pub struct WebhookServer {
    router: Router,
    listen_addr: SocketAddr,
    shutdown_grace_period: Duration,
    handle: Handle,
    health_state: Option<Arc<HealthState>>,
}

impl WebhookServer {
    pub fn new(router: Router, listen_addr: SocketAddr, shutdown_grace_period: Duration) -> Self {
        Self {
            router,
            listen_addr,
            shutdown_grace_period,
            handle: Handle::new(),
            health_state: None,
        }
    }

    /// Report readiness through the health server while serving
    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }

    /// Handle to the listener, e.g. to await the bound address
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Serve until SIGINT or SIGTERM.
    ///
    /// # Arguments
    /// * `cert_path` - Path to TLS certificate file (PEM format)
    /// * `key_path` - Path to TLS private key file (PEM format)
    pub async fn run(self, cert_path: &Path, key_path: &Path) -> Result<(), WebhookError> {
        self.run_until(cert_path, key_path, shutdown_signal()).await
    }

    /// Serve until `shutdown` completes
    pub async fn run_until<F>(
        self,
        cert_path: &Path,
        key_path: &Path,
        shutdown: F,
    ) -> Result<(), WebhookError>
    where
        F: Future<Output = ()>,
    {
        install_crypto_provider();

        let config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

        let readiness = {
            let handle = self.handle.clone();
            let health_state = self.health_state.clone();
            tokio::spawn(async move {
                if let Some(addr) = handle.listening().await {
                    info!(addr = %addr, "Webhook server listening with TLS");
                    if let Some(state) = health_state {
                        state.set_ready(true).await;
                    }
                }
            })
        };

        let serve = axum_server::bind_rustls(self.listen_addr, config)
            .handle(self.handle.clone())
            .serve(self.router.into_make_service());
        tokio::pin!(serve);

        let result = tokio::select! {
            result = &mut serve => {
                result.map_err(|e| WebhookError::Server(e.to_string()))
            }
            _ = shutdown => {
                info!(
                    grace_period_secs = self.shutdown_grace_period.as_secs_f64(),
                    "Shutdown signal received, draining in-flight reviews"
                );
                if let Some(ref state) = self.health_state {
                    state.set_ready(false).await;
                }
                self.handle.graceful_shutdown(Some(self.shutdown_grace_period));

                match tokio::time::timeout(self.shutdown_grace_period + SHUTDOWN_SLACK, &mut serve).await {
                    Ok(Ok(())) => info!("Webhook server stopped"),
                    Ok(Err(e)) => warn!(error = %e, "Webhook server errored while stopping"),
                    Err(_) => warn!("Grace period elapsed, abandoning in-flight reviews"),
                }
                Ok(())
            }
        };

        readiness.abort();
        result
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them.
#[allow(clippy::expect_used)]
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
