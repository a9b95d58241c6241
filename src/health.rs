//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 while the webhook listener is serving)
//! - `/metrics` - Prometheus metrics endpoint
//!
//! Served over plain HTTP on a separate port so probes do not depend on the
//! webhook's TLS identity.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// How a single admission review ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewOutcome {
    Allowed,
    Denied,
    Error,
}

impl ReviewOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ReviewOutcome::Allowed => "allowed",
            ReviewOutcome::Denied => "denied",
            ReviewOutcome::Error => "error",
        }
    }
}

/// Labels for admission review metrics (resource kind + outcome)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReviewLabels {
    pub kind: String,
    pub outcome: String,
}

impl EncodeLabelSet for ReviewLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the webhook
pub struct Metrics {
    /// Admission reviews by kind and outcome
    pub admission_reviews_total: Family<ReviewLabels, Counter>,
    /// Patch operations returned to the API server
    pub admission_patches_total: Counter,
    /// Time spent handling a review, decode to encode
    pub admission_duration_seconds: Histogram,
    /// Expiry of the served certificate (Unix epoch seconds)
    pub identity_not_after_seconds: Gauge,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let admission_reviews_total = Family::<ReviewLabels, Counter>::default();
        registry.register(
            "autoops_webhook_admission_reviews",
            "Total number of admission reviews handled",
            admission_reviews_total.clone(),
        );

        let admission_patches_total = Counter::default();
        registry.register(
            "autoops_webhook_admission_patches",
            "Total number of JSON patch operations returned",
            admission_patches_total.clone(),
        );

        let admission_duration_seconds = Histogram::new(exponential_buckets(0.0005, 2.0, 14));
        registry.register(
            "autoops_webhook_admission_duration_seconds",
            "Duration of admission review handling in seconds",
            admission_duration_seconds.clone(),
        );

        let identity_not_after_seconds = Gauge::default();
        registry.register(
            "autoops_webhook_identity_not_after_seconds",
            "Expiry of the served TLS certificate as a Unix timestamp",
            identity_not_after_seconds.clone(),
        );

        Self {
            admission_reviews_total,
            admission_patches_total,
            admission_duration_seconds,
            identity_not_after_seconds,
            registry,
        }
    }

    /// Record a finished admission review
    pub fn record_review(
        &self,
        kind: &str,
        outcome: ReviewOutcome,
        patches: usize,
        duration_secs: f64,
    ) {
        let labels = ReviewLabels {
            kind: kind.to_string(),
            outcome: outcome.as_str().to_string(),
        };
        self.admission_reviews_total.get_or_create(&labels).inc();
        self.admission_patches_total.inc_by(patches as u64);
        self.admission_duration_seconds.observe(duration_secs);
    }

    /// Record a review that failed before its kind was known
    pub fn record_decode_error(&self, duration_secs: f64) {
        self.record_review("unknown", ReviewOutcome::Error, 0, duration_secs);
    }

    /// Publish the expiry of the certificate being served
    pub fn set_identity_not_after(&self, not_after: i64) {
        self.identity_not_after_seconds.set(not_after);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the webhook listener is serving
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the webhook as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the webhook is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the TLS listener is bound, and
/// again once shutdown has begun.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on the given address
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    info!(addr = %addr, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
