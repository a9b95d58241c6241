//! Mutating admission review handler.
//!
//! Implements the AdmissionReview wire contract around an injected
//! [`Mutator`]: decode the review, let the mutator decide and collect
//! patches, encode the verdict. The handler is stateless across requests.
//!
//! Failures before a verdict exists (undecodable body, mutator error) are
//! answered with 503 and a plain-text reason, which the API server treats
//! as "webhook unavailable" and resolves with its own failure policy. A
//! mutator error is never turned into a denial.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use kube::core::admission::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, SerializePatchError,
};
use kube::core::{DynamicObject, Status};
use tracing::{error, info, warn};

use crate::health::{HealthState, ReviewOutcome};
use crate::webhooks::patch::Patches;

/// Outcome of a decision callback
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Reject with a human-readable reason. An empty reason allows.
    Deny(String),
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny(reason.into())
    }

    /// The deny reason, if this decision rejects the request
    pub fn deny_reason(&self) -> Option<&str> {
        match self {
            Decision::Deny(reason) if !reason.is_empty() => Some(reason),
            _ => None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.deny_reason().is_none()
    }
}

/// Per-request decision callback, the webhook's only extension point.
///
/// Called once per admission request with an empty patch list to append to.
/// The future is dropped if the API server disconnects, which cancels any
/// outstanding calls the mutator is awaiting.
#[async_trait]
pub trait Mutator: Send + Sync {
    async fn mutate(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        patches: &mut Patches,
    ) -> crate::Result<Decision>;
}

/// Shared state for webhook handlers
pub struct WebhookState {
    pub mutator: Arc<dyn Mutator>,
    pub health_state: Option<Arc<HealthState>>,
}

impl WebhookState {
    pub fn new(mutator: Arc<dyn Mutator>, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            mutator,
            health_state,
        }
    }

    fn record_decode_error(&self, started: Instant) {
        if let Some(ref health) = self.health_state {
            health
                .metrics
                .record_decode_error(started.elapsed().as_secs_f64());
        }
    }

    fn record(&self, kind: &str, outcome: ReviewOutcome, patches: usize, started: Instant) {
        if let Some(ref health) = self.health_state {
            health.metrics.record_review(
                kind,
                outcome,
                patches,
                started.elapsed().as_secs_f64(),
            );
        }
    }
}

/// Create the webhook router.
///
/// Every path and method is routed to the review handler; the API server
/// addresses the webhook by Service, not by route.
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new().fallback(review).with_state(state)
}

/// Convenience for building the router straight from a mutator
pub fn webhook_router(
    mutator: Arc<dyn Mutator>,
    health_state: Option<Arc<HealthState>>,
) -> Router {
    create_webhook_router(Arc::new(WebhookState::new(mutator, health_state)))
}

/// Answer a request that could not be turned into a verdict
fn unavailable(message: String) -> Response {
    error!(error = %message, "Failed to handle mutating admission review");
    (StatusCode::SERVICE_UNAVAILABLE, message).into_response()
}

/// `reason` reported on a denied verdict
pub const DENY_STATUS_REASON: &str = "BadRequest";

/// Build the review returned to the API server.
///
/// Patches are attached only to an allowed verdict, and only when there is
/// at least one; an empty list leaves `patch` and `patchType` absent. A
/// denied verdict carries a `Failure` status with the deny message.
pub fn build_review(
    request: &AdmissionRequest<DynamicObject>,
    decision: &Decision,
    patches: Patches,
) -> Result<AdmissionReview<DynamicObject>, SerializePatchError> {
    let response = AdmissionResponse::from(request);
    let response = match decision.deny_reason() {
        Some(reason) => {
            let mut response = response.deny(reason);
            response.result = Status::failure(reason, DENY_STATUS_REASON);
            response
        }
        None if patches.is_empty() => response,
        None => response.with_patch(patches.into_patch())?,
    };
    Ok(response.into_review())
}

/// Mutating admission review handler
async fn review(State(state): State<Arc<WebhookState>>, body: Bytes) -> Response {
    let started = Instant::now();

    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            state.record_decode_error(started);
            return unavailable(format!("failed to decode AdmissionReview: {}", e));
        }
    };
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            state.record_decode_error(started);
            return unavailable(format!("failed to decode AdmissionReview: {}", e));
        }
    };

    let uid = request.uid.clone();
    let kind = request.kind.kind.clone();
    info!(
        uid = %uid,
        kind = %kind,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        envelope = %String::from_utf8_lossy(&body),
        "Received admission review"
    );

    let mut patches = Patches::new();
    let decision = match state.mutator.mutate(&request, &mut patches).await {
        Ok(decision) => decision,
        Err(e) => {
            state.record(&kind, ReviewOutcome::Error, 0, started);
            return unavailable(format!("failed to execute handler: {}", e));
        }
    };

    if patches.is_empty() {
        info!(uid = %uid, "Patches: -NONE-");
    } else {
        match patches.to_json() {
            Ok(json) => info!(uid = %uid, patches = %json, "Patches"),
            Err(e) => warn!(uid = %uid, error = %e, "Failed to render patches for logging"),
        }
    }

    let patch_count = if decision.is_allowed() {
        patches.len()
    } else {
        0
    };
    let verdict = match build_review(&request, &decision, patches) {
        Ok(verdict) => verdict,
        Err(e) => {
            state.record(&kind, ReviewOutcome::Error, 0, started);
            return unavailable(format!("failed to marshal patches: {}", e));
        }
    };
    let body = match serde_json::to_vec(&verdict) {
        Ok(body) => body,
        Err(e) => {
            state.record(&kind, ReviewOutcome::Error, 0, started);
            return unavailable(format!("failed to marshal response json: {}", e));
        }
    };

    match decision.deny_reason() {
        Some(reason) => {
            warn!(uid = %uid, kind = %kind, reason = %reason, "Admission request denied");
            state.record(&kind, ReviewOutcome::Denied, 0, started);
        }
        None => {
            info!(uid = %uid, kind = %kind, patches = patch_count, "Admission request allowed");
            state.record(&kind, ReviewOutcome::Allowed, patch_count, started);
        }
    }

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            ),
            (header::CONTENT_LENGTH, HeaderValue::from(body.len())),
        ],
        body,
    )
        .into_response()
}
