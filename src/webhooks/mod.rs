//! Mutating admission webhook runtime.
//!
//! - `server`: the AdmissionReview handler around an injected [`Mutator`]
//! - `patch`: JSON Patch accumulation for mutators
//! - `lifecycle`: the TLS listener and graceful shutdown
//! - `policies`: the bundled mutators

mod lifecycle;
pub mod patch;
pub mod policies;
mod server;

pub use lifecycle::{WebhookError, WebhookServer, install_crypto_provider, shutdown_signal};
pub use patch::{Patches, pointer};
pub use server::{
    Decision, Mutator, WebhookState, build_review, create_webhook_router, webhook_router,
};

// Re-export kube-rs admission types for mutators and contract tests
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
