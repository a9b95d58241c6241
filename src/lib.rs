//! autoops-webhook library crate
//!
//! A mutating admission webhook runtime: the AdmissionReview handler, its TLS
//! listener lifecycle, self-managed TLS identity, and the bundled policies.

pub mod config;
pub mod error;
pub mod health;
pub mod identity;
pub mod pki;
pub mod webhooks;

pub use config::Config;
pub use error::{Error, Result};
pub use health::HealthState;
pub use webhooks::{
    Decision, Mutator, Patches, WebhookError, WebhookServer, create_webhook_router,
    webhook_router,
};
