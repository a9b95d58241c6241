//! Runtime configuration, resolved once at startup.
//!
//! Everything comes from environment variables set on the Deployment. The
//! namespace falls back to the service account's namespace file, read once
//! here and carried in [`Config`] rather than cached globally.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Service account file holding the pod's namespace
pub const SERVICE_ACCOUNT_NAMESPACE_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Default path to the webhook TLS certificate
pub const DEFAULT_CERT_PATH: &str = "/autoops-data/admission-server/tls.crt";
/// Default path to the webhook TLS private key
pub const DEFAULT_KEY_PATH: &str = "/autoops-data/admission-server/tls.key";
/// Default TLS listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:443";
/// Default health/metrics listen address
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";
/// Default grace period for in-flight reviews during shutdown
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD_SECS: u64 = 10;
/// Default Service name fronting the webhook
pub const DEFAULT_SERVICE_NAME: &str = "autoops-webhook";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(String),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Which decision callback the binary wires into the handler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutatorKind {
    /// Pin LoadBalancer Services to the namespace's internal subnet
    InternalLoadBalancer,
    /// Allow everything, patch nothing
    Noop,
}

impl FromStr for MutatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qcloud-internal-lb" => Ok(MutatorKind::InternalLoadBalancer),
            "noop" => Ok(MutatorKind::Noop),
            other => Err(format!(
                "unknown mutator {:?}, expected qcloud-internal-lb or noop",
                other
            )),
        }
    }
}

/// Identity bootstrap settings, present when the webhook manages its own certificate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Secret holding the identity record
    pub secret_name: String,
    /// Leaf DNS names, primary hostname first
    pub dns_names: Vec<String>,
}

/// Webhook process configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Namespace the webhook runs in
    pub namespace: String,
    /// TLS listen address
    pub listen_addr: SocketAddr,
    /// Health/metrics listen address
    pub health_addr: SocketAddr,
    /// TLS certificate file
    pub cert_path: PathBuf,
    /// TLS private key file
    pub key_path: PathBuf,
    /// How long in-flight reviews may run after a shutdown signal
    pub shutdown_grace_period: Duration,
    /// Decision callback selection
    pub mutator: MutatorKind,
    /// Identity bootstrap, `None` when the TLS files are provisioned externally
    pub identity: Option<IdentityConfig>,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), read_service_account_namespace)
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// `namespace_fallback` is only called when `POD_NAMESPACE` is unset.
    pub fn from_lookup<F, N>(lookup: F, namespace_fallback: N) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        N: FnOnce() -> Result<String, ConfigError>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let namespace = match var("POD_NAMESPACE") {
            Some(ns) => ns.trim().to_string(),
            None => namespace_fallback()?,
        };

        let listen_addr = parse_var(
            "WEBHOOK_LISTEN_ADDR",
            var("WEBHOOK_LISTEN_ADDR"),
            DEFAULT_LISTEN_ADDR,
        )?;
        let health_addr = parse_var(
            "HEALTH_LISTEN_ADDR",
            var("HEALTH_LISTEN_ADDR"),
            DEFAULT_HEALTH_ADDR,
        )?;
        let grace_secs: u64 = parse_var(
            "SHUTDOWN_GRACE_PERIOD_SECS",
            var("SHUTDOWN_GRACE_PERIOD_SECS"),
            &DEFAULT_SHUTDOWN_GRACE_PERIOD_SECS.to_string(),
        )?;
        let mutator = parse_var(
            "WEBHOOK_MUTATOR",
            var("WEBHOOK_MUTATOR"),
            "qcloud-internal-lb",
        )?;

        let service_name =
            var("WEBHOOK_SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());
        let identity = var("WEBHOOK_SECRET_NAME").map(|secret_name| IdentityConfig {
            secret_name,
            dns_names: service_dns_names(&service_name, &namespace),
        });

        Ok(Self {
            namespace,
            listen_addr,
            health_addr,
            cert_path: var("WEBHOOK_CERT_PATH")
                .unwrap_or_else(|| DEFAULT_CERT_PATH.to_string())
                .into(),
            key_path: var("WEBHOOK_KEY_PATH")
                .unwrap_or_else(|| DEFAULT_KEY_PATH.to_string())
                .into(),
            shutdown_grace_period: Duration::from_secs(grace_secs),
            mutator,
            identity,
        })
    }
}

fn parse_var<T>(name: &'static str, value: Option<String>, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = value.unwrap_or_else(|| default.to_string());
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

/// Read the pod namespace from the mounted service account
pub fn read_service_account_namespace() -> Result<String, ConfigError> {
    let raw = std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_PATH).map_err(|source| {
        ConfigError::Io {
            path: SERVICE_ACCOUNT_NAMESPACE_PATH.to_string(),
            source,
        }
    })?;
    let namespace = raw.trim();
    if namespace.is_empty() {
        return Err(ConfigError::Missing(
            "POD_NAMESPACE and service account namespace are both empty".to_string(),
        ));
    }
    Ok(namespace.to_string())
}

/// DNS names for the leaf certificate of a webhook Service.
///
/// The first name is the certificate CN. It is repeated among the SANs
/// because TLS clients match on SANs only.
pub fn service_dns_names(service: &str, namespace: &str) -> Vec<String> {
    vec![
        format!("{}.{}.svc", service, namespace),
        service.to_string(),
        format!("{}.{}", service, namespace),
        format!("{}.{}.svc", service, namespace),
        format!("{}.{}.svc.cluster.local", service, namespace),
    ]
}
