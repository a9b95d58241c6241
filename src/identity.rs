//! Persisted TLS identity for the webhook.
//!
//! The identity (leaf certificate + key, plus the CA that signed it) lives in
//! a single `kubernetes.io/tls` Secret so it survives restarts. Retrieval is
//! get-or-create: the first replica to start mints and stores the material,
//! every later start (and every replica that loses the creation race) reads
//! it back. An existing record is never overwritten.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use kube::api::{Api, ObjectMeta, PostParams};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pki::{self, IssuedCertificate};

/// Secret key holding the leaf certificate
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Secret key holding the leaf private key
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
/// Secret key holding the issuing CA certificate
pub const CA_CERT_KEY: &str = "ca.crt";
/// Secret type for TLS material
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

/// At-rest identity: a certificate with its private key, and the CA that issued it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Leaf certificate PEM
    pub cert_pem: String,
    /// Leaf private key PEM
    pub key_pem: String,
    /// Issuing CA certificate PEM, when known
    pub ca_pem: Option<String>,
}

impl IdentityRecord {
    /// Reject records missing the certificate or the key.
    ///
    /// An incomplete record is an operator problem: it must be deleted to
    /// force regeneration, never silently replaced.
    pub fn verify_complete(self) -> Result<Self> {
        if self.cert_pem.is_empty() {
            return Err(Error::Integrity(format!("missing key: {}", TLS_CERT_KEY)));
        }
        if self.key_pem.is_empty() {
            return Err(Error::Integrity(format!(
                "missing key: {}",
                TLS_PRIVATE_KEY_KEY
            )));
        }
        Ok(self)
    }

    /// Write the certificate and key to the files the TLS listener loads.
    pub async fn write_files(&self, cert_path: &Path, key_path: &Path) -> Result<()> {
        for path in [cert_path, key_path] {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(cert_path, self.cert_pem.as_bytes()).await?;
        tokio::fs::write(key_path, self.key_pem.as_bytes()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        debug!(
            cert_path = %cert_path.display(),
            key_path = %key_path.display(),
            "Wrote TLS identity files"
        );
        Ok(())
    }
}

/// An existing CA to issue the leaf from
#[derive(Clone, Debug)]
pub struct CaMaterial {
    /// CA certificate, PEM encoded
    pub cert_pem: String,
    /// CA private key, PEM encoded
    pub key_pem: String,
}

/// What to mint when no identity record exists yet
#[derive(Clone, Debug)]
pub struct IdentityOptions {
    /// Issue from this CA instead of minting a fresh one
    pub ca: Option<CaMaterial>,
    /// Leaf DNS names, primary hostname first
    pub dns_names: Vec<String>,
}

/// Mint identity material without touching any store
pub fn mint_identity(opts: &IdentityOptions) -> Result<IdentityRecord> {
    let ca = match &opts.ca {
        Some(ca) => IssuedCertificate {
            cert_pem: ca.cert_pem.clone(),
            key_pem: ca.key_pem.clone(),
        },
        None => pki::issue_root_ca()?,
    };
    let leaf = pki::issue_leaf(&opts.dns_names, &ca.cert_pem, &ca.key_pem)?;
    Ok(IdentityRecord {
        cert_pem: leaf.cert_pem,
        key_pem: leaf.key_pem,
        ca_pem: Some(ca.cert_pem),
    })
}

/// Result of a create-if-absent call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// This caller created the record
    Created(IdentityRecord),
    /// Another caller created it first
    AlreadyExists,
}

/// Key-value store for identity records, addressed by namespace and name
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fetch a record, `None` if absent
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<IdentityRecord>>;

    /// Create a record unless one already exists
    async fn create(
        &self,
        namespace: &str,
        name: &str,
        record: &IdentityRecord,
    ) -> Result<CreateOutcome>;
}

/// Return the stored identity at (namespace, name), creating it first if absent.
///
/// A create that loses to a concurrent creator is resolved with exactly one
/// follow-up read, so concurrent callers converge on the single stored record.
pub async fn ensure_identity<S>(
    store: &S,
    namespace: &str,
    name: &str,
    opts: &IdentityOptions,
) -> Result<IdentityRecord>
where
    S: IdentityStore + ?Sized,
{
    if let Some(record) = store.get(namespace, name).await? {
        debug!(namespace = %namespace, name = %name, "Reusing stored TLS identity");
        return record.verify_complete();
    }

    info!(namespace = %namespace, name = %name, "No TLS identity found, minting a new one");
    let minted = mint_identity(opts)?;

    match store.create(namespace, name, &minted).await? {
        CreateOutcome::Created(record) => {
            info!(namespace = %namespace, name = %name, "Stored new TLS identity");
            record.verify_complete()
        }
        CreateOutcome::AlreadyExists => {
            warn!(
                namespace = %namespace,
                name = %name,
                "TLS identity was created concurrently, using the stored one"
            );
            store
                .get(namespace, name)
                .await?
                .ok_or_else(|| {
                    Error::UpstreamUnavailable(format!(
                        "identity {}/{} reported as existing but could not be read",
                        namespace, name
                    ))
                })?
                .verify_complete()
        }
    }
}

/// Build the Secret that persists a record
pub fn secret_for_record(namespace: &str, name: &str, record: &IdentityRecord) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        TLS_CERT_KEY.to_string(),
        ByteString(record.cert_pem.clone().into_bytes()),
    );
    data.insert(
        TLS_PRIVATE_KEY_KEY.to_string(),
        ByteString(record.key_pem.clone().into_bytes()),
    );
    if let Some(ca) = &record.ca_pem {
        data.insert(CA_CERT_KEY.to_string(), ByteString(ca.clone().into_bytes()));
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                "autoops-webhook".to_string(),
            )])),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE_TLS.to_string()),
        immutable: Some(true),
        data: Some(data),
        ..Default::default()
    }
}

fn secret_field(secret: &Secret, key: &str) -> Result<Option<String>> {
    let Some(bytes) = secret.data.as_ref().and_then(|data| data.get(key)) else {
        return Ok(None);
    };
    String::from_utf8(bytes.0.clone())
        .map(Some)
        .map_err(|e| Error::Decode(format!("secret key {} is not UTF-8: {}", key, e)))
}

/// Read a record out of a Secret.
///
/// Missing fields come back empty; [`IdentityRecord::verify_complete`]
/// decides whether that is acceptable.
pub fn record_from_secret(secret: &Secret) -> Result<IdentityRecord> {
    Ok(IdentityRecord {
        cert_pem: secret_field(secret, TLS_CERT_KEY)?.unwrap_or_default(),
        key_pem: secret_field(secret, TLS_PRIVATE_KEY_KEY)?.unwrap_or_default(),
        ca_pem: secret_field(secret, CA_CERT_KEY)?,
    })
}

/// [`IdentityStore`] backed by Kubernetes Secrets
#[derive(Clone)]
pub struct SecretStore {
    client: Client,
}

impl SecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl IdentityStore for SecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<IdentityRecord>> {
        match self.api(namespace).get_opt(name).await? {
            Some(secret) => record_from_secret(&secret).map(Some),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        record: &IdentityRecord,
    ) -> Result<CreateOutcome> {
        let secret = secret_for_record(namespace, name, record);
        match self
            .api(namespace)
            .create(&PostParams::default(), &secret)
            .await
        {
            Ok(created) => record_from_secret(&created).map(CreateOutcome::Created),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }
}
