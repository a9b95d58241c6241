//! Test fixtures and builder patterns for admission reviews and TLS identities.

use std::path::{Path, PathBuf};

use autoops_webhook::identity::{IdentityOptions, IdentityRecord, mint_identity};
use serde_json::{Value, json};
use tempfile::TempDir;

/// Default request UID used by fixtures
pub const TEST_UID: &str = "705ab4f5-6393-11e8-b7cc-42010a800002";

/// Builder for AdmissionReview request envelopes.
///
/// # Example
/// ```
/// let body = AdmissionReviewBuilder::service("web", "team-a")
///     .service_type("LoadBalancer")
///     .to_body();
/// ```
#[derive(Clone, Debug)]
pub struct AdmissionReviewBuilder {
    uid: String,
    group: String,
    version: String,
    kind: String,
    resource: String,
    name: String,
    namespace: Option<String>,
    operation: String,
    object: Option<Value>,
}

impl AdmissionReviewBuilder {
    /// A review for an arbitrary core/v1 object
    pub fn new(kind: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            uid: TEST_UID.to_string(),
            group: String::new(),
            version: "v1".to_string(),
            kind: kind.into(),
            resource: resource.into(),
            name: "test".to_string(),
            namespace: None,
            operation: "CREATE".to_string(),
            object: None,
        }
    }

    /// A review creating a ClusterIP Service
    pub fn service(name: &str, namespace: &str) -> Self {
        Self::new("Service", "services")
            .name(name)
            .namespace(namespace)
            .object(service_object(name, namespace, "ClusterIP", None))
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn object(mut self, object: Value) -> Self {
        self.object = Some(object);
        self
    }

    /// Build the envelope as JSON
    pub fn build(self) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": self.uid,
                "kind": {"group": self.group, "version": self.version, "kind": self.kind},
                "resource": {"group": self.group, "version": self.version, "resource": self.resource},
                "name": self.name,
                "namespace": self.namespace,
                "operation": self.operation,
                "userInfo": {"username": "system:admin"},
                "object": self.object,
                "oldObject": null,
                "dryRun": false
            }
        })
    }

    /// Build the envelope as a request body
    pub fn to_body(self) -> Vec<u8> {
        serde_json::to_vec(&self.build()).expect("fixture serializes")
    }
}

/// A Service object as sent inside an admission request
pub fn service_object(
    name: &str,
    namespace: &str,
    service_type: &str,
    annotations: Option<Value>,
) -> Value {
    let mut metadata = json!({"name": name, "namespace": namespace});
    if let Some(annotations) = annotations {
        metadata["annotations"] = annotations;
    }
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": metadata,
        "spec": {"type": service_type, "ports": [{"port": 80, "targetPort": 8080}]}
    })
}

/// The DNS names a webhook fronted by `localhost` is issued for
pub fn localhost_dns_names() -> Vec<String> {
    vec!["localhost".to_string(), "localhost".to_string()]
}

/// A freshly minted identity written to a temporary directory
pub struct TestIdentity {
    pub record: IdentityRecord,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    dir: TempDir,
}

impl TestIdentity {
    /// Mint a CA and a leaf for `dns_names` and write the leaf files
    pub async fn create(dns_names: Vec<String>) -> Self {
        let record = mint_identity(&IdentityOptions {
            ca: None,
            dns_names,
        })
        .expect("identity mints");

        let dir = tempfile::tempdir().expect("tempdir");
        let cert_path = dir.path().join("tls.crt");
        let key_path = dir.path().join("tls.key");
        record
            .write_files(&cert_path, &key_path)
            .await
            .expect("identity files written");

        Self {
            record,
            cert_path,
            key_path,
            dir,
        }
    }

    /// An identity valid for `localhost`
    pub async fn localhost() -> Self {
        Self::create(localhost_dns_names()).await
    }

    /// CA certificate PEM that issued the leaf
    pub fn ca_pem(&self) -> &str {
        self.record.ca_pem.as_deref().expect("minted records carry a CA")
    }

    /// Directory holding the identity files
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
