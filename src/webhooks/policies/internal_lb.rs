//! Internal load balancer policy for Tencent Cloud (qcloud) clusters.
//!
//! Opt-in per namespace: when a namespace carries the subnet annotation,
//! every `LoadBalancer` Service created or updated in it is annotated so the
//! cloud controller provisions an internal load balancer in that subnet,
//! optionally in direct-access mode.
//!
//! Never denies.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::core::DynamicObject;
use kube::core::admission::AdmissionRequest;
use kube::{Api, Client};
use serde_json::{Value, json};
use tracing::debug;

use crate::webhooks::{Decision, Mutator, Patches, pointer};

/// Namespace annotation naming the subnet for internal load balancers
pub const ANNOTATION_KEY_SUBNET: &str = "autoops.enforce-qcloud-internal-lb/subnet";
/// Namespace annotation enabling direct access (truthy values only)
pub const ANNOTATION_KEY_DIRECT: &str = "autoops.enforce-qcloud-internal-lb/direct";

/// Service annotation read by the qcloud cloud controller for the internal subnet
pub const SERVICE_ANNOTATION_SUBNET: &str =
    "service.kubernetes.io/qcloud-loadbalancer-internal-subnetid";
/// Service annotation read by the qcloud cloud controller for direct access
pub const SERVICE_ANNOTATION_DIRECT: &str = "service.cloud.tencent.com/direct-access";

const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";

/// Source of namespace annotations
#[async_trait]
pub trait NamespaceLookup: Send + Sync {
    /// Annotations of the namespace, empty if it has none
    async fn annotations(&self, namespace: &str) -> crate::Result<BTreeMap<String, String>>;
}

/// [`NamespaceLookup`] against the Kubernetes API
#[derive(Clone)]
pub struct KubeNamespaces {
    api: Api<Namespace>,
}

impl KubeNamespaces {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NamespaceLookup for KubeNamespaces {
    async fn annotations(&self, namespace: &str) -> crate::Result<BTreeMap<String, String>> {
        let ns = self.api.get(namespace).await?;
        Ok(ns.metadata.annotations.unwrap_or_default())
    }
}

/// Boolean parsing with the same accepted spellings as Go's `strconv.ParseBool`;
/// anything unparseable counts as false.
fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "t" | "T" | "TRUE" | "true" | "True")
}

/// Pins `LoadBalancer` Services to the namespace's internal subnet
pub struct InternalLoadBalancer<L> {
    namespaces: L,
}

impl<L: NamespaceLookup> InternalLoadBalancer<L> {
    pub fn new(namespaces: L) -> Self {
        Self { namespaces }
    }
}

#[async_trait]
impl<L: NamespaceLookup> Mutator for InternalLoadBalancer<L> {
    async fn mutate(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        patches: &mut Patches,
    ) -> crate::Result<Decision> {
        if !request.kind.group.is_empty() || request.kind.kind != "Service" {
            return Ok(Decision::Allow);
        }
        let (Some(object), Some(namespace)) = (&request.object, &request.namespace) else {
            return Ok(Decision::Allow);
        };

        let service: Service = serde_json::from_value(serde_json::to_value(object)?)?;
        let service_type = service.spec.as_ref().and_then(|s| s.type_.as_deref());
        if service_type != Some(SERVICE_TYPE_LOAD_BALANCER) {
            return Ok(Decision::Allow);
        }

        let ns_annotations = self.namespaces.annotations(namespace).await?;
        let Some(subnet) = ns_annotations
            .get(ANNOTATION_KEY_SUBNET)
            .filter(|s| !s.is_empty())
        else {
            debug!(namespace = %namespace, "Namespace has no internal subnet, skipping");
            return Ok(Decision::Allow);
        };

        if service.metadata.annotations.is_none() {
            patches.add(pointer(["metadata", "annotations"]), json!({}));
        }
        patches.add(
            pointer(["metadata", "annotations", SERVICE_ANNOTATION_SUBNET]),
            Value::String(subnet.clone()),
        );
        let direct = ns_annotations
            .get(ANNOTATION_KEY_DIRECT)
            .is_some_and(|v| parse_bool(v));
        if direct {
            patches.add(
                pointer(["metadata", "annotations", SERVICE_ANNOTATION_DIRECT]),
                json!("true"),
            );
        }

        Ok(Decision::Allow)
    }
}
