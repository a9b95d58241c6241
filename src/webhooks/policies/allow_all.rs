//! Inert policy: allow every request unchanged.

use async_trait::async_trait;
use kube::core::DynamicObject;
use kube::core::admission::AdmissionRequest;

use crate::webhooks::{Decision, Mutator, Patches};

/// Allows everything and never patches
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Mutator for AllowAll {
    async fn mutate(
        &self,
        _request: &AdmissionRequest<DynamicObject>,
        _patches: &mut Patches,
    ) -> crate::Result<Decision> {
        Ok(Decision::Allow)
    }
}
