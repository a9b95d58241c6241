//! Decision callbacks shipped with the webhook.
//!
//! The review handler knows nothing about resource kinds;
//! each policy here is one [`Mutator`] implementation, picked at startup.

pub mod allow_all;
pub mod internal_lb;

use std::sync::Arc;

use kube::Client;

use crate::config::MutatorKind;
use crate::webhooks::Mutator;

pub use allow_all::AllowAll;
pub use internal_lb::{InternalLoadBalancer, KubeNamespaces, NamespaceLookup};

/// Build the mutator selected by configuration
pub fn mutator_for(kind: MutatorKind, client: Client) -> Arc<dyn Mutator> {
    match kind {
        MutatorKind::InternalLoadBalancer => {
            Arc::new(InternalLoadBalancer::new(KubeNamespaces::new(client)))
        }
        MutatorKind::Noop => Arc::new(AllowAll),
    }
}
