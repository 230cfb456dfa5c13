//! Reconcilers for managed resources
//!
//! This module contains the business logic that converges the cluster
//! toward the desired state for one key at a time:
//! - Computing the desired Ingress for a Service
//! - Creating, replacing or deleting the Ingress accordingly

pub mod desired;
mod ingress;

use async_trait::async_trait;

pub use desired::{IngressTemplate, ENABLE_ANNOTATION};
pub use ingress::{IngressReconciler, Outcome};

use crate::error::Result;

/// Converges the state addressed by one queue key
#[async_trait]
pub trait Reconcile<K>: Send + Sync + 'static {
    async fn reconcile(&self, key: &K) -> Result<()>;
}
