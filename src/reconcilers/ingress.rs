//! Ingress reconciler
//!
//! Handles the convergence of one Service's Ingress:
//! - Cascading cleanup when the Service is gone
//! - Creation when the Ingress is missing
//! - Replacement (delete then create) when the spec drifted

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use tracing::{debug, info, instrument};

use super::desired::{self, IngressTemplate};
use super::Reconcile;
use crate::adapters::{IngressClient, Lister};
use crate::error::{Error, Result};
use crate::key::ObjectKey;
use crate::metrics;

/// What a reconcile pass did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The Service is gone; its Ingress was deleted or already absent
    CleanedUp,
    /// The Service does not carry the enable annotation
    NotExposed,
    /// The Ingress was missing and has been created
    Created,
    /// The Ingress already had the desired spec
    Unchanged,
    /// The Ingress drifted and was deleted and recreated
    Replaced,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::CleanedUp => "cleaned_up",
            Outcome::NotExposed => "not_exposed",
            Outcome::Created => "created",
            Outcome::Unchanged => "unchanged",
            Outcome::Replaced => "replaced",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives the Ingress of each Service key toward its desired state
pub struct IngressReconciler {
    services: Arc<dyn Lister<Service>>,
    ingresses: Arc<dyn Lister<Ingress>>,
    client: Arc<dyn IngressClient>,
    template: IngressTemplate,
}

impl IngressReconciler {
    pub fn new(
        services: Arc<dyn Lister<Service>>,
        ingresses: Arc<dyn Lister<Ingress>>,
        client: Arc<dyn IngressClient>,
        template: IngressTemplate,
    ) -> Self {
        Self {
            services,
            ingresses,
            client,
            template,
        }
    }

    /// Converge the Ingress for `key` and report what was done
    #[instrument(skip_all, fields(key = %key))]
    pub async fn reconcile_key(&self, key: &ObjectKey) -> Result<Outcome> {
        if key.namespace.is_empty() {
            return Err(Error::InvalidKey(key.to_string()));
        }
        let ObjectKey { namespace, name } = key;

        let Some(service) = self.services.get(namespace, name)? else {
            self.delete_if_present(namespace, name).await?;
            info!("Service is gone, Ingress cleaned up");
            return Ok(Outcome::CleanedUp);
        };

        if !desired::is_exposed(&service) {
            debug!("Service not annotated for exposure, skipping");
            return Ok(Outcome::NotExposed);
        }

        let desired = desired::build(&self.template, &service);

        let Some(existing) = self.ingresses.get(namespace, name)? else {
            self.create(&desired).await?;
            info!("Created Ingress");
            return Ok(Outcome::Created);
        };

        if desired::spec_matches(&desired, &existing) {
            debug!("Ingress up to date");
            return Ok(Outcome::Unchanged);
        }

        info!("Ingress spec drifted, replacing");
        self.delete_if_present(namespace, name).await?;
        self.create(&desired).await?;
        Ok(Outcome::Replaced)
    }

    async fn delete_if_present(&self, namespace: &str, name: &str) -> Result<()> {
        match self.client.delete(namespace, name).await {
            Err(e) if e.is_not_found() => {
                debug!("Ingress already absent");
                Ok(())
            }
            other => other,
        }
    }

    async fn create(&self, ingress: &Ingress) -> Result<()> {
        match self.client.create(ingress).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => {
                // The cache lags behind; the next pass compares specs again.
                debug!("Ingress already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Reconcile<ObjectKey> for IngressReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        let _timer = metrics::RECONCILE_DURATION
            .with_label_values(&["Service"])
            .start_timer();

        match self.reconcile_key(key).await {
            Ok(outcome) => {
                metrics::RECONCILIATIONS
                    .with_label_values(&[outcome.as_str()])
                    .inc();
                debug!(key = %key, outcome = %outcome, "Reconciled Service");
                Ok(())
            }
            Err(e) => {
                metrics::RECONCILIATIONS.with_label_values(&["error"]).inc();
                metrics::RECONCILIATION_ERRORS
                    .with_label_values(&["Service"])
                    .inc();
                Err(e)
            }
        }
    }
}
