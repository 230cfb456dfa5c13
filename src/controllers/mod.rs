//! Service controller
//!
//! Wires the informers, the event translator, the work queue and the worker
//! pool together around the Ingress reconciler.

mod events;
mod workers;

pub use events::{EventTranslator, Notification};
pub use workers::WorkerPool;

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapters::{Informer, KubeStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::key::ObjectKey;
use crate::metrics;
use crate::queue::WorkQueue;
use crate::reconcilers::{IngressReconciler, Reconcile};

/// Name of the controller's work queue
pub const QUEUE_NAME: &str = "service";

/// Reconcile engine for one parent kind
pub struct Controller<R> {
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<R>,
    config: Config,
}

impl<R> Controller<R>
where
    R: Reconcile<ObjectKey>,
{
    pub fn new(reconciler: R, config: Config) -> Self {
        Self {
            queue: WorkQueue::new(QUEUE_NAME, config.rate_limiter()),
            reconciler: Arc::new(reconciler),
            config,
        }
    }

    pub fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    /// Run until `shutdown` is cancelled
    ///
    /// Starts both informers, waits for their caches to sync, then drains the
    /// queue with the configured number of workers.
    pub async fn run(
        self,
        services: Informer<Service>,
        ingresses: Informer<Ingress>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let translator = EventTranslator::new(self.queue.clone());
        let service_store = services.store();
        let ingress_store = ingresses.store();

        let on_service = translator.clone();
        let service_informer = tokio::spawn(services.run(
            move |event| on_service.on_service(event),
            shutdown.clone(),
        ));
        let on_ingress = translator;
        let ingress_informer = tokio::spawn(ingresses.run(
            move |event| on_ingress.on_ingress(event),
            shutdown.clone(),
        ));

        info!("Waiting for informer caches to sync");
        let synced = tokio::select! {
            synced = async {
                tokio::try_join!(
                    service_store.wait_until_ready(),
                    ingress_store.wait_until_ready()
                )
            } => synced.map(|_| true),
            _ = shutdown.cancelled() => Ok(false),
        };

        let result = match synced {
            Ok(true) => {
                info!("Caches synced");
                metrics::OPERATOR_READY.set(1.0);
                self.pool().run(shutdown.clone()).await;
                metrics::OPERATOR_READY.set(0.0);
                Ok(())
            }
            Ok(false) => {
                info!("Shutdown requested before caches synced");
                Ok(())
            }
            Err(e) => {
                error!(error = ?e, "Informer cache never synced");
                shutdown.cancel();
                Err(Error::cache(format!("cache never synced: {e:?}")))
            }
        };

        self.queue.shutdown();
        for informer in [service_informer, ingress_informer] {
            if let Err(e) = informer.await {
                error!(error = %e, "Informer task failed");
            }
        }
        result
    }

    fn pool(&self) -> WorkerPool<ObjectKey, R> {
        WorkerPool::new(
            self.queue.clone(),
            Arc::clone(&self.reconciler),
            self.config.workers,
        )
        .with_max_retries(self.config.max_retries)
        .with_restart_delay(self.config.worker_restart_delay())
    }
}

/// Build the informers and reconciler against a cluster and run the controller
pub async fn run(client: Client, config: Config, shutdown: CancellationToken) -> Result<()> {
    let (services, ingresses): (Api<Service>, Api<Ingress>) =
        match config.watch_namespace.as_deref() {
            Some(namespace) => (
                Api::namespaced(client.clone(), namespace),
                Api::namespaced(client.clone(), namespace),
            ),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };

    let services = Informer::new(services, WatcherConfig::default());
    let ingresses = Informer::new(ingresses, WatcherConfig::default());

    let reconciler = IngressReconciler::new(
        Arc::new(services.store()),
        Arc::new(ingresses.store()),
        Arc::new(KubeStore::new(client)),
        config.ingress_template(),
    );

    info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        workers = config.workers,
        "Starting Service controller"
    );
    Controller::new(reconciler, config)
        .run(services, ingresses, shutdown)
        .await
}
