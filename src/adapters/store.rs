//! Cache lookups and authoritative-store writes used by the reconciler

use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, PostParams};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::debug;

use crate::error::{Error, Result};

/// Field manager recorded on objects written by the operator
pub const FIELD_MANAGER: &str = "service-ingress-operator";

/// Read access to a local, eventually consistent object cache
pub trait Lister<K>: Send + Sync {
    /// Look up `namespace/name`; `Ok(None)` when the cache has no such object
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>>;
}

impl<K> Lister<K> for Store<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Clone + Default + Eq + Hash + Send + Sync,
{
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>> {
        Ok(Store::get(self, &ObjectRef::new(name).within(namespace)))
    }
}

/// Writes against the API server for the managed Ingress objects
///
/// Implementations must report a missing object as [`Error::NotFound`] and
/// a name collision as [`Error::AlreadyExists`].
#[async_trait]
pub trait IngressClient: Send + Sync {
    async fn create(&self, ingress: &Ingress) -> Result<Ingress>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`IngressClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl IngressClient for KubeStore {
    async fn create(&self, ingress: &Ingress) -> Result<Ingress> {
        let namespace = ingress.namespace().unwrap_or_default();
        let key = format!("{}/{}", namespace, ingress.name_any());
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        };

        debug!(ingress = %key, "Creating Ingress");
        self.ingresses(&namespace)
            .create(&params, ingress)
            .await
            .map_err(|e| Error::from_kube(e, "Ingress", key))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        debug!(ingress = %format!("{}/{}", namespace, name), "Deleting Ingress");
        self.ingresses(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, "Ingress", format!("{}/{}", namespace, name)))
    }
}
