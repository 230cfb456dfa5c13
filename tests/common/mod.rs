//! In-memory stand-ins for the cache and the API server

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ErrorResponse;
use kube::ResourceExt;

use service_ingress_operator::adapters::{IngressClient, Lister};
use service_ingress_operator::reconcilers::{IngressReconciler, IngressTemplate, ENABLE_ANNOTATION};
use service_ingress_operator::{Error, ObjectKey, Result};

/// Cache keyed by namespace/name
pub struct FakeCache<K> {
    objects: Mutex<HashMap<ObjectKey, Arc<K>>>,
    failing: AtomicBool,
}

impl<K> Default for FakeCache<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }
}

impl<K: kube::Resource> FakeCache<K> {
    pub fn insert(&self, obj: K) {
        let key = ObjectKey::for_object(&obj).expect("object needs a name");
        self.objects.lock().unwrap().insert(key, Arc::new(obj));
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.lock().unwrap().remove(key)
    }

    pub fn lookup(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl<K: Send + Sync> Lister<K> for FakeCache<K> {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::cache("injected cache failure"));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&ObjectKey::new(namespace, name))
            .cloned())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    Create(ObjectKey),
    Delete(ObjectKey),
}

/// API server double that keeps the Ingress cache in step with its writes
pub struct FakeIngressClient {
    cache: Arc<FakeCache<Ingress>>,
    calls: Mutex<Vec<StoreCall>>,
    failures_left: AtomicUsize,
    versions: AtomicUsize,
}

impl FakeIngressClient {
    pub fn new(cache: Arc<FakeCache<Ingress>>) -> Self {
        Self {
            cache,
            calls: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
            versions: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` calls fail with a server error
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: StoreCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(server_error());
        }
        Ok(())
    }
}

pub fn server_error() -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "etcdserver: request timed out".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

#[async_trait]
impl IngressClient for FakeIngressClient {
    async fn create(&self, ingress: &Ingress) -> Result<Ingress> {
        let key = ObjectKey::for_object(ingress).expect("ingress needs a name");
        self.record(StoreCall::Create(key.clone()))?;
        if self.cache.lookup(&key).is_some() {
            return Err(Error::AlreadyExists {
                kind: "Ingress",
                key: key.to_string(),
            });
        }

        let mut stored = ingress.clone();
        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        stored.metadata.resource_version = Some(version.to_string());
        stored.metadata.uid = Some(format!("uid-ingress-{}", stored.name_any()));
        self.cache.insert(stored.clone());
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let key = ObjectKey::new(namespace, name);
        self.record(StoreCall::Delete(key.clone()))?;
        match self.cache.remove(&key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound {
                kind: "Ingress",
                key: key.to_string(),
            }),
        }
    }
}

/// A reconciler wired to fresh fakes
pub struct Harness {
    pub services: Arc<FakeCache<Service>>,
    pub ingresses: Arc<FakeCache<Ingress>>,
    pub client: Arc<FakeIngressClient>,
    pub reconciler: IngressReconciler,
}

impl Harness {
    pub fn new() -> Self {
        let services = Arc::new(FakeCache::default());
        let ingresses = Arc::new(FakeCache::default());
        let client = Arc::new(FakeIngressClient::new(Arc::clone(&ingresses)));
        let reconciler = IngressReconciler::new(
            services.clone(),
            ingresses.clone(),
            client.clone(),
            IngressTemplate::default(),
        );
        Self {
            services,
            ingresses,
            client,
            reconciler,
        }
    }
}

pub fn service(namespace: &str, name: &str, exposed: bool) -> Service {
    let annotations = exposed.then(|| {
        BTreeMap::from([(ENABLE_ANNOTATION.to_string(), "true".to_string())])
    });
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}", name)),
            annotations,
            ..Default::default()
        },
        ..Default::default()
    }
}
