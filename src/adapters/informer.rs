//! Watch-backed object caches that report typed change events
//!
//! An [`Informer`] keeps a reflector [`Store`] in sync with the API server
//! and tells a handler what changed. Changes are computed against the cache
//! before it is written and handed to the handler after the write, so a
//! handler that schedules work can rely on the cache being at least as fresh
//! as the event.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::StreamExt;
use kube::{Api, Resource};
use kube_runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube_runtime::watcher::{self, watcher};
use kube_runtime::WatchStreamExt;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A change observed on a watched object
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

/// Turns raw watcher events into [`ResourceEvent`]s while maintaining the store
///
/// During a relist the listed objects are buffered until the listing
/// completes. Objects that were cached but are missing from the new listing
/// are reported as deleted, the rest as added or updated.
pub struct EventDispatcher<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Clone + Default + Eq + Hash,
{
    reader: Store<K>,
    writer: Writer<K>,
    relisted: Vec<Arc<K>>,
}

impl<K> EventDispatcher<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Clone + Default + Eq + Hash,
{
    pub fn new() -> Self {
        let (reader, writer) = reflector::store();
        Self {
            reader,
            writer,
            relisted: Vec::new(),
        }
    }

    pub fn store(&self) -> Store<K> {
        self.reader.clone()
    }

    /// Apply one watcher event to the store and return what changed
    pub fn apply(&mut self, event: watcher::Event<K>) -> Vec<ResourceEvent<K>> {
        let changes = match &event {
            watcher::Event::Apply(obj) => {
                let new = Arc::new(obj.clone());
                vec![self.compare_with_cache(new)]
            }
            watcher::Event::Delete(obj) => vec![ResourceEvent::Deleted(Arc::new(obj.clone()))],
            watcher::Event::Init => {
                self.relisted.clear();
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                self.relisted.push(Arc::new(obj.clone()));
                Vec::new()
            }
            watcher::Event::InitDone => self.finish_relist(),
        };

        self.writer.apply_watcher_event(&event);
        changes
    }

    fn compare_with_cache(&self, new: Arc<K>) -> ResourceEvent<K> {
        match self.reader.get(&ObjectRef::from_obj(new.as_ref())) {
            Some(old) => ResourceEvent::Updated { old, new },
            None => ResourceEvent::Added(new),
        }
    }

    fn finish_relist(&mut self) -> Vec<ResourceEvent<K>> {
        let listed: Vec<Arc<K>> = std::mem::take(&mut self.relisted);
        let seen: HashSet<ObjectRef<K>> = listed
            .iter()
            .map(|obj| ObjectRef::from_obj(obj.as_ref()))
            .collect();

        let vanished = self
            .reader
            .state()
            .into_iter()
            .filter(|cached| !seen.contains(&ObjectRef::from_obj(cached.as_ref())))
            .map(ResourceEvent::Deleted);

        let mut changes: Vec<ResourceEvent<K>> = vanished.collect();
        changes.extend(listed.into_iter().map(|obj| self.compare_with_cache(obj)));
        changes
    }
}

impl<K> Default for EventDispatcher<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Clone + Default + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Watches one resource kind and mirrors it into a local store
pub struct Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Clone + Default + Eq + Hash,
{
    api: Api<K>,
    config: watcher::Config,
    dispatcher: EventDispatcher<K>,
}

impl<K> Informer<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Clone + Debug + Default + Eq + Hash + Send + Sync,
{
    pub fn new(api: Api<K>, config: watcher::Config) -> Self {
        Self {
            api,
            config,
            dispatcher: EventDispatcher::new(),
        }
    }

    /// Read handle on the mirrored objects
    ///
    /// [`Store::wait_until_ready`] resolves once the first listing has been
    /// applied, which is the cache-synced signal for the controller.
    pub fn store(&self) -> Store<K> {
        self.dispatcher.store()
    }

    /// Drive the watch, calling `handler` for every change until `shutdown`
    ///
    /// Watch errors are logged and retried with kube's default backoff. The
    /// handler runs on the informer task and must not block.
    pub async fn run<F>(self, mut handler: F, shutdown: CancellationToken)
    where
        F: FnMut(ResourceEvent<K>) + Send,
    {
        let kind = K::kind(&Default::default()).to_string();
        let Informer {
            api,
            config,
            mut dispatcher,
        } = self;

        let stream = watcher(api, config).default_backoff();
        futures::pin_mut!(stream);

        info!(kind = %kind, "Starting informer");
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = shutdown.cancelled() => break,
            };

            match next {
                Some(Ok(event)) => {
                    for change in dispatcher.apply(event) {
                        handler(change);
                    }
                }
                Some(Err(e)) => {
                    warn!(kind = %kind, error = %e, "Watch error, retrying");
                }
                None => {
                    warn!(kind = %kind, "Watch stream ended");
                    break;
                }
            }
        }
        debug!(kind = %kind, "Informer stopped");
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn service(name: &str, version: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                resource_version: Some(version.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn name_of(event: &ResourceEvent<Service>) -> (&'static str, String) {
        match event {
            ResourceEvent::Added(obj) => ("added", obj.metadata.name.clone().unwrap_or_default()),
            ResourceEvent::Updated { new, .. } => {
                ("updated", new.metadata.name.clone().unwrap_or_default())
            }
            ResourceEvent::Deleted(obj) => {
                ("deleted", obj.metadata.name.clone().unwrap_or_default())
            }
        }
    }

    fn initial_list(dispatcher: &mut EventDispatcher<Service>, objects: Vec<Service>) -> Vec<ResourceEvent<Service>> {
        let mut changes = dispatcher.apply(watcher::Event::Init);
        for obj in objects {
            changes.extend(dispatcher.apply(watcher::Event::InitApply(obj)));
        }
        changes.extend(dispatcher.apply(watcher::Event::InitDone));
        changes
    }

    #[test]
    fn initial_listing_reports_additions_once_complete() {
        let mut dispatcher = EventDispatcher::<Service>::new();
        assert!(dispatcher.apply(watcher::Event::Init).is_empty());
        assert!(dispatcher
            .apply(watcher::Event::InitApply(service("web", "1")))
            .is_empty());

        let changes = dispatcher.apply(watcher::Event::InitDone);
        assert_eq!(changes.len(), 1);
        assert_eq!(name_of(&changes[0]), ("added", "web".to_string()));
        assert_eq!(dispatcher.store().state().len(), 1);
    }

    #[test]
    fn apply_of_cached_object_carries_previous_version() {
        let mut dispatcher = EventDispatcher::<Service>::new();
        initial_list(&mut dispatcher, vec![service("web", "1")]);

        let changes = dispatcher.apply(watcher::Event::Apply(service("web", "2")));
        match &changes[..] {
            [ResourceEvent::Updated { old, new }] => {
                assert_eq!(old.metadata.resource_version.as_deref(), Some("1"));
                assert_eq!(new.metadata.resource_version.as_deref(), Some("2"));
            }
            other => panic!("expected one update, got {other:?}"),
        }
    }

    #[test]
    fn delete_is_reflected_in_store() {
        let mut dispatcher = EventDispatcher::<Service>::new();
        initial_list(&mut dispatcher, vec![service("web", "1")]);

        let changes = dispatcher.apply(watcher::Event::Delete(service("web", "1")));
        assert_eq!(name_of(&changes[0]), ("deleted", "web".to_string()));
        assert!(dispatcher.store().state().is_empty());
    }

    #[test]
    fn relist_reports_objects_that_vanished() {
        let mut dispatcher = EventDispatcher::<Service>::new();
        initial_list(&mut dispatcher, vec![service("web", "1"), service("api", "1")]);

        let changes = initial_list(&mut dispatcher, vec![service("web", "2")]);
        let mut names: Vec<_> = changes.iter().map(name_of).collect();
        names.sort();
        assert_eq!(
            names,
            vec![("deleted", "api".to_string()), ("updated", "web".to_string())]
        );
        assert_eq!(dispatcher.store().state().len(), 1);
    }
}
