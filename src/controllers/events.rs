//! Translation of watch notifications into queue keys

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Resource, ResourceExt};
use tracing::{debug, trace, warn};

use crate::adapters::ResourceEvent;
use crate::key::ObjectKey;
use crate::queue::WorkQueue;
use crate::reconcilers::desired::controller_of;

/// Notifications the controller reacts to
#[derive(Debug, Clone)]
pub enum Notification {
    ParentAdded(Arc<Service>),
    ParentUpdated { old: Arc<Service>, new: Arc<Service> },
    ChildDeleted(Arc<Ingress>),
}

/// Maps notifications onto the work queue
///
/// Handlers only compute a key and call [`WorkQueue::add`], so they never
/// block the informer that calls them. Added and updated Ingresses are not
/// watched: drift on an Ingress that was not deleted goes unnoticed until
/// its Service changes.
#[derive(Clone, Debug)]
pub struct EventTranslator {
    queue: WorkQueue<ObjectKey>,
}

impl EventTranslator {
    pub fn new(queue: WorkQueue<ObjectKey>) -> Self {
        Self { queue }
    }

    /// Enqueue the key a notification maps to, returning it
    pub fn handle(&self, notification: Notification) -> Option<ObjectKey> {
        let key = match notification {
            Notification::ParentAdded(service) => key_or_drop(service.as_ref()),
            Notification::ParentUpdated { old, new } => {
                if old == new {
                    trace!(service = %new.name_any(), "Service unchanged, ignoring update");
                    return None;
                }
                key_or_drop(new.as_ref())
            }
            Notification::ChildDeleted(ingress) => {
                let owned = controller_of(ingress.as_ref())
                    .is_some_and(|owner| owner.kind == Service::kind(&()));
                if !owned {
                    debug!(
                        ingress = %ingress.name_any(),
                        "Deleted Ingress is not controlled by a Service, ignoring"
                    );
                    return None;
                }
                key_or_drop(ingress.as_ref())
            }
        }?;

        self.queue.add(key.clone());
        Some(key)
    }

    /// Handler for the Service informer
    pub fn on_service(&self, event: ResourceEvent<Service>) {
        match event {
            ResourceEvent::Added(service) => {
                self.handle(Notification::ParentAdded(service));
            }
            ResourceEvent::Updated { old, new } => {
                self.handle(Notification::ParentUpdated { old, new });
            }
            // Owned Ingresses are garbage collected; their deletion re-enqueues the key.
            ResourceEvent::Deleted(_) => {}
        }
    }

    /// Handler for the Ingress informer
    pub fn on_ingress(&self, event: ResourceEvent<Ingress>) {
        if let ResourceEvent::Deleted(ingress) = event {
            self.handle(Notification::ChildDeleted(ingress));
        }
    }
}

fn key_or_drop<K>(obj: &K) -> Option<ObjectKey>
where
    K: Resource,
    K::DynamicType: Default,
{
    let key = ObjectKey::for_object(obj);
    if key.is_none() {
        warn!(
            kind = %K::kind(&Default::default()),
            "Dropping notification for object without a name"
        );
    }
    key
}
