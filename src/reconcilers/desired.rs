//! Desired Ingress for an exposed Service

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

/// Annotation that opts a Service into Ingress management
pub const ENABLE_ANNOTATION: &str = "ingress/http";

/// Static parts of every generated Ingress
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressTemplate {
    pub class_name: String,
    pub host: String,
    pub path: String,
    pub path_type: String,
    pub port: i32,
}

impl Default for IngressTemplate {
    fn default() -> Self {
        Self {
            class_name: "nginx".to_string(),
            host: "example.com".to_string(),
            path: "/".to_string(),
            path_type: "Prefix".to_string(),
            port: 80,
        }
    }
}

/// Whether the Service carries the enable annotation (any value)
pub fn is_exposed(service: &Service) -> bool {
    service.annotations().contains_key(ENABLE_ANNOTATION)
}

/// Controller reference from a child back to `service`
pub fn owner_reference(service: &Service) -> OwnerReference {
    OwnerReference {
        api_version: Service::api_version(&()).to_string(),
        kind: Service::kind(&()).to_string(),
        name: service.name_any(),
        uid: service.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// The controller reference of an object, if it has one
pub fn controller_of<K: Resource>(obj: &K) -> Option<&OwnerReference> {
    obj.meta()
        .owner_references
        .as_deref()?
        .iter()
        .find(|owner| owner.controller == Some(true))
}

/// Build the Ingress that should exist for `service`
///
/// Depends only on the Service's identity and the template, so two calls
/// with the same inputs produce identical objects.
pub fn build(template: &IngressTemplate, service: &Service) -> Ingress {
    let name = service.name_any();

    Ingress {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: service.namespace(),
            owner_references: Some(vec![owner_reference(service)]),
            ..ObjectMeta::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(template.class_name.clone()),
            rules: Some(vec![IngressRule {
                host: Some(template.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(template.path.clone()),
                        path_type: template.path_type.clone(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name,
                                port: Some(ServiceBackendPort {
                                    number: Some(template.port),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            ..IngressSpec::default()
        }),
        status: None,
    }
}

/// Whether `existing` already has the desired spec
///
/// Only the spec is compared; metadata written by the API server and the
/// status never count as drift.
pub fn spec_matches(desired: &Ingress, existing: &Ingress) -> bool {
    desired.spec == existing.spec
}
