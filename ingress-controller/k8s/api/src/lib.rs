#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod app_protect;
pub mod configuration;
pub mod dos;
pub mod labels;

pub use self::labels::{Labels, Selector};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            ConfigMap, Container, ContainerPort, Endpoints, Namespace, ObjectReference, Pod,
            PodSpec, Probe, Secret, Service, ServicePort, ServiceSpec,
        },
        discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice},
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
            IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{OwnerReference, Time},
        util::intstr::IntOrString,
    },
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    error::ErrorResponse,
    runtime::watcher,
    Client, Error,
};

/// The label set on EndpointSlices naming the owning Service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Returns the `namespace/name` key of a namespaced resource.
pub fn key<T: ResourceExt>(resource: &T) -> String {
    match resource.namespace() {
        Some(ns) => format!("{}/{}", ns, resource.name_unchecked()),
        None => resource.name_unchecked(),
    }
}

/// Splits a `namespace/name` reference, falling back to `default_ns` when the
/// reference has no namespace component.
pub fn split_ref<'a>(reference: &'a str, default_ns: &'a str) -> (&'a str, &'a str) {
    match reference.split_once('/') {
        Some((ns, name)) => (ns, name),
        None => (default_ns, reference),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_references() {
        for (reference, expected, msg) in &[
            ("default/web", ("default", "web"), "qualified"),
            ("web", ("apps", "web"), "unqualified"),
            ("a/b/c", ("a", "b/c"), "first separator wins"),
        ] {
            assert_eq!(split_ref(reference, "apps"), *expected, "{}", msg);
        }
    }
}
