//! Finds the accepted resources affected by a change to a dependency.

use super::Configuration;
use nginx_ingress_controller_core::{
    IngressConfiguration, Resource, ResourceId, TransportServerConfiguration,
    VirtualServerConfiguration,
};
use nginx_ingress_controller_k8s_api::{
    annotations::{
        APP_PROTECT_DOS_RESOURCE, APP_PROTECT_POLICY, APP_PROTECT_SECURITY_LOG, BASIC_AUTH_SECRET,
        JWT_KEY,
    },
    configuration::{PolicyReference, Route},
    Ingress, ResourceExt,
};
use std::collections::BTreeMap;

/// Selects which kinds of accepted resources to return.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    pub ingresses: bool,
    pub virtual_servers: bool,
    pub transport_servers: bool,
}

// === impl ResourceFilter ===

impl ResourceFilter {
    pub const ALL: Self = Self {
        ingresses: true,
        virtual_servers: true,
        transport_servers: true,
    };

    fn allows(&self, resource: &Resource) -> bool {
        match resource {
            Resource::Ingress(_) => self.ingresses,
            Resource::VirtualServer(_) => self.virtual_servers,
            Resource::TransportServer(_) => self.transport_servers,
        }
    }
}

// === impl Configuration ===

impl Configuration {
    /// Every accepted resource, each reported once, ordered by kind and id.
    pub fn get_resources(&self) -> Vec<Resource> {
        self.get_resources_with_filter(ResourceFilter::ALL)
    }

    pub fn get_resources_with_filter(&self, filter: ResourceFilter) -> Vec<Resource> {
        self.hosts
            .values()
            .chain(self.listener_hosts.values())
            .filter(|r| filter.allows(r))
            .map(|r| ((r.kind(), r.id()), r))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .cloned()
            .collect()
    }

    /// Accepted resources with a backend or upstream on the service.
    pub fn find_resources_for_service(&self, namespace: &str, name: &str) -> Vec<Resource> {
        self.find(|resource| match resource {
            Resource::Ingress(c) => c
                .ingresses()
                .any(|ing| in_namespace(&**ing, namespace) && ingress_services(ing).any(|s| s == name)),
            Resource::VirtualServer(c) => {
                let vs_upstreams = in_namespace(&*c.virtual_server, namespace)
                    && c.virtual_server.spec.upstreams.iter().any(|u| {
                        u.service == name || u.backup == name
                    });
                vs_upstreams
                    || c.virtual_server_routes.iter().any(|vsr| {
                        in_namespace(&**vsr, namespace)
                            && vsr
                                .spec
                                .upstreams
                                .iter()
                                .any(|u| u.service == name || u.backup == name)
                    })
            }
            Resource::TransportServer(c) => {
                in_namespace(&*c.transport_server, namespace)
                    && c.transport_server
                        .spec
                        .upstreams
                        .iter()
                        .any(|u| u.service == name || u.backup == name)
            }
        })
    }

    /// Accepted resources referencing the secret directly. Secrets referenced
    /// through policies are found with [`Self::find_resources_for_policies`].
    pub fn find_resources_for_secret(&self, namespace: &str, name: &str) -> Vec<Resource> {
        self.find(|resource| match resource {
            Resource::Ingress(c) => ingress_config_references_secret(c, namespace, name),
            Resource::VirtualServer(c) => {
                in_namespace(&*c.virtual_server, namespace)
                    && c.virtual_server
                        .spec
                        .tls
                        .as_ref()
                        .map(|tls| tls.secret == name)
                        .unwrap_or(false)
            }
            Resource::TransportServer(c) => transport_server_references_secret(c, namespace, name),
        })
    }

    /// Accepted VirtualServers referencing any of the policies, directly or
    /// through their routes and attached VirtualServerRoutes.
    pub fn find_resources_for_policies(&self, policies: &[ResourceId]) -> Vec<Resource> {
        if policies.is_empty() {
            return Vec::new();
        }
        self.find(|resource| match resource {
            Resource::VirtualServer(c) => virtual_server_policies(c).any(|p| policies.contains(&p)),
            _ => false,
        })
    }

    /// Accepted Ingresses whose App Protect policy annotation references the
    /// policy.
    pub fn find_resources_for_app_protect_policy_annotation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Vec<Resource> {
        let target = ResourceId::new(namespace, name);
        self.find(|resource| match resource {
            Resource::Ingress(c) => c
                .ingresses()
                .any(|ing| annotation_refs(ing, APP_PROTECT_POLICY).any(|r| r == target)),
            _ => false,
        })
    }

    /// Accepted Ingresses whose security log annotation references the log
    /// configuration.
    pub fn find_resources_for_app_protect_log_conf_annotation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Vec<Resource> {
        let target = ResourceId::new(namespace, name);
        self.find(|resource| match resource {
            Resource::Ingress(c) => c
                .ingresses()
                .any(|ing| annotation_refs(ing, APP_PROTECT_SECURITY_LOG).any(|r| r == target)),
            _ => false,
        })
    }

    /// Accepted resources protected by the DosProtectedResource.
    pub fn find_resources_for_app_protect_dos_protected(
        &self,
        namespace: &str,
        name: &str,
    ) -> Vec<Resource> {
        let target = ResourceId::new(namespace, name);
        self.find(|resource| match resource {
            Resource::Ingress(c) => c
                .ingresses()
                .any(|ing| annotation_refs(ing, APP_PROTECT_DOS_RESOURCE).any(|r| r == target)),
            Resource::VirtualServer(c) => virtual_server_dos_refs(c).any(|r| r == target),
            Resource::TransportServer(_) => false,
        })
    }

    /// Accepted Ingresses that scale their rate limits by the number of
    /// controller replicas.
    pub fn ingresses_with_limit_req_scale(&self) -> Vec<Resource> {
        self.find(|resource| match resource {
            Resource::Ingress(c) => c.ingresses().any(|ing| self.cluster.uses_limit_req_scale(ing)),
            _ => false,
        })
    }

    fn find(&self, mut matches: impl FnMut(&Resource) -> bool) -> Vec<Resource> {
        self.get_resources()
            .into_iter()
            .filter(|r| matches(r))
            .collect()
    }
}

fn in_namespace<T: ResourceExt>(resource: &T, namespace: &str) -> bool {
    resource.namespace().as_deref() == Some(namespace)
}

/// The services referenced by an Ingress's default backend and rules.
pub(crate) fn ingress_services(ingress: &Ingress) -> impl Iterator<Item = &str> + '_ {
    let spec = ingress.spec.iter();
    let default = spec
        .clone()
        .filter_map(|s| s.default_backend.as_ref())
        .filter_map(|b| b.service.as_ref());
    let rules = spec
        .flat_map(|s| s.rules.iter().flatten())
        .flat_map(|r| r.http.iter().flat_map(|h| h.paths.iter()))
        .filter_map(|p| p.backend.service.as_ref());
    default.chain(rules).map(|s| s.name.as_str())
}

/// Resolves a comma-separated list of references in an annotation.
fn annotation_refs<'a>(ingress: &'a Ingress, key: &str) -> impl Iterator<Item = ResourceId> + 'a {
    let namespace = ingress.namespace().unwrap_or_default();
    ingress
        .annotations()
        .get(key)
        .into_iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(move |r| ResourceId::parse_ref(r, &namespace))
}

fn ingress_config_references_secret(c: &IngressConfiguration, namespace: &str, name: &str) -> bool {
    let target = ResourceId::new(namespace, name);
    c.ingresses().any(|ing| {
        let tls = in_namespace(&**ing, namespace)
            && ing
                .spec
                .iter()
                .flat_map(|s| s.tls.iter().flatten())
                .any(|tls| tls.secret_name.as_deref() == Some(name));
        tls || annotation_refs(ing, BASIC_AUTH_SECRET)
            .chain(annotation_refs(ing, JWT_KEY))
            .any(|r| r == target)
    })
}

fn transport_server_references_secret(
    c: &TransportServerConfiguration,
    namespace: &str,
    name: &str,
) -> bool {
    in_namespace(&*c.transport_server, namespace)
        && c.transport_server
            .spec
            .tls
            .as_ref()
            .map(|tls| tls.secret == name)
            .unwrap_or(false)
}

/// Every policy referenced by a VirtualServer and its attached routes.
fn virtual_server_policies(
    c: &VirtualServerConfiguration,
) -> impl Iterator<Item = ResourceId> + '_ {
    let vs = &c.virtual_server;
    let vs_ns = vs.namespace().unwrap_or_default();
    let own = policy_refs(&vs.spec.policies, vs_ns.clone())
        .chain(route_policy_refs(&vs.spec.routes, vs_ns))
        .collect::<Vec<_>>();
    let routes = c.virtual_server_routes.iter().flat_map(|vsr| {
        route_policy_refs(&vsr.spec.subroutes, vsr.namespace().unwrap_or_default())
    });
    own.into_iter().chain(routes)
}

fn policy_refs(
    refs: &[PolicyReference],
    namespace: String,
) -> impl Iterator<Item = ResourceId> + '_ {
    refs.iter().map(move |p| {
        let ns = if p.namespace.is_empty() {
            namespace.as_str()
        } else {
            p.namespace.as_str()
        };
        ResourceId::new(ns, p.name.as_str())
    })
}

fn route_policy_refs(routes: &[Route], namespace: String) -> impl Iterator<Item = ResourceId> + '_ {
    routes
        .iter()
        .flat_map(move |r| policy_refs(&r.policies, namespace.clone()))
}

fn virtual_server_dos_refs(
    c: &VirtualServerConfiguration,
) -> impl Iterator<Item = ResourceId> + '_ {
    let vs = &c.virtual_server;
    let vs_ns = vs.namespace().unwrap_or_default();
    let own = std::iter::once(vs.spec.dos.as_str())
        .chain(vs.spec.routes.iter().map(|r| r.dos.as_str()))
        .filter(|d| !d.is_empty())
        .map(|d| ResourceId::parse_ref(d, &vs_ns))
        .collect::<Vec<_>>();
    let routes = c.virtual_server_routes.iter().flat_map(|vsr| {
        let ns = vsr.namespace().unwrap_or_default();
        vsr.spec
            .subroutes
            .iter()
            .filter(|r| !r.dos.is_empty())
            .map(move |r| ResourceId::parse_ref(&r.dos, &ns))
    });
    own.into_iter().chain(routes)
}
