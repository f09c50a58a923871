use nginx_ingress_controller_core::ResourceId;
use nginx_ingress_controller_k8s_api::{
    annotations::{self, INGRESS_CLASS},
    Ingress, Labels, ResourceExt, Selector,
};
use std::collections::BTreeSet;

/// Holds controller-wide settings fixed at startup.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// The class of resources handled by this controller.
    pub ingress_class: String,

    /// Whether Ingresses without any class are handled.
    pub watch_ingress_without_class: bool,

    /// The namespace the controller runs in.
    pub controller_namespace: String,

    /// Which namespaces are watched.
    pub watched_namespaces: WatchedNamespaces,

    pub is_plus: bool,
    pub app_protect_enabled: bool,
    pub app_protect_dos_enabled: bool,
    pub custom_resources_enabled: bool,
    pub snippets_enabled: bool,
    pub cert_manager_enabled: bool,
    pub external_dns_enabled: bool,
    pub oidc_enabled: bool,
    pub internal_routes_enabled: bool,
    pub tls_passthrough_enabled: bool,
    pub tls_passthrough_port: u16,
    pub ipv6_disabled: bool,
    pub dynamic_weight_changes: bool,

    /// Listener ports that a GlobalConfiguration may not claim.
    pub forbidden_listener_ports: BTreeSet<u16>,

    /// The GlobalConfiguration resource, if enabled.
    pub global_configuration: Option<ResourceId>,

    /// The main NGINX ConfigMap.
    pub config_map: Option<ResourceId>,

    /// The NGINX Plus management ConfigMap.
    pub mgmt_config_map: Option<ResourceId>,

    /// The controller's own service, whose EndpointSlices count replicas and
    /// whose load balancer addresses are reported on resource status.
    pub external_service: Option<ResourceId>,

    pub special_secrets: SpecialSecrets,
}

/// Secrets consumed directly by the data plane, identified by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecialSecrets {
    pub default_server: Option<ResourceId>,
    pub wildcard_tls: Option<ResourceId>,
    pub license: Option<ResourceId>,
    pub client_auth: Option<ResourceId>,
    pub trusted_ca: Option<ResourceId>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpecialSecret {
    DefaultServer,
    WildcardTls,
    License,
    ClientAuth,
    TrustedCa,
}

#[derive(Clone, Debug, Default)]
pub enum WatchedNamespaces {
    #[default]
    All,
    List(BTreeSet<String>),
    Selector(Selector),
}

// === impl ClusterInfo ===

impl ClusterInfo {
    /// Whether an Ingress is handled by this controller. The class annotation
    /// takes precedence over `spec.ingressClassName`.
    pub fn owns_ingress(&self, ingress: &Ingress) -> bool {
        let class = ingress
            .annotations()
            .get(INGRESS_CLASS)
            .cloned()
            .or_else(|| {
                ingress
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.ingress_class_name.clone())
            })
            .unwrap_or_default();
        if class.is_empty() {
            return self.watch_ingress_without_class;
        }
        class == self.ingress_class
    }

    /// Whether a custom resource with the given class is handled by this
    /// controller. Custom resources without a class always are.
    pub fn owns_class(&self, class: &str) -> bool {
        class.is_empty() || class == self.ingress_class
    }

    pub fn is_external_service(&self, id: &ResourceId) -> bool {
        self.external_service.as_ref() == Some(id)
    }

    pub fn is_config_map(&self, id: &ResourceId) -> bool {
        self.config_map.as_ref() == Some(id) || self.mgmt_config_map.as_ref() == Some(id)
    }

    pub fn is_global_configuration(&self, id: &ResourceId) -> bool {
        self.global_configuration.as_ref() == Some(id)
    }

    pub fn uses_limit_req_scale(&self, ingress: &Ingress) -> bool {
        annotations::is_true(ingress.annotations(), annotations::LIMIT_REQ_SCALE)
    }
}

// === impl SpecialSecrets ===

impl SpecialSecrets {
    pub fn kind_of(&self, id: &ResourceId) -> Option<SpecialSecret> {
        let is = |s: &Option<ResourceId>| s.as_ref() == Some(id);
        if is(&self.default_server) {
            Some(SpecialSecret::DefaultServer)
        } else if is(&self.wildcard_tls) {
            Some(SpecialSecret::WildcardTls)
        } else if is(&self.license) {
            Some(SpecialSecret::License)
        } else if is(&self.client_auth) {
            Some(SpecialSecret::ClientAuth)
        } else if is(&self.trusted_ca) {
            Some(SpecialSecret::TrustedCa)
        } else {
            None
        }
    }
}

// === impl WatchedNamespaces ===

impl WatchedNamespaces {
    /// Whether a namespace with the given labels is watched.
    pub fn matches(&self, namespace: &str, labels: Option<&Labels>) -> bool {
        match self {
            Self::All => true,
            Self::List(names) => names.contains(namespace),
            Self::Selector(selector) => labels.map(|l| selector.matches(l)).unwrap_or(false),
        }
    }

    pub fn is_selector(&self) -> bool {
        matches!(self, Self::Selector(_))
    }
}

#[cfg(test)]
pub(crate) fn mk_cluster_info() -> ClusterInfo {
    ClusterInfo {
        ingress_class: "nginx".to_string(),
        watch_ingress_without_class: false,
        controller_namespace: "nginx-ingress".to_string(),
        watched_namespaces: WatchedNamespaces::All,
        is_plus: false,
        app_protect_enabled: false,
        app_protect_dos_enabled: false,
        custom_resources_enabled: true,
        snippets_enabled: false,
        cert_manager_enabled: false,
        external_dns_enabled: false,
        oidc_enabled: false,
        internal_routes_enabled: false,
        tls_passthrough_enabled: true,
        tls_passthrough_port: 443,
        ipv6_disabled: false,
        dynamic_weight_changes: true,
        forbidden_listener_ports: [80, 443].into_iter().collect(),
        global_configuration: Some(ResourceId::new("nginx-ingress", "nginx-configuration")),
        config_map: Some(ResourceId::new("nginx-ingress", "nginx-config")),
        mgmt_config_map: None,
        external_service: Some(ResourceId::new("nginx-ingress", "nginx-ingress")),
        special_secrets: SpecialSecrets {
            default_server: Some(ResourceId::new("nginx-ingress", "default-server-secret")),
            wildcard_tls: Some(ResourceId::new("nginx-ingress", "wildcard-tls-secret")),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nginx_ingress_controller_k8s_api::{IngressSpec, ObjectMeta};

    fn mk_ingress(annotation: Option<&str>, spec_class: Option<&str>) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("ing".to_string()),
                annotations: annotation.map(|class| {
                    maplit::btreemap! { INGRESS_CLASS.to_string() => class.to_string() }
                }),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: spec_class.map(Into::into),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn ingress_class_ownership() {
        let mut info = mk_cluster_info();
        for (annotation, spec, expected, msg) in &[
            (None, Some("nginx"), true, "spec class matches"),
            (None, Some("other"), false, "spec class differs"),
            (Some("nginx"), Some("other"), true, "annotation takes precedence"),
            (Some("other"), Some("nginx"), false, "annotation rejects"),
            (None, None, false, "no class"),
        ] {
            assert_eq!(
                info.owns_ingress(&mk_ingress(*annotation, *spec)),
                *expected,
                "{}",
                msg
            );
        }

        info.watch_ingress_without_class = true;
        assert!(info.owns_ingress(&mk_ingress(None, None)));
    }

    #[test]
    fn custom_resource_class_ownership() {
        let info = mk_cluster_info();
        assert!(info.owns_class(""));
        assert!(info.owns_class("nginx"));
        assert!(!info.owns_class("other"));
    }

    #[test]
    fn special_secret_kinds() {
        let info = mk_cluster_info();
        let secrets = &info.special_secrets;
        assert_eq!(
            secrets.kind_of(&ResourceId::new("nginx-ingress", "default-server-secret")),
            Some(SpecialSecret::DefaultServer)
        );
        assert_eq!(
            secrets.kind_of(&ResourceId::new("nginx-ingress", "wildcard-tls-secret")),
            Some(SpecialSecret::WildcardTls)
        );
        assert_eq!(
            secrets.kind_of(&ResourceId::new("default", "default-server-secret")),
            None
        );
    }
}
