//! Fully resolved snapshots of accepted resources, as consumed by a
//! [`Configurator`](crate::Configurator).

use nginx_ingress_controller_k8s_api::{
    app_protect::{APDosLogConf, APDosPolicy, APLogConf, APPolicy},
    configuration::{Policy, TransportServer, VirtualServer, VirtualServerRoute},
    dos::DosProtectedResource,
    Ingress, Probe, Secret,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Upstream members keyed by [`endpoints_key`].
pub type Endpoints = BTreeMap<String, Vec<String>>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngressEx {
    pub ingress: Arc<Ingress>,
    /// Hosts of the Ingress and whether this Ingress owns them.
    pub valid_hosts: BTreeMap<String, bool>,
    /// For minions, the paths this minion owns within the master's host.
    pub valid_minion_paths: BTreeMap<String, bool>,
    pub endpoints: Endpoints,
    pub health_checks: BTreeMap<String, Probe>,
    pub external_name_svcs: BTreeSet<String>,
    pub pod_owners: BTreeMap<String, PodOwner>,
    pub secret_refs: BTreeMap<String, SecretReference>,
    pub app_protect_policy: Option<Arc<APPolicy>>,
    pub app_protect_logs: Vec<AppProtectLog>,
    pub dos: Option<DosEx>,
}

/// A master Ingress together with its minions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeableIngresses {
    pub master: IngressEx,
    pub minions: Vec<IngressEx>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VirtualServerEx {
    pub virtual_server: Arc<VirtualServer>,
    pub virtual_server_routes: Vec<Arc<VirtualServerRoute>>,
    pub http_port: u16,
    pub https_port: u16,
    pub http_ipv4: String,
    pub http_ipv6: String,
    pub https_ipv4: String,
    pub https_ipv6: String,
    pub endpoints: Endpoints,
    pub external_name_svcs: BTreeSet<String>,
    pub pod_owners: BTreeMap<String, PodOwner>,
    /// Policies keyed by `namespace/name`.
    pub policies: BTreeMap<String, Arc<Policy>>,
    pub secret_refs: BTreeMap<String, SecretReference>,
    pub app_protect_policies: BTreeMap<String, Arc<APPolicy>>,
    pub app_protect_log_confs: BTreeMap<String, Arc<APLogConf>>,
    /// DoS protection keyed by route path; the server itself uses the empty key.
    pub dos_protected: BTreeMap<String, DosEx>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransportServerEx {
    pub transport_server: Arc<TransportServer>,
    pub listener_port: u16,
    pub ipv4: String,
    pub ipv6: String,
    pub endpoints: Endpoints,
    pub external_name_svcs: BTreeSet<String>,
    pub pod_owners: BTreeMap<String, PodOwner>,
    pub secret_refs: BTreeMap<String, SecretReference>,
}

/// A batch of snapshots handed to the Configurator in one call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtendedResources {
    pub ingress_exes: Vec<IngressEx>,
    pub mergeable_ingresses: Vec<MergeableIngresses>,
    pub virtual_server_exes: Vec<VirtualServerEx>,
    pub transport_server_exes: Vec<TransportServerEx>,
}

/// The state of a referenced secret at snapshot time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecretReference {
    pub secret: Option<Arc<Secret>>,
    /// The secret type, when the secret exists.
    pub type_: Option<String>,
    /// Where the secret is materialized on the data plane.
    pub path: String,
    pub error: Option<String>,
}

/// The workload controller that owns an endpoint's pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodOwner {
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppProtectLog {
    pub conf: Arc<APLogConf>,
    pub destination: String,
}

/// A DosProtectedResource joined with its policy and log configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct DosEx {
    pub resource: Arc<DosProtectedResource>,
    pub policy: Option<Arc<APDosPolicy>>,
    pub log_conf: Option<Arc<APDosLogConf>>,
}

/// An App-Protect object whose change affects the resources that use it.
#[derive(Clone, Debug, PartialEq)]
pub enum AppProtectResource {
    Policy(Arc<APPolicy>),
    LogConf(Arc<APLogConf>),
}

/// Builds the key under which the members of a service port are recorded.
pub fn endpoints_key(
    namespace: &str,
    service: &str,
    subselector: &BTreeMap<String, String>,
    port: u16,
) -> String {
    if subselector.is_empty() {
        return format!("{}/{}:{}", namespace, service, port);
    }
    let selector = subselector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}/{}_{}:{}", namespace, service, selector, port)
}

// === impl ExtendedResources ===

impl ExtendedResources {
    pub fn is_empty(&self) -> bool {
        self.ingress_exes.is_empty()
            && self.mergeable_ingresses.is_empty()
            && self.virtual_server_exes.is_empty()
            && self.transport_server_exes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ingress_exes.len()
            + self.mergeable_ingresses.len()
            + self.virtual_server_exes.len()
            + self.transport_server_exes.len()
    }
}
