use super::virtual_server::{ExternalEndpoint, Route, Upstream};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Delegates a subtree of a VirtualServer's paths.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.nginx.org",
    version = "v1",
    kind = "VirtualServerRoute",
    shortname = "vsr",
    status = "VirtualServerRouteStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualServerRouteSpec {
    #[serde(rename = "ingressClassName", skip_serializing_if = "String::is_empty")]
    pub ingress_class: String,
    pub host: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<Upstream>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subroutes: Vec<Route>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualServerRouteStatus {
    pub state: String,
    pub reason: String,
    pub message: String,
    pub referenced_by: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_endpoints: Vec<ExternalEndpoint>,
}
