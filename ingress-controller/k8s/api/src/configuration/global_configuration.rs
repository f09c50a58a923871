use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The listener registry shared by TransportServers and VirtualServers.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.nginx.org",
    version = "v1",
    kind = "GlobalConfiguration",
    shortname = "gc",
    derive = "PartialEq",
    namespaced
)]
#[serde(default)]
pub struct GlobalConfigurationSpec {
    pub listeners: Vec<Listener>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct Listener {
    pub name: String,
    pub protocol: String,
    pub port: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ipv4: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ipv6: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ssl: bool,
}
