use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TCP, UDP or TLS-passthrough load balancing bound to a named listener.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.nginx.org",
    version = "v1",
    kind = "TransportServer",
    shortname = "ts",
    status = "TransportServerStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportServerSpec {
    #[serde(rename = "ingressClassName", skip_serializing_if = "String::is_empty")]
    pub ingress_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TransportServerTls>,
    pub listener: TransportServerListener,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server_snippets: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stream_snippets: String,
    /// The SNI host for TLS passthrough.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<TransportServerUpstream>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_parameters: Option<UpstreamParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_parameters: Option<SessionParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<TransportServerAction>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct TransportServerTls {
    pub secret: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct TransportServerListener {
    pub name: String,
    pub protocol: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportServerUpstream {
    pub name: String,
    pub service: String,
    pub port: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fail_timeout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fails: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_conns: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<TransportServerHealthCheck>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub load_balancing_method: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub backup: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_port: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct TransportServerHealthCheck {
    pub enable: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timeout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jitter: String,
    pub port: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub interval: String,
    pub passes: i32,
    pub fails: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_requests: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_responses: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub connect_timeout: String,
    pub next_upstream: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub next_upstream_timeout: String,
    pub next_upstream_tries: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct SessionParameters {
    pub timeout: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct TransportServerAction {
    pub pass: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct TransportServerStatus {
    pub state: String,
    pub reason: String,
    pub message: String,
}
