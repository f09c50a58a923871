use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes the HTTP load-balancing configuration for a single host.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.nginx.org",
    version = "v1",
    kind = "VirtualServer",
    shortname = "vs",
    status = "VirtualServerStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualServerSpec {
    #[serde(rename = "ingressClassName", skip_serializing_if = "String::is_empty")]
    pub ingress_class: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listener: Option<VirtualServerListener>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<Tls>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub gunzip: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyReference>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<Upstream>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(rename = "http-snippets", skip_serializing_if = "String::is_empty")]
    pub http_snippets: String,
    #[serde(rename = "server-snippets", skip_serializing_if = "String::is_empty")]
    pub server_snippets: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dos: String,
    #[serde(rename = "externalDNS", skip_serializing_if = "Option::is_none")]
    pub external_dns: Option<ExternalDns>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub internal_route: bool,
}

/// Names GlobalConfiguration listeners to use instead of the default ports.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct VirtualServerListener {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub http: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub https: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalDns {
    pub enable: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub record_type: String,
    #[serde(rename = "recordTTL", skip_serializing_if = "Option::is_none")]
    pub record_ttl: Option<i64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct PolicyReference {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case", default)]
pub struct Upstream {
    pub name: String,
    pub service: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub subselector: BTreeMap<String, String>,
    pub port: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub lb_method: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fail_timeout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fails: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_conns: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub connect_timeout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub read_timeout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub send_timeout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub next_upstream: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub next_upstream_timeout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_upstream_tries: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffering: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffers: Option<UpstreamBuffers>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub buffer_size: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_max_body_size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<UpstreamTls>,
    #[serde(rename = "healthCheck", skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub slow_start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<UpstreamQueue>,
    #[serde(rename = "sessionCookie", skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<SessionCookie>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub use_cluster_ip: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ntlm: bool,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub type_: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub backup: String,
    #[serde(rename = "backupPort", skip_serializing_if = "Option::is_none")]
    pub backup_port: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct UpstreamBuffers {
    pub number: i32,
    pub size: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct UpstreamTls {
    pub enable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct UpstreamQueue {
    pub size: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timeout: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct HealthCheck {
    pub enable: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub interval: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jitter: String,
    pub fails: i32,
    pub passes: i32,
    pub port: i32,
    #[serde(rename = "statusMatch", skip_serializing_if = "String::is_empty")]
    pub status_match: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub mandatory: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub persistent: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct SessionCookie {
    pub enable: bool,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub expires: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(rename = "httpOnly")]
    pub http_only: bool,
    pub secure: bool,
    #[serde(rename = "samesite", skip_serializing_if = "String::is_empty")]
    pub same_site: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Route {
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyReference>,
    /// A `namespace/name` reference to a VirtualServerRoute.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub splits: Vec<Split>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<Match>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_pages: Vec<ErrorPage>,
    #[serde(rename = "location-snippets", skip_serializing_if = "String::is_empty")]
    pub location_snippets: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dos: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct Action {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pass: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<ActionRedirect>,
    #[serde(rename = "return", skip_serializing_if = "Option::is_none")]
    pub return_: Option<ActionReturn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ActionProxy>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ActionRedirect {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ActionReturn {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub type_: String,
    pub body: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionProxy {
    pub upstream: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rewrite_path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct Split {
    pub weight: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct Condition {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub header: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cookie: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub argument: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub variable: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct Match {
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub splits: Vec<Split>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ErrorPage {
    pub codes: Vec<u16>,
    #[serde(rename = "return", skip_serializing_if = "Option::is_none")]
    pub return_: Option<ActionReturn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<ActionRedirect>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct Tls {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<TlsRedirect>,
    #[serde(rename = "cert-manager", skip_serializing_if = "Option::is_none")]
    pub cert_manager: Option<CertManager>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsRedirect {
    pub enable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub based_on: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case", default)]
pub struct CertManager {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster_issuer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub issuer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub common_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualServerStatus {
    pub state: String,
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_endpoints: Vec<ExternalEndpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ExternalEndpoint {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    pub ports: String,
}

// === impl Route ===

impl Route {
    /// Iterates over every split group in the route, matches first.
    pub fn split_groups(&self) -> impl Iterator<Item = &[Split]> {
        self.matches
            .iter()
            .map(|m| m.splits.as_slice())
            .chain(std::iter::once(self.splits.as_slice()))
    }

    /// Returns the actions of the route, including those nested in splits and
    /// matches.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.action
            .iter()
            .chain(self.splits.iter().filter_map(|s| s.action.as_ref()))
            .chain(self.matches.iter().flat_map(|m| {
                m.action
                    .iter()
                    .chain(m.splits.iter().filter_map(|s| s.action.as_ref()))
            }))
    }
}

// === impl Action ===

impl Action {
    /// The upstream this action forwards to, if any.
    pub fn upstream(&self) -> Option<&str> {
        if !self.pass.is_empty() {
            return Some(&self.pass);
        }
        self.proxy.as_ref().map(|p| p.upstream.as_str())
    }
}
