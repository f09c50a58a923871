use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Attaches exactly one kind of behaviour to VirtualServer routes.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.nginx.org",
    version = "v1",
    kind = "Policy",
    shortname = "pol",
    status = "PolicyStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySpec {
    #[serde(rename = "ingressClassName", skip_serializing_if = "String::is_empty")]
    pub ingress_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_control: Option<AccessControl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    #[serde(rename = "jwt", skip_serializing_if = "Option::is_none")]
    pub jwt_auth: Option<JwtAuth>,
    #[serde(rename = "basicAuth", skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
    #[serde(rename = "ingressMTLS", skip_serializing_if = "Option::is_none")]
    pub ingress_mtls: Option<IngressMtls>,
    #[serde(rename = "egressMTLS", skip_serializing_if = "Option::is_none")]
    pub egress_mtls: Option<EgressMtls>,
    #[serde(rename = "oidc", skip_serializing_if = "Option::is_none")]
    pub oidc: Option<Oidc>,
    #[serde(rename = "waf", skip_serializing_if = "Option::is_none")]
    pub waf: Option<Waf>,
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKey>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct AccessControl {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimit {
    pub rate: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_delay: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst: Option<i32>,
    pub zone_size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_code: Option<u16>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub scale: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct JwtAuth {
    pub realm: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secret: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(rename = "jwksURI", skip_serializing_if = "String::is_empty")]
    pub jwks_uri: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key_cache: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct BasicAuth {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub realm: String,
    pub secret: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressMtls {
    pub client_cert_secret: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub crl_file_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub verify_client: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_depth: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct EgressMtls {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_secret: String,
    pub verify_server: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_depth: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocols: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_reuse: Option<bool>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ciphers: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trusted_cert_secret: String,
    pub server_name: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssl_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Oidc {
    pub auth_endpoint: String,
    pub token_endpoint: String,
    #[serde(rename = "jwksURI")]
    pub jwks_uri: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_secret: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(rename = "redirectURI", skip_serializing_if = "String::is_empty")]
    pub redirect_uri: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub end_session_endpoint: String,
    #[serde(rename = "postLogoutRedirectURI", skip_serializing_if = "String::is_empty")]
    pub post_logout_redirect_uri: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub auth_extra_args: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub access_token_enable: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub pkce_enable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Waf {
    pub enable: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ap_policy: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ap_bundle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_log: Option<SecurityLog>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_logs: Vec<SecurityLog>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityLog {
    pub enable: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ap_log_conf: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ap_log_bundle: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub log_dest: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplied_in: Option<SuppliedIn>,
    pub client_secret: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct SuppliedIn {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct PolicyStatus {
    pub state: String,
    pub reason: String,
    pub message: String,
}

/// The kind of behaviour a policy configures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKind {
    AccessControl,
    RateLimit,
    Jwt,
    BasicAuth,
    IngressMtls,
    EgressMtls,
    Oidc,
    Waf,
    ApiKey,
}

// === impl PolicySpec ===

impl PolicySpec {
    /// Lists every kind configured in this spec. A valid policy has exactly one.
    pub fn kinds(&self) -> Vec<PolicyKind> {
        let mut kinds = Vec::new();
        if self.access_control.is_some() {
            kinds.push(PolicyKind::AccessControl);
        }
        if self.rate_limit.is_some() {
            kinds.push(PolicyKind::RateLimit);
        }
        if self.jwt_auth.is_some() {
            kinds.push(PolicyKind::Jwt);
        }
        if self.basic_auth.is_some() {
            kinds.push(PolicyKind::BasicAuth);
        }
        if self.ingress_mtls.is_some() {
            kinds.push(PolicyKind::IngressMtls);
        }
        if self.egress_mtls.is_some() {
            kinds.push(PolicyKind::EgressMtls);
        }
        if self.oidc.is_some() {
            kinds.push(PolicyKind::Oidc);
        }
        if self.waf.is_some() {
            kinds.push(PolicyKind::Waf);
        }
        if self.api_key.is_some() {
            kinds.push(PolicyKind::ApiKey);
        }
        kinds
    }

    /// Names of the secrets referenced by this policy, in the policy's namespace.
    pub fn secret_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(jwt) = &self.jwt_auth {
            names.push(jwt.secret.as_str());
        }
        if let Some(basic) = &self.basic_auth {
            names.push(basic.secret.as_str());
        }
        if let Some(mtls) = &self.ingress_mtls {
            names.push(mtls.client_cert_secret.as_str());
        }
        if let Some(mtls) = &self.egress_mtls {
            names.push(mtls.tls_secret.as_str());
            names.push(mtls.trusted_cert_secret.as_str());
        }
        if let Some(oidc) = &self.oidc {
            names.push(oidc.client_secret.as_str());
        }
        if let Some(key) = &self.api_key {
            names.push(key.client_secret.as_str());
        }
        names.retain(|n| !n.is_empty());
        names
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::AccessControl => "accessControl",
            Self::RateLimit => "rateLimit",
            Self::Jwt => "jwt",
            Self::BasicAuth => "basicAuth",
            Self::IngressMtls => "ingressMTLS",
            Self::EgressMtls => "egressMTLS",
            Self::Oidc => "oidc",
            Self::Waf => "waf",
            Self::ApiKey => "apiKey",
        })
    }
}
