use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Binds an App-Protect DoS policy and log configuration to a protected
/// resource.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "appprotectdos.f5.com",
    version = "v1beta1",
    kind = "DosProtectedResource",
    shortname = "pr",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase", default)]
pub struct DosProtectedResourceSpec {
    pub enable: bool,
    pub name: String,
    /// A `namespace/name` reference to an APDosPolicy.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ap_dos_policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dos_security_log: Option<DosSecurityLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ap_dos_monitor: Option<ApDosMonitor>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dos_access_log_dest: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DosSecurityLog {
    pub enable: bool,
    /// A `namespace/name` reference to an APDosLogConf.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ap_dos_log_conf: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dos_log_dest: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ApDosMonitor {
    pub uri: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}
