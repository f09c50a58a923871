//! Annotations recognised on Ingress resources.

pub const INGRESS_CLASS: &str = "kubernetes.io/ingress.class";

pub const MERGEABLE_INGRESS_TYPE: &str = "nginx.org/mergeable-ingress-type";
pub const MERGEABLE_MASTER: &str = "master";
pub const MERGEABLE_MINION: &str = "minion";

pub const HEALTH_CHECKS: &str = "nginx.com/health-checks";
pub const USE_CLUSTER_IP: &str = "nginx.org/use-cluster-ip";
pub const JWT_KEY: &str = "nginx.com/jwt-key";
pub const BASIC_AUTH_SECRET: &str = "nginx.org/basic-auth-secret";
pub const LIMIT_REQ_SCALE: &str = "nginx.org/limit-req-scale";

pub const APP_PROTECT_POLICY: &str = "appprotect.f5.com/app-protect-policy";
pub const APP_PROTECT_SECURITY_LOG: &str = "appprotect.f5.com/app-protect-security-log";
pub const APP_PROTECT_SECURITY_LOG_DESTINATION: &str =
    "appprotect.f5.com/app-protect-security-log-destination";
pub const APP_PROTECT_DOS_RESOURCE: &str = "appprotectdos.f5.com/app-protect-dos-resource";

/// Returns true if the annotation is set to `"true"`.
pub fn is_true(annotations: &std::collections::BTreeMap<String, String>, key: &str) -> bool {
    annotations.get(key).map(|v| v == "true").unwrap_or(false)
}
