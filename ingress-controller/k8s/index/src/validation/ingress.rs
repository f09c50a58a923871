use super::{validate_host, validate_port, validate_reference, FieldErrors};
use crate::ClusterInfo;
use anyhow::Result;
use nginx_ingress_controller_k8s_api::{
    annotations::{
        self, APP_PROTECT_DOS_RESOURCE, APP_PROTECT_POLICY, APP_PROTECT_SECURITY_LOG,
        BASIC_AUTH_SECRET, HEALTH_CHECKS, JWT_KEY, MERGEABLE_INGRESS_TYPE, MERGEABLE_MASTER,
        MERGEABLE_MINION, USE_CLUSTER_IP,
    },
    Ingress, IngressRule, ResourceExt,
};
use std::collections::{BTreeMap, BTreeSet};

const HEALTH_CHECKS_MANDATORY: &str = "nginx.com/health-checks-mandatory";
const HEALTH_CHECKS_MANDATORY_QUEUE: &str = "nginx.com/health-checks-mandatory-queue";
const SLOW_START: &str = "nginx.com/slow-start";
const JWT_REALM: &str = "nginx.com/jwt-realm";
const JWT_TOKEN: &str = "nginx.com/jwt-token";
const JWT_LOGIN_URL: &str = "nginx.com/jwt-login-url";
const SERVER_TOKENS: &str = "nginx.org/server-tokens";
const REDIRECT_TO_HTTPS: &str = "nginx.org/redirect-to-https";
const SSL_REDIRECT: &str = "ingress.kubernetes.io/ssl-redirect";
const PROXY_BUFFERING: &str = "nginx.org/proxy-buffering";
const HSTS: &str = "nginx.org/hsts";
const HSTS_MAX_AGE: &str = "nginx.org/hsts-max-age";
const HSTS_INCLUDE_SUBDOMAINS: &str = "nginx.org/hsts-include-subdomains";
const HSTS_BEHIND_PROXY: &str = "nginx.org/hsts-behind-proxy";
const KEEPALIVE: &str = "nginx.org/keepalive";
const MAX_FAILS: &str = "nginx.org/max-fails";
const MAX_CONNS: &str = "nginx.org/max-conns";
const LISTEN_PORTS: &str = "nginx.org/listen-ports";
const LISTEN_PORTS_SSL: &str = "nginx.org/listen-ports-ssl";
const SERVER_SNIPPETS: &str = "nginx.org/server-snippets";
const LOCATION_SNIPPETS: &str = "nginx.org/location-snippets";
const APP_PROTECT_ENABLE: &str = "appprotect.f5.com/app-protect-enable";
const APP_PROTECT_SECURITY_LOG_ENABLE: &str = "appprotect.f5.com/app-protect-security-log-enable";
const APP_PROTECT_DOS_ENABLE: &str = "appprotectdos.f5.com/app-protect-dos-enable";

const PLUS_ONLY: [&str; 7] = [
    HEALTH_CHECKS,
    HEALTH_CHECKS_MANDATORY,
    HEALTH_CHECKS_MANDATORY_QUEUE,
    SLOW_START,
    JWT_REALM,
    JWT_KEY,
    JWT_TOKEN,
];

const BOOLEANS: [&str; 11] = [
    REDIRECT_TO_HTTPS,
    SSL_REDIRECT,
    PROXY_BUFFERING,
    HSTS,
    HSTS_INCLUDE_SUBDOMAINS,
    HSTS_BEHIND_PROXY,
    HEALTH_CHECKS,
    HEALTH_CHECKS_MANDATORY,
    USE_CLUSTER_IP,
    APP_PROTECT_ENABLE,
    APP_PROTECT_SECURITY_LOG_ENABLE,
];

const INTEGERS: [&str; 4] = [KEEPALIVE, MAX_FAILS, MAX_CONNS, HEALTH_CHECKS_MANDATORY_QUEUE];

/// Validates an Ingress, including its annotations and its shape as a
/// mergeable master or minion.
pub fn validate_ingress(ingress: &Ingress, cluster: &ClusterInfo) -> Result<()> {
    let mut errs = FieldErrors::default();
    validate_annotations(&mut errs, ingress.annotations(), cluster);

    let spec = ingress.spec.clone().unwrap_or_default();
    let rules = spec.rules.unwrap_or_default();
    if rules.is_empty() {
        errs.required("spec.rules");
        return errs.into_result();
    }

    let mut hosts = BTreeSet::new();
    for (i, rule) in rules.iter().enumerate() {
        let path = format!("spec.rules[{}].host", i);
        let host = rule.host.as_deref().unwrap_or_default();
        validate_host(&mut errs, &path, host, true);
        if !host.is_empty() && !hosts.insert(host) {
            errs.duplicate(&path, host);
        }
        validate_paths(&mut errs, i, rule);
    }

    match ingress.annotations().get(MERGEABLE_INGRESS_TYPE).map(String::as_str) {
        None => {}
        Some(MERGEABLE_MASTER) => {
            if rules.len() != 1 {
                errs.too_many("spec.rules", rules.len(), 1);
            }
            for (i, rule) in rules.iter().enumerate() {
                let paths = paths(rule);
                if paths > 0 {
                    errs.too_many(format!("spec.rules[{}].http.paths", i), paths, 0);
                }
            }
        }
        Some(MERGEABLE_MINION) => {
            if spec.tls.map(|tls| !tls.is_empty()).unwrap_or(false) {
                errs.forbidden("spec.tls", "minions cannot have TLS configuration");
            }
            if rules.len() != 1 {
                errs.too_many("spec.rules", rules.len(), 1);
            }
            for (i, rule) in rules.iter().enumerate() {
                if paths(rule) == 0 {
                    errs.required_because(
                        format!("spec.rules[{}].http.paths", i),
                        "must include at least one path",
                    );
                }
            }
        }
        Some(other) => errs.invalid(
            format!("annotations.{}", MERGEABLE_INGRESS_TYPE),
            other,
            "must be one of: 'master' or 'minion'",
        ),
    }

    errs.into_result()
}

fn paths(rule: &IngressRule) -> usize {
    rule.http.as_ref().map(|http| http.paths.len()).unwrap_or(0)
}

fn validate_paths(errs: &mut FieldErrors, rule_index: usize, rule: &IngressRule) {
    let Some(http) = &rule.http else { return };
    for (i, p) in http.paths.iter().enumerate() {
        let path = p.path.as_deref().unwrap_or_default();
        let field = format!("spec.rules[{}].http.paths[{}].path", rule_index, i);
        match p.path_type.as_str() {
            "Exact" | "Prefix" if !path.starts_with('/') => {
                errs.invalid(&field, path, "must start with '/'");
            }
            _ => {}
        }
        if path.contains(['{', '}', ';']) {
            errs.invalid(&field, path, "must not contain '{', '}' or ';'");
        }
        if let Some(backend) = &p.backend.service {
            if backend.name.is_empty() {
                errs.required(format!(
                    "spec.rules[{}].http.paths[{}].backend.service.name",
                    rule_index, i
                ));
            }
        }
    }
}

fn validate_annotations(
    errs: &mut FieldErrors,
    annotations: &BTreeMap<String, String>,
    cluster: &ClusterInfo,
) {
    for (key, value) in annotations {
        let field = format!("annotations.{}", key);

        if !cluster.is_plus && (PLUS_ONLY.contains(&key.as_str()) || key == JWT_LOGIN_URL) {
            errs.forbidden(&field, "annotation requires NGINX Plus");
            continue;
        }

        if BOOLEANS.contains(&key.as_str()) || (key == SERVER_TOKENS && !cluster.is_plus) {
            if value.parse::<bool>().is_err() {
                errs.invalid(&field, value, "must be a boolean");
            }
        }

        if INTEGERS.contains(&key.as_str()) && value.parse::<i64>().is_err() {
            errs.invalid(&field, value, "must be an integer");
        }

        match key.as_str() {
            LISTEN_PORTS | LISTEN_PORTS_SSL => {
                for port in value.split(',') {
                    match port.trim().parse::<i64>() {
                        Ok(port) => validate_port(errs, &field, port),
                        Err(_) => errs.invalid(&field, value, "must be a comma-separated list of ports"),
                    }
                }
            }
            HSTS_MAX_AGE | HSTS_INCLUDE_SUBDOMAINS | HSTS_BEHIND_PROXY => {
                if !annotations::is_true(annotations, HSTS) {
                    errs.forbidden(
                        &field,
                        format!("related annotation {}: must be true", HSTS),
                    );
                }
            }
            SERVER_SNIPPETS | LOCATION_SNIPPETS => {
                super::validate_snippet(errs, &field, value, cluster);
            }
            APP_PROTECT_ENABLE | APP_PROTECT_POLICY | APP_PROTECT_SECURITY_LOG
            | APP_PROTECT_SECURITY_LOG_ENABLE => {
                if !cluster.app_protect_enabled {
                    errs.forbidden(&field, "annotation requires AppProtect");
                }
            }
            APP_PROTECT_DOS_ENABLE | APP_PROTECT_DOS_RESOURCE => {
                if !cluster.app_protect_dos_enabled {
                    errs.forbidden(&field, "annotation requires AppProtectDos");
                } else if key == APP_PROTECT_DOS_RESOURCE {
                    validate_reference(errs, &field, value);
                }
            }
            BASIC_AUTH_SECRET | JWT_KEY => validate_reference(errs, &field, value),
            _ => {}
        }
    }
}
