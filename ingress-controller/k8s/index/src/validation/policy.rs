use super::{is_dns1123_subdomain, matches, validate_reference, FieldErrors};
use crate::{app_protect, ClusterInfo};
use anyhow::Result;
use nginx_ingress_controller_k8s_api::configuration::{
    policy::{AccessControl, ApiKey, EgressMtls, IngressMtls, JwtAuth, Oidc, RateLimit, Waf},
    Policy,
};
use std::net::IpAddr;

const VERIFY_CLIENT: [&str; 4] = ["on", "off", "optional", "optional_no_ca"];
const LOG_LEVELS: [&str; 4] = ["info", "notice", "warn", "error"];

pub fn validate_policy(policy: &Policy, cluster: &ClusterInfo) -> Result<()> {
    let spec = &policy.spec;
    let mut errs = FieldErrors::default();

    if spec.kinds().len() != 1 {
        let mut detail = "must specify exactly one of: `accessControl`, `rateLimit`, \
                          `ingressMTLS`, `egressMTLS`, `basicAuth`, `apiKey`"
            .to_string();
        if cluster.is_plus {
            detail.push_str(", `jwt`, `oidc`");
        }
        if cluster.app_protect_enabled {
            detail.push_str(", `waf`");
        }
        errs.invalid("spec", "", detail);
        return errs.into_result();
    }

    if let Some(ac) = &spec.access_control {
        validate_access_control(&mut errs, ac);
    }
    if let Some(rl) = &spec.rate_limit {
        validate_rate_limit(&mut errs, rl);
    }
    if let Some(jwt) = &spec.jwt_auth {
        if !cluster.is_plus {
            errs.forbidden("spec.jwt", "jwt secrets are only supported in NGINX Plus");
        } else {
            validate_jwt(&mut errs, jwt);
        }
    }
    if let Some(basic) = &spec.basic_auth {
        validate_secret_name(&mut errs, "spec.basicAuth.secret", &basic.secret);
    }
    if let Some(mtls) = &spec.ingress_mtls {
        validate_ingress_mtls(&mut errs, mtls);
    }
    if let Some(mtls) = &spec.egress_mtls {
        validate_egress_mtls(&mut errs, mtls);
    }
    if let Some(oidc) = &spec.oidc {
        if !cluster.oidc_enabled {
            errs.forbidden(
                "spec.oidc",
                "OIDC must be enabled via cli argument -enable-oidc to use OIDC policy",
            );
        } else if !cluster.is_plus {
            errs.forbidden("spec.oidc", "OIDC is only supported in NGINX Plus");
        } else {
            validate_oidc(&mut errs, oidc);
        }
    }
    if let Some(waf) = &spec.waf {
        if !cluster.app_protect_enabled {
            errs.forbidden(
                "spec.waf",
                "App Protect must be enabled via cli argument -enable-app-protect to use WAF policy",
            );
        } else {
            validate_waf(&mut errs, waf);
        }
    }
    if let Some(key) = &spec.api_key {
        validate_api_key(&mut errs, key);
    }

    errs.into_result()
}

fn validate_secret_name(errs: &mut FieldErrors, field: &str, name: &str) {
    if name.is_empty() {
        errs.required(field);
    } else if !is_dns1123_subdomain(name) {
        errs.invalid(field, name, "must be a valid secret name");
    }
}

fn validate_access_control(errs: &mut FieldErrors, ac: &AccessControl) {
    let (field, entries) = match (ac.allow.is_empty(), ac.deny.is_empty()) {
        (false, true) => ("spec.accessControl.allow", &ac.allow),
        (true, false) => ("spec.accessControl.deny", &ac.deny),
        _ => {
            errs.invalid(
                "spec.accessControl",
                "",
                "must specify exactly one of: `allow` or `deny`",
            );
            return;
        }
    };
    for (i, entry) in entries.iter().enumerate() {
        if !is_ip_or_cidr(entry) {
            errs.invalid(
                format!("{}[{}]", field, i),
                entry,
                "must be a CIDR or IP",
            );
        }
    }
}

fn is_ip_or_cidr(value: &str) -> bool {
    match value.split_once('/') {
        None => value.parse::<IpAddr>().is_ok(),
        Some((ip, prefix)) => match (ip.parse::<IpAddr>(), prefix.parse::<u8>()) {
            (Ok(IpAddr::V4(_)), Ok(p)) => p <= 32,
            (Ok(IpAddr::V6(_)), Ok(p)) => p <= 128,
            _ => false,
        },
    }
}

fn validate_rate_limit(errs: &mut FieldErrors, rl: &RateLimit) {
    if rl.rate.is_empty() {
        errs.required("spec.rateLimit.rate");
    } else if !matches(r"^\d+r/[sm]$", &rl.rate) {
        errs.invalid(
            "spec.rateLimit.rate",
            &rl.rate,
            "must consist of numeric characters followed by a valid rate suffix. 'r/s|r/m'",
        );
    }
    if rl.key.is_empty() {
        errs.required("spec.rateLimit.key");
    } else if rl.key.contains('"') {
        errs.invalid("spec.rateLimit.key", &rl.key, "must not contain '\"'");
    }
    if rl.zone_size.is_empty() {
        errs.required("spec.rateLimit.zoneSize");
    } else if !matches(r"^\d+[kKmM]?$", &rl.zone_size) {
        errs.invalid(
            "spec.rateLimit.zoneSize",
            &rl.zone_size,
            "must consist of numeric characters followed by a valid size suffix. 'k|K|m|M'",
        );
    }
    for (field, value) in [("delay", rl.delay), ("burst", rl.burst)] {
        if let Some(v) = value {
            if v < 0 {
                errs.invalid(format!("spec.rateLimit.{}", field), v, "must be non-negative");
            }
        }
    }
    if !rl.log_level.is_empty() && !LOG_LEVELS.contains(&rl.log_level.as_str()) {
        errs.not_supported("spec.rateLimit.logLevel", &rl.log_level, &LOG_LEVELS);
    }
    if let Some(code) = rl.reject_code {
        if !(400..=599).contains(&code) {
            errs.invalid("spec.rateLimit.rejectCode", code, "must be in the range 400..599");
        }
    }
}

fn validate_jwt(errs: &mut FieldErrors, jwt: &JwtAuth) {
    if jwt.realm.is_empty() {
        errs.required("spec.jwt.realm");
    }
    match (jwt.secret.is_empty(), jwt.jwks_uri.is_empty()) {
        (false, true) => validate_secret_name(errs, "spec.jwt.secret", &jwt.secret),
        (true, false) => {
            if !(jwt.jwks_uri.starts_with("http://") || jwt.jwks_uri.starts_with("https://")) {
                errs.invalid("spec.jwt.jwksURI", &jwt.jwks_uri, "must be a valid URI");
            }
        }
        (false, false) => errs.forbidden("spec.jwt.secret", "must not specify both `secret` and `jwksURI`"),
        (true, true) => errs.required_because("spec.jwt", "either `secret` or `jwksURI` must be set"),
    }
    if !jwt.key_cache.is_empty() && jwt.jwks_uri.is_empty() {
        errs.forbidden("spec.jwt.keyCache", "requires `jwksURI`");
    }
    if !jwt.token.is_empty() && !jwt.token.starts_with('$') {
        errs.invalid("spec.jwt.token", &jwt.token, "must start with '$'");
    }
}

fn validate_ingress_mtls(errs: &mut FieldErrors, mtls: &IngressMtls) {
    validate_secret_name(errs, "spec.ingressMTLS.clientCertSecret", &mtls.client_cert_secret);
    if !mtls.verify_client.is_empty() && !VERIFY_CLIENT.contains(&mtls.verify_client.as_str()) {
        errs.not_supported("spec.ingressMTLS.verifyClient", &mtls.verify_client, &VERIFY_CLIENT);
    }
    if let Some(depth) = mtls.verify_depth {
        if depth < 0 {
            errs.invalid("spec.ingressMTLS.verifyDepth", depth, "must be non-negative");
        }
    }
}

fn validate_egress_mtls(errs: &mut FieldErrors, mtls: &EgressMtls) {
    if !mtls.tls_secret.is_empty() {
        validate_secret_name(errs, "spec.egressMTLS.tlsSecret", &mtls.tls_secret);
    }
    if !mtls.trusted_cert_secret.is_empty() {
        validate_secret_name(errs, "spec.egressMTLS.trustedCertSecret", &mtls.trusted_cert_secret);
    }
    if mtls.verify_server && mtls.trusted_cert_secret.is_empty() {
        errs.required_because(
            "spec.egressMTLS.trustedCertSecret",
            "must be set when `verifyServer` is enabled",
        );
    }
    if let Some(depth) = mtls.verify_depth {
        if depth < 0 {
            errs.invalid("spec.egressMTLS.verifyDepth", depth, "must be non-negative");
        }
    }
}

fn validate_oidc(errs: &mut FieldErrors, oidc: &Oidc) {
    for (field, value) in [
        ("authEndpoint", &oidc.auth_endpoint),
        ("tokenEndpoint", &oidc.token_endpoint),
        ("jwksURI", &oidc.jwks_uri),
        ("clientID", &oidc.client_id),
        ("clientSecret", &oidc.client_secret),
    ] {
        if value.is_empty() {
            errs.required(format!("spec.oidc.{}", field));
        }
    }
    if !oidc.client_secret.is_empty() {
        validate_secret_name(errs, "spec.oidc.clientSecret", &oidc.client_secret);
    }
    if !oidc.scope.is_empty() && !oidc.scope.split('+').any(|s| s == "openid") {
        errs.invalid("spec.oidc.scope", &oidc.scope, "scope must include 'openid'");
    }
    if !oidc.redirect_uri.is_empty() && !oidc.redirect_uri.starts_with('/') {
        errs.invalid("spec.oidc.redirectURI", &oidc.redirect_uri, "must be a path");
    }
}

fn validate_waf(errs: &mut FieldErrors, waf: &Waf) {
    if !waf.ap_policy.is_empty() && !waf.ap_bundle.is_empty() {
        errs.forbidden("spec.waf.apPolicy", "must not specify both `apPolicy` and `apBundle`");
    }
    if !waf.ap_policy.is_empty() {
        validate_reference(errs, "spec.waf.apPolicy", &waf.ap_policy);
    }
    let logs = waf.security_log.iter().chain(&waf.security_logs);
    for (i, log) in logs.enumerate() {
        let field = format!("spec.waf.securityLogs[{}]", i);
        if !log.ap_log_conf.is_empty() {
            validate_reference(errs, &format!("{}.apLogConf", field), &log.ap_log_conf);
        }
        if log.log_dest.is_empty() {
            continue;
        }
        if let Err(error) = app_protect::validate_log_destination(&log.log_dest) {
            errs.invalid(format!("{}.logDest", field), &log.log_dest, error);
        }
    }
}

fn validate_api_key(errs: &mut FieldErrors, key: &ApiKey) {
    validate_secret_name(errs, "spec.apiKey.clientSecret", &key.client_secret);
    match &key.supplied_in {
        Some(s) if !s.header.is_empty() || !s.query.is_empty() => {}
        _ => errs.required_because(
            "spec.apiKey.suppliedIn",
            "at least one header or query parameter must be set",
        ),
    }
}
