use super::{
    is_dns1035_label, is_dns1123_label, is_dns1123_subdomain, validate_host, validate_reference,
    validate_snippet, FieldErrors,
};
use crate::ClusterInfo;
use anyhow::Result;
use nginx_ingress_controller_k8s_api::configuration::{
    virtual_server::ActionRedirect, Action, Match, PolicyReference, Route, Split, Upstream,
    VirtualServer, VirtualServerRoute,
};
use std::collections::BTreeSet;

const LB_METHODS: [&str; 8] = [
    "round_robin",
    "least_conn",
    "ip_hash",
    "random",
    "random two",
    "random two least_conn",
    "hash",
    "least_time",
];

const REDIRECT_CODES: [u16; 4] = [301, 302, 307, 308];

pub fn validate_virtual_server(vs: &VirtualServer, cluster: &ClusterInfo) -> Result<()> {
    let spec = &vs.spec;
    let mut errs = FieldErrors::default();

    validate_host(&mut errs, "spec.host", &spec.host, false);

    if let Some(tls) = &spec.tls {
        if !tls.secret.is_empty() && !is_dns1123_subdomain(&tls.secret) {
            errs.invalid("spec.tls.secret", &tls.secret, "must be a valid secret name");
        }
        if let Some(redirect) = &tls.redirect {
            if let Some(code) = redirect.code {
                if !REDIRECT_CODES.contains(&code) {
                    errs.invalid("spec.tls.redirect.code", code, "status code out of accepted range");
                }
            }
            match redirect.based_on.as_str() {
                "" | "scheme" | "x-forwarded-proto" => {}
                other => errs.not_supported(
                    "spec.tls.redirect.basedOn",
                    other,
                    &["scheme", "x-forwarded-proto"],
                ),
            }
        }
        if tls.cert_manager.is_some() && !cluster.cert_manager_enabled {
            errs.forbidden("spec.tls.cert-manager", "cert-manager support is not enabled");
        }
    }

    if let Some(listener) = &spec.listener {
        if !listener.https.is_empty() && spec.tls.is_none() {
            errs.required_because("spec.tls", "an https listener requires TLS configuration");
        }
    }

    if spec.external_dns.as_ref().map(|d| d.enable).unwrap_or(false)
        && !cluster.external_dns_enabled
    {
        errs.forbidden("spec.externalDNS", "external-dns support is not enabled");
    }
    if spec.internal_route && !cluster.internal_routes_enabled {
        errs.forbidden("spec.internalRoute", "internal routes are not enabled");
    }
    validate_dos(&mut errs, "spec.dos", &spec.dos, cluster);
    validate_policy_references(&mut errs, "spec.policies", &spec.policies);
    validate_snippet(&mut errs, "spec.http-snippets", &spec.http_snippets, cluster);
    validate_snippet(&mut errs, "spec.server-snippets", &spec.server_snippets, cluster);

    let upstreams = validate_upstreams(&mut errs, &spec.upstreams, cluster);

    let mut paths = BTreeSet::new();
    for (i, route) in spec.routes.iter().enumerate() {
        let field = format!("spec.routes[{}]", i);
        if !route.path.is_empty() && !paths.insert(route.path.as_str()) {
            errs.duplicate(format!("{}.path", field), &route.path);
        }
        validate_route(&mut errs, &field, route, &upstreams, true, cluster);
    }

    errs.into_result()
}

pub fn validate_virtual_server_route(
    vsr: &VirtualServerRoute,
    cluster: &ClusterInfo,
) -> Result<()> {
    let spec = &vsr.spec;
    let mut errs = FieldErrors::default();

    validate_host(&mut errs, "spec.host", &spec.host, false);
    let upstreams = validate_upstreams(&mut errs, &spec.upstreams, cluster);

    let mut paths = BTreeSet::new();
    for (i, route) in spec.subroutes.iter().enumerate() {
        let field = format!("spec.subroutes[{}]", i);
        if !route.path.is_empty() && !paths.insert(route.path.as_str()) {
            errs.duplicate(format!("{}.path", field), &route.path);
        }
        validate_route(&mut errs, &field, route, &upstreams, false, cluster);
    }

    errs.into_result()
}

/// Validates that a VirtualServerRoute fits the VirtualServer route that
/// references it.
pub fn validate_virtual_server_route_for_virtual_server(
    vsr: &VirtualServerRoute,
    host: &str,
    path_prefix: &str,
) -> Result<()> {
    let mut errs = FieldErrors::default();

    if vsr.spec.host != host {
        errs.invalid(
            "spec.host",
            &vsr.spec.host,
            format!("must be equal to '{}'", host),
        );
    }

    for (i, route) in vsr.spec.subroutes.iter().enumerate() {
        let field = format!("spec.subroutes[{}].path", i);
        let is_regex = path_prefix.starts_with('~') || path_prefix.starts_with('=');
        if is_regex {
            if route.path != path_prefix {
                errs.invalid(&field, &route.path, format!("must be equal to '{}'", path_prefix));
            }
        } else if !route.path.starts_with(path_prefix) {
            errs.invalid(&field, &route.path, format!("must start with '{}'", path_prefix));
        }
    }

    errs.into_result()
}

fn validate_dos(errs: &mut FieldErrors, field: &str, dos: &str, cluster: &ClusterInfo) {
    if dos.is_empty() {
        return;
    }
    if !cluster.app_protect_dos_enabled {
        errs.forbidden(field, "App Protect Dos is not enabled");
        return;
    }
    validate_reference(errs, field, dos);
}

fn validate_policy_references(errs: &mut FieldErrors, field: &str, policies: &[PolicyReference]) {
    let mut seen = BTreeSet::new();
    for (i, reference) in policies.iter().enumerate() {
        let field = format!("{}[{}]", field, i);
        if reference.name.is_empty() {
            errs.required(format!("{}.name", field));
        } else if !is_dns1123_subdomain(&reference.name) {
            errs.invalid(format!("{}.name", field), &reference.name, "must be a valid name");
        }
        if !reference.namespace.is_empty() && !is_dns1123_label(&reference.namespace) {
            errs.invalid(
                format!("{}.namespace", field),
                &reference.namespace,
                "must be a valid namespace",
            );
        }
        if !seen.insert((reference.namespace.as_str(), reference.name.as_str())) {
            errs.duplicate(&field, format!("{}/{}", reference.namespace, reference.name));
        }
    }
}

fn validate_upstreams<'u>(
    errs: &mut FieldErrors,
    upstreams: &'u [Upstream],
    cluster: &ClusterInfo,
) -> BTreeSet<&'u str> {
    let mut names = BTreeSet::new();
    for (i, upstream) in upstreams.iter().enumerate() {
        let field = format!("spec.upstreams[{}]", i);
        if upstream.name.is_empty() {
            errs.required(format!("{}.name", field));
        } else if !is_dns1035_label(&upstream.name) {
            errs.invalid(
                format!("{}.name", field),
                &upstream.name,
                "must be a valid DNS-1035 label",
            );
        } else if !names.insert(upstream.name.as_str()) {
            errs.duplicate(format!("{}.name", field), &upstream.name);
        }

        if upstream.service.is_empty() {
            errs.required(format!("{}.service", field));
        } else if !is_dns1123_label(&upstream.service) {
            errs.invalid(
                format!("{}.service", field),
                &upstream.service,
                "must be a valid service name",
            );
        }
        if upstream.port == 0 {
            errs.invalid(
                format!("{}.port", field),
                upstream.port,
                "must be between 1 and 65535, inclusive",
            );
        }
        for (key, value) in &upstream.subselector {
            if key.is_empty() || value.is_empty() {
                errs.invalid(
                    format!("{}.subselector", field),
                    format!("{}={}", key, value),
                    "labels must have a non-empty key and value",
                );
            }
        }
        if !upstream.lb_method.is_empty()
            && !LB_METHODS.iter().any(|m| upstream.lb_method.starts_with(m))
        {
            errs.not_supported(format!("{}.lb-method", field), &upstream.lb_method, &LB_METHODS);
        }
        if upstream.health_check.as_ref().map(|h| h.enable).unwrap_or(false) && !cluster.is_plus {
            errs.forbidden(
                format!("{}.healthCheck", field),
                "active health checks are only supported in NGINX Plus",
            );
        }
        if upstream.session_cookie.as_ref().map(|c| c.enable).unwrap_or(false) && !cluster.is_plus
        {
            errs.forbidden(
                format!("{}.sessionCookie", field),
                "sticky cookies are only supported in NGINX Plus",
            );
        }
        if !upstream.backup.is_empty() || upstream.backup_port.is_some() {
            if !cluster.is_plus {
                errs.forbidden(
                    format!("{}.backup", field),
                    "backup service is only supported in NGINX Plus",
                );
            } else if upstream.backup.is_empty() {
                errs.required(format!("{}.backup", field));
            } else if upstream.backup_port.is_none() {
                errs.required(format!("{}.backupPort", field));
            }
        }
    }
    names
}

fn validate_route(
    errs: &mut FieldErrors,
    field: &str,
    route: &Route,
    upstreams: &BTreeSet<&str>,
    allow_route_reference: bool,
    cluster: &ClusterInfo,
) {
    let path_field = format!("{}.path", field);
    if route.path.is_empty() {
        errs.required(&path_field);
    } else if !(route.path.starts_with('/') || route.path.starts_with('~') || route.path.starts_with('='))
    {
        errs.invalid(&path_field, &route.path, "must start with '/', '~' or '='");
    } else if route.path.contains(['{', '}', ';']) && !route.path.starts_with('~') {
        errs.invalid(&path_field, &route.path, "must not contain '{', '}' or ';'");
    }

    validate_policy_references(errs, &format!("{}.policies", field), &route.policies);
    validate_snippet(
        errs,
        &format!("{}.location-snippets", field),
        &route.location_snippets,
        cluster,
    );
    validate_dos(errs, &format!("{}.dos", field), &route.dos, cluster);

    let defined = [
        route.action.is_some(),
        !route.splits.is_empty(),
        !route.route.is_empty(),
    ]
    .into_iter()
    .filter(|set| *set)
    .count();
    let expected = if allow_route_reference {
        "must specify exactly one of: `action`, `splits` or `route`"
    } else {
        "must specify exactly one of: `action` or `splits`"
    };
    if defined != 1 {
        errs.invalid(field, &route.path, expected);
    }

    if !route.route.is_empty() {
        if allow_route_reference {
            validate_reference(errs, &format!("{}.route", field), &route.route);
            if !route.matches.is_empty() {
                errs.forbidden(format!("{}.matches", field), "cannot be used with `route`");
            }
        } else {
            errs.forbidden(format!("{}.route", field), "is not supported in subroutes");
        }
    }

    if let Some(action) = &route.action {
        validate_action(errs, &format!("{}.action", field), action, upstreams);
    }
    validate_splits(errs, &format!("{}.splits", field), &route.splits, upstreams);
    for (i, m) in route.matches.iter().enumerate() {
        validate_match(errs, &format!("{}.matches[{}]", field, i), m, upstreams);
    }
}

fn validate_match(errs: &mut FieldErrors, field: &str, m: &Match, upstreams: &BTreeSet<&str>) {
    if m.conditions.is_empty() {
        errs.required(format!("{}.conditions", field));
    }
    for (i, c) in m.conditions.iter().enumerate() {
        let set = [&c.header, &c.cookie, &c.argument, &c.variable]
            .into_iter()
            .filter(|v| !v.is_empty())
            .count();
        if set != 1 {
            errs.invalid(
                format!("{}.conditions[{}]", field, i),
                "",
                "must specify exactly one of: `header`, `cookie`, `argument` or `variable`",
            );
        }
    }
    match (&m.action, m.splits.is_empty()) {
        (Some(action), true) => validate_action(errs, &format!("{}.action", field), action, upstreams),
        (None, false) => validate_splits(errs, &format!("{}.splits", field), &m.splits, upstreams),
        _ => errs.invalid(field, "", "must specify exactly one of: `action` or `splits`"),
    }
}

fn validate_splits(errs: &mut FieldErrors, field: &str, splits: &[Split], upstreams: &BTreeSet<&str>) {
    if splits.is_empty() {
        return;
    }
    if splits.len() < 2 {
        errs.invalid(field, splits.len(), "must include at least 2 splits");
    }
    let mut total = 0;
    for (i, split) in splits.iter().enumerate() {
        let split_field = format!("{}[{}]", field, i);
        if !(0..=100).contains(&split.weight) {
            errs.invalid(
                format!("{}.weight", split_field),
                split.weight,
                "must be in the range 0..100",
            );
        }
        total += split.weight;
        match &split.action {
            Some(action) => {
                validate_action(errs, &format!("{}.action", split_field), action, upstreams)
            }
            None => errs.required(format!("{}.action", split_field)),
        }
    }
    if total != 100 {
        errs.invalid(field, total, "the sum of the weights of all splits must be equal to 100");
    }
}

fn validate_action(errs: &mut FieldErrors, field: &str, action: &Action, upstreams: &BTreeSet<&str>) {
    let set = [
        !action.pass.is_empty(),
        action.redirect.is_some(),
        action.return_.is_some(),
        action.proxy.is_some(),
    ]
    .into_iter()
    .filter(|set| *set)
    .count();
    if set != 1 {
        errs.invalid(
            field,
            "",
            "must specify exactly one of: `pass`, `redirect`, `return` or `proxy`",
        );
        return;
    }

    if let Some(upstream) = action.upstream() {
        if !upstreams.contains(upstream) {
            let which = if action.pass.is_empty() { "proxy.upstream" } else { "pass" };
            errs.invalid(
                format!("{}.{}", field, which),
                upstream,
                "must specify an existing upstream",
            );
        }
    }
    if let Some(redirect) = &action.redirect {
        validate_redirect(errs, &format!("{}.redirect", field), redirect);
    }
    if let Some(ret) = &action.return_ {
        if let Some(code) = ret.code {
            if !(200..=599).contains(&code) || (300..400).contains(&code) {
                errs.invalid(format!("{}.return.code", field), code, "status code out of accepted range");
            }
        }
    }
}

fn validate_redirect(errs: &mut FieldErrors, field: &str, redirect: &ActionRedirect) {
    if redirect.url.is_empty() {
        errs.required(format!("{}.url", field));
    } else if !(redirect.url.starts_with("http://")
        || redirect.url.starts_with("https://")
        || redirect.url.starts_with("${scheme}://"))
    {
        errs.invalid(format!("{}.url", field), &redirect.url, "must contain the scheme");
    }
    if let Some(code) = redirect.code {
        if !REDIRECT_CODES.contains(&code) {
            errs.invalid(format!("{}.code", field), code, "status code out of accepted range");
        }
    }
}
