use super::{
    is_dns1035_label, is_dns1123_label, is_dns1123_subdomain, validate_host, validate_port,
    validate_snippet, FieldErrors,
};
use crate::ClusterInfo;
use anyhow::Result;
use nginx_ingress_controller_k8s_api::configuration::{
    TransportServer, TCP_PROTOCOL, TLS_PASSTHROUGH_LISTENER_NAME,
    TLS_PASSTHROUGH_LISTENER_PROTOCOL, UDP_PROTOCOL,
};
use std::collections::BTreeSet;

const PROTOCOLS: [&str; 3] = [TCP_PROTOCOL, UDP_PROTOCOL, TLS_PASSTHROUGH_LISTENER_PROTOCOL];

pub fn validate_transport_server(ts: &TransportServer, cluster: &ClusterInfo) -> Result<()> {
    let spec = &ts.spec;
    let mut errs = FieldErrors::default();

    let listener = &spec.listener;
    let passthrough = listener.protocol == TLS_PASSTHROUGH_LISTENER_PROTOCOL;
    if listener.name.is_empty() {
        errs.required("spec.listener.name");
    } else if passthrough && listener.name != TLS_PASSTHROUGH_LISTENER_NAME {
        errs.invalid(
            "spec.listener.name",
            &listener.name,
            format!("must be '{}' for the {} protocol", TLS_PASSTHROUGH_LISTENER_NAME, listener.protocol),
        );
    } else if !passthrough && listener.name == TLS_PASSTHROUGH_LISTENER_NAME {
        errs.forbidden(
            "spec.listener.name",
            format!("'{}' is reserved", TLS_PASSTHROUGH_LISTENER_NAME),
        );
    } else if !passthrough && !is_dns1035_label(&listener.name) {
        errs.invalid("spec.listener.name", &listener.name, "must be a valid DNS-1035 label");
    }
    if listener.protocol.is_empty() {
        errs.required("spec.listener.protocol");
    } else if !PROTOCOLS.contains(&listener.protocol.as_str()) {
        errs.not_supported("spec.listener.protocol", &listener.protocol, &PROTOCOLS);
    }

    if passthrough {
        validate_host(&mut errs, "spec.host", &spec.host, false);
        if spec.tls.is_some() {
            errs.forbidden("spec.tls", "TLS termination is not supported with TLS passthrough");
        }
    } else if !spec.host.is_empty() {
        validate_host(&mut errs, "spec.host", &spec.host, false);
    }

    if let Some(tls) = &spec.tls {
        if listener.protocol == UDP_PROTOCOL {
            errs.forbidden("spec.tls", "TLS is not supported for the UDP protocol");
        } else if !is_dns1123_subdomain(&tls.secret) {
            errs.invalid("spec.tls.secret", &tls.secret, "must be a valid secret name");
        }
    }

    let mut names = BTreeSet::new();
    for (i, upstream) in spec.upstreams.iter().enumerate() {
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
        validate_port(&mut errs, &format!("{}.port", field), upstream.port.into());
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
        if upstream.health_check.as_ref().map(|h| h.enable).unwrap_or(false) {
            if let Some(hc) = &upstream.health_check {
                if hc.port != 0 {
                    validate_port(&mut errs, &format!("{}.healthCheck.port", field), hc.port.into());
                }
            }
        }
    }

    if let Some(params) = &spec.upstream_parameters {
        if listener.protocol != UDP_PROTOCOL
            && (params.udp_requests.is_some() || params.udp_responses.is_some())
        {
            errs.forbidden(
                "spec.upstreamParameters",
                "udpRequests and udpResponses are only supported for the UDP protocol",
            );
        }
    }

    match &spec.action {
        None => errs.required("spec.action"),
        Some(action) if action.pass.is_empty() => errs.required("spec.action.pass"),
        Some(action) if !names.contains(action.pass.as_str()) => errs.invalid(
            "spec.action.pass",
            &action.pass,
            "must specify an existing upstream",
        ),
        Some(_) => {}
    }

    validate_snippet(&mut errs, "spec.serverSnippets", &spec.server_snippets, cluster);
    validate_snippet(&mut errs, "spec.streamSnippets", &spec.stream_snippets, cluster);

    errs.into_result()
}
