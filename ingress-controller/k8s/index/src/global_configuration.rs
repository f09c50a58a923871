//! Listener validation for the GlobalConfiguration.

use crate::validation::is_dns1035_label;
use nginx_ingress_controller_k8s_api::configuration::{
    GlobalConfiguration, Listener, HTTP_PROTOCOL, TCP_PROTOCOL, TLS_PASSTHROUGH_LISTENER_NAME,
    UDP_PROTOCOL,
};
use std::{
    collections::BTreeSet,
    net::{Ipv4Addr, Ipv6Addr},
};

const PROTOCOLS: [&str; 3] = [TCP_PROTOCOL, UDP_PROTOCOL, HTTP_PROTOCOL];

/// A listener that was dropped from a GlobalConfiguration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("spec.listeners[{index}]: listener {name:?}: {reason}")]
pub struct ListenerError {
    pub index: usize,
    pub name: String,
    pub reason: String,
}

/// Every listener dropped from a GlobalConfiguration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{}", display_all(.0))]
pub struct InvalidListeners(pub Vec<ListenerError>);

/// Validates every listener and returns those that are usable, in
/// declaration order, together with the violations of the rest.
///
/// Listeners are accepted first-come: a listener conflicting with an
/// earlier accepted one is dropped.
pub fn valid_listeners(
    gc: &GlobalConfiguration,
    forbidden_ports: &BTreeSet<u16>,
) -> (Vec<Listener>, Option<InvalidListeners>) {
    let mut accepted: Vec<Listener> = Vec::new();
    let mut errors = Vec::new();

    for (index, listener) in gc.spec.listeners.iter().enumerate() {
        let reject = |reason: String| ListenerError {
            index,
            name: listener.name.clone(),
            reason,
        };
        match validate_listener(listener, forbidden_ports)
            .and_then(|()| check_conflicts(listener, &accepted))
        {
            Ok(()) => accepted.push(listener.clone()),
            Err(reason) => errors.push(reject(reason)),
        }
    }

    let errors = if errors.is_empty() {
        None
    } else {
        Some(InvalidListeners(errors))
    };
    (accepted, errors)
}

fn validate_listener(listener: &Listener, forbidden_ports: &BTreeSet<u16>) -> Result<(), String> {
    if listener.name.is_empty() {
        return Err("name: Required value".to_string());
    }
    if listener.name == TLS_PASSTHROUGH_LISTENER_NAME {
        return Err(format!("name: Forbidden: '{}' is reserved", TLS_PASSTHROUGH_LISTENER_NAME));
    }
    if !is_dns1035_label(&listener.name) {
        return Err("name: Invalid value: must be a valid DNS-1035 label".to_string());
    }
    if !PROTOCOLS.contains(&listener.protocol.as_str()) {
        return Err(format!(
            "protocol: Unsupported value: {:?}: supported values: \"TCP\", \"UDP\", \"HTTP\"",
            listener.protocol
        ));
    }
    let port = u16::try_from(listener.port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| {
            format!(
                "port: Invalid value: {}: must be between 1 and 65535, inclusive",
                listener.port
            )
        })?;
    if forbidden_ports.contains(&port) {
        return Err(format!("port: Forbidden: port {} is forbidden", port));
    }
    if !listener.ipv4.is_empty() && listener.ipv4.parse::<Ipv4Addr>().is_err() {
        return Err(format!(
            "ipv4: Invalid value: {:?}: must be a valid IPv4 address",
            listener.ipv4
        ));
    }
    if !listener.ipv6.is_empty() && listener.ipv6.parse::<Ipv6Addr>().is_err() {
        return Err(format!(
            "ipv6: Invalid value: {:?}: must be a valid IPv6 address",
            listener.ipv6
        ));
    }
    Ok(())
}

fn check_conflicts(listener: &Listener, accepted: &[Listener]) -> Result<(), String> {
    for other in accepted {
        if other.name == listener.name {
            return Err(format!("name: Duplicate value: {:?}", listener.name));
        }
        if other.port != listener.port || !addresses_overlap(listener, other) {
            continue;
        }
        let is_udp = |l: &Listener| l.protocol == UDP_PROTOCOL;
        if is_udp(listener) == is_udp(other) {
            return Err(format!(
                "port: Duplicate value: {}: port is already used by listener {:?} ({}); HTTP and \
                 TCP listeners cannot share a port, and UDP listeners can only share a port with \
                 HTTP or TCP listeners",
                listener.port, other.name, other.protocol
            ));
        }
    }
    Ok(())
}

// Listeners are keyed per family by address, an unset address standing for
// the unspecified one. Only equal keys conflict.
fn addresses_overlap(a: &Listener, b: &Listener) -> bool {
    ip_key(&a.ipv4, "0.0.0.0") == ip_key(&b.ipv4, "0.0.0.0")
        || ip_key(&a.ipv6, "::") == ip_key(&b.ipv6, "::")
}

fn ip_key<'a>(ip: &'a str, unspecified: &'static str) -> &'a str {
    if ip.is_empty() {
        unspecified
    } else {
        ip
    }
}

fn display_all(errors: &[ListenerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
