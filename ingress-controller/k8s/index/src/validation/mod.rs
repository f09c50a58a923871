//! Schema-level validation of resources.
//!
//! Every validator collects all violations and reports them at once, each
//! prefixed with the path of the offending field.

mod ingress;
mod policy;
mod transport_server;
mod virtual_server;


pub use self::{
    ingress::validate_ingress,
    policy::validate_policy,
    transport_server::validate_transport_server,
    virtual_server::{
        validate_virtual_server, validate_virtual_server_route,
        validate_virtual_server_route_for_virtual_server,
    },
};
use crate::ClusterInfo;
use anyhow::Result;
use nginx_ingress_controller_k8s_api::{
    configuration::{Policy, TransportServer, VirtualServer, VirtualServerRoute},
    Ingress,
};
use std::{fmt, sync::Arc};

/// Validates resources against the features enabled in this controller.
#[derive(Clone, Debug)]
pub struct Validator {
    cluster: Arc<ClusterInfo>,
}

#[derive(Debug, Default)]
pub(crate) struct FieldErrors(Vec<String>);

const DNS1123_LABEL: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";
const DNS1123_SUBDOMAIN: &str =
    r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";
const DNS1035_LABEL: &str = r"^[a-z]([-a-z0-9]*[a-z0-9])?$";

// === impl Validator ===

impl Validator {
    pub fn new(cluster: Arc<ClusterInfo>) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &ClusterInfo {
        &self.cluster
    }

    pub fn ingress(&self, ingress: &Ingress) -> Result<()> {
        validate_ingress(ingress, &self.cluster)
    }

    pub fn virtual_server(&self, vs: &VirtualServer) -> Result<()> {
        validate_virtual_server(vs, &self.cluster)
    }

    pub fn virtual_server_route(&self, vsr: &VirtualServerRoute) -> Result<()> {
        validate_virtual_server_route(vsr, &self.cluster)
    }

    pub fn transport_server(&self, ts: &TransportServer) -> Result<()> {
        validate_transport_server(ts, &self.cluster)
    }

    pub fn policy(&self, policy: &Policy) -> Result<()> {
        validate_policy(policy, &self.cluster)
    }
}

// === impl FieldErrors ===

impl FieldErrors {
    pub(crate) fn required(&mut self, path: impl fmt::Display) {
        self.0.push(format!("{}: Required value", path));
    }

    pub(crate) fn required_because(&mut self, path: impl fmt::Display, detail: impl fmt::Display) {
        self.0.push(format!("{}: Required value: {}", path, detail));
    }

    pub(crate) fn invalid(
        &mut self,
        path: impl fmt::Display,
        value: impl fmt::Debug,
        detail: impl fmt::Display,
    ) {
        self.0
            .push(format!("{}: Invalid value: {:?}: {}", path, value, detail));
    }

    pub(crate) fn duplicate(&mut self, path: impl fmt::Display, value: impl fmt::Debug) {
        self.0.push(format!("{}: Duplicate value: {:?}", path, value));
    }

    pub(crate) fn forbidden(&mut self, path: impl fmt::Display, detail: impl fmt::Display) {
        self.0.push(format!("{}: Forbidden: {}", path, detail));
    }

    pub(crate) fn not_supported(
        &mut self,
        path: impl fmt::Display,
        value: impl fmt::Debug,
        supported: &[&str],
    ) {
        let supported = supported
            .iter()
            .map(|s| format!("{:?}", s))
            .collect::<Vec<_>>()
            .join(", ");
        self.0.push(format!(
            "{}: Unsupported value: {:?}: supported values: {}",
            path, value, supported
        ));
    }

    pub(crate) fn too_many(&mut self, path: impl fmt::Display, actual: usize, max: usize) {
        self.0.push(format!(
            "{}: Too many: {}: must have at most {} items",
            path, actual, max
        ));
    }

    pub(crate) fn into_result(self) -> Result<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(anyhow::anyhow!("{}", self.0[0])),
            _ => Err(anyhow::anyhow!("[{}]", self.0.join(", "))),
        }
    }
}

pub(crate) fn matches(pattern: &str, value: &str) -> bool {
    regex::Regex::new(pattern)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

pub(crate) fn is_dns1123_label(value: &str) -> bool {
    value.len() <= 63 && matches(DNS1123_LABEL, value)
}

pub(crate) fn is_dns1123_subdomain(value: &str) -> bool {
    value.len() <= 253 && matches(DNS1123_SUBDOMAIN, value)
}

pub(crate) fn is_dns1035_label(value: &str) -> bool {
    value.len() <= 63 && matches(DNS1035_LABEL, value)
}

/// Validates a host name; a leading `*.` wildcard is allowed when
/// `wildcard` is set.
pub(crate) fn validate_host(errs: &mut FieldErrors, path: &str, host: &str, wildcard: bool) {
    if host.is_empty() {
        errs.required(path);
        return;
    }
    let name = match host.strip_prefix("*.") {
        Some(rest) if wildcard => rest,
        _ => host,
    };
    if !is_dns1123_subdomain(name) {
        errs.invalid(
            path,
            host,
            "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, \
             '-' or '.', and must start and end with an alphanumeric character",
        );
    }
}

/// Validates a `namespace/name` or `name` reference.
pub(crate) fn validate_reference(errs: &mut FieldErrors, path: &str, reference: &str) {
    if reference.is_empty() {
        errs.required(path);
        return;
    }
    let (ns, name) = match reference.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, reference),
    };
    if let Some(ns) = ns {
        if !is_dns1123_label(ns) {
            errs.invalid(path, reference, "namespace must be a valid DNS-1123 label");
            return;
        }
    }
    if !is_dns1123_subdomain(name) {
        errs.invalid(path, reference, "name must be a valid DNS-1123 subdomain");
    }
}

pub(crate) fn validate_port(errs: &mut FieldErrors, path: &str, port: i64) {
    if !(1..=65535).contains(&port) {
        errs.invalid(path, port, "must be between 1 and 65535, inclusive");
    }
}

pub(crate) fn validate_snippet(
    errs: &mut FieldErrors,
    path: &str,
    snippet: &str,
    cluster: &ClusterInfo,
) {
    if !snippet.is_empty() && !cluster.snippets_enabled {
        errs.forbidden(path, "snippet specified but snippets feature is not enabled");
    }
}
