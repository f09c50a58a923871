//! Accepted configurations and the change sets computed over them.

use crate::{Kind, Reason, ResourceId};
use nginx_ingress_controller_k8s_api::{
    configuration::{TransportServer, VirtualServer, VirtualServerRoute},
    Ingress,
};
use std::{collections::BTreeMap, sync::Arc};

/// An accepted resource as installed in the data plane.
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Ingress(IngressConfiguration),
    VirtualServer(VirtualServerConfiguration),
    TransportServer(TransportServerConfiguration),
}

/// A regular Ingress, or a master Ingress with its minions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngressConfiguration {
    pub ingress: Arc<Ingress>,
    pub is_master: bool,
    pub minions: Vec<MinionConfiguration>,
    /// Every host of the Ingress and whether this Ingress holds it.
    pub valid_hosts: BTreeMap<String, bool>,
    /// Warnings on minions, keyed by the minion.
    pub child_warnings: BTreeMap<ResourceId, Vec<String>>,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MinionConfiguration {
    pub ingress: Arc<Ingress>,
    /// Every path of the minion and whether this minion holds it.
    pub valid_paths: BTreeMap<String, bool>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VirtualServerConfiguration {
    pub virtual_server: Arc<VirtualServer>,
    /// Attached routes, in the order the VirtualServer references them.
    pub virtual_server_routes: Vec<Arc<VirtualServerRoute>>,
    pub http_port: u16,
    pub https_port: u16,
    pub http_ipv4: String,
    pub http_ipv6: String,
    pub https_ipv4: String,
    pub https_ipv6: String,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransportServerConfiguration {
    pub transport_server: Arc<TransportServer>,
    pub listener_port: u16,
    pub ipv4: String,
    pub ipv6: String,
    pub warnings: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    AddOrUpdate,
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResourceChange {
    pub op: Operation,
    pub resource: Resource,
    /// Set when the resource was accepted but failed validation, so that
    /// its deletion can be reported with the validation error.
    pub error: Option<String>,
}

/// A resource that could not be (fully) accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Problem {
    pub kind: Kind,
    pub id: ResourceId,
    pub reason: Reason,
    pub message: String,
    pub is_error: bool,
}

// === impl Resource ===

impl Resource {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Ingress(_) => Kind::Ingress,
            Self::VirtualServer(_) => Kind::VirtualServer,
            Self::TransportServer(_) => Kind::TransportServer,
        }
    }

    pub fn id(&self) -> ResourceId {
        match self {
            Self::Ingress(c) => ResourceId::of(&*c.ingress),
            Self::VirtualServer(c) => ResourceId::of(&*c.virtual_server),
            Self::TransportServer(c) => ResourceId::of(&*c.transport_server),
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Ingress(c) => &c.warnings,
            Self::VirtualServer(c) => &c.warnings,
            Self::TransportServer(c) => &c.warnings,
        }
    }
}

// === impl IngressConfiguration ===

impl IngressConfiguration {
    /// The hosts this Ingress holds.
    pub fn hosts(&self) -> impl Iterator<Item = &str> + '_ {
        self.valid_hosts
            .iter()
            .filter(|(_, valid)| **valid)
            .map(|(host, _)| host.as_str())
    }

    /// The master and all of its minions.
    pub fn ingresses(&self) -> impl Iterator<Item = &Arc<Ingress>> + '_ {
        std::iter::once(&self.ingress).chain(self.minions.iter().map(|m| &m.ingress))
    }
}

// === impl VirtualServerConfiguration ===

impl VirtualServerConfiguration {
    pub fn new(virtual_server: Arc<VirtualServer>) -> Self {
        Self {
            virtual_server,
            virtual_server_routes: Vec::new(),
            http_port: 80,
            https_port: 443,
            http_ipv4: String::new(),
            http_ipv6: String::new(),
            https_ipv4: String::new(),
            https_ipv6: String::new(),
            warnings: Vec::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.virtual_server.spec.host
    }
}

// === impl Problem ===

impl Problem {
    pub fn rejected(kind: Kind, id: ResourceId, message: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            reason: Reason::Rejected,
            message: message.into(),
            is_error: false,
        }
    }

    pub fn new(kind: Kind, id: ResourceId, reason: Reason, message: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            reason,
            message: message.into(),
            is_error: false,
        }
    }
}
