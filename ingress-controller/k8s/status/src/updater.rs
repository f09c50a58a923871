use k8s_openapi::api::core::v1::ObjectReference;
use nginx_ingress_controller_core::{Kind, Reason, ResourceId};
use nginx_ingress_controller_k8s_api::{
    configuration::{
        ExternalEndpoint, Policy, PolicyStatus, TransportServer, TransportServerStatus,
        VirtualServer, VirtualServerRoute, VirtualServerRouteStatus, VirtualServerStatus,
    },
    Ingress, Patch, Resource, Service,
};
use std::net::IpAddr;
use tokio::sync::mpsc::UnboundedSender;

const EXTERNAL_PORTS: &str = "[80,443]";

/// Work for the [`crate::Controller`].
#[derive(Debug, PartialEq)]
pub enum Update {
    Event(Event),
    Status(StatusPatch),
}

/// A Kubernetes event about an object.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub reference: ObjectReference,
    pub reason: Reason,
    pub message: String,
}

/// A merge patch of an object's status subresource.
#[derive(Debug, PartialEq)]
pub struct StatusPatch {
    pub kind: Kind,
    pub id: ResourceId,
    pub patch: Patch<serde_json::Value>,
}

/// Produces status patches and events for the resources the controller
/// reconciles.
///
/// Patches are only produced when the desired status differs from the one
/// the object already carries, so repeated syncs of an unchanged resource do
/// not write to the API server.
#[derive(Debug)]
pub struct StatusUpdater {
    updates: UnboundedSender<Update>,
    report_ingress_status: bool,

    /// Addresses of the controller's external service.
    service_addresses: Vec<String>,

    /// Addresses configured in the main ConfigMap. When set, these take
    /// precedence over the service's addresses.
    configured_addresses: Vec<String>,
}

// === impl StatusUpdater ===

impl StatusUpdater {
    pub fn new(updates: UnboundedSender<Update>, report_ingress_status: bool) -> Self {
        Self {
            updates,
            report_ingress_status,
            service_addresses: Vec::new(),
            configured_addresses: Vec::new(),
        }
    }

    /// The addresses reported on Ingresses and VirtualServers.
    pub fn external_addresses(&self) -> &[String] {
        if self.configured_addresses.is_empty() {
            &self.service_addresses
        } else {
            &self.configured_addresses
        }
    }

    /// Records the controller's external service. Returns true if the
    /// reported addresses changed.
    pub fn set_external_service(&mut self, service: Option<&Service>) -> bool {
        let before = self.external_addresses().to_vec();
        self.service_addresses = service.map(service_addresses).unwrap_or_default();
        before != self.external_addresses()
    }

    /// Records the `external-status-address` ConfigMap setting. Returns true
    /// if the reported addresses changed.
    pub fn set_configured_addresses(&mut self, addresses: Vec<String>) -> bool {
        let before = self.external_addresses().to_vec();
        self.configured_addresses = addresses;
        before != self.external_addresses()
    }

    pub fn event<T>(&self, obj: &T, reason: Reason, message: impl Into<String>)
    where
        T: Resource<DynamicType = ()>,
    {
        self.send(Update::Event(Event {
            reference: obj.object_ref(&()),
            reason,
            message: message.into(),
        }));
    }

    pub fn virtual_server(&self, vs: &VirtualServer, reason: Reason, message: &str) {
        let status = VirtualServerStatus {
            state: reason.state().to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            external_endpoints: self.external_endpoints(),
        };
        if vs.status.as_ref() != Some(&status) {
            self.patch(Kind::VirtualServer, vs, &status);
        }
    }

    pub fn virtual_server_route(
        &self,
        vsr: &VirtualServerRoute,
        reason: Reason,
        message: &str,
        referenced_by: Option<&ResourceId>,
    ) {
        let referenced = referenced_by.is_some();
        let status = VirtualServerRouteStatus {
            state: reason.state().to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            referenced_by: referenced_by.map(ToString::to_string).unwrap_or_default(),
            external_endpoints: if referenced {
                self.external_endpoints()
            } else {
                Vec::new()
            },
        };
        if vsr.status.as_ref() != Some(&status) {
            self.patch(Kind::VirtualServerRoute, vsr, &status);
        }
    }

    /// Re-reports the external endpoints on a VirtualServer's existing
    /// status.
    pub fn refresh_virtual_server(&self, vs: &VirtualServer) {
        let Some(current) = vs.status.as_ref() else {
            return;
        };
        let status = VirtualServerStatus {
            external_endpoints: self.external_endpoints(),
            ..current.clone()
        };
        if *current != status {
            self.patch(Kind::VirtualServer, vs, &status);
        }
    }

    /// Re-reports the external endpoints on a VirtualServerRoute that is
    /// referenced by a VirtualServer.
    pub fn refresh_virtual_server_route(&self, vsr: &VirtualServerRoute) {
        let Some(current) = vsr.status.as_ref() else {
            return;
        };
        if current.referenced_by.is_empty() {
            return;
        }
        let status = VirtualServerRouteStatus {
            external_endpoints: self.external_endpoints(),
            ..current.clone()
        };
        if *current != status {
            self.patch(Kind::VirtualServerRoute, vsr, &status);
        }
    }

    pub fn transport_server(&self, ts: &TransportServer, reason: Reason, message: &str) {
        let status = TransportServerStatus {
            state: reason.state().to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
        };
        if ts.status.as_ref() != Some(&status) {
            self.patch(Kind::TransportServer, ts, &status);
        }
    }

    pub fn policy(&self, policy: &Policy, reason: Reason, message: &str) {
        let status = PolicyStatus {
            state: reason.state().to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
        };
        if policy.status.as_ref() != Some(&status) {
            self.patch(Kind::Policy, policy, &status);
        }
    }

    /// Reports the external addresses on an accepted Ingress.
    pub fn ingress(&self, ingress: &Ingress) {
        if !self.report_ingress_status {
            return;
        }
        let desired = self
            .external_addresses()
            .iter()
            .map(|a| lb_entry(a))
            .collect::<Vec<_>>();
        if ingress_lb_entries(ingress) != desired {
            self.patch_ingress(ingress, &desired);
        }
    }

    /// Removes the external addresses from an Ingress that is no longer
    /// served.
    pub fn clear_ingress(&self, ingress: &Ingress) {
        if !self.report_ingress_status {
            return;
        }
        if !ingress_lb_entries(ingress).is_empty() {
            self.patch_ingress(ingress, &[]);
        }
    }

    fn patch_ingress(&self, ingress: &Ingress, entries: &[(Option<String>, Option<String>)]) {
        let lb = entries
            .iter()
            .map(|(ip, hostname)| match (ip, hostname) {
                (Some(ip), _) => serde_json::json!({ "ip": ip }),
                (None, hostname) => serde_json::json!({ "hostname": hostname }),
            })
            .collect::<Vec<_>>();
        self.send(Update::Status(StatusPatch {
            kind: Kind::Ingress,
            id: ResourceId::of(ingress),
            patch: Patch::Merge(serde_json::json!({
                "status": { "loadBalancer": { "ingress": lb } },
            })),
        }));
    }

    fn patch<T, S>(&self, kind: Kind, obj: &T, status: &S)
    where
        T: kube::ResourceExt,
        S: serde::Serialize,
    {
        let status = match serde_json::to_value(status) {
            Ok(status) => status,
            Err(error) => {
                tracing::error!(%kind, id = %ResourceId::of(obj), %error, "Failed to serialize status");
                return;
            }
        };
        self.send(Update::Status(StatusPatch {
            kind,
            id: ResourceId::of(obj),
            patch: Patch::Merge(serde_json::json!({ "status": status })),
        }));
    }

    fn external_endpoints(&self) -> Vec<ExternalEndpoint> {
        self.external_addresses()
            .iter()
            .map(|a| {
                let (ip, hostname) = lb_entry(a);
                ExternalEndpoint {
                    ip: ip.unwrap_or_default(),
                    hostname: hostname.unwrap_or_default(),
                    ports: EXTERNAL_PORTS.to_string(),
                }
            })
            .collect()
    }

    fn send(&self, update: Update) {
        if self.updates.send(update).is_err() {
            tracing::debug!("Status controller has stopped");
        }
    }
}

/// The load-balancer addresses of a service, falling back to its external
/// IPs.
fn service_addresses(service: &Service) -> Vec<String> {
    let lb = service
        .status
        .iter()
        .filter_map(|s| s.load_balancer.as_ref())
        .flat_map(|lb| lb.ingress.iter().flatten())
        .filter_map(|i| i.ip.clone().or_else(|| i.hostname.clone()))
        .collect::<Vec<_>>();
    if !lb.is_empty() {
        return lb;
    }
    service
        .spec
        .iter()
        .flat_map(|s| s.external_ips.iter().flatten())
        .cloned()
        .collect()
}

/// Splits an address into its `(ip, hostname)` status form.
fn lb_entry(address: &str) -> (Option<String>, Option<String>) {
    if address.parse::<IpAddr>().is_ok() {
        (Some(address.to_string()), None)
    } else {
        (None, Some(address.to_string()))
    }
}

fn ingress_lb_entries(ingress: &Ingress) -> Vec<(Option<String>, Option<String>)> {
    ingress
        .status
        .iter()
        .filter_map(|s| s.load_balancer.as_ref())
        .flat_map(|lb| lb.ingress.iter().flatten())
        .map(|i| (i.ip.clone(), i.hostname.clone()))
        .collect()
}
