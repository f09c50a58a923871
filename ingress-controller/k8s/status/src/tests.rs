use crate::{StatusPatch, StatusUpdater, Update};
use k8s_openapi::api::{
    core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceSpec, ServiceStatus},
    networking::v1::{IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressStatus},
};
use nginx_ingress_controller_core::{Kind, Reason, ResourceId};
use nginx_ingress_controller_k8s_api::{
    configuration::{VirtualServer, VirtualServerRoute, VirtualServerRouteStatus, VirtualServerSpec},
    Ingress, ObjectMeta, Patch, Service,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

fn mk_meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(ns.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn mk_vs(ns: &str, name: &str) -> VirtualServer {
    VirtualServer {
        metadata: mk_meta(ns, name),
        spec: VirtualServerSpec {
            host: "cafe.example.com".to_string(),
            ..Default::default()
        },
        status: None,
    }
}

fn mk_lb_service(addresses: &[&str]) -> Service {
    Service {
        metadata: mk_meta("nginx-ingress", "nginx-ingress"),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ..Default::default()
        }),
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(
                    addresses
                        .iter()
                        .map(|a| LoadBalancerIngress {
                            ip: Some(a.to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
            }),
            ..Default::default()
        }),
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Update>) -> Vec<Update> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

#[test]
fn virtual_server_status() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let updater = StatusUpdater::new(tx, true);

    let mut vs = mk_vs("default", "cafe");
    updater.virtual_server(&vs, Reason::AddedOrUpdatedWithWarning, "TLS secret is missing");
    let updates = drain(&mut rx);
    assert_eq!(
        updates,
        vec![Update::Status(StatusPatch {
            kind: Kind::VirtualServer,
            id: ResourceId::new("default", "cafe"),
            patch: Patch::Merge(serde_json::json!({
                "status": {
                    "state": "Warning",
                    "reason": "AddedOrUpdatedWithWarning",
                    "message": "TLS secret is missing",
                },
            })),
        })]
    );

    // Once the status has been written back, the same report is a no-op.
    let Update::Status(StatusPatch { patch: Patch::Merge(value), .. }) = &updates[0] else {
        panic!("expected a merge patch");
    };
    vs.status = Some(serde_json::from_value(value["status"].clone()).expect("status"));
    updater.virtual_server(&vs, Reason::AddedOrUpdatedWithWarning, "TLS secret is missing");
    assert!(drain(&mut rx).is_empty());

    updater.virtual_server(&vs, Reason::AddedOrUpdated, "Configuration was added or updated");
    assert_eq!(drain(&mut rx).len(), 1);
}

#[test]
fn orphaned_route_status() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut updater = StatusUpdater::new(tx, true);
    assert!(updater.set_external_service(Some(&mk_lb_service(&["203.0.113.7"]))));

    let mut vsr = VirtualServerRoute {
        metadata: mk_meta("default", "coffee"),
        spec: Default::default(),
        status: None,
    };
    updater.virtual_server_route(
        &vsr,
        Reason::NoVirtualServersFound,
        "VirtualServer is invalid or doesn't exist",
        None,
    );
    let updates = drain(&mut rx);
    let Some(Update::Status(StatusPatch { patch: Patch::Merge(value), .. })) = updates.first()
    else {
        panic!("expected a status patch: {:?}", updates);
    };
    let status: VirtualServerRouteStatus =
        serde_json::from_value(value["status"].clone()).expect("status");
    assert_eq!(status.state, "Invalid");
    assert_eq!(status.referenced_by, "");
    assert!(
        status.external_endpoints.is_empty(),
        "an orphan is not reachable"
    );

    vsr.status = Some(status);
    let vs = ResourceId::new("default", "cafe");
    updater.virtual_server_route(&vsr, Reason::AddedOrUpdated, "ok", Some(&vs));
    let updates = drain(&mut rx);
    let Some(Update::Status(StatusPatch { patch: Patch::Merge(value), .. })) = updates.first()
    else {
        panic!("expected a status patch: {:?}", updates);
    };
    assert_eq!(value["status"]["referencedBy"], "default/cafe");
    assert_eq!(value["status"]["externalEndpoints"][0]["ip"], "203.0.113.7");
    assert_eq!(value["status"]["externalEndpoints"][0]["ports"], "[80,443]");
}

#[test]
fn refresh_keeps_reported_state() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut updater = StatusUpdater::new(tx, true);

    let mut vs = mk_vs("default", "cafe");
    updater.refresh_virtual_server(&vs);
    assert!(drain(&mut rx).is_empty(), "nothing was reported yet");

    updater.virtual_server(&vs, Reason::AddedOrUpdated, "Configuration was added or updated");
    let updates = drain(&mut rx);
    let Some(Update::Status(StatusPatch { patch: Patch::Merge(value), .. })) = updates.first()
    else {
        panic!("expected a status patch: {:?}", updates);
    };
    vs.status = Some(serde_json::from_value(value["status"].clone()).expect("status"));

    assert!(updater.set_external_service(Some(&mk_lb_service(&["203.0.113.7"]))));
    updater.refresh_virtual_server(&vs);
    let updates = drain(&mut rx);
    let Some(Update::Status(StatusPatch { patch: Patch::Merge(value), .. })) = updates.first()
    else {
        panic!("expected a status patch: {:?}", updates);
    };
    assert_eq!(value["status"]["reason"], "AddedOrUpdated");
    assert_eq!(value["status"]["message"], "Configuration was added or updated");
    assert_eq!(value["status"]["externalEndpoints"][0]["ip"], "203.0.113.7");

    let orphan = VirtualServerRoute {
        metadata: mk_meta("default", "coffee"),
        spec: Default::default(),
        status: Some(VirtualServerRouteStatus {
            state: "Invalid".to_string(),
            ..Default::default()
        }),
    };
    updater.refresh_virtual_server_route(&orphan);
    assert!(drain(&mut rx).is_empty(), "orphans carry no endpoints");
}

#[test]
fn external_addresses() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut updater = StatusUpdater::new(tx, true);
    assert!(updater.external_addresses().is_empty());

    assert!(updater.set_external_service(Some(&mk_lb_service(&["203.0.113.7"]))));
    assert!(!updater.set_external_service(Some(&mk_lb_service(&["203.0.113.7"]))));
    assert_eq!(updater.external_addresses(), ["203.0.113.7".to_string()]);

    assert!(updater.set_configured_addresses(vec!["lb.example.com".to_string()]));
    assert_eq!(updater.external_addresses(), ["lb.example.com".to_string()]);
    assert!(
        !updater.set_external_service(None),
        "configured addresses take precedence"
    );

    assert!(updater.set_configured_addresses(vec![]));
    assert!(updater.external_addresses().is_empty());

    let external_ips = Service {
        spec: Some(ServiceSpec {
            external_ips: Some(vec!["198.51.100.1".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    };
    assert!(updater.set_external_service(Some(&external_ips)));
    assert_eq!(updater.external_addresses(), ["198.51.100.1".to_string()]);
}

#[test]
fn ingress_load_balancer_status() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut updater = StatusUpdater::new(tx, true);
    updater.set_configured_addresses(vec!["203.0.113.7".to_string(), "lb.example.com".to_string()]);

    let mut ingress = Ingress {
        metadata: mk_meta("default", "cafe"),
        ..Default::default()
    };
    updater.ingress(&ingress);
    assert_eq!(
        drain(&mut rx),
        vec![Update::Status(StatusPatch {
            kind: Kind::Ingress,
            id: ResourceId::new("default", "cafe"),
            patch: Patch::Merge(serde_json::json!({
                "status": { "loadBalancer": { "ingress": [
                    { "ip": "203.0.113.7" },
                    { "hostname": "lb.example.com" },
                ] } },
            })),
        })]
    );

    ingress.status = Some(IngressStatus {
        load_balancer: Some(IngressLoadBalancerStatus {
            ingress: Some(vec![
                IngressLoadBalancerIngress {
                    ip: Some("203.0.113.7".to_string()),
                    ..Default::default()
                },
                IngressLoadBalancerIngress {
                    hostname: Some("lb.example.com".to_string()),
                    ..Default::default()
                },
            ]),
        }),
    });
    updater.ingress(&ingress);
    assert!(drain(&mut rx).is_empty());

    updater.clear_ingress(&ingress);
    assert_eq!(
        drain(&mut rx),
        vec![Update::Status(StatusPatch {
            kind: Kind::Ingress,
            id: ResourceId::new("default", "cafe"),
            patch: Patch::Merge(serde_json::json!({
                "status": { "loadBalancer": { "ingress": [] } },
            })),
        })]
    );
}

#[test]
fn ingress_status_disabled() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut updater = StatusUpdater::new(tx, false);
    updater.set_configured_addresses(vec!["203.0.113.7".to_string()]);
    updater.ingress(&Ingress {
        metadata: mk_meta("default", "cafe"),
        ..Default::default()
    });
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn events_reference_the_object() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let updater = StatusUpdater::new(tx, true);
    updater.event(&mk_vs("default", "cafe"), Reason::Rejected, "host is taken");
    let updates = drain(&mut rx);
    let Some(Update::Event(event)) = updates.first() else {
        panic!("expected an event: {:?}", updates);
    };
    assert_eq!(event.reason, Reason::Rejected);
    assert_eq!(event.message, "host is taken");
    assert_eq!(event.reference.kind.as_deref(), Some("VirtualServer"));
    assert_eq!(event.reference.namespace.as_deref(), Some("default"));
    assert_eq!(event.reference.name.as_deref(), Some("cafe"));
}
