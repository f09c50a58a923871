use nginx_ingress_controller_k8s_api::{
    annotations::{MERGEABLE_INGRESS_TYPE, MERGEABLE_MASTER, MERGEABLE_MINION},
    configuration::{
        transport_server::{
            TransportServerAction, TransportServerListener, TransportServerUpstream,
        },
        virtual_server::Action,
        GlobalConfiguration, GlobalConfigurationSpec, Listener, Route, TransportServer,
        TransportServerSpec, Upstream, VirtualServer, VirtualServerRoute, VirtualServerRouteSpec,
        VirtualServerSpec,
    },
    api::core::v1::PodStatus,
    Endpoint, EndpointConditions, EndpointPort, EndpointSlice, HTTPIngressPath,
    HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, IntOrString, ObjectMeta, Pod, Service, ServiceBackendPort, ServicePort,
    ServiceSpec, Time, SERVICE_NAME_LABEL,
};

/// A creation timestamp `secs` seconds after 2024-01-01T00:00:00Z.
pub(crate) fn time(secs: u32) -> Time {
    let ts = format!(
        "2024-01-01T{:02}:{:02}:{:02}Z",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    );
    serde_json::from_value(serde_json::Value::String(ts)).expect("valid timestamp")
}

pub(crate) fn mk_meta(ns: &str, name: &str, created: Option<u32>) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(ns.to_string()),
        name: Some(name.to_string()),
        creation_timestamp: created.map(time),
        ..Default::default()
    }
}

fn mk_path(path: &str, service: &str, port: i32) -> HTTPIngressPath {
    HTTPIngressPath {
        path: Some(path.to_string()),
        path_type: "Prefix".to_string(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: service.to_string(),
                port: Some(ServiceBackendPort {
                    number: Some(port),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        },
    }
}

fn mk_rule(host: &str, paths: Vec<HTTPIngressPath>) -> IngressRule {
    IngressRule {
        host: Some(host.to_string()),
        http: if paths.is_empty() {
            None
        } else {
            Some(HTTPIngressRuleValue { paths })
        },
    }
}

/// An Ingress of class `nginx` routing `/` of every host to `web-svc:80`.
pub(crate) fn mk_ingress(ns: &str, name: &str, created: u32, hosts: &[&str]) -> Ingress {
    Ingress {
        metadata: mk_meta(ns, name, Some(created)),
        spec: Some(IngressSpec {
            ingress_class_name: Some("nginx".to_string()),
            rules: Some(
                hosts
                    .iter()
                    .map(|h| mk_rule(h, vec![mk_path("/", "web-svc", 80)]))
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn mk_master(ns: &str, name: &str, created: u32, host: &str) -> Ingress {
    let mut ingress = mk_ingress(ns, name, created, &[]);
    ingress.metadata.annotations = Some(maplit::btreemap! {
        MERGEABLE_INGRESS_TYPE.to_string() => MERGEABLE_MASTER.to_string(),
    });
    if let Some(spec) = ingress.spec.as_mut() {
        spec.rules = Some(vec![mk_rule(host, vec![])]);
    }
    ingress
}

pub(crate) fn mk_minion(ns: &str, name: &str, created: u32, host: &str, paths: &[&str]) -> Ingress {
    let mut ingress = mk_ingress(ns, name, created, &[]);
    ingress.metadata.annotations = Some(maplit::btreemap! {
        MERGEABLE_INGRESS_TYPE.to_string() => MERGEABLE_MINION.to_string(),
    });
    if let Some(spec) = ingress.spec.as_mut() {
        spec.rules = Some(vec![mk_rule(
            host,
            paths.iter().map(|p| mk_path(p, "tea-svc", 80)).collect(),
        )]);
    }
    ingress
}

fn pass(upstream: &str) -> Option<Action> {
    Some(Action {
        pass: upstream.to_string(),
        ..Default::default()
    })
}

fn mk_upstream(name: &str, service: &str) -> Upstream {
    Upstream {
        name: name.to_string(),
        service: service.to_string(),
        port: 80,
        ..Default::default()
    }
}

/// A VirtualServer passing `/` to `web-svc:80`.
pub(crate) fn mk_vs(ns: &str, name: &str, created: u32, host: &str) -> VirtualServer {
    VirtualServer {
        metadata: mk_meta(ns, name, Some(created)),
        spec: VirtualServerSpec {
            host: host.to_string(),
            upstreams: vec![mk_upstream("web", "web-svc")],
            routes: vec![Route {
                path: "/".to_string(),
                action: pass("web"),
                ..Default::default()
            }],
            ..Default::default()
        },
        status: None,
    }
}

/// Adds a route delegating `path` to a VirtualServerRoute.
pub(crate) fn with_route(mut vs: VirtualServer, path: &str, vsr: &str) -> VirtualServer {
    vs.spec.routes.push(Route {
        path: path.to_string(),
        route: vsr.to_string(),
        ..Default::default()
    });
    vs
}

/// A VirtualServerRoute passing `path` to `coffee-svc:80`.
pub(crate) fn mk_vsr(ns: &str, name: &str, host: &str, path: &str) -> VirtualServerRoute {
    VirtualServerRoute {
        metadata: mk_meta(ns, name, None),
        spec: VirtualServerRouteSpec {
            host: host.to_string(),
            upstreams: vec![mk_upstream("coffee", "coffee-svc")],
            subroutes: vec![Route {
                path: path.to_string(),
                action: pass("coffee"),
                ..Default::default()
            }],
            ..Default::default()
        },
        status: None,
    }
}

/// A TransportServer passing to `app-svc:5353`.
pub(crate) fn mk_ts(
    ns: &str,
    name: &str,
    created: u32,
    listener: &str,
    protocol: &str,
    host: &str,
) -> TransportServer {
    TransportServer {
        metadata: mk_meta(ns, name, Some(created)),
        spec: TransportServerSpec {
            listener: TransportServerListener {
                name: listener.to_string(),
                protocol: protocol.to_string(),
            },
            host: host.to_string(),
            upstreams: vec![TransportServerUpstream {
                name: "app".to_string(),
                service: "app-svc".to_string(),
                port: 5353,
                ..Default::default()
            }],
            action: Some(TransportServerAction {
                pass: "app".to_string(),
            }),
            ..Default::default()
        },
        status: None,
    }
}

pub(crate) fn mk_listener(name: &str, port: i32, protocol: &str) -> Listener {
    Listener {
        name: name.to_string(),
        port,
        protocol: protocol.to_string(),
        ..Default::default()
    }
}

pub(crate) fn mk_gc(listeners: Vec<Listener>) -> GlobalConfiguration {
    GlobalConfiguration {
        metadata: mk_meta("nginx-ingress", "nginx-configuration", None),
        spec: GlobalConfigurationSpec { listeners },
    }
}

/// A ClusterIP service selecting `app=<name>`, with `(name, port, target)`
/// ports.
pub(crate) fn mk_service(
    ns: &str,
    name: &str,
    ports: &[(&str, i32, Option<IntOrString>)],
) -> Service {
    Service {
        metadata: mk_meta(ns, name, None),
        spec: Some(ServiceSpec {
            selector: Some(maplit::btreemap! { "app".to_string() => name.to_string() }),
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port, target)| ServicePort {
                        name: Some(port_name.to_string()),
                        port: *port,
                        target_port: target.clone(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

/// An EndpointSlice of `service` exposing `port`, with `(address, ready)`
/// endpoints.
pub(crate) fn mk_slice(
    ns: &str,
    name: &str,
    service: &str,
    port: i32,
    endpoints: &[(&str, Option<bool>)],
) -> EndpointSlice {
    let mut metadata = mk_meta(ns, name, None);
    metadata.labels = Some(maplit::btreemap! {
        SERVICE_NAME_LABEL.to_string() => service.to_string(),
    });
    EndpointSlice {
        metadata,
        address_type: "IPv4".to_string(),
        endpoints: endpoints
            .iter()
            .map(|(addr, ready)| Endpoint {
                addresses: vec![addr.to_string()],
                conditions: Some(EndpointConditions {
                    ready: *ready,
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
        ports: Some(vec![EndpointPort {
            port: Some(port),
            ..Default::default()
        }]),
    }
}

pub(crate) fn mk_pod(ns: &str, name: &str, ip: &str, labels: &[(&str, &str)]) -> Pod {
    let mut metadata = mk_meta(ns, name, None);
    metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    Pod {
        metadata,
        spec: None,
        status: Some(PodStatus {
            pod_ip: Some(ip.to_string()),
            ..Default::default()
        }),
    }
}
