//! Translates EndpointSlices into upstream members.

use nginx_ingress_controller_core::extended::PodOwner;
use nginx_ingress_controller_k8s_api::{
    EndpointSlice, IntOrString, Pod, Probe, ResourceExt, Service, ServicePort,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
    sync::Arc,
};

/// A service port, as referenced by a backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortRef<'a> {
    Number(i32),
    Name(&'a str),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EndpointsError {
    #[error("service {0} doesn't exist")]
    NoService(String),

    #[error("no port {port} in service {service}")]
    NoPort { port: String, service: String },

    #[error("no pods of service {0}")]
    NoPods(String),

    #[error("no port {port} in the containers of pod {pod}")]
    NoContainerPort { port: String, pod: String },

    #[error("no endpointslices for target port {port} in service {service}")]
    NoEndpoints { port: i32, service: String },

    #[error("type ExternalName Services feature is only available in NGINX Plus")]
    ExternalNameRequiresPlus,
}

/// The members of a service port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Members {
    /// `host:port` addresses, sorted.
    pub addresses: Vec<String>,
    /// Set when the members resolve through DNS.
    pub external: bool,
}

/// A service along with the objects its members are derived from.
#[derive(Clone, Copy, Debug)]
pub struct ServiceBackends<'a> {
    pub service: &'a Service,
    /// EndpointSlices labelled with the service name.
    pub slices: &'a [Arc<EndpointSlice>],
    /// Pods selected by the service.
    pub pods: &'a [Arc<Pod>],
}

// === impl PortRef ===

impl std::fmt::Display for PortRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => n.fmt(f),
            Self::Name(n) => n.fmt(f),
        }
    }
}

// === impl ServiceBackends ===

impl ServiceBackends<'_> {
    fn name(&self) -> String {
        self.service.name_any()
    }

    fn is_external_name(&self) -> bool {
        self.service
            .spec
            .as_ref()
            .and_then(|s| s.type_.as_deref())
            == Some("ExternalName")
    }

    /// Finds the service port referenced by a backend. Named references
    /// match the port name; numeric references match the port number, or
    /// the name when the port is unnamed.
    pub fn service_port(&self, port: PortRef<'_>) -> Result<&ServicePort, EndpointsError> {
        let ports = self.service.spec.iter().flat_map(|s| s.ports.iter().flatten());
        let found = match port {
            PortRef::Name(name) => ports.clone().find(|p| p.name.as_deref() == Some(name)),
            PortRef::Number(number) => ports.clone().find(|p| p.port == number),
        };
        found.ok_or_else(|| EndpointsError::NoPort {
            port: port.to_string(),
            service: self.name(),
        })
    }

    /// Resolves the container port behind a service port. Named target
    /// ports are looked up on any pod of the service.
    pub fn target_port(&self, svc_port: &ServicePort) -> Result<i32, EndpointsError> {
        match &svc_port.target_port {
            None => Ok(svc_port.port),
            Some(IntOrString::Int(port)) => Ok(*port),
            Some(IntOrString::String(name)) => match name.parse::<i32>() {
                Ok(port) => Ok(port),
                Err(_) => {
                    let pod = self
                        .pods
                        .first()
                        .ok_or_else(|| EndpointsError::NoPods(self.name()))?;
                    container_port(pod, name).ok_or_else(|| EndpointsError::NoContainerPort {
                        port: name.clone(),
                        pod: pod.name_any(),
                    })
                }
            },
        }
    }

    /// Resolves the members of a service port.
    ///
    /// ExternalName services resolve to their DNS name and are only
    /// supported with NGINX Plus. With `use_cluster_ip` the service's
    /// cluster IP is used instead of the endpoints. With a subselector only
    /// endpoints of pods carrying those labels are kept.
    pub fn members(
        &self,
        port: PortRef<'_>,
        subselector: &BTreeMap<String, String>,
        use_cluster_ip: bool,
        is_plus: bool,
    ) -> Result<Members, EndpointsError> {
        if self.is_external_name() {
            if !is_plus {
                return Err(EndpointsError::ExternalNameRequiresPlus);
            }
            let svc_port = self.service_port(port)?;
            let host = self
                .service
                .spec
                .as_ref()
                .and_then(|s| s.external_name.clone())
                .unwrap_or_default();
            return Ok(Members {
                addresses: vec![join_host_port(&host, svc_port.port)],
                external: true,
            });
        }

        let svc_port = self.service_port(port)?;
        if use_cluster_ip {
            let ip = self
                .service
                .spec
                .as_ref()
                .and_then(|s| s.cluster_ip.clone())
                .unwrap_or_default();
            return Ok(Members {
                addresses: vec![join_host_port(&ip, svc_port.port)],
                external: false,
            });
        }

        let target = self.target_port(svc_port)?;
        let mut addresses = ready_addresses(self.slices.iter().map(|s| &**s), target);
        if addresses.is_empty() {
            return Err(EndpointsError::NoEndpoints {
                port: target,
                service: self.name(),
            });
        }

        if !subselector.is_empty() {
            let ips = self
                .pods
                .iter()
                .filter(|pod| labels_contain(pod, subselector))
                .filter_map(|pod| pod_ip(pod))
                .map(|ip| join_host_port(ip, target))
                .collect::<BTreeSet<_>>();
            addresses.retain(|a| ips.contains(a));
        }

        Ok(Members {
            addresses: addresses.into_iter().collect(),
            external: false,
        })
    }

    /// Maps the IP of every ready endpoint to the workload owning its pod.
    pub fn pod_owners(&self) -> BTreeMap<String, PodOwner> {
        self.pods
            .iter()
            .filter_map(|pod| Some((pod_ip(pod)?.to_string(), pod_owner(pod))))
            .collect()
    }

    /// The HTTP readiness probe of the container serving a service port.
    pub fn readiness_probe(&self, svc_port: &ServicePort) -> Option<Probe> {
        let pod = self.pods.first()?;
        let target = svc_port.target_port.as_ref();
        let containers = pod.spec.iter().flat_map(|s| s.containers.iter());
        for container in containers {
            let serves = container.ports.iter().flatten().any(|p| match target {
                None => p.container_port == svc_port.port,
                Some(IntOrString::Int(port)) => p.container_port == *port,
                Some(IntOrString::String(name)) => p.name.as_deref() == Some(name.as_str()),
            });
            if !serves {
                continue;
            }
            let probe = container.readiness_probe.as_ref()?;
            if probe.http_get.is_some() && probe.period_seconds.unwrap_or(0) > 0 {
                return Some(probe.clone());
            }
            return None;
        }
        None
    }
}

/// Collects `host:port` of every ready endpoint of slices exposing `port`.
pub fn ready_addresses<'s>(
    slices: impl Iterator<Item = &'s EndpointSlice>,
    port: i32,
) -> BTreeSet<String> {
    slices
        .filter(|slice| {
            slice
                .ports
                .iter()
                .flatten()
                .any(|p| p.port == Some(port))
        })
        .flat_map(|slice| slice.endpoints.iter())
        .filter(|ep| {
            ep.conditions
                .as_ref()
                .and_then(|c| c.ready)
                .unwrap_or(false)
        })
        .flat_map(|ep| ep.addresses.iter())
        .map(|address| join_host_port(address, port))
        .collect()
}

/// Joins a host and port, bracketing IPv6 addresses.
pub fn join_host_port(host: &str, port: i32) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]:{}", host, port),
        _ => format!("{}:{}", host, port),
    }
}

/// Identifies the workload controller owning a pod. Pods owned by a
/// ReplicaSet are attributed to its Deployment.
pub fn pod_owner(pod: &Pod) -> PodOwner {
    let controller = pod
        .owner_references()
        .iter()
        .find(|o| o.controller == Some(true));
    let Some(owner) = controller else {
        return PodOwner {
            kind: "deployment".to_string(),
            name: String::new(),
        };
    };
    match owner.kind.as_str() {
        "StatefulSet" | "DaemonSet" => PodOwner {
            kind: owner.kind.to_lowercase(),
            name: owner.name.clone(),
        },
        "ReplicaSet" => {
            let hash = pod.labels().get("pod-template-hash");
            let name = match hash {
                Some(hash) => owner
                    .name
                    .strip_suffix(&format!("-{}", hash))
                    .unwrap_or(&owner.name)
                    .to_string(),
                None => owner.name.clone(),
            };
            PodOwner {
                kind: "deployment".to_string(),
                name,
            }
        }
        _ => PodOwner {
            kind: "deployment".to_string(),
            name: owner.name.clone(),
        },
    }
}

fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

fn labels_contain(pod: &Pod, labels: &BTreeMap<String, String>) -> bool {
    let pod_labels = pod.labels();
    labels.iter().all(|(k, v)| pod_labels.get(k) == Some(v))
}

fn container_port(pod: &Pod, name: &str) -> Option<i32> {
    pod.spec
        .iter()
        .flat_map(|s| s.containers.iter())
        .flat_map(|c| c.ports.iter().flatten())
        .find(|p| p.name.as_deref() == Some(name))
        .map(|p| p.container_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{mk_pod, mk_service, mk_slice};
    use nginx_ingress_controller_k8s_api::{Container, ContainerPort, OwnerReference, PodSpec};

    fn no_subselector() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn ready_endpoints() {
        let svc = mk_service("default", "web", &[("http", 80, Some(IntOrString::Int(8080)))]);
        let slices = vec![
            Arc::new(mk_slice(
                "default",
                "web-a",
                "web",
                8080,
                &[("10.0.0.1", Some(true)), ("10.0.0.2", Some(false)), ("10.0.0.3", None)],
            )),
            Arc::new(mk_slice("default", "web-b", "web", 8080, &[("fd00::1", Some(true))])),
            Arc::new(mk_slice("default", "web-c", "web", 9090, &[("10.0.0.9", Some(true))])),
        ];
        let backends = ServiceBackends {
            service: &svc,
            slices: &slices,
            pods: &[],
        };

        for (port, msg) in &[(PortRef::Number(80), "by number"), (PortRef::Name("http"), "by name")] {
            let members = backends
                .members(*port, &no_subselector(), false, false)
                .expect(msg);
            assert_eq!(
                members.addresses,
                vec!["10.0.0.1:8080".to_string(), "[fd00::1]:8080".to_string()],
                "{}",
                msg
            );
        }

        assert_eq!(
            backends.members(PortRef::Number(81), &no_subselector(), false, false),
            Err(EndpointsError::NoPort {
                port: "81".to_string(),
                service: "web".to_string()
            })
        );
    }

    #[test]
    fn no_ready_endpoints() {
        let svc = mk_service("default", "web", &[("http", 80, None)]);
        let slices = vec![Arc::new(mk_slice(
            "default",
            "web-a",
            "web",
            80,
            &[("10.0.0.1", Some(false))],
        ))];
        let backends = ServiceBackends {
            service: &svc,
            slices: &slices,
            pods: &[],
        };
        let err = backends
            .members(PortRef::Number(80), &no_subselector(), false, false)
            .expect_err("no ready endpoints");
        assert_eq!(
            err.to_string(),
            "no endpointslices for target port 80 in service web"
        );
    }

    #[test]
    fn named_target_ports() {
        let svc = mk_service(
            "default",
            "web",
            &[("http", 80, Some(IntOrString::String("web".to_string())))],
        );
        let slices = vec![Arc::new(mk_slice(
            "default",
            "web-a",
            "web",
            8080,
            &[("10.0.0.1", Some(true))],
        ))];

        let backends = ServiceBackends {
            service: &svc,
            slices: &slices,
            pods: &[],
        };
        assert_eq!(
            backends.members(PortRef::Number(80), &no_subselector(), false, false),
            Err(EndpointsError::NoPods("web".to_string()))
        );

        let mut pod = mk_pod("default", "web-1", "10.0.0.1", &[("app", "web")]);
        pod.spec = Some(PodSpec {
            containers: vec![Container {
                name: "web".to_string(),
                ports: Some(vec![ContainerPort {
                    name: Some("web".to_string()),
                    container_port: 8080,
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        });
        let pods = vec![Arc::new(pod)];
        let backends = ServiceBackends {
            service: &svc,
            slices: &slices,
            pods: &pods,
        };
        assert_eq!(
            backends
                .members(PortRef::Number(80), &no_subselector(), false, false)
                .map(|m| m.addresses),
            Ok(vec!["10.0.0.1:8080".to_string()])
        );
    }

    #[test]
    fn subselected_endpoints() {
        let svc = mk_service("default", "web", &[("http", 80, None)]);
        let slices = vec![Arc::new(mk_slice(
            "default",
            "web-a",
            "web",
            80,
            &[("10.0.0.1", Some(true)), ("10.0.0.2", Some(true))],
        ))];
        let pods = vec![
            Arc::new(mk_pod("default", "v1", "10.0.0.1", &[("app", "web"), ("version", "v1")])),
            Arc::new(mk_pod("default", "v2", "10.0.0.2", &[("app", "web"), ("version", "v2")])),
        ];
        let backends = ServiceBackends {
            service: &svc,
            slices: &slices,
            pods: &pods,
        };
        let subselector = maplit::btreemap! { "version".to_string() => "v2".to_string() };
        assert_eq!(
            backends
                .members(PortRef::Number(80), &subselector, false, false)
                .map(|m| m.addresses),
            Ok(vec!["10.0.0.2:80".to_string()])
        );
    }

    #[test]
    fn cluster_ip_and_external_name() {
        let mut svc = mk_service("default", "web", &[("http", 80, None)]);
        if let Some(spec) = svc.spec.as_mut() {
            spec.cluster_ip = Some("10.96.0.10".to_string());
        }
        let backends = ServiceBackends {
            service: &svc,
            slices: &[],
            pods: &[],
        };
        assert_eq!(
            backends.members(PortRef::Number(80), &no_subselector(), true, false),
            Ok(Members {
                addresses: vec!["10.96.0.10:80".to_string()],
                external: false,
            })
        );

        if let Some(spec) = svc.spec.as_mut() {
            spec.type_ = Some("ExternalName".to_string());
            spec.external_name = Some("example.com".to_string());
        }
        let backends = ServiceBackends {
            service: &svc,
            slices: &[],
            pods: &[],
        };
        assert_eq!(
            backends.members(PortRef::Number(80), &no_subselector(), false, false),
            Err(EndpointsError::ExternalNameRequiresPlus)
        );
        assert_eq!(
            backends.members(PortRef::Number(80), &no_subselector(), false, true),
            Ok(Members {
                addresses: vec!["example.com:80".to_string()],
                external: true,
            })
        );
    }

    #[test]
    fn pod_owners() {
        let owned = |kind: &str, name: &str| {
            let mut pod = mk_pod("default", "p", "10.0.0.1", &[("pod-template-hash", "5d4f")]);
            pod.metadata.owner_references = Some(vec![OwnerReference {
                kind: kind.to_string(),
                name: name.to_string(),
                controller: Some(true),
                ..Default::default()
            }]);
            pod
        };
        for (pod, kind, name) in &[
            (owned("ReplicaSet", "web-5d4f"), "deployment", "web"),
            (owned("StatefulSet", "db"), "statefulset", "db"),
            (owned("DaemonSet", "agent"), "daemonset", "agent"),
            (mk_pod("default", "p", "10.0.0.1", &[]), "deployment", ""),
        ] {
            assert_eq!(
                pod_owner(pod),
                PodOwner {
                    kind: kind.to_string(),
                    name: name.to_string()
                }
            );
        }
    }
}
