//! Builds the snapshots handed to the Configurator.
//!
//! A [`Builder`] joins accepted configurations with the cluster state they
//! reference: upstream members, secrets, policies and App-Protect objects.
//! Building never writes to the cluster. Broken references do not fail a
//! build; they are dropped and reported as warnings on the resource.

use crate::{
    app_protect::{dos::DosConfiguration, AppProtectConfiguration},
    cache::Cache,
    endpoints::{Members, PortRef, ServiceBackends},
    SecretStore, Validator,
};
use anyhow::{anyhow, bail, Result};
use nginx_ingress_controller_core::{
    extended::{
        endpoints_key, AppProtectLog, Endpoints, ExtendedResources, IngressEx, MergeableIngresses,
        PodOwner, SecretReference, TransportServerEx, VirtualServerEx,
    },
    IngressConfiguration, Kind, MinionConfiguration, Resource, ResourceId,
    TransportServerConfiguration, VirtualServerConfiguration, Warnings,
};
use nginx_ingress_controller_k8s_api::{
    annotations::{
        self, APP_PROTECT_DOS_RESOURCE, APP_PROTECT_POLICY, APP_PROTECT_SECURITY_LOG,
        APP_PROTECT_SECURITY_LOG_DESTINATION, BASIC_AUTH_SECRET, HEALTH_CHECKS, JWT_KEY,
        USE_CLUSTER_IP,
    },
    app_protect::{APLogConf, APPolicy},
    configuration::{Policy, PolicyReference, Route, Upstream},
    Ingress, IngressServiceBackend, Probe, ResourceExt, Service,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

const DEFAULT_LOG_DESTINATION: &str = "syslog:server=localhost:514";

/// Everything a build reads.
#[derive(Clone, Copy, Debug)]
pub struct Builder<'a> {
    pub cache: &'a Cache,
    pub secrets: &'a SecretStore,
    pub app_protect: &'a AppProtectConfiguration,
    pub dos: &'a DosConfiguration,
    pub validator: &'a Validator,
}

/// Members and metadata collected over a resource's upstreams.
#[derive(Debug, Default)]
struct Upstreams {
    endpoints: Endpoints,
    external_name_svcs: BTreeSet<String>,
    pod_owners: BTreeMap<String, PodOwner>,
    health_checks: BTreeMap<String, Probe>,
}

struct Resolved {
    members: Members,
    owners: BTreeMap<String, PodOwner>,
    probe: Option<Probe>,
}

// === impl Builder ===

impl Builder<'_> {
    /// Builds snapshots for accepted resources. Warnings are keyed by the
    /// resource they concern.
    pub fn build(&self, resources: &[Resource]) -> (ExtendedResources, Warnings) {
        let mut extended = ExtendedResources::default();
        let mut warnings = Warnings::default();
        for resource in resources {
            match resource {
                Resource::Ingress(c) if c.is_master => {
                    extended.mergeable_ingresses.push(self.mergeable_ingresses(c));
                }
                Resource::Ingress(c) => {
                    let mut ex = self.ingress_ex(&c.ingress);
                    ex.valid_hosts = c.valid_hosts.clone();
                    extended.ingress_exes.push(ex);
                }
                Resource::VirtualServer(c) => {
                    let (ex, msgs) = self.virtual_server_ex(c);
                    let id = ResourceId::of(&*c.virtual_server);
                    for msg in msgs {
                        warnings.add(Kind::VirtualServer, id.clone(), msg);
                    }
                    extended.virtual_server_exes.push(ex);
                }
                Resource::TransportServer(c) => {
                    extended.transport_server_exes.push(self.transport_server_ex(c));
                }
            }
        }
        (extended, warnings)
    }

    fn mergeable_ingresses(&self, c: &IngressConfiguration) -> MergeableIngresses {
        let mut master = self.ingress_ex(&c.ingress);
        master.valid_hosts = c.valid_hosts.clone();
        let minions = c
            .minions
            .iter()
            .map(|MinionConfiguration { ingress, valid_paths }| {
                let mut ex = self.ingress_ex(ingress);
                ex.valid_minion_paths = valid_paths.clone();
                ex
            })
            .collect();
        MergeableIngresses { master, minions }
    }

    fn ingress_ex(&self, ingress: &Arc<Ingress>) -> IngressEx {
        let cluster = self.cache.cluster();
        let ns = ingress.namespace().unwrap_or_default();
        let anns = ingress.annotations();
        let use_cluster_ip = annotations::is_true(anns, USE_CLUSTER_IP);
        let health_checks = cluster.is_plus && annotations::is_true(anns, HEALTH_CHECKS);

        let mut upstreams = Upstreams::default();
        for backend in ingress_backends(ingress) {
            let port = match backend.port.as_ref() {
                Some(p) => match (p.number, p.name.as_deref()) {
                    (Some(n), _) => PortRef::Number(n),
                    (None, Some(name)) => PortRef::Name(name),
                    (None, None) => continue,
                },
                None => continue,
            };
            let key = format!("{}/{}:{}", ns, backend.name, port);
            if upstreams.endpoints.contains_key(&key) {
                continue;
            }
            let resolved =
                self.resolve(&ns, &backend.name, port, &BTreeMap::new(), use_cluster_ip, health_checks);
            upstreams.add(key, &ns, &backend.name, resolved);
        }

        let mut secret_refs = BTreeMap::new();
        let tls_secrets = ingress
            .spec
            .iter()
            .flat_map(|s| s.tls.iter().flatten())
            .filter_map(|tls| tls.secret_name.as_deref())
            .map(|name| ResourceId::new(ns.as_str(), name));
        let mut annotated = vec![BASIC_AUTH_SECRET];
        if cluster.is_plus {
            annotated.push(JWT_KEY);
        }
        let annotation_secrets = annotated
            .into_iter()
            .filter_map(|key| anns.get(key))
            .map(|reference| ResourceId::parse_ref(reference.trim(), &ns));
        for id in tls_secrets.chain(annotation_secrets) {
            self.add_secret(&mut secret_refs, id);
        }

        let mut app_protect_policy = None;
        let mut app_protect_logs = Vec::new();
        if cluster.app_protect_enabled {
            if let Some(reference) = anns.get(APP_PROTECT_POLICY) {
                let id = ResourceId::parse_ref(reference.trim(), &ns);
                match self.app_protect.policy(&id) {
                    Ok(policy) => app_protect_policy = Some(policy),
                    Err(error) => {
                        tracing::warn!(ingress = %ResourceId::of(&**ingress), %error, "Ignoring App Protect reference")
                    }
                }
            }
            if let Some(confs) = anns.get(APP_PROTECT_SECURITY_LOG) {
                let dests = anns
                    .get(APP_PROTECT_SECURITY_LOG_DESTINATION)
                    .map(String::as_str)
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .collect::<Vec<_>>();
                for (i, reference) in confs.split(',').map(str::trim).enumerate() {
                    let id = ResourceId::parse_ref(reference, &ns);
                    match self.app_protect.log_conf(&id) {
                        Ok(conf) => app_protect_logs.push(AppProtectLog {
                            conf,
                            destination: dests
                                .get(i)
                                .copied()
                                .filter(|d| !d.is_empty())
                                .unwrap_or(DEFAULT_LOG_DESTINATION)
                                .to_string(),
                        }),
                        Err(error) => {
                            tracing::warn!(ingress = %ResourceId::of(&**ingress), %error, "Ignoring App Protect reference")
                        }
                    }
                }
            }
        }

        let mut dos = None;
        if cluster.app_protect_dos_enabled {
            if let Some(reference) = anns.get(APP_PROTECT_DOS_RESOURCE) {
                match self.dos.get_valid_dos_ex(&ns, reference.trim()) {
                    Ok(ex) => dos = ex,
                    Err(error) => {
                        tracing::warn!(ingress = %ResourceId::of(&**ingress), %error, "Ignoring DoS reference")
                    }
                }
            }
        }

        IngressEx {
            ingress: ingress.clone(),
            valid_hosts: BTreeMap::new(),
            valid_minion_paths: BTreeMap::new(),
            endpoints: upstreams.endpoints,
            health_checks: upstreams.health_checks,
            external_name_svcs: upstreams.external_name_svcs,
            pod_owners: upstreams.pod_owners,
            secret_refs,
            app_protect_policy,
            app_protect_logs,
            dos,
        }
    }

    fn virtual_server_ex(&self, c: &VirtualServerConfiguration) -> (VirtualServerEx, Vec<String>) {
        let cluster = self.cache.cluster();
        let vs = &c.virtual_server;
        let vs_ns = vs.namespace().unwrap_or_default();
        let mut warnings = Vec::new();

        let mut upstreams = Upstreams::default();
        self.add_upstreams(&mut upstreams, &vs_ns, &vs.spec.upstreams);
        for vsr in &c.virtual_server_routes {
            let ns = vsr.namespace().unwrap_or_default();
            self.add_upstreams(&mut upstreams, &ns, &vsr.spec.upstreams);
        }

        let mut secret_refs = BTreeMap::new();
        if let Some(tls) = vs.spec.tls.as_ref().filter(|tls| !tls.secret.is_empty()) {
            self.add_secret(&mut secret_refs, ResourceId::new(vs_ns.as_str(), tls.secret.as_str()));
        }

        let mut policies = BTreeMap::new();
        let mut app_protect_policies = BTreeMap::new();
        let mut app_protect_log_confs = BTreeMap::new();
        let refs = policy_ids(&vs.spec.policies, &vs_ns)
            .chain(route_policy_ids(&vs.spec.routes, &vs_ns))
            .chain(c.virtual_server_routes.iter().flat_map(|vsr| {
                route_policy_ids(&vsr.spec.subroutes, &vsr.namespace().unwrap_or_default())
                    .collect::<Vec<_>>()
            }))
            .collect::<BTreeSet<_>>();
        for id in refs {
            let policy = match self.policy(&id) {
                Ok(policy) => policy,
                Err(error) => {
                    warnings.push(error.to_string());
                    continue;
                }
            };
            for secret in policy_secrets(&policy) {
                self.add_secret(&mut secret_refs, ResourceId::new(id.namespace.as_str(), secret));
            }
            if cluster.app_protect_enabled {
                if let Err(error) = self.add_waf(
                    &policy,
                    &id.namespace,
                    &mut app_protect_policies,
                    &mut app_protect_log_confs,
                ) {
                    warnings.push(error.to_string());
                }
            }
            policies.insert(id.to_string(), policy);
        }

        let mut dos_protected = BTreeMap::new();
        if cluster.app_protect_dos_enabled {
            let vsr_routes = c.virtual_server_routes.iter().flat_map(|vsr| {
                let ns = vsr.namespace().unwrap_or_default();
                vsr.spec
                    .subroutes
                    .iter()
                    .map(move |r| (r.path.clone(), ns.clone(), r.dos.clone()))
            });
            let refs = std::iter::once((String::new(), vs_ns.clone(), vs.spec.dos.clone()))
                .chain(
                    vs.spec
                        .routes
                        .iter()
                        .map(|r| (r.path.clone(), vs_ns.clone(), r.dos.clone())),
                )
                .chain(vsr_routes)
                .filter(|(_, _, dos)| !dos.is_empty());
            for (path, ns, reference) in refs {
                match self.dos.get_valid_dos_ex(&ns, &reference) {
                    Ok(Some(ex)) => {
                        dos_protected.insert(path, ex);
                    }
                    Ok(None) => {}
                    Err(error) => warnings.push(error.to_string()),
                }
            }
        }

        let ex = VirtualServerEx {
            virtual_server: vs.clone(),
            virtual_server_routes: c.virtual_server_routes.clone(),
            http_port: c.http_port,
            https_port: c.https_port,
            http_ipv4: c.http_ipv4.clone(),
            http_ipv6: c.http_ipv6.clone(),
            https_ipv4: c.https_ipv4.clone(),
            https_ipv6: c.https_ipv6.clone(),
            endpoints: upstreams.endpoints,
            external_name_svcs: upstreams.external_name_svcs,
            pod_owners: upstreams.pod_owners,
            policies,
            secret_refs,
            app_protect_policies,
            app_protect_log_confs,
            dos_protected,
        };
        (ex, warnings)
    }

    fn transport_server_ex(&self, c: &TransportServerConfiguration) -> TransportServerEx {
        let ts = &c.transport_server;
        let ns = ts.namespace().unwrap_or_default();

        let mut upstreams = Upstreams::default();
        for upstream in &ts.spec.upstreams {
            let targets = std::iter::once((upstream.service.as_str(), upstream.port)).chain(
                upstream
                    .backup_port
                    .filter(|_| !upstream.backup.is_empty())
                    .map(|port| (upstream.backup.as_str(), i32::from(port))),
            );
            for (service, port) in targets {
                let Ok(key_port) = u16::try_from(port) else {
                    continue;
                };
                let key = endpoints_key(&ns, service, &BTreeMap::new(), key_port);
                let resolved =
                    self.resolve(&ns, service, PortRef::Number(port), &BTreeMap::new(), false, false);
                upstreams.add(key, &ns, service, resolved);
            }
        }

        let mut secret_refs = BTreeMap::new();
        if let Some(tls) = ts.spec.tls.as_ref().filter(|tls| !tls.secret.is_empty()) {
            self.add_secret(&mut secret_refs, ResourceId::new(ns.as_str(), tls.secret.as_str()));
        }

        TransportServerEx {
            transport_server: ts.clone(),
            listener_port: c.listener_port,
            ipv4: c.ipv4.clone(),
            ipv6: c.ipv6.clone(),
            endpoints: upstreams.endpoints,
            external_name_svcs: upstreams.external_name_svcs,
            pod_owners: upstreams.pod_owners,
            secret_refs,
        }
    }

    fn add_upstreams(&self, acc: &mut Upstreams, ns: &str, upstreams: &[Upstream]) {
        for upstream in upstreams {
            let key = endpoints_key(ns, &upstream.service, &upstream.subselector, upstream.port);
            let resolved = self.resolve(
                ns,
                &upstream.service,
                PortRef::Number(i32::from(upstream.port)),
                &upstream.subselector,
                upstream.use_cluster_ip,
                false,
            );
            acc.add(key, ns, &upstream.service, resolved);

            if let Some(port) = upstream.backup_port.filter(|_| !upstream.backup.is_empty()) {
                let key = endpoints_key(ns, &upstream.backup, &BTreeMap::new(), port);
                let resolved = self.resolve(
                    ns,
                    &upstream.backup,
                    PortRef::Number(i32::from(port)),
                    &BTreeMap::new(),
                    false,
                    false,
                );
                acc.add(key, ns, &upstream.backup, resolved);
            }
        }
    }

    fn resolve(
        &self,
        ns: &str,
        service: &str,
        port: PortRef<'_>,
        subselector: &BTreeMap<String, String>,
        use_cluster_ip: bool,
        probe: bool,
    ) -> Result<Resolved> {
        let svc = self
            .cache
            .get::<Service>(&ResourceId::new(ns, service))
            .ok_or_else(|| anyhow!("service {}/{} doesn't exist", ns, service))?;
        let slices = self.cache.service_slices(ns, service);
        let pods = self.cache.service_pods(&svc);
        let backends = ServiceBackends {
            service: &svc,
            slices: &slices,
            pods: &pods,
        };
        let members =
            backends.members(port, subselector, use_cluster_ip, self.cache.cluster().is_plus)?;
        let probe = if probe {
            backends
                .service_port(port)
                .ok()
                .and_then(|p| backends.readiness_probe(p))
        } else {
            None
        };
        let owners = if members.external || use_cluster_ip {
            BTreeMap::new()
        } else {
            backends.pod_owners()
        };
        Ok(Resolved {
            members,
            owners,
            probe,
        })
    }

    fn add_secret(&self, refs: &mut BTreeMap<String, SecretReference>, id: ResourceId) {
        let key = id.to_string();
        if !refs.contains_key(&key) {
            refs.insert(key, self.secrets.get(&id));
        }
    }

    /// Looks up a referenced policy and validates it afresh.
    fn policy(&self, id: &ResourceId) -> Result<Arc<Policy>> {
        let policy = self
            .cache
            .get::<Policy>(id)
            .ok_or_else(|| anyhow!("Policy {} doesn't exist", id))?;
        if !self.cache.cluster().owns_class(&policy.spec.ingress_class) {
            bail!("referenced policy {} has incorrect ingress class", id);
        }
        self.validator
            .policy(&policy)
            .map_err(|error| anyhow!("Policy {} is invalid: {}", id, error))?;
        Ok(policy)
    }

    fn add_waf(
        &self,
        policy: &Policy,
        ns: &str,
        policies: &mut BTreeMap<String, Arc<APPolicy>>,
        log_confs: &mut BTreeMap<String, Arc<APLogConf>>,
    ) -> Result<()> {
        let Some(waf) = policy.spec.waf.as_ref().filter(|waf| waf.enable) else {
            return Ok(());
        };
        if !waf.ap_policy.is_empty() {
            let id = ResourceId::parse_ref(&waf.ap_policy, ns);
            let ap = self.app_protect.policy(&id)?;
            policies.insert(id.to_string(), ap);
        }
        let logs = waf.security_log.iter().chain(waf.security_logs.iter());
        for log in logs.filter(|l| l.enable && !l.ap_log_conf.is_empty()) {
            let id = ResourceId::parse_ref(&log.ap_log_conf, ns);
            let conf = self.app_protect.log_conf(&id)?;
            log_confs.insert(id.to_string(), conf);
        }
        Ok(())
    }
}

// === impl Upstreams ===

impl Upstreams {
    fn add(&mut self, key: String, ns: &str, service: &str, resolved: Result<Resolved>) {
        match resolved {
            Ok(Resolved {
                members,
                owners,
                probe,
            }) => {
                if members.external {
                    self.external_name_svcs.insert(format!("{}/{}", ns, service));
                }
                self.pod_owners.extend(owners);
                if let Some(probe) = probe {
                    self.health_checks.insert(key.clone(), probe);
                }
                self.endpoints.insert(key, members.addresses);
            }
            Err(error) => {
                tracing::debug!(%key, %error, "Failed to resolve endpoints");
                self.endpoints.insert(key, Vec::new());
            }
        }
    }
}

fn ingress_backends(ingress: &Ingress) -> impl Iterator<Item = &IngressServiceBackend> + '_ {
    let spec = ingress.spec.iter();
    let default = spec
        .clone()
        .filter_map(|s| s.default_backend.as_ref())
        .filter_map(|b| b.service.as_ref());
    let rules = spec
        .flat_map(|s| s.rules.iter().flatten())
        .flat_map(|r| r.http.iter().flat_map(|h| h.paths.iter()))
        .filter_map(|p| p.backend.service.as_ref());
    default.chain(rules)
}

fn policy_ids<'a>(
    refs: &'a [PolicyReference],
    ns: &'a str,
) -> impl Iterator<Item = ResourceId> + 'a {
    refs.iter().map(move |p| {
        let ns = if p.namespace.is_empty() {
            ns
        } else {
            p.namespace.as_str()
        };
        ResourceId::new(ns, p.name.as_str())
    })
}

fn route_policy_ids<'a>(routes: &'a [Route], ns: &'a str) -> impl Iterator<Item = ResourceId> + 'a {
    routes.iter().flat_map(move |r| policy_ids(&r.policies, ns))
}

/// The names of the secrets a policy references, in its namespace.
fn policy_secrets(policy: &Policy) -> Vec<&str> {
    let spec = &policy.spec;
    let mut names = Vec::new();
    if let Some(jwt) = &spec.jwt_auth {
        names.push(jwt.secret.as_str());
    }
    if let Some(basic) = &spec.basic_auth {
        names.push(basic.secret.as_str());
    }
    if let Some(mtls) = &spec.ingress_mtls {
        names.push(mtls.client_cert_secret.as_str());
    }
    if let Some(mtls) = &spec.egress_mtls {
        names.push(mtls.tls_secret.as_str());
        names.push(mtls.trusted_cert_secret.as_str());
    }
    if let Some(oidc) = &spec.oidc {
        names.push(oidc.client_secret.as_str());
    }
    if let Some(key) = &spec.api_key {
        names.push(key.client_secret.as_str());
    }
    names.retain(|n| !n.is_empty());
    names
}
