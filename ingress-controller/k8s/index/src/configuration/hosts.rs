//! Resolves host ownership among Ingresses and VirtualServers.

use super::{by_age, created, Configuration, Rebuild};
use crate::validation::validate_virtual_server_route_for_virtual_server;
use nginx_ingress_controller_core::{
    IngressConfiguration, Kind, MinionConfiguration, Problem, Reason, Resource, ResourceId,
    VirtualServerConfiguration,
};
use nginx_ingress_controller_k8s_api::{
    annotations::{MERGEABLE_INGRESS_TYPE, MERGEABLE_MASTER, MERGEABLE_MINION},
    configuration::{Listener, VirtualServer, HTTP_PROTOCOL},
    Ingress, ResourceExt,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// A resource competing for hosts. VirtualServers take precedence over
/// Ingresses, then the oldest resource wins.
#[derive(Clone, Debug)]
enum Contender {
    VirtualServer(Arc<VirtualServer>),
    Ingress(Arc<Ingress>),
}

// === impl Contender ===

impl Contender {
    fn priority(&self) -> u8 {
        match self {
            Self::VirtualServer(_) => 0,
            Self::Ingress(_) => 1,
        }
    }

    fn id(&self) -> ResourceId {
        match self {
            Self::VirtualServer(vs) => ResourceId::of(&**vs),
            Self::Ingress(ing) => ResourceId::of(&**ing),
        }
    }

    fn created(&self) -> &Option<nginx_ingress_controller_k8s_api::Time> {
        match self {
            Self::VirtualServer(vs) => created(&**vs),
            Self::Ingress(ing) => created(&**ing),
        }
    }
}

// === impl Configuration ===

impl Configuration {
    pub(super) fn rebuild_hosts(&self, rebuild: &mut Rebuild) {
        let mut contenders = self
            .virtual_servers
            .values()
            .cloned()
            .map(Contender::VirtualServer)
            .chain(
                self.ingresses
                    .values()
                    .filter(|ing| !is_minion(ing))
                    .cloned()
                    .map(Contender::Ingress),
            )
            .map(|c| (c.id(), c))
            .collect::<Vec<_>>();
        contenders.sort_by(|(a_id, a), (b_id, b)| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| by_age((a.created(), a_id), (b.created(), b_id)))
        });

        let mut owners = BTreeMap::<String, ResourceId>::new();
        for (id, contender) in contenders {
            match contender {
                Contender::VirtualServer(vs) => {
                    let host = &vs.spec.host.clone();
                    if let Some(owner) = owners.get(host) {
                        rebuild.problems.insert(
                            (Kind::VirtualServer, id.clone()),
                            Problem::rejected(
                                Kind::VirtualServer,
                                id,
                                format!("Host {} is taken by {}", host, owner),
                            ),
                        );
                        continue;
                    }
                    owners.insert(host.clone(), id);
                    let config = self.virtual_server_configuration(vs);
                    rebuild
                        .hosts
                        .insert(host.clone(), Resource::VirtualServer(config));
                }
                Contender::Ingress(ing) => {
                    let mut valid_hosts = BTreeMap::new();
                    let mut warnings = BTreeSet::new();
                    let mut taken_by = BTreeSet::new();
                    for host in contender_hosts(&ing) {
                        match owners.get(&host) {
                            Some(owner) => {
                                warnings.insert(format!("host {} is taken by {}", host, owner));
                                taken_by.insert(owner.to_string());
                                valid_hosts.insert(host, false);
                            }
                            None => {
                                valid_hosts.insert(host, true);
                            }
                        }
                    }
                    if !valid_hosts.values().any(|v| *v) {
                        rebuild.problems.insert(
                            (Kind::Ingress, id.clone()),
                            Problem::rejected(
                                Kind::Ingress,
                                id,
                                format!(
                                    "All hosts are taken by other resources: {}",
                                    taken_by.into_iter().collect::<Vec<_>>().join(", ")
                                ),
                            ),
                        );
                        continue;
                    }
                    for (host, valid) in &valid_hosts {
                        if *valid {
                            owners.insert(host.clone(), id.clone());
                        }
                    }
                    let config = self.ingress_configuration(ing, valid_hosts, warnings, rebuild);
                    for host in config.hosts() {
                        rebuild
                            .hosts
                            .insert(host.to_string(), Resource::Ingress(config.clone()));
                    }
                }
            }
        }

        self.report_orphans(rebuild);
    }

    fn ingress_configuration(
        &self,
        ingress: Arc<Ingress>,
        valid_hosts: BTreeMap<String, bool>,
        warnings: BTreeSet<String>,
        rebuild: &mut Rebuild,
    ) -> IngressConfiguration {
        let mut config = IngressConfiguration {
            is_master: is_master(&ingress),
            valid_hosts,
            warnings: warnings.into_iter().collect(),
            ..Default::default()
        };
        if config.is_master {
            let host = config.hosts().next().map(str::to_string).unwrap_or_default();
            self.attach_minions(&mut config, &host, rebuild);
        }
        config.ingress = ingress;
        config
    }

    /// Attaches the minions of `host` to a master. The oldest minion wins
    /// each path.
    fn attach_minions(&self, master: &mut IngressConfiguration, host: &str, rebuild: &mut Rebuild) {
        let mut minions = self
            .ingresses
            .iter()
            .filter(|(_, ing)| is_minion(ing) && ingress_hosts(ing).iter().any(|h| h == host))
            .collect::<Vec<_>>();
        minions.sort_by(|(a_id, a), (b_id, b)| {
            by_age((created(&***a), *a_id), (created(&***b), *b_id))
        });

        let mut paths = BTreeSet::new();
        for (id, minion) in minions {
            let mut valid_paths = BTreeMap::new();
            for path in ingress_paths(minion) {
                let free = paths.insert(path.clone());
                valid_paths.insert(path, free);
            }
            let taken = valid_paths
                .iter()
                .filter(|(_, valid)| !**valid)
                .map(|(path, _)| path.clone())
                .collect::<Vec<_>>();
            if !valid_paths.is_empty() && taken.len() == valid_paths.len() {
                rebuild.problems.insert(
                    (Kind::Ingress, id.clone()),
                    Problem::rejected(
                        Kind::Ingress,
                        id.clone(),
                        format!("path {} duplicated", taken.join(", ")),
                    ),
                );
                continue;
            }
            if !taken.is_empty() {
                master.child_warnings.insert(
                    id.clone(),
                    taken
                        .iter()
                        .map(|path| format!("path {} is taken by another resource", path))
                        .collect(),
                );
            }
            master.minions.push(MinionConfiguration {
                ingress: minion.clone(),
                valid_paths,
            });
        }
    }

    fn virtual_server_configuration(&self, vs: Arc<VirtualServer>) -> VirtualServerConfiguration {
        let mut config = VirtualServerConfiguration::new(vs.clone());
        let mut warnings = BTreeSet::new();
        let namespace = vs.namespace().unwrap_or_default();

        for route in vs.spec.routes.iter().filter(|r| !r.route.is_empty()) {
            let id = ResourceId::parse_ref(&route.route, &namespace);
            let Some(vsr) = self.virtual_server_routes.get(&id) else {
                warnings.insert(format!(
                    "VirtualServerRoute {} doesn't exist or invalid",
                    id
                ));
                continue;
            };
            if let Err(error) =
                validate_virtual_server_route_for_virtual_server(vsr, &vs.spec.host, &route.path)
            {
                warnings.insert(format!("VirtualServerRoute {} is invalid: {}", id, error));
                continue;
            }
            config.virtual_server_routes.push(vsr.clone());
        }

        if let Some(listener) = vs.spec.listener.as_ref() {
            if !listener.http.is_empty() {
                match self.http_listener(&listener.http, false) {
                    Ok(l) => {
                        config.http_port = l.port as u16;
                        config.http_ipv4 = l.ipv4.clone();
                        config.http_ipv6 = l.ipv6.clone();
                    }
                    Err(warning) => {
                        warnings.insert(warning);
                    }
                }
            }
            if !listener.https.is_empty() {
                match self.http_listener(&listener.https, true) {
                    Ok(l) => {
                        config.https_port = l.port as u16;
                        config.https_ipv4 = l.ipv4.clone();
                        config.https_ipv6 = l.ipv6.clone();
                    }
                    Err(warning) => {
                        warnings.insert(warning);
                    }
                }
            }
        }

        config.warnings = warnings.into_iter().collect();
        config
    }

    fn http_listener(&self, name: &str, ssl: bool) -> Result<&Listener, String> {
        let listener = self
            .listeners
            .get(name)
            .filter(|l| l.protocol == HTTP_PROTOCOL)
            .ok_or_else(|| format!("Listener {} is not defined in GlobalConfiguration", name))?;
        if listener.ssl != ssl {
            let expected = if ssl { "https" } else { "http" };
            return Err(format!(
                "Listener {} can't be used in `listener.{}` context",
                name, expected
            ));
        }
        Ok(listener)
    }

    /// Reports minions without an accepted master and routes without an
    /// accepted VirtualServer.
    fn report_orphans(&self, rebuild: &mut Rebuild) {
        let mut attached_minions = BTreeSet::new();
        let mut attached_routes = BTreeSet::new();
        let mut vs_by_host = BTreeMap::new();
        for resource in rebuild.hosts.values() {
            match resource {
                Resource::Ingress(c) => {
                    attached_minions.extend(c.minions.iter().map(|m| ResourceId::of(&*m.ingress)));
                }
                Resource::VirtualServer(c) => {
                    attached_routes
                        .extend(c.virtual_server_routes.iter().map(|r| ResourceId::of(&**r)));
                    vs_by_host.insert(c.host().to_string(), ResourceId::of(&*c.virtual_server));
                }
                Resource::TransportServer(_) => {}
            }
        }

        for (id, ing) in &self.ingresses {
            let key = (Kind::Ingress, id.clone());
            if !is_minion(ing) || attached_minions.contains(id) || rebuild.problems.contains_key(&key) {
                continue;
            }
            rebuild.problems.insert(
                key,
                Problem::new(
                    Kind::Ingress,
                    id.clone(),
                    Reason::NoIngressMasterFound,
                    "Ingress master is invalid or doesn't exist",
                ),
            );
        }

        for (id, vsr) in &self.virtual_server_routes {
            if attached_routes.contains(id) {
                continue;
            }
            let problem = match vs_by_host.get(&vsr.spec.host) {
                Some(vs) => Problem::new(
                    Kind::VirtualServerRoute,
                    id.clone(),
                    Reason::Ignored,
                    format!("VirtualServer {} ignores VirtualServerRoute", vs),
                ),
                None => Problem::new(
                    Kind::VirtualServerRoute,
                    id.clone(),
                    Reason::NoVirtualServersFound,
                    "VirtualServer is invalid or doesn't exist",
                ),
            };
            rebuild
                .problems
                .insert((Kind::VirtualServerRoute, id.clone()), problem);
        }
    }
}

fn contender_hosts(ingress: &Ingress) -> Vec<String> {
    let mut hosts = ingress_hosts(ingress);
    hosts.sort();
    hosts.dedup();
    hosts
}

/// The hosts of an Ingress's rules, in declaration order.
pub fn ingress_hosts(ingress: &Ingress) -> Vec<String> {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .map(|rule| rule.host.clone().unwrap_or_default())
        .collect()
}

/// The paths of an Ingress's rules.
pub fn ingress_paths(ingress: &Ingress) -> Vec<String> {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .flat_map(|rule| rule.http.iter().flat_map(|http| http.paths.iter()))
        .map(|p| p.path.clone().unwrap_or_default())
        .collect()
}

pub fn is_master(ingress: &Ingress) -> bool {
    ingress.annotations().get(MERGEABLE_INGRESS_TYPE).map(String::as_str) == Some(MERGEABLE_MASTER)
}

pub fn is_minion(ingress: &Ingress) -> bool {
    ingress.annotations().get(MERGEABLE_INGRESS_TYPE).map(String::as_str) == Some(MERGEABLE_MINION)
}
