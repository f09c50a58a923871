//! The store of accepted resources.
//!
//! Every operation replaces the pending copy of one resource and then
//! rebuilds the accepted set from all pending resources. The rebuild is a
//! pure function of the pending set, so the outcome does not depend on the
//! order in which updates arrive. Callers receive the difference between the
//! accepted sets before and after the operation along with any problems that
//! are new since the last operation.

mod hosts;
mod lookup;
mod transport;

#[cfg(test)]
mod tests;

use crate::{
    global_configuration::{self, InvalidListeners},
    ClusterInfo, Validator,
};
use nginx_ingress_controller_core::{
    Kind, Operation, Problem, Resource, ResourceChange, ResourceId, VirtualServerConfiguration,
};
use nginx_ingress_controller_k8s_api::{
    configuration::{GlobalConfiguration, Listener, TransportServer, VirtualServer, VirtualServerRoute},
    Ingress, ResourceExt, Time,
};
use parking_lot::RwLock;
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    sync::Arc,
};

pub use self::{
    hosts::{ingress_hosts, ingress_paths, is_master, is_minion},
    lookup::ResourceFilter,
};

pub type SharedConfiguration = Arc<RwLock<Configuration>>;

type Changes = (Vec<ResourceChange>, Vec<Problem>);

#[derive(Debug)]
pub struct Configuration {
    cluster: Arc<ClusterInfo>,
    validator: Validator,

    ingresses: BTreeMap<ResourceId, Arc<Ingress>>,
    virtual_servers: BTreeMap<ResourceId, Arc<VirtualServer>>,
    virtual_server_routes: BTreeMap<ResourceId, Arc<VirtualServerRoute>>,
    transport_servers: BTreeMap<ResourceId, Arc<TransportServer>>,

    /// Validation errors of owned resources that were dropped from the
    /// pending set.
    invalid: BTreeMap<(Kind, ResourceId), String>,

    global_configuration: Option<Arc<GlobalConfiguration>>,
    /// Usable GlobalConfiguration listeners by name.
    listeners: BTreeMap<String, Listener>,

    /// The accepted HTTP resource of every host.
    hosts: BTreeMap<String, Resource>,
    /// The accepted TransportServer of every listener. The host is only
    /// set for TLS passthrough.
    listener_hosts: BTreeMap<ListenerHost, Resource>,

    /// Problems reported by the last rebuild.
    problems: BTreeMap<(Kind, ResourceId), Problem>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ListenerHost {
    pub(crate) listener: String,
    pub(crate) host: String,
}

/// The outcome of a rebuild before it is compared with the current state.
#[derive(Debug, Default)]
struct Rebuild {
    hosts: BTreeMap<String, Resource>,
    listener_hosts: BTreeMap<ListenerHost, Resource>,
    problems: BTreeMap<(Kind, ResourceId), Problem>,
}

// === impl Configuration ===

impl Configuration {
    pub fn new(cluster: Arc<ClusterInfo>) -> Self {
        let validator = Validator::new(cluster.clone());
        Self {
            cluster,
            validator,
            ingresses: BTreeMap::new(),
            virtual_servers: BTreeMap::new(),
            virtual_server_routes: BTreeMap::new(),
            transport_servers: BTreeMap::new(),
            invalid: BTreeMap::new(),
            global_configuration: None,
            listeners: BTreeMap::new(),
            hosts: BTreeMap::new(),
            listener_hosts: BTreeMap::new(),
            problems: BTreeMap::new(),
        }
    }

    pub fn shared(cluster: Arc<ClusterInfo>) -> SharedConfiguration {
        Arc::new(RwLock::new(Self::new(cluster)))
    }

    pub fn cluster(&self) -> &ClusterInfo {
        &self.cluster
    }

    pub fn add_or_update_ingress(&mut self, ingress: Arc<Ingress>) -> Changes {
        let id = ResourceId::of(&*ingress);
        let result = if !self.cluster.owns_ingress(&ingress) {
            self.ingresses.remove(&id);
            Ok(())
        } else {
            let result = self.validator.ingress(&ingress).map_err(|e| e.to_string());
            if result.is_ok() {
                self.ingresses.insert(id.clone(), ingress);
            } else {
                self.ingresses.remove(&id);
            }
            result
        };
        self.update(Kind::Ingress, id, result)
    }

    pub fn delete_ingress(&mut self, id: &ResourceId) -> Changes {
        self.ingresses.remove(id);
        self.update(Kind::Ingress, id.clone(), Ok(()))
    }

    pub fn add_or_update_virtual_server(&mut self, vs: Arc<VirtualServer>) -> Changes {
        let id = ResourceId::of(&*vs);
        let result = if !self.cluster.owns_class(&vs.spec.ingress_class) {
            self.virtual_servers.remove(&id);
            Ok(())
        } else {
            let result = self.validator.virtual_server(&vs).map_err(|e| e.to_string());
            if result.is_ok() {
                self.virtual_servers.insert(id.clone(), vs);
            } else {
                self.virtual_servers.remove(&id);
            }
            result
        };
        self.update(Kind::VirtualServer, id, result)
    }

    pub fn delete_virtual_server(&mut self, id: &ResourceId) -> Changes {
        self.virtual_servers.remove(id);
        self.update(Kind::VirtualServer, id.clone(), Ok(()))
    }

    pub fn add_or_update_virtual_server_route(&mut self, vsr: Arc<VirtualServerRoute>) -> Changes {
        let id = ResourceId::of(&*vsr);
        let result = if !self.cluster.owns_class(&vsr.spec.ingress_class) {
            self.virtual_server_routes.remove(&id);
            Ok(())
        } else {
            let result = self
                .validator
                .virtual_server_route(&vsr)
                .map_err(|e| e.to_string());
            if result.is_ok() {
                self.virtual_server_routes.insert(id.clone(), vsr);
            } else {
                self.virtual_server_routes.remove(&id);
            }
            result
        };
        self.update(Kind::VirtualServerRoute, id, result)
    }

    pub fn delete_virtual_server_route(&mut self, id: &ResourceId) -> Changes {
        self.virtual_server_routes.remove(id);
        self.update(Kind::VirtualServerRoute, id.clone(), Ok(()))
    }

    pub fn add_or_update_transport_server(&mut self, ts: Arc<TransportServer>) -> Changes {
        let id = ResourceId::of(&*ts);
        let result = if !self.cluster.owns_class(&ts.spec.ingress_class) {
            self.transport_servers.remove(&id);
            Ok(())
        } else {
            let result = self
                .validator
                .transport_server(&ts)
                .map_err(|e| e.to_string());
            if result.is_ok() {
                self.transport_servers.insert(id.clone(), ts);
            } else {
                self.transport_servers.remove(&id);
            }
            result
        };
        self.update(Kind::TransportServer, id, result)
    }

    pub fn delete_transport_server(&mut self, id: &ResourceId) -> Changes {
        self.transport_servers.remove(id);
        self.update(Kind::TransportServer, id.clone(), Ok(()))
    }

    /// Replaces the GlobalConfiguration. Invalid listeners are dropped and
    /// reported; the remaining listeners take effect.
    pub fn add_or_update_global_configuration(
        &mut self,
        gc: Arc<GlobalConfiguration>,
    ) -> (Vec<ResourceChange>, Vec<Problem>, Option<InvalidListeners>) {
        let (valid, error) =
            global_configuration::valid_listeners(&gc, &self.cluster.forbidden_listener_ports);
        self.listeners = valid.into_iter().map(|l| (l.name.clone(), l)).collect();
        self.global_configuration = Some(gc);
        let (changes, problems) = self.rebuild(None);
        (changes, problems, error)
    }

    pub fn delete_global_configuration(&mut self) -> Changes {
        self.global_configuration = None;
        self.listeners.clear();
        self.rebuild(None)
    }

    pub fn global_configuration(&self) -> Option<&Arc<GlobalConfiguration>> {
        self.global_configuration.as_ref()
    }

    /// The accepted HTTP resource holding `host`.
    pub fn host_owner(&self, host: &str) -> Option<&Resource> {
        self.hosts.get(host)
    }

    /// The usable GlobalConfiguration listeners, by name.
    pub fn listeners(&self) -> &BTreeMap<String, Listener> {
        &self.listeners
    }

    pub fn virtual_server(&self, id: &ResourceId) -> Option<&Arc<VirtualServer>> {
        self.virtual_servers.get(id)
    }

    pub fn virtual_server_route(&self, id: &ResourceId) -> Option<&Arc<VirtualServerRoute>> {
        self.virtual_server_routes.get(id)
    }

    /// The accepted configuration of a VirtualServer.
    pub fn accepted_virtual_server(&self, id: &ResourceId) -> Option<&VirtualServerConfiguration> {
        let vs = self.virtual_servers.get(id)?;
        match self.hosts.get(&vs.spec.host)? {
            Resource::VirtualServer(c) if ResourceId::of(&*c.virtual_server) == *id => Some(c),
            _ => None,
        }
    }

    /// The accepted VirtualServer that a VirtualServerRoute is attached to.
    pub fn virtual_server_for_route(
        &self,
        vsr: &ResourceId,
    ) -> Option<&VirtualServerConfiguration> {
        self.hosts.values().find_map(|r| match r {
            Resource::VirtualServer(c)
                if c
                    .virtual_server_routes
                    .iter()
                    .any(|route| ResourceId::of(&**route) == *vsr) =>
            {
                Some(c)
            }
            _ => None,
        })
    }

    fn update(&mut self, kind: Kind, id: ResourceId, validation: Result<(), String>) -> Changes {
        match validation {
            Ok(()) => {
                self.invalid.remove(&(kind, id.clone()));
                self.rebuild(Some((kind, &id)))
            }
            Err(error) => {
                self.invalid.insert((kind, id.clone()), error.clone());
                let (mut changes, mut problems) = self.rebuild(Some((kind, &id)));
                let deleted = changes.iter_mut().find(|c| {
                    c.op == Operation::Delete && c.resource.kind() == kind && c.resource.id() == id
                });
                if let Some(change) = deleted {
                    change.error = Some(error);
                    problems.retain(|p| p.kind != kind || p.id != id);
                }
                (changes, problems)
            }
        }
    }

    /// Recomputes the accepted set. Problems are reported when they are new
    /// or changed, and always for the resource that triggered the rebuild so
    /// that its status is written again.
    fn rebuild(&mut self, updated: Option<(Kind, &ResourceId)>) -> Changes {
        let mut rebuild = Rebuild::default();
        self.rebuild_hosts(&mut rebuild);
        self.rebuild_transport_servers(&mut rebuild);
        for ((kind, id), error) in &self.invalid {
            let mut problem = Problem::rejected(*kind, id.clone(), error.clone());
            problem.is_error = true;
            rebuild.problems.insert((*kind, id.clone()), problem);
        }

        let old = accepted(self.hosts.values().chain(self.listener_hosts.values()));
        let new = accepted(rebuild.hosts.values().chain(rebuild.listener_hosts.values()));
        let changes = diff(old, new);

        let problems = rebuild
            .problems
            .iter()
            .filter(|((kind, id), problem)| {
                updated == Some((*kind, id))
                    || self.problems.get(&(*kind, id.clone())) != Some(*problem)
            })
            .map(|(_, problem)| problem.clone())
            .collect();

        self.hosts = rebuild.hosts;
        self.listener_hosts = rebuild.listener_hosts;
        self.problems = rebuild.problems;

        if !changes.is_empty() {
            tracing::debug!(changes = changes.len(), "Rebuilt configuration");
        }
        (changes, problems)
    }
}

/// Collects the distinct resources in an accepted set.
fn accepted<'r>(
    resources: impl Iterator<Item = &'r Resource>,
) -> BTreeMap<(Kind, ResourceId), &'r Resource> {
    resources.map(|r| ((r.kind(), r.id()), r)).collect()
}

fn diff(
    old: BTreeMap<(Kind, ResourceId), &Resource>,
    new: BTreeMap<(Kind, ResourceId), &Resource>,
) -> Vec<ResourceChange> {
    let deletes = old
        .iter()
        .filter(|(key, _)| !new.contains_key(key))
        .map(|(_, r)| ResourceChange {
            op: Operation::Delete,
            resource: (*r).clone(),
            error: None,
        });
    let updates = new
        .iter()
        .filter(|(key, r)| old.get(key) != Some(r))
        .map(|(_, r)| ResourceChange {
            op: Operation::AddOrUpdate,
            resource: (*r).clone(),
            error: None,
        });
    deletes.chain(updates).collect()
}

/// Orders contenders by creation time, then by `namespace/name`. Resources
/// with a creation timestamp sort before those without.
pub(crate) fn by_age(a: (&Option<Time>, &ResourceId), b: (&Option<Time>, &ResourceId)) -> Ordering {
    let by_ts = match (a.0, b.0) {
        (Some(a), Some(b)) => a.cmp(b),
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
    };
    by_ts.then_with(|| a.1.cmp(b.1))
}

pub(crate) fn created<T: ResourceExt>(resource: &T) -> &Option<Time> {
    &resource.meta().creation_timestamp
}
