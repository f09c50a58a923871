use super::Dispatcher;
use crate::{
    core::{
        weights::{self, VariableNamer, WeightUpdate},
        Kind, Operation, Problem, Reason, Resource, ResourceChange, ResourceId, Warnings,
    },
    k8s::{
        configuration::{GlobalConfiguration, TransportServer, VirtualServer, VirtualServerRoute},
        Ingress,
    },
};
use anyhow::Result;

impl Dispatcher {
    pub(super) async fn sync_ingress(&mut self, id: &ResourceId) -> Result<bool> {
        let ingress = self.cache.read().get::<Ingress>(id);
        let (changes, problems) = match ingress {
            Some(ingress) => self.config.write().add_or_update_ingress(ingress),
            None => self.config.write().delete_ingress(id),
        };
        self.apply_changes(changes, problems).await;
        Ok(true)
    }

    pub(super) async fn sync_virtual_server(&mut self, id: &ResourceId) -> Result<bool> {
        let vs = self.cache.read().get::<VirtualServer>(id);
        let Some(vs) = vs else {
            let (changes, problems) = self.config.write().delete_virtual_server(id);
            self.apply_changes(changes, problems).await;
            return Ok(true);
        };

        let updates = self.virtual_server_weight_updates(&vs);
        let (changes, problems) = self.config.write().add_or_update_virtual_server(vs);
        match updates {
            Some(updates) => self.apply_weights(id, updates, changes, problems).await,
            None => self.apply_changes(changes, problems).await,
        }
        Ok(true)
    }

    pub(super) async fn sync_virtual_server_route(&mut self, id: &ResourceId) -> Result<bool> {
        let vsr = self.cache.read().get::<VirtualServerRoute>(id);
        let Some(vsr) = vsr else {
            let (changes, problems) = self.config.write().delete_virtual_server_route(id);
            self.apply_changes(changes, problems).await;
            return Ok(true);
        };

        let updates = self.virtual_server_route_weight_updates(&vsr);
        let (changes, problems) = self.config.write().add_or_update_virtual_server_route(vsr);
        match updates {
            Some((vs, updates)) => self.apply_weights(&vs, updates, changes, problems).await,
            None => self.apply_changes(changes, problems).await,
        }
        Ok(true)
    }

    pub(super) async fn sync_transport_server(&mut self, id: &ResourceId) -> Result<bool> {
        let ts = self.cache.read().get::<TransportServer>(id);
        let (changes, problems) = match ts {
            Some(ts) => self.config.write().add_or_update_transport_server(ts),
            None => self.config.write().delete_transport_server(id),
        };
        self.apply_changes(changes, problems).await;
        Ok(true)
    }

    pub(super) async fn sync_global_configuration(&mut self, id: &ResourceId) -> Result<bool> {
        if !self.cluster.is_global_configuration(id) {
            tracing::debug!(%id, "Ignoring unused GlobalConfiguration");
            return Ok(true);
        }

        let gc = self.cache.read().get::<GlobalConfiguration>(id);
        let (changes, problems) = match gc {
            Some(gc) => {
                let (changes, problems, invalid) = self
                    .config
                    .write()
                    .add_or_update_global_configuration(gc.clone());
                match invalid {
                    Some(error) => self.status.event(
                        &*gc,
                        Reason::AddedOrUpdatedWithError,
                        format!("GlobalConfiguration {} is updated with errors: {}", id, error),
                    ),
                    None => self.status.event(
                        &*gc,
                        Reason::Updated,
                        format!("GlobalConfiguration {} was added or updated", id),
                    ),
                }
                (changes, problems)
            }
            None => self.config.write().delete_global_configuration(),
        };
        self.apply_listener_changes(changes, problems).await;
        Ok(true)
    }

    /// Applies changes one resource at a time.
    pub(super) async fn apply_changes(&mut self, changes: Vec<ResourceChange>, problems: Vec<Problem>) {
        for ResourceChange {
            op,
            resource,
            error,
        } in changes
        {
            match op {
                Operation::AddOrUpdate => self.add_or_update(resource).await,
                Operation::Delete => self.delete(resource, error).await,
            }
        }
        self.report_problems(&problems);
    }

    async fn add_or_update(&mut self, resource: Resource) {
        let (extended, warnings) = self.build(std::slice::from_ref(&resource));
        let result = if let Some(ex) = extended.ingress_exes.first() {
            self.configurator.add_or_update_ingress(ex).await
        } else if let Some(ex) = extended.mergeable_ingresses.first() {
            self.configurator.add_or_update_mergeable_ingress(ex).await
        } else if let Some(ex) = extended.virtual_server_exes.first() {
            self.configurator.add_or_update_virtual_server(ex).await
        } else if let Some(ex) = extended.transport_server_exes.first() {
            self.configurator.add_or_update_transport_server(ex).await
        } else {
            Ok(Warnings::default())
        };
        if let Err(error) = &result {
            tracing::error!(kind = %resource.kind(), id = %resource.id(), %error, "Failed to apply configuration");
        }
        self.report_applied(std::slice::from_ref(&resource), warnings, result, Reason::AddedOrUpdated);
    }

    async fn delete(&mut self, resource: Resource, error: Option<String>) {
        let id = resource.id();
        let result = match &resource {
            Resource::Ingress(_) => self.configurator.delete_ingress(&id, false).await,
            Resource::VirtualServer(_) => self.configurator.delete_virtual_server(&id, false).await,
            Resource::TransportServer(_) => self.configurator.delete_transport_server(&id).await,
        };
        if let Err(error) = result {
            tracing::error!(kind = %resource.kind(), %id, %error, "Failed to remove configuration");
        }
        match error {
            Some(error) => self.report_rejected(&resource, &error),
            None => self.report_removed(&resource),
        }
    }

    /// Applies changes caused by a listener update. VirtualServers and
    /// TransportServers are applied together so that NGINX reloads once.
    async fn apply_listener_changes(&mut self, changes: Vec<ResourceChange>, problems: Vec<Problem>) {
        let mut updated = Vec::new();
        let mut deleted_vs = Vec::new();
        let mut deleted_ts = Vec::new();
        let mut rejected = Vec::new();
        let mut others = Vec::new();
        for ResourceChange {
            op,
            resource,
            error,
        } in changes
        {
            let kind = resource.kind();
            if kind == Kind::Ingress {
                others.push(ResourceChange {
                    op,
                    resource,
                    error,
                });
                continue;
            }
            match op {
                Operation::AddOrUpdate => updated.push(resource),
                Operation::Delete => {
                    if kind == Kind::VirtualServer {
                        deleted_vs.push(resource.id());
                    } else {
                        deleted_ts.push(resource.id());
                    }
                    if let Some(error) = error {
                        rejected.push((resource, error));
                    }
                }
            }
        }

        let (extended, warnings) = self.build(&updated);
        let (ts_resources, vs_resources): (Vec<_>, Vec<_>) = updated
            .into_iter()
            .partition(|r| r.kind() == Kind::TransportServer);

        if !extended.transport_server_exes.is_empty() || !deleted_ts.is_empty() {
            let result = self
                .configurator
                .update_transport_servers(&extended.transport_server_exes, &deleted_ts)
                .await
                .map(|()| Warnings::default());
            if let Err(error) = &result {
                tracing::error!(%error, "Failed to update TransportServers");
            }
            self.report_applied(&ts_resources, warnings.clone(), result, Reason::Updated);
        }

        if !extended.virtual_server_exes.is_empty() || !deleted_vs.is_empty() {
            let result = self
                .configurator
                .update_virtual_servers(&extended.virtual_server_exes, &deleted_vs)
                .await;
            if let Err(error) = &result {
                tracing::error!(%error, "Failed to update VirtualServers");
            }
            self.report_applied(&vs_resources, warnings, result, Reason::Updated);
        }

        for (resource, error) in &rejected {
            self.report_rejected(resource, error);
        }
        self.apply_changes(others, problems).await;
    }

    /// Pushes new split weights to the data plane without regenerating the
    /// configuration. Falls back to a full apply if any update fails.
    async fn apply_weights(
        &mut self,
        vs: &ResourceId,
        updates: Vec<WeightUpdate>,
        mut changes: Vec<ResourceChange>,
        problems: Vec<Problem>,
    ) {
        let mut failed = false;
        for WeightUpdate { zone, key, value } in &updates {
            if let Err(error) = self
                .configurator
                .upsert_split_clients_key_val(zone, key, value)
                .await
            {
                tracing::warn!(virtualserver = %vs, %zone, %error, "Failed to update split weights");
                failed = true;
                break;
            }
        }
        if !failed {
            tracing::info!(virtualserver = %vs, updates = updates.len(), "Updated split weights");
            changes.retain(|c| {
                !(c.op == Operation::AddOrUpdate
                    && c.resource.kind() == Kind::VirtualServer
                    && c.resource.id() == *vs)
            });
        }
        self.apply_changes(changes, problems).await;
    }

    /// Returns the key-value updates that apply a VirtualServer update if it
    /// only changes the weights of two-way splits.
    fn virtual_server_weight_updates(&self, vs: &VirtualServer) -> Option<Vec<WeightUpdate>> {
        if !self.cluster.dynamic_weight_changes {
            return None;
        }
        let id = ResourceId::of(vs);
        let config = self.config.read();
        let old = &config.accepted_virtual_server(&id)?.virtual_server;

        let mut old_spec = old.spec.clone();
        old_spec.routes = weights::without_two_way_weights(&old.spec.routes);
        let mut new_spec = vs.spec.clone();
        new_spec.routes = weights::without_two_way_weights(&vs.spec.routes);
        if old_spec != new_spec || self.validator.virtual_server(vs).is_err() {
            return None;
        }

        let namer = VariableNamer::new(&id.namespace, &id.name);
        non_empty(weights::weight_updates(&namer, 0, &old.spec.routes, &vs.spec.routes)?)
    }

    /// Returns the owning VirtualServer and the key-value updates that apply
    /// a VirtualServerRoute update if it only changes the weights of two-way
    /// splits.
    fn virtual_server_route_weight_updates(
        &self,
        vsr: &VirtualServerRoute,
    ) -> Option<(ResourceId, Vec<WeightUpdate>)> {
        if !self.cluster.dynamic_weight_changes {
            return None;
        }
        let id = ResourceId::of(vsr);
        let config = self.config.read();
        let owner = config.virtual_server_for_route(&id)?;

        // The route's split clients are numbered after those of the
        // VirtualServer and of every route it references first.
        let mut start = weights::split_clients_len(&owner.virtual_server.spec.routes);
        let mut old = None;
        for route in &owner.virtual_server_routes {
            if ResourceId::of(&**route) == id {
                old = Some(route);
                break;
            }
            start += weights::split_clients_len(&route.spec.subroutes);
        }
        let old = old?;

        let mut old_spec = old.spec.clone();
        old_spec.subroutes = weights::without_two_way_weights(&old.spec.subroutes);
        let mut new_spec = vsr.spec.clone();
        new_spec.subroutes = weights::without_two_way_weights(&vsr.spec.subroutes);
        if old_spec != new_spec || self.validator.virtual_server_route(vsr).is_err() {
            return None;
        }

        let vs = ResourceId::of(&*owner.virtual_server);
        let namer = VariableNamer::new(&vs.namespace, &vs.name);
        let updates = weights::weight_updates(&namer, start, &old.spec.subroutes, &vsr.spec.subroutes)?;
        Some((vs, non_empty(updates)?))
    }
}

fn non_empty(updates: Vec<WeightUpdate>) -> Option<Vec<WeightUpdate>> {
    if updates.is_empty() {
        None
    } else {
        Some(updates)
    }
}
