use super::Dispatcher;
use crate::{
    core::{Kind, Problem, Reason, Resource, ResourceId, State, Warnings},
    index::{Cache, Cached, ResourceFilter},
    k8s::{
        app_protect::{APDosLogConf, APDosPolicy, APLogConf, APPolicy, APUserSig},
        configuration::{GlobalConfiguration, Policy, TransportServer, VirtualServer, VirtualServerRoute},
        dos::DosProtectedResource,
        Ingress,
    },
};
use anyhow::Result;
use std::sync::Arc;

impl Dispatcher {
    /// Reports the outcome of applying resources to the data plane.
    ///
    /// `ok` is the reason reported for a clean apply; a failed apply is
    /// reported with the matching error reason.
    pub(super) fn report_applied(
        &self,
        resources: &[Resource],
        mut warnings: Warnings,
        result: Result<Warnings>,
        ok: Reason,
    ) {
        let error = match result {
            Ok(applied) => {
                warnings.extend(applied);
                None
            }
            Err(error) => Some(error.to_string()),
        };
        for resource in resources {
            self.report_resource(resource, &warnings, error.as_deref(), ok);
        }
    }

    fn report_resource(
        &self,
        resource: &Resource,
        warnings: &Warnings,
        error: Option<&str>,
        ok: Reason,
    ) {
        let cache = self.cache.read();
        let id = resource.id();
        let mut messages = resource.warnings().to_vec();
        messages.extend(warnings.get(resource.kind(), &id).iter().cloned());

        match resource {
            Resource::Ingress(c) => {
                let (reason, message) = outcome(&id, &messages, error, ok);
                let master = current(&cache, &c.ingress);
                self.status.event(&*master, reason, message);
                if error.is_none() {
                    self.status.ingress(&master);
                }

                for minion in &c.minions {
                    let minion_id = ResourceId::of(&*minion.ingress);
                    let mut messages = c.child_warnings.get(&minion_id).cloned().unwrap_or_default();
                    messages.extend(warnings.get(Kind::Ingress, &minion_id).iter().cloned());
                    let (reason, message) = outcome(&minion_id, &messages, error, ok);
                    let minion = current(&cache, &minion.ingress);
                    self.status.event(&*minion, reason, message);
                    if error.is_none() {
                        self.status.ingress(&minion);
                    }
                }
            }

            Resource::VirtualServer(c) => {
                let (reason, message) = outcome(&id, &messages, error, ok);
                let vs = current(&cache, &c.virtual_server);
                self.status.event(&*vs, reason, message.clone());
                self.status.virtual_server(&vs, reason, &message);

                for vsr in &c.virtual_server_routes {
                    let vsr_id = ResourceId::of(&**vsr);
                    let messages = warnings.get(Kind::VirtualServerRoute, &vsr_id);
                    let (reason, message) = outcome(&vsr_id, messages, error, ok);
                    let vsr = current(&cache, vsr);
                    self.status.event(&*vsr, reason, message.clone());
                    self.status
                        .virtual_server_route(&vsr, reason, &message, Some(&id));
                }
            }

            Resource::TransportServer(c) => {
                let (reason, message) = outcome(&id, &messages, error, ok);
                let ts = current(&cache, &c.transport_server);
                self.status.event(&*ts, reason, message.clone());
                self.status.transport_server(&ts, reason, &message);
            }
        }
    }

    /// Reports a previously accepted resource that was removed because it
    /// became invalid.
    pub(super) fn report_rejected(&self, resource: &Resource, error: &str) {
        let cache = self.cache.read();
        let id = resource.id();
        let message = format!("{} {} was rejected with error: {}", resource.kind(), id, error);
        match resource {
            Resource::Ingress(c) => {
                for ingress in c.ingresses() {
                    let ingress = current(&cache, ingress);
                    self.status.event(&*ingress, Reason::Rejected, message.clone());
                    self.status.clear_ingress(&ingress);
                }
            }
            Resource::VirtualServer(c) => {
                let vs = current(&cache, &c.virtual_server);
                self.status.event(&*vs, Reason::Rejected, message.clone());
                self.status.virtual_server(&vs, Reason::Rejected, &message);
            }
            Resource::TransportServer(c) => {
                let ts = current(&cache, &c.transport_server);
                self.status.event(&*ts, Reason::Rejected, message.clone());
                self.status.transport_server(&ts, Reason::Rejected, &message);
            }
        }
    }

    /// Clears the status of Ingresses that are no longer served.
    pub(super) fn report_removed(&self, resource: &Resource) {
        let Resource::Ingress(c) = resource else {
            return;
        };
        let cache = self.cache.read();
        for ingress in c.ingresses() {
            // Deleted objects need no status.
            if let Some(ingress) = cache.get::<Ingress>(&ResourceId::of(&**ingress)) {
                self.status.clear_ingress(&ingress);
            }
        }
    }

    /// Reports problems on the objects they concern. Problems about objects
    /// that no longer exist are dropped.
    pub(super) fn report_problems(&self, problems: &[Problem]) {
        let cache = self.cache.read();
        for Problem {
            kind,
            id,
            reason,
            message,
            ..
        } in problems
        {
            let (reason, message) = (*reason, message.as_str());
            match kind {
                Kind::Ingress => {
                    if let Some(ingress) = self.event_on::<Ingress>(&cache, id, reason, message) {
                        if reason.state() == State::Invalid {
                            self.status.clear_ingress(&ingress);
                        }
                    }
                }
                Kind::VirtualServer => {
                    if let Some(vs) = self.event_on::<VirtualServer>(&cache, id, reason, message) {
                        self.status.virtual_server(&vs, reason, message);
                    }
                }
                Kind::VirtualServerRoute => {
                    if let Some(vsr) =
                        self.event_on::<VirtualServerRoute>(&cache, id, reason, message)
                    {
                        self.status.virtual_server_route(&vsr, reason, message, None);
                    }
                }
                Kind::TransportServer => {
                    if let Some(ts) = self.event_on::<TransportServer>(&cache, id, reason, message) {
                        self.status.transport_server(&ts, reason, message);
                    }
                }
                Kind::Policy => {
                    if let Some(policy) = self.event_on::<Policy>(&cache, id, reason, message) {
                        self.status.policy(&policy, reason, message);
                    }
                }
                Kind::GlobalConfiguration => {
                    self.event_on::<GlobalConfiguration>(&cache, id, reason, message);
                }
                Kind::AppProtectPolicy => {
                    self.event_on::<APPolicy>(&cache, id, reason, message);
                }
                Kind::AppProtectLogConf => {
                    self.event_on::<APLogConf>(&cache, id, reason, message);
                }
                Kind::AppProtectUserSig => {
                    self.event_on::<APUserSig>(&cache, id, reason, message);
                }
                Kind::AppProtectDosPolicy => {
                    self.event_on::<APDosPolicy>(&cache, id, reason, message);
                }
                Kind::AppProtectDosLogConf => {
                    self.event_on::<APDosLogConf>(&cache, id, reason, message);
                }
                Kind::DosProtectedResource => {
                    self.event_on::<DosProtectedResource>(&cache, id, reason, message);
                }
                Kind::ConfigMap
                | Kind::EndpointSlice
                | Kind::Namespace
                | Kind::Secret
                | Kind::Service => {
                    tracing::debug!(%kind, %id, %reason, %message, "Not reporting problem");
                }
            }
        }
    }

    /// Re-reports the external addresses on every accepted Ingress and
    /// VirtualServer.
    pub(super) fn report_external_addresses(&self) {
        let resources = self.config.read().get_resources_with_filter(ResourceFilter {
            ingresses: true,
            virtual_servers: true,
            transport_servers: false,
        });
        let cache = self.cache.read();
        for resource in &resources {
            match resource {
                Resource::Ingress(c) => {
                    for ingress in c.ingresses() {
                        self.status.ingress(&current(&cache, ingress));
                    }
                }
                Resource::VirtualServer(c) => {
                    self.status
                        .refresh_virtual_server(&current(&cache, &c.virtual_server));
                    for vsr in &c.virtual_server_routes {
                        self.status
                            .refresh_virtual_server_route(&current(&cache, vsr));
                    }
                }
                Resource::TransportServer(_) => {}
            }
        }
    }

    fn event_on<T>(&self, cache: &Cache, id: &ResourceId, reason: Reason, message: &str) -> Option<Arc<T>>
    where
        T: Cached + crate::k8s::Resource<DynamicType = ()>,
    {
        let obj = cache.get::<T>(id)?;
        self.status.event(&*obj, reason, message);
        Some(obj)
    }
}

/// The cached version of an object, which carries the latest status, or the
/// given snapshot if the object is gone.
fn current<T: Cached>(cache: &Cache, obj: &Arc<T>) -> Arc<T> {
    cache
        .get::<T>(&ResourceId::of(&**obj))
        .unwrap_or_else(|| obj.clone())
}

/// The event reason and message for an applied resource.
fn outcome(id: &ResourceId, warnings: &[String], error: Option<&str>, ok: Reason) -> (Reason, String) {
    let verb = if ok == Reason::Updated {
        "updated"
    } else {
        "added or updated"
    };
    if let Some(error) = error {
        let reason = if ok == Reason::Updated {
            Reason::UpdatedWithError
        } else {
            Reason::AddedOrUpdatedWithError
        };
        return (
            reason,
            format!("Configuration for {} was {}, but not applied: {}", id, verb, error),
        );
    }
    if warnings.is_empty() {
        return (ok, format!("Configuration for {} was {}", id, verb));
    }
    (
        Reason::AddedOrUpdatedWithWarning,
        format!(
            "Configuration for {} was {} ; with warning(s): {}",
            id,
            verb,
            warnings.join(", ")
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes() {
        let id = ResourceId::new("default", "cafe");
        assert_eq!(
            outcome(&id, &[], None, Reason::AddedOrUpdated),
            (
                Reason::AddedOrUpdated,
                "Configuration for default/cafe was added or updated".to_string()
            )
        );
        assert_eq!(
            outcome(&id, &["TLS secret is invalid".to_string()], None, Reason::AddedOrUpdated),
            (
                Reason::AddedOrUpdatedWithWarning,
                "Configuration for default/cafe was added or updated ; with warning(s): TLS secret is invalid"
                    .to_string()
            )
        );
        assert_eq!(
            outcome(&id, &[], Some("reload failed"), Reason::Updated),
            (
                Reason::UpdatedWithError,
                "Configuration for default/cafe was updated, but not applied: reload failed"
                    .to_string()
            )
        );
    }
}
