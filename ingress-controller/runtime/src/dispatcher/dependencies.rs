//! ConfigMaps, Secrets, Services, EndpointSlices and Policies: objects that
//! are only served through the resources referencing them.

use super::{dedup, placeholder_secret, Dispatcher};
use crate::{
    core::{extended::ExtendedResources, Reason, Resource, ResourceId},
    index::{config_map, secrets, SpecialSecret},
    k8s::{configuration::Policy, ConfigMap, EndpointSlice, Secret, Service},
};
use anyhow::Result;
use std::sync::Arc;

/// File names the data plane uses for special TLS secrets.
const DEFAULT_SERVER_SECRET: &str = "default";
const WILDCARD_SECRET: &str = "wildcard";
const CLIENT_AUTH_SECRET: &str = "mgmt/client";

impl Dispatcher {
    pub(super) async fn sync_config_map(&mut self, id: &ResourceId) -> Result<bool> {
        let cm = self.cache.read().get::<ConfigMap>(id);

        if self.cluster.config_map.as_ref() == Some(id) {
            self.cfg_params = config_map::config_params(cm.as_deref());
            if self
                .status
                .set_configured_addresses(self.cfg_params.external_status_address.clone())
            {
                self.report_external_addresses();
            }
        } else if self.cluster.mgmt_config_map.as_ref() == Some(id) {
            let Some(cm) = cm.as_deref() else {
                tracing::warn!(%id, "Management ConfigMap was deleted; keeping its last parameters");
                return Ok(true);
            };
            match config_map::mgmt_config_params(cm) {
                Ok((params, warnings)) => {
                    for warning in warnings {
                        tracing::warn!(%id, %warning, "Ignoring management parameter");
                        self.status.event(cm, Reason::AddedOrUpdatedWithWarning, warning);
                    }
                    self.mgmt_params = params;
                }
                Err(error) => {
                    tracing::error!(%id, %error, "Invalid management ConfigMap");
                    self.status.event(
                        cm,
                        Reason::Rejected,
                        format!("Configuration from {} was rejected: {}", id, error),
                    );
                    return Ok(true);
                }
            }
        } else {
            tracing::debug!(%id, "Ignoring unused ConfigMap");
            return Ok(true);
        }

        if self.batch.active {
            self.batch.update_all_configs = true;
            return Ok(true);
        }
        let error = self.update_all_configs().await;
        if let Some(cm) = cm {
            match error {
                Some(error) => self.status.event(
                    &*cm,
                    Reason::UpdatedWithError,
                    format!("Configuration from {} was updated, but not applied: {}", id, error),
                ),
                None => self.status.event(
                    &*cm,
                    Reason::Updated,
                    format!("Configuration from {} was updated", id),
                ),
            }
        }
        Ok(true)
    }

    pub(super) async fn sync_secret(&mut self, id: &ResourceId) -> Result<bool> {
        if let Some(special) = self.cluster.special_secrets.kind_of(id) {
            self.sync_special_secret(id, special).await?;
            return Ok(true);
        }

        let secret = self.cache.read().get::<Secret>(id);
        let deleted = match secret {
            Some(secret) => {
                self.secrets.add_or_update(secret);
                false
            }
            None => {
                self.secrets.delete(id);
                true
            }
        };
        let resources = self.resources_for_secret(id);
        // A deleted secret leaves its users without a file, so NGINX must
        // reload even when the rendered configuration is unchanged.
        self.reapply(resources, deleted).await;
        Ok(true)
    }

    async fn sync_special_secret(&mut self, id: &ResourceId, special: SpecialSecret) -> Result<()> {
        let secret = self.cache.read().get::<Secret>(id);
        let Some(secret) = secret else {
            tracing::warn!(%id, "Special secret was deleted; NGINX keeps using the last version");
            self.status.event(
                &placeholder_secret(id),
                Reason::SecretDeleted,
                format!(
                    "the special Secret {} was removed, however NGINX will keep using it",
                    id
                ),
            );
            return Ok(());
        };

        let validation = match special {
            SpecialSecret::DefaultServer | SpecialSecret::WildcardTls | SpecialSecret::ClientAuth => {
                secrets::validate_tls(&secret)
            }
            SpecialSecret::TrustedCa => secrets::validate_ca(&secret),
            SpecialSecret::License => secrets::validate_license(&secret),
        };
        if let Err(error) = validation {
            tracing::error!(%id, %error, "Invalid special secret; NGINX keeps using the last version");
            self.status.event(
                &*secret,
                Reason::Rejected,
                format!("the special Secret {} was rejected, using the previous version: {}", id, error),
            );
            return Ok(());
        }

        match special {
            SpecialSecret::DefaultServer | SpecialSecret::WildcardTls => {
                let name = if special == SpecialSecret::DefaultServer {
                    DEFAULT_SERVER_SECRET
                } else {
                    WILDCARD_SECRET
                };
                self.configurator
                    .add_or_update_special_tls_secrets(&secret, &[name.to_string()])
                    .await?;
                if !self.configurator.supports_dynamic_ssl_reload() {
                    self.configurator.reload(false).await?;
                }
            }
            SpecialSecret::ClientAuth => {
                self.configurator
                    .add_or_update_special_tls_secrets(&secret, &[CLIENT_AUTH_SECRET.to_string()])
                    .await?;
                self.configurator.reload(false).await?;
            }
            SpecialSecret::License => {
                self.configurator.add_or_update_license_secret(&secret).await?;
                self.configurator.reload(false).await?;
            }
            SpecialSecret::TrustedCa => {
                self.configurator.add_or_update_ca_secret(&secret).await?;
                if self.batch.active {
                    self.batch.update_all_configs = true;
                } else {
                    self.update_all_configs().await;
                    self.configurator.reload(false).await?;
                }
            }
        }
        tracing::info!(%id, ?special, "Updated special secret");
        self.status.event(
            &*secret,
            Reason::Updated,
            format!("the special Secret {} was updated", id),
        );
        Ok(())
    }

    /// Resources referencing a secret directly or through a Policy.
    fn resources_for_secret(&self, id: &ResourceId) -> Vec<Resource> {
        let policies = self
            .cache
            .read()
            .list::<Policy>()
            .into_iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(id.namespace.as_str()))
            .filter(|p| p.spec.secret_names().contains(&id.name.as_str()))
            .map(|p| ResourceId::of(&*p))
            .collect::<Vec<_>>();
        let config = self.config.read();
        let mut resources = config.find_resources_for_secret(&id.namespace, &id.name);
        resources.extend(config.find_resources_for_policies(&policies));
        dedup(resources)
    }

    pub(super) async fn sync_service(&mut self, id: &ResourceId) -> Result<bool> {
        let service = self.cache.read().get::<Service>(id);
        if self.cluster.is_external_service(id) && self.status.set_external_service(service.as_deref()) {
            tracing::info!(addresses = ?self.status.external_addresses(), "External addresses changed");
            self.report_external_addresses();
        }

        let resources = self
            .config
            .read()
            .find_resources_for_service(&id.namespace, &id.name);
        self.reapply(resources, false).await;
        Ok(true)
    }

    /// Applies the members of a service's EndpointSlices. Only upstreams are
    /// updated, so NGINX does not reload. Returns false if no accepted
    /// resource uses the service.
    pub(super) async fn sync_endpoint_slices(&mut self, service: &ResourceId) -> Result<bool> {
        let mut touched = false;
        if self.cluster.is_external_service(service) {
            touched = self.scale_to_replicas(service).await;
        }

        let resources = self
            .config
            .read()
            .find_resources_for_service(&service.namespace, &service.name);
        if resources.is_empty() {
            return Ok(touched);
        }
        let (extended, _) = self.build(&resources);
        self.update_endpoints(&extended).await;
        Ok(true)
    }

    async fn update_endpoints(&self, extended: &ExtendedResources) {
        let ExtendedResources {
            ingress_exes,
            mergeable_ingresses,
            virtual_server_exes,
            transport_server_exes,
        } = extended;
        if !ingress_exes.is_empty() {
            if let Err(error) = self.configurator.update_endpoints(ingress_exes).await {
                tracing::error!(%error, "Failed to update Ingress endpoints");
            }
        }
        if !mergeable_ingresses.is_empty() {
            if let Err(error) = self
                .configurator
                .update_endpoints_for_mergeable_ingresses(mergeable_ingresses)
                .await
            {
                tracing::error!(%error, "Failed to update mergeable Ingress endpoints");
            }
        }
        if !virtual_server_exes.is_empty() {
            if let Err(error) = self
                .configurator
                .update_endpoints_for_virtual_servers(virtual_server_exes)
                .await
            {
                tracing::error!(%error, "Failed to update VirtualServer endpoints");
            }
        }
        if !transport_server_exes.is_empty() {
            if let Err(error) = self
                .configurator
                .update_endpoints_for_transport_servers(transport_server_exes)
                .await
            {
                tracing::error!(%error, "Failed to update TransportServer endpoints");
            }
        }
    }

    /// Tracks the number of ready controller replicas and rescales the rate
    /// limits that are shared between them. Returns true if the replica count
    /// changed.
    async fn scale_to_replicas(&mut self, service: &ResourceId) -> bool {
        let replicas = ready_endpoints(
            &self
                .cache
                .read()
                .service_slices(&service.namespace, &service.name),
        );
        if replicas == self.configurator.ingress_controller_replicas() {
            return false;
        }
        tracing::info!(%replicas, "Controller replicas changed");
        self.configurator.set_ingress_controller_replicas(replicas);

        let scaled = self
            .cache
            .read()
            .list::<Policy>()
            .into_iter()
            .filter(|p| p.spec.rate_limit.as_ref().map(|rl| rl.scale).unwrap_or(false))
            .map(|p| ResourceId::of(&*p))
            .collect::<Vec<_>>();
        let resources = {
            let config = self.config.read();
            let mut resources = config.ingresses_with_limit_req_scale();
            resources.extend(config.find_resources_for_policies(&scaled));
            dedup(resources)
        };
        self.reapply(resources, false).await;
        true
    }

    pub(super) async fn sync_policy(&mut self, id: &ResourceId) -> Result<bool> {
        let policy = self.cache.read().get::<Policy>(id);
        if let Some(policy) = policy {
            if self.cluster.owns_class(&policy.spec.ingress_class) {
                self.report_policy(id, &policy);
            }
        }

        let resources = self
            .config
            .read()
            .find_resources_for_policies(std::slice::from_ref(id));
        self.reapply(resources, false).await;
        Ok(true)
    }

    fn report_policy(&self, id: &ResourceId, policy: &Arc<Policy>) {
        let (reason, message) = match self.validator.policy(policy) {
            Ok(()) => (Reason::AddedOrUpdated, format!("Policy {} was added or updated", id)),
            Err(error) => (
                Reason::Rejected,
                format!("Policy {} is invalid and was rejected: {}", id, error),
            ),
        };
        self.status.event(&**policy, reason, message.clone());
        self.status.policy(policy, reason, &message);
    }
}

/// Counts endpoints reporting themselves ready.
fn ready_endpoints(slices: &[Arc<EndpointSlice>]) -> usize {
    slices
        .iter()
        .flat_map(|s| s.endpoints.iter())
        .filter(|e| e.conditions.as_ref().and_then(|c| c.ready) == Some(true))
        .count()
}
