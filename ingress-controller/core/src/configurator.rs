//! The interface to the data plane.
//!
//! A [`Configurator`] renders snapshots into proxy configuration, manages the
//! proxy's reloads, and pushes runtime updates (endpoints, split weights)
//! without a reload where it can.

use crate::{
    extended::{
        AppProtectResource, ExtendedResources, IngressEx, MergeableIngresses, TransportServerEx,
        VirtualServerEx,
    },
    Kind, ResourceId,
};
use anyhow::Result;
use nginx_ingress_controller_k8s_api::{
    app_protect::{APDosLogConf, APDosPolicy, APPolicy, APUserSig},
    Secret,
};
use std::{collections::BTreeMap, sync::Arc};

/// Global HTTP parameters from the main ConfigMap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigParams {
    pub values: BTreeMap<String, String>,
    /// Addresses reported on Ingress status instead of the external service's.
    pub external_status_address: Vec<String>,
}

/// Parameters from the NGINX Plus management ConfigMap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MgmtConfigParams {
    pub values: BTreeMap<String, String>,
    pub license_token_secret: String,
    pub client_auth_secret: String,
    pub trusted_cert_secret: String,
}

/// Non-fatal messages produced while applying resources, keyed by the
/// resource they concern.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Warnings(BTreeMap<(Kind, ResourceId), Vec<String>>);

/// Writes and removes secret files on the data plane.
///
/// This is called synchronously while snapshots are built, so implementations
/// must not block on the network.
pub trait SecretFileManager: Send + Sync {
    /// Materializes the secret and returns the path it was written to.
    fn add_or_update_secret(&self, secret: &Secret) -> String;

    fn delete_secret(&self, id: &ResourceId);
}

#[async_trait::async_trait]
pub trait Configurator: Send + Sync {
    async fn add_or_update_ingress(&self, ingress: &IngressEx) -> Result<Warnings>;

    async fn add_or_update_mergeable_ingress(
        &self,
        mergeable: &MergeableIngresses,
    ) -> Result<Warnings>;

    async fn add_or_update_virtual_server(&self, vs: &VirtualServerEx) -> Result<Warnings>;

    async fn add_or_update_transport_server(&self, ts: &TransportServerEx) -> Result<Warnings>;

    /// Applies a set of resources with a single reload. When
    /// `reload_if_unchanged` is false, the reload is skipped if the rendered
    /// configuration did not change.
    async fn add_or_update_resources(
        &self,
        resources: &ExtendedResources,
        reload_if_unchanged: bool,
    ) -> Result<Warnings>;

    async fn delete_ingress(&self, id: &ResourceId, skip_reload: bool) -> Result<()>;

    async fn delete_virtual_server(&self, id: &ResourceId, skip_reload: bool) -> Result<()>;

    async fn delete_transport_server(&self, id: &ResourceId) -> Result<()>;

    async fn update_endpoints(&self, ingresses: &[IngressEx]) -> Result<()>;

    async fn update_endpoints_for_mergeable_ingresses(
        &self,
        mergeable: &[MergeableIngresses],
    ) -> Result<()>;

    async fn update_endpoints_for_virtual_servers(&self, vses: &[VirtualServerEx]) -> Result<()>;

    async fn update_endpoints_for_transport_servers(
        &self,
        tses: &[TransportServerEx],
    ) -> Result<()>;

    /// Regenerates the whole configuration.
    async fn update_config(
        &self,
        cfg: &ConfigParams,
        mgmt: &MgmtConfigParams,
        resources: &ExtendedResources,
    ) -> Result<Warnings>;

    async fn update_transport_servers(
        &self,
        updated: &[TransportServerEx],
        deleted: &[ResourceId],
    ) -> Result<()>;

    async fn update_virtual_servers(
        &self,
        updated: &[VirtualServerEx],
        deleted: &[ResourceId],
    ) -> Result<Warnings>;

    fn disable_reloads(&self);

    fn enable_reloads(&self);

    /// Reloads once if `enable` is set and does nothing otherwise.
    async fn reload_for_batch_updates(&self, enable: bool) -> Result<()>;

    async fn reload(&self, endpoints_only: bool) -> Result<()>;

    /// Whether TLS secrets can be swapped without a reload.
    fn supports_dynamic_ssl_reload(&self) -> bool {
        false
    }

    /// Writes the default-server or wildcard TLS secret under each of `names`.
    async fn add_or_update_special_tls_secrets(
        &self,
        secret: &Secret,
        names: &[String],
    ) -> Result<()>;

    async fn add_or_update_ca_secret(&self, secret: &Secret) -> Result<()>;

    async fn add_or_update_license_secret(&self, secret: &Secret) -> Result<()>;

    async fn upsert_split_clients_key_val(&self, zone: &str, key: &str, value: &str)
        -> Result<()>;

    fn ingress_controller_replicas(&self) -> usize;

    fn set_ingress_controller_replicas(&self, replicas: usize);

    async fn add_or_update_app_protect_resource(
        &self,
        resource: &AppProtectResource,
        affected: &ExtendedResources,
    ) -> Result<Warnings>;

    async fn delete_app_protect_policy(
        &self,
        id: &ResourceId,
        affected: &ExtendedResources,
    ) -> Result<()>;

    async fn delete_app_protect_log_conf(
        &self,
        id: &ResourceId,
        affected: &ExtendedResources,
    ) -> Result<()>;

    async fn refresh_app_protect_user_sigs(
        &self,
        user_sigs: &[Arc<APUserSig>],
        deleted_policies: &[Arc<APPolicy>],
        affected: &ExtendedResources,
    ) -> Result<()>;

    async fn add_or_update_resources_that_use_dos_protected(
        &self,
        affected: &ExtendedResources,
    ) -> Result<Warnings>;

    async fn add_or_update_app_protect_dos_policy(&self, policy: &APDosPolicy) -> Result<()>;

    async fn add_or_update_app_protect_dos_log_conf(&self, conf: &APDosLogConf) -> Result<()>;

    async fn delete_app_protect_dos_policy(&self, id: &ResourceId) -> Result<()>;

    async fn delete_app_protect_dos_log_conf(&self, id: &ResourceId) -> Result<()>;
}

// === impl Warnings ===

impl Warnings {
    pub fn add(&mut self, kind: Kind, id: ResourceId, message: impl Into<String>) {
        self.0.entry((kind, id)).or_default().push(message.into());
    }

    pub fn get(&self, kind: Kind, id: &ResourceId) -> &[String] {
        self.0
            .get(&(kind, id.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn extend(&mut self, other: Warnings) {
        for (key, messages) in other.0 {
            self.0.entry(key).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
