//! A [`Configurator`] that renders nothing and logs what it would do.
//!
//! The controller ships with this data plane so that reconciliation can run
//! against a cluster without an NGINX process: every call is logged, reloads
//! are counted, and secrets are reported at the paths they would be written
//! to.

use crate::{
    core::{
        extended::{
            AppProtectResource, ExtendedResources, IngressEx, MergeableIngresses,
            TransportServerEx, VirtualServerEx,
        },
        ConfigParams, Configurator, MgmtConfigParams, ResourceId, SecretFileManager, Warnings,
    },
    k8s::{
        app_protect::{APDosLogConf, APDosPolicy, APPolicy, APUserSig},
        ResourceExt, Secret,
    },
};
use anyhow::Result;
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

const SECRETS_DIR: &str = "/etc/nginx/secrets";

#[derive(Debug)]
pub struct DryRun {
    reloads_disabled: AtomicBool,
    replicas: AtomicUsize,
    dynamic_ssl_reload: bool,
    reloads: Counter,
}

// === impl DryRun ===

impl DryRun {
    pub fn register(prom: &mut Registry, dynamic_ssl_reload: bool) -> Arc<Self> {
        let reloads = Counter::default();
        prom.register("reloads", "Count of data plane reloads", reloads.clone());
        Arc::new(Self {
            reloads_disabled: AtomicBool::new(false),
            replicas: AtomicUsize::new(1),
            dynamic_ssl_reload,
            reloads,
        })
    }

    /// Reloads unless reloads are disabled for a batch.
    fn maybe_reload(&self, cause: &str) {
        if self.reloads_disabled.load(Ordering::Acquire) {
            tracing::debug!(%cause, "Reload deferred until the batch completes");
            return;
        }
        self.do_reload(cause);
    }

    fn do_reload(&self, cause: &str) {
        self.reloads.inc();
        tracing::info!(%cause, "Reloading NGINX");
    }

    fn apply(&self, resources: &ExtendedResources) {
        for ex in &resources.ingress_exes {
            tracing::info!(ingress = %ResourceId::of(&*ex.ingress), "Writing Ingress configuration");
        }
        for ex in &resources.mergeable_ingresses {
            tracing::info!(
                master = %ResourceId::of(&*ex.master.ingress),
                minions = ex.minions.len(),
                "Writing mergeable Ingress configuration",
            );
        }
        for ex in &resources.virtual_server_exes {
            tracing::info!(
                virtualserver = %ResourceId::of(&*ex.virtual_server),
                routes = ex.virtual_server_routes.len(),
                endpoints = ex.endpoints.len(),
                "Writing VirtualServer configuration",
            );
        }
        for ex in &resources.transport_server_exes {
            tracing::info!(
                transportserver = %ResourceId::of(&*ex.transport_server),
                port = ex.listener_port,
                "Writing TransportServer configuration",
            );
        }
    }
}

impl SecretFileManager for DryRun {
    fn add_or_update_secret(&self, secret: &Secret) -> String {
        let path = format!(
            "{}/{}-{}",
            SECRETS_DIR,
            secret.namespace().unwrap_or_default(),
            secret.name_unchecked()
        );
        tracing::debug!(%path, "Writing secret");
        path
    }

    fn delete_secret(&self, id: &ResourceId) {
        tracing::debug!(%id, "Removing secret");
    }
}

#[async_trait::async_trait]
impl Configurator for DryRun {
    async fn add_or_update_ingress(&self, ingress: &IngressEx) -> Result<Warnings> {
        tracing::info!(ingress = %ResourceId::of(&*ingress.ingress), "Writing Ingress configuration");
        self.maybe_reload("Ingress");
        Ok(Warnings::default())
    }

    async fn add_or_update_mergeable_ingress(
        &self,
        mergeable: &MergeableIngresses,
    ) -> Result<Warnings> {
        tracing::info!(
            master = %ResourceId::of(&*mergeable.master.ingress),
            minions = mergeable.minions.len(),
            "Writing mergeable Ingress configuration",
        );
        self.maybe_reload("Ingress");
        Ok(Warnings::default())
    }

    async fn add_or_update_virtual_server(&self, vs: &VirtualServerEx) -> Result<Warnings> {
        tracing::info!(
            virtualserver = %ResourceId::of(&*vs.virtual_server),
            routes = vs.virtual_server_routes.len(),
            "Writing VirtualServer configuration",
        );
        self.maybe_reload("VirtualServer");
        Ok(Warnings::default())
    }

    async fn add_or_update_transport_server(&self, ts: &TransportServerEx) -> Result<Warnings> {
        tracing::info!(
            transportserver = %ResourceId::of(&*ts.transport_server),
            port = ts.listener_port,
            "Writing TransportServer configuration",
        );
        self.maybe_reload("TransportServer");
        Ok(Warnings::default())
    }

    async fn add_or_update_resources(
        &self,
        resources: &ExtendedResources,
        reload_if_unchanged: bool,
    ) -> Result<Warnings> {
        self.apply(resources);
        if reload_if_unchanged || !resources.is_empty() {
            self.maybe_reload("resources");
        }
        Ok(Warnings::default())
    }

    async fn delete_ingress(&self, id: &ResourceId, skip_reload: bool) -> Result<()> {
        tracing::info!(ingress = %id, "Removing Ingress configuration");
        if !skip_reload {
            self.maybe_reload("Ingress deleted");
        }
        Ok(())
    }

    async fn delete_virtual_server(&self, id: &ResourceId, skip_reload: bool) -> Result<()> {
        tracing::info!(virtualserver = %id, "Removing VirtualServer configuration");
        if !skip_reload {
            self.maybe_reload("VirtualServer deleted");
        }
        Ok(())
    }

    async fn delete_transport_server(&self, id: &ResourceId) -> Result<()> {
        tracing::info!(transportserver = %id, "Removing TransportServer configuration");
        self.maybe_reload("TransportServer deleted");
        Ok(())
    }

    async fn update_endpoints(&self, ingresses: &[IngressEx]) -> Result<()> {
        for ex in ingresses {
            tracing::info!(ingress = %ResourceId::of(&*ex.ingress), endpoints = ?ex.endpoints, "Updating upstreams");
        }
        Ok(())
    }

    async fn update_endpoints_for_mergeable_ingresses(
        &self,
        mergeable: &[MergeableIngresses],
    ) -> Result<()> {
        for ex in mergeable {
            tracing::info!(master = %ResourceId::of(&*ex.master.ingress), "Updating upstreams");
        }
        Ok(())
    }

    async fn update_endpoints_for_virtual_servers(&self, vses: &[VirtualServerEx]) -> Result<()> {
        for ex in vses {
            tracing::info!(virtualserver = %ResourceId::of(&*ex.virtual_server), endpoints = ?ex.endpoints, "Updating upstreams");
        }
        Ok(())
    }

    async fn update_endpoints_for_transport_servers(
        &self,
        tses: &[TransportServerEx],
    ) -> Result<()> {
        for ex in tses {
            tracing::info!(transportserver = %ResourceId::of(&*ex.transport_server), endpoints = ?ex.endpoints, "Updating upstreams");
        }
        Ok(())
    }

    async fn update_config(
        &self,
        cfg: &ConfigParams,
        mgmt: &MgmtConfigParams,
        resources: &ExtendedResources,
    ) -> Result<Warnings> {
        tracing::info!(
            params = cfg.values.len(),
            mgmt = mgmt.values.len(),
            resources = resources.len(),
            "Regenerating configuration",
        );
        self.apply(resources);
        self.maybe_reload("configuration");
        Ok(Warnings::default())
    }

    async fn update_transport_servers(
        &self,
        updated: &[TransportServerEx],
        deleted: &[ResourceId],
    ) -> Result<()> {
        for id in deleted {
            tracing::info!(transportserver = %id, "Removing TransportServer configuration");
        }
        self.apply(&ExtendedResources {
            transport_server_exes: updated.to_vec(),
            ..Default::default()
        });
        self.maybe_reload("listeners");
        Ok(())
    }

    async fn update_virtual_servers(
        &self,
        updated: &[VirtualServerEx],
        deleted: &[ResourceId],
    ) -> Result<Warnings> {
        for id in deleted {
            tracing::info!(virtualserver = %id, "Removing VirtualServer configuration");
        }
        self.apply(&ExtendedResources {
            virtual_server_exes: updated.to_vec(),
            ..Default::default()
        });
        self.maybe_reload("listeners");
        Ok(Warnings::default())
    }

    fn disable_reloads(&self) {
        self.reloads_disabled.store(true, Ordering::Release);
    }

    fn enable_reloads(&self) {
        self.reloads_disabled.store(false, Ordering::Release);
    }

    async fn reload_for_batch_updates(&self, enable: bool) -> Result<()> {
        if enable {
            self.do_reload("batch");
        }
        Ok(())
    }

    async fn reload(&self, endpoints_only: bool) -> Result<()> {
        self.maybe_reload(if endpoints_only { "endpoints" } else { "explicit" });
        Ok(())
    }

    fn supports_dynamic_ssl_reload(&self) -> bool {
        self.dynamic_ssl_reload
    }

    async fn add_or_update_special_tls_secrets(
        &self,
        secret: &Secret,
        names: &[String],
    ) -> Result<()> {
        for name in names {
            tracing::info!(secret = %ResourceId::of(secret), path = %format!("{}/{}", SECRETS_DIR, name), "Writing special secret");
        }
        Ok(())
    }

    async fn add_or_update_ca_secret(&self, secret: &Secret) -> Result<()> {
        tracing::info!(secret = %ResourceId::of(secret), "Writing trusted CA");
        Ok(())
    }

    async fn add_or_update_license_secret(&self, secret: &Secret) -> Result<()> {
        tracing::info!(secret = %ResourceId::of(secret), "Writing license");
        Ok(())
    }

    async fn upsert_split_clients_key_val(
        &self,
        zone: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        tracing::info!(%zone, %key, %value, "Updating split weights");
        Ok(())
    }

    fn ingress_controller_replicas(&self) -> usize {
        self.replicas.load(Ordering::Acquire)
    }

    fn set_ingress_controller_replicas(&self, replicas: usize) {
        tracing::info!(%replicas, "Scaling rate limits");
        self.replicas.store(replicas, Ordering::Release);
    }

    async fn add_or_update_app_protect_resource(
        &self,
        resource: &AppProtectResource,
        affected: &ExtendedResources,
    ) -> Result<Warnings> {
        let id = match resource {
            AppProtectResource::Policy(p) => ResourceId::of(&**p),
            AppProtectResource::LogConf(c) => ResourceId::of(&**c),
        };
        tracing::info!(%id, affected = affected.len(), "Writing App Protect resource");
        self.apply(affected);
        self.maybe_reload("App Protect");
        Ok(Warnings::default())
    }

    async fn delete_app_protect_policy(
        &self,
        id: &ResourceId,
        affected: &ExtendedResources,
    ) -> Result<()> {
        tracing::info!(%id, affected = affected.len(), "Removing App Protect policy");
        self.apply(affected);
        self.maybe_reload("App Protect");
        Ok(())
    }

    async fn delete_app_protect_log_conf(
        &self,
        id: &ResourceId,
        affected: &ExtendedResources,
    ) -> Result<()> {
        tracing::info!(%id, affected = affected.len(), "Removing App Protect log configuration");
        self.apply(affected);
        self.maybe_reload("App Protect");
        Ok(())
    }

    async fn refresh_app_protect_user_sigs(
        &self,
        user_sigs: &[Arc<APUserSig>],
        deleted_policies: &[Arc<APPolicy>],
        affected: &ExtendedResources,
    ) -> Result<()> {
        tracing::info!(
            user_sigs = user_sigs.len(),
            deleted_policies = deleted_policies.len(),
            affected = affected.len(),
            "Refreshing user signatures",
        );
        self.apply(affected);
        self.maybe_reload("user signatures");
        Ok(())
    }

    async fn add_or_update_resources_that_use_dos_protected(
        &self,
        affected: &ExtendedResources,
    ) -> Result<Warnings> {
        self.apply(affected);
        self.maybe_reload("DoS");
        Ok(Warnings::default())
    }

    async fn add_or_update_app_protect_dos_policy(&self, policy: &APDosPolicy) -> Result<()> {
        tracing::info!(id = %ResourceId::of(policy), "Writing DoS policy");
        Ok(())
    }

    async fn add_or_update_app_protect_dos_log_conf(&self, conf: &APDosLogConf) -> Result<()> {
        tracing::info!(id = %ResourceId::of(conf), "Writing DoS log configuration");
        Ok(())
    }

    async fn delete_app_protect_dos_policy(&self, id: &ResourceId) -> Result<()> {
        tracing::info!(%id, "Removing DoS policy");
        Ok(())
    }

    async fn delete_app_protect_dos_log_conf(&self, id: &ResourceId) -> Result<()> {
        tracing::info!(%id, "Removing DoS log configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn defers_reloads_while_disabled() {
        let mut prom = Registry::default();
        let dry_run = DryRun::register(&mut prom, false);

        dry_run.delete_transport_server(&ResourceId::new("default", "dns")).await.expect("delete");
        assert_eq!(dry_run.reloads.get(), 1);

        dry_run.disable_reloads();
        dry_run.delete_transport_server(&ResourceId::new("default", "dns")).await.expect("delete");
        dry_run.delete_ingress(&ResourceId::new("default", "cafe"), false).await.expect("delete");
        assert_eq!(dry_run.reloads.get(), 1, "reloads are deferred");

        dry_run.enable_reloads();
        dry_run.reload_for_batch_updates(false).await.expect("batch");
        assert_eq!(dry_run.reloads.get(), 1);
        dry_run.reload_for_batch_updates(true).await.expect("batch");
        assert_eq!(dry_run.reloads.get(), 2);
    }

    #[test]
    fn secret_paths() {
        let mut prom = Registry::default();
        let dry_run = DryRun::register(&mut prom, true);
        let secret = Secret {
            metadata: crate::k8s::ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("cafe-tls".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            dry_run.add_or_update_secret(&secret),
            "/etc/nginx/secrets/default-cafe-tls"
        );
        assert!(dry_run.supports_dynamic_ssl_reload());
    }
}
