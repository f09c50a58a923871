//! Drains the work queue and drives the data plane.
//!
//! Every watched object change arrives as a [`Task`] keyed by kind and
//! `namespace/name`. The dispatcher processes one task at a time: it reads
//! the latest object from the [`Cache`](crate::index::Cache), updates the
//! [`Configuration`](crate::index::Configuration) or one of the App Protect
//! stores, hands the resulting snapshots to the [`Configurator`], and reports
//! the outcome through the [`StatusUpdater`].
//!
//! When more than one task is waiting, reloads are disabled until the queue
//! drains so that a burst of changes costs a single reload.

mod app_protect;
mod dependencies;
mod report;
mod resources;


use crate::{
    core::{
        extended::ExtendedResources, ConfigParams, Configurator, Kind, MgmtConfigParams, Reason,
        Resource, ResourceId, SecretFileManager, Task, Warnings, WorkQueue,
    },
    index::{
        secrets, AppProtectConfiguration, Builder, ClusterInfo, DosConfiguration,
        SecretStore, SharedCache, SharedConfiguration, Validator,
    },
    k8s::Secret,
    metrics::DispatcherMetrics,
    status::StatusUpdater,
};
use anyhow::Result;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::watch;

/// Tasks failing this many times in a row are dropped until their object
/// changes again.
const MAX_REQUEUES: u32 = 5;

pub struct Dispatcher {
    cluster: Arc<ClusterInfo>,
    cache: SharedCache,
    config: SharedConfiguration,
    queue: WorkQueue<Task>,

    secrets: SecretStore,
    app_protect: AppProtectConfiguration,
    dos: DosConfiguration,
    validator: Validator,

    configurator: Arc<dyn Configurator>,
    status: StatusUpdater,

    cfg_params: ConfigParams,
    mgmt_params: MgmtConfigParams,

    batch: Batch,
    ready: watch::Sender<bool>,
    metrics: DispatcherMetrics,
}

/// Tracks a run of tasks processed with reloads disabled.
#[derive(Debug, Default)]
struct Batch {
    active: bool,

    /// Set when a processed task changed the rendered configuration.
    reload: bool,

    /// Set when a ConfigMap changed; every resource is regenerated when the
    /// batch ends.
    update_all_configs: bool,
}

// === impl Dispatcher ===

impl Dispatcher {
    pub fn new(
        cache: SharedCache,
        config: SharedConfiguration,
        configurator: Arc<dyn Configurator>,
        secret_files: Arc<dyn SecretFileManager>,
        status: StatusUpdater,
        metrics: DispatcherMetrics,
    ) -> Self {
        let (cluster, queue) = {
            let cache = cache.read();
            (cache.cluster().clone(), cache.queue().clone())
        };
        let (ready, _) = watch::channel(false);
        Self {
            validator: Validator::new(cluster.clone()),
            cluster,
            cache,
            config,
            queue,
            secrets: SecretStore::new(secret_files),
            app_protect: AppProtectConfiguration::default(),
            dos: DosConfiguration::default(),
            configurator,
            status,
            cfg_params: ConfigParams::default(),
            mgmt_params: MgmtConfigParams::default(),
            batch: Batch::default(),
            ready,
            metrics,
        }
    }

    /// Uses the management ConfigMap read at startup until its watch
    /// delivers an update.
    pub fn with_mgmt_params(mut self, params: MgmtConfigParams) -> Self {
        self.mgmt_params = params;
        self
    }

    /// Becomes true once the initial batch has been applied.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Processes tasks until the queue is shut down and drained.
    ///
    /// The caller must wait for every watch to complete its initial listing
    /// before running the dispatcher, so that the first batch covers the
    /// whole cluster.
    pub async fn run(mut self) {
        self.bootstrap().await;
        while let Some(task) = self.queue.get().await {
            self.process(task).await;
        }
        tracing::debug!("Work queue shut down");
    }

    /// Loads every secret and opens the initial batch, which is closed with
    /// an unconditional reload once the queue drains.
    async fn bootstrap(&mut self) {
        let secrets = self.cache.read().list::<Secret>();
        for secret in secrets {
            if secrets::is_supported_type(secrets::secret_type(&secret)) {
                self.secrets.add_or_update(secret);
            }
        }
        tracing::info!(secrets = self.secrets.len(), "Loaded secrets");

        self.begin_batch();
        self.batch.reload = true;
        if self.queue.is_empty() {
            self.end_batch().await;
        }
    }

    async fn process(&mut self, task: Task) {
        if !self.batch.active && self.queue.len() > 1 {
            self.begin_batch();
        }

        self.metrics.sync(task.kind);
        tracing::debug!(%task, "Syncing");
        match self.sync(&task).await {
            Ok(touched) => {
                self.queue.forget(&task);
                self.batch.reload |= touched;
            }
            Err(error) => self.retry(&task, error),
        }
        self.queue.done(&task);

        if self.batch.active && self.queue.is_empty() {
            self.end_batch().await;
        }
    }

    fn retry(&self, task: &Task, error: anyhow::Error) {
        if self.queue.num_requeues(task) < MAX_REQUEUES {
            let delay = self.queue.requeue(task.clone());
            self.metrics.requeue(task.kind);
            tracing::warn!(%task, %error, ?delay, "Sync failed; requeueing");
        } else {
            self.queue.forget(task);
            self.metrics.dropped(task.kind);
            tracing::error!(%task, %error, "Sync failed; dropping");
        }
    }

    /// Processes a task. Returns false only for EndpointSlices no served
    /// resource references, so a batch holding nothing else skips its reload.
    async fn sync(&mut self, task: &Task) -> Result<bool> {
        let Task { kind, id } = task;
        match kind {
            Kind::Ingress => self.sync_ingress(id).await,
            Kind::VirtualServer => self.sync_virtual_server(id).await,
            Kind::VirtualServerRoute => self.sync_virtual_server_route(id).await,
            Kind::TransportServer => self.sync_transport_server(id).await,
            Kind::GlobalConfiguration => self.sync_global_configuration(id).await,
            Kind::ConfigMap => self.sync_config_map(id).await,
            Kind::Secret => self.sync_secret(id).await,
            Kind::Service => self.sync_service(id).await,
            Kind::EndpointSlice => self.sync_endpoint_slices(id).await,
            Kind::Policy => self.sync_policy(id).await,
            Kind::AppProtectPolicy => self.sync_app_protect_policy(id).await,
            Kind::AppProtectLogConf => self.sync_app_protect_log_conf(id).await,
            Kind::AppProtectUserSig => self.sync_app_protect_user_sig(id).await,
            Kind::AppProtectDosPolicy => self.sync_dos_policy(id).await,
            Kind::AppProtectDosLogConf => self.sync_dos_log_conf(id).await,
            Kind::DosProtectedResource => self.sync_dos_protected_resource(id).await,
            Kind::Namespace => {
                // Namespace transitions are expanded into object tasks by the
                // cache.
                tracing::debug!(namespace = %id, "Ignoring namespace task");
                Ok(false)
            }
        }
    }

    fn begin_batch(&mut self) {
        tracing::debug!(queued = self.queue.len(), "Starting batch");
        self.configurator.disable_reloads();
        self.batch.active = true;
    }

    async fn end_batch(&mut self) {
        let Batch {
            reload,
            update_all_configs,
            ..
        } = std::mem::take(&mut self.batch);
        self.configurator.enable_reloads();

        if update_all_configs {
            self.update_all_configs().await;
        } else if let Err(error) = self.configurator.reload_for_batch_updates(reload).await {
            tracing::error!(%error, "Failed to reload after batch");
        }
        if reload || update_all_configs {
            self.metrics.batch_reload();
        }
        tracing::debug!(reload, update_all_configs, "Finished batch");

        let was_ready = *self.ready.borrow();
        if !was_ready {
            self.ready.send_replace(true);
            tracing::info!("Initial configuration applied");
        }
    }

    /// Joins resources with their endpoints, secrets and policies.
    fn build(&self, resources: &[Resource]) -> (ExtendedResources, Warnings) {
        let cache = self.cache.read();
        Builder {
            cache: &cache,
            secrets: &self.secrets,
            app_protect: &self.app_protect,
            dos: &self.dos,
            validator: &self.validator,
        }
        .build(resources)
    }

    /// Rebuilds resources whose dependencies changed and reports them.
    async fn reapply(&mut self, resources: Vec<Resource>, reload_if_unchanged: bool) {
        if resources.is_empty() {
            return;
        }
        let (extended, warnings) = self.build(&resources);
        let result = self
            .configurator
            .add_or_update_resources(&extended, reload_if_unchanged)
            .await;
        self.report_applied(&resources, warnings, result, Reason::AddedOrUpdated);
    }

    /// Regenerates every accepted resource with the current ConfigMap
    /// parameters. Returns the error, if any, for reporting on the ConfigMap.
    async fn update_all_configs(&mut self) -> Option<String> {
        let resources = self.config.read().get_resources();
        let (extended, warnings) = self.build(&resources);
        let result = self
            .configurator
            .update_config(&self.cfg_params, &self.mgmt_params, &extended)
            .await;
        let error = result.as_ref().err().map(ToString::to_string);
        if let Some(error) = &error {
            tracing::error!(%error, "Failed to update the configuration");
        }
        self.report_applied(&resources, warnings, result, Reason::Updated);
        error
    }
}

/// Removes duplicates from a list of resources, keeping the first of each
/// and ordering them by kind and id.
fn dedup(resources: impl IntoIterator<Item = Resource>) -> Vec<Resource> {
    let mut seen = BTreeMap::new();
    for resource in resources {
        seen.entry((resource.kind(), resource.id()))
            .or_insert(resource);
    }
    seen.into_values().collect()
}

/// A stand-in for an object that has already been deleted, used to attach
/// events to it.
fn placeholder_secret(id: &ResourceId) -> Secret {
    Secret {
        metadata: crate::k8s::ObjectMeta {
            namespace: Some(id.namespace.clone()),
            name: Some(id.name.clone()),
            ..Default::default()
        },
        ..Default::default()
    }
}
