use crate::{
    core::{MgmtConfigParams, ResourceId, Task, WorkQueue},
    dispatcher::Dispatcher,
    index::{
        self, config_map, Cache, ClusterInfo, Configuration, IndexMetrics, SpecialSecrets,
        WatchedNamespaces,
    },
    initial_sync::InitialSync,
    k8s::{
        self,
        app_protect::{APDosLogConf, APDosPolicy, APLogConf, APPolicy, APUserSig},
        configuration::{GlobalConfiguration, Policy, TransportServer, VirtualServer, VirtualServerRoute},
        dos::DosProtectedResource,
        Client, Resource, Selector,
    },
    lease,
    metrics::DispatcherMetrics,
    status, DryRun,
};
use anyhow::{bail, Result};
use clap::{ArgAction, Parser};
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{collections::BTreeSet, sync::Arc};
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "nginx-ingress", about = "An NGINX ingress controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "nginx_ingress_controller=info,warn",
        env = "NGINX_INGRESS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The class of Ingresses and custom resources handled by this
    /// controller.
    #[clap(long, default_value = "nginx")]
    ingress_class: String,

    /// Handles Ingresses that specify no class.
    #[clap(long)]
    watch_ingress_without_class: bool,

    /// Comma-separated namespaces to watch. All namespaces are watched by
    /// default.
    #[clap(long, conflicts_with = "watch_namespace_label")]
    watch_namespace: Option<String>,

    /// Watches the namespaces whose labels match this selector.
    #[clap(long)]
    watch_namespace_label: Option<Selector>,

    #[clap(long)]
    nginx_plus: bool,

    #[clap(long, default_value_t = true, action = ArgAction::Set)]
    enable_custom_resources: bool,

    #[clap(long)]
    enable_app_protect: bool,

    #[clap(long)]
    enable_app_protect_dos: bool,

    #[clap(long)]
    enable_snippets: bool,

    #[clap(long)]
    enable_cert_manager: bool,

    #[clap(long)]
    enable_external_dns: bool,

    #[clap(long)]
    enable_oidc: bool,

    #[clap(long)]
    enable_internal_routes: bool,

    #[clap(long)]
    enable_tls_passthrough: bool,

    #[clap(long, default_value = "443")]
    tls_passthrough_port: u16,

    #[clap(long)]
    disable_ipv6: bool,

    /// Applies weight-only changes to two-way splits without reloading.
    #[clap(long)]
    enable_dynamic_weight_changes_reload: bool,

    /// Swaps default and wildcard TLS certificates without reloading.
    #[clap(long, default_value_t = true, action = ArgAction::Set)]
    ssl_dynamic_reload: bool,

    /// Ports that GlobalConfiguration listeners may not claim.
    #[clap(long, default_value = "80,443,8080")]
    forbidden_listener_ports: Ports,

    /// A `namespace/name` reference to the GlobalConfiguration.
    #[clap(long)]
    global_configuration: Option<String>,

    /// A `namespace/name` reference to the main ConfigMap.
    #[clap(long)]
    nginx_configmaps: Option<String>,

    /// A `namespace/name` reference to the NGINX Plus management ConfigMap.
    #[clap(long)]
    mgmt_configmap: Option<String>,

    /// A `namespace/name` reference to the controller's service.
    #[clap(long)]
    external_service: Option<String>,

    #[clap(long)]
    default_server_tls_secret: Option<String>,

    #[clap(long)]
    wildcard_tls_secret: Option<String>,

    /// Reports the external addresses on Ingress status.
    #[clap(long)]
    report_ingress_status: bool,

    #[clap(long, default_value = "nginx-ingress-leader")]
    leader_election_lock_name: String,

    /// The Deployment owning the leader-election Lease.
    #[clap(long, default_value = "nginx-ingress")]
    deployment_name: String,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    #[clap(long, env = "POD_NAMESPACE")]
    pod_namespace: String,

    #[clap(long, env = "POD_NAME")]
    pod_name: String,
}

#[derive(Clone, Debug)]
struct Ports(BTreeSet<u16>);

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            ingress_class,
            watch_ingress_without_class,
            watch_namespace,
            watch_namespace_label,
            nginx_plus,
            enable_custom_resources,
            enable_app_protect,
            enable_app_protect_dos,
            enable_snippets,
            enable_cert_manager,
            enable_external_dns,
            enable_oidc,
            enable_internal_routes,
            enable_tls_passthrough,
            tls_passthrough_port,
            disable_ipv6,
            enable_dynamic_weight_changes_reload,
            ssl_dynamic_reload,
            forbidden_listener_ports: Ports(forbidden_listener_ports),
            global_configuration,
            nginx_configmaps,
            mgmt_configmap,
            external_service,
            default_server_tls_secret,
            wildcard_tls_secret,
            report_ingress_status,
            leader_election_lock_name,
            deployment_name,
            patch_timeout_ms,
            pod_namespace,
            pod_name,
        } = self;

        if mgmt_configmap.is_some() && !nginx_plus {
            bail!("--mgmt-configmap requires --nginx-plus");
        }
        if (enable_app_protect || enable_app_protect_dos) && !nginx_plus {
            bail!("App Protect requires --nginx-plus");
        }

        let watched_namespaces = match (watch_namespace, watch_namespace_label) {
            (Some(list), _) => WatchedNamespaces::List(
                list.split(',')
                    .map(str::trim)
                    .filter(|ns| !ns.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            (None, Some(selector)) => WatchedNamespaces::Selector(selector),
            (None, None) => WatchedNamespaces::All,
        };
        let reference = |r: Option<String>| r.map(|r| ResourceId::parse_ref(&r, &pod_namespace));

        let mut prom = <Registry>::default();
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));
        let status_metrics =
            status::ControllerMetrics::register(prom.sub_registry_with_prefix("status"));
        let dispatcher_metrics =
            DispatcherMetrics::register(prom.sub_registry_with_prefix("dispatcher"));
        let dry_run = DryRun::register(prom.sub_registry_with_prefix("nginx"), ssl_dynamic_reload);

        // The management ConfigMap names further special secrets, so it is
        // read before the caches are built. Logging starts with the runtime,
        // so its warnings are held until then.
        let mgmt_configmap = reference(mgmt_configmap);
        let (mgmt_params, mgmt_warnings) = match &mgmt_configmap {
            Some(id) => read_mgmt_params(&client.clone().try_client().await?, id).await?,
            None => Default::default(),
        };
        let mgmt_secret = |name: &str| {
            (!name.is_empty()).then(|| ResourceId::parse_ref(name, &pod_namespace))
        };

        let cluster = Arc::new(ClusterInfo {
            ingress_class,
            watch_ingress_without_class,
            controller_namespace: pod_namespace.clone(),
            watched_namespaces,
            is_plus: nginx_plus,
            app_protect_enabled: enable_app_protect,
            app_protect_dos_enabled: enable_app_protect_dos,
            custom_resources_enabled: enable_custom_resources,
            snippets_enabled: enable_snippets,
            cert_manager_enabled: enable_cert_manager,
            external_dns_enabled: enable_external_dns,
            oidc_enabled: enable_oidc,
            internal_routes_enabled: enable_internal_routes,
            tls_passthrough_enabled: enable_tls_passthrough,
            tls_passthrough_port,
            ipv6_disabled: disable_ipv6,
            dynamic_weight_changes: enable_dynamic_weight_changes_reload && nginx_plus,
            forbidden_listener_ports,
            global_configuration: reference(global_configuration),
            config_map: reference(nginx_configmaps),
            mgmt_config_map: mgmt_configmap,
            external_service: reference(external_service),
            special_secrets: SpecialSecrets {
                default_server: reference(default_server_tls_secret),
                wildcard_tls: reference(wildcard_tls_secret),
                license: mgmt_secret(&mgmt_params.license_token_secret),
                client_auth: mgmt_secret(&mgmt_params.client_auth_secret),
                trusted_ca: mgmt_secret(&mgmt_params.trusted_cert_secret),
            },
        });
        let queue = WorkQueue::<Task>::new();
        let cache = Cache::shared(cluster.clone(), queue.clone());
        let config = Configuration::shared(cluster.clone());
        let index_registry = prom.sub_registry_with_prefix("index");
        index::metrics::register(index_registry, cache.clone(), config.clone());
        let indexed = IndexMetrics::register(cache.clone(), index_registry).shared();

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        tracing::info!(class = %cluster.ingress_class, namespaces = ?cluster.watched_namespaces, "Starting");
        for warning in mgmt_warnings {
            tracing::warn!(%warning, "Ignoring management parameter");
        }

        let claims = lease::init(
            &runtime,
            &pod_namespace,
            &leader_election_lock_name,
            &deployment_name,
            &pod_name,
        )
        .await?;

        // Spawn resource watches. The dispatcher starts once every watch has
        // listed its resources.
        let mut initial = InitialSync::default();

        macro_rules! watch {
            ($ty:ty, $span:literal) => {{
                let events = initial.track(runtime.watch_all::<$ty>(watcher::Config::default()));
                tokio::spawn(
                    kubert::index::namespaced(indexed.clone(), events).instrument(info_span!($span)),
                );
            }};
        }

        if cluster.watched_namespaces.is_selector() {
            let events = initial.track(runtime.watch_all::<k8s::Namespace>(watcher::Config::default()));
            tokio::spawn(
                kubert::index::cluster(indexed.clone(), events).instrument(info_span!("namespaces")),
            );
        }

        watch!(k8s::Ingress, "ingresses");
        watch!(k8s::Service, "services");
        watch!(k8s::EndpointSlice, "endpointslices");
        watch!(k8s::Pod, "pods");
        watch!(k8s::Secret, "secrets");
        watch!(k8s::ConfigMap, "configmaps");

        let client = runtime.client();
        if cluster.custom_resources_enabled {
            if crds_exist::<VirtualServer>(&client, "virtualservers.k8s.nginx.org").await {
                watch!(VirtualServer, "virtualservers");
                watch!(VirtualServerRoute, "virtualserverroutes");
                watch!(TransportServer, "transportservers");
                watch!(Policy, "policies");
            }
            if cluster.global_configuration.is_some()
                && crds_exist::<GlobalConfiguration>(&client, "globalconfigurations.k8s.nginx.org").await
            {
                watch!(GlobalConfiguration, "globalconfigurations");
            }
        }
        if cluster.app_protect_enabled
            && crds_exist::<APPolicy>(&client, "appolicies.appprotect.f5.com").await
        {
            watch!(APPolicy, "appolicies");
            watch!(APLogConf, "aplogconfs");
            watch!(APUserSig, "apusersigs");
        }
        if cluster.app_protect_dos_enabled
            && crds_exist::<APDosPolicy>(&client, "apdospolicy.appprotectdos.f5.com").await
        {
            watch!(APDosPolicy, "apdospolicies");
            watch!(APDosLogConf, "apdoslogconfs");
            watch!(DosProtectedResource, "dosprotectedresources");
        }

        // Status updates are published by a single controller task.
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let status_controller = status::Controller::new(
            claims,
            client,
            pod_name,
            updates_rx,
            Duration::from_millis(patch_timeout_ms),
            status_metrics,
        );
        tokio::spawn(
            status_controller
                .run()
                .instrument(info_span!("status_controller")),
        );

        let dispatcher = Dispatcher::new(
            cache,
            config,
            dry_run.clone(),
            dry_run,
            status::StatusUpdater::new(updates_tx, report_ingress_status),
            dispatcher_metrics,
        )
        .with_mgmt_params(mgmt_params);
        tokio::spawn(
            dispatch(dispatcher, initial, queue, runtime.shutdown_handle())
                .instrument(info_span!("dispatcher")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Runs the dispatcher once the caches are warm. On shutdown the queue stops
/// accepting tasks and the dispatcher drains what is already queued.
async fn dispatch(
    dispatcher: Dispatcher,
    initial: InitialSync,
    queue: WorkQueue<Task>,
    drain: drain::Watch,
) {
    tokio::select! {
        _ = initial.wait() => {}
        _ = drain.clone().signaled() => return,
    }
    tracing::info!("Caches synced");

    let run = dispatcher.run();
    tokio::pin!(run);
    tokio::select! {
        _ = (&mut run) => {}
        handle = drain.signaled() => {
            queue.shutdown();
            handle.release_after(run).await;
        }
    }
}

async fn read_mgmt_params(
    client: &Client,
    id: &ResourceId,
) -> Result<(MgmtConfigParams, Vec<String>)> {
    let api = k8s::Api::<k8s::ConfigMap>::namespaced(client.clone(), &id.namespace);
    let Some(cm) = api.get_opt(&id.name).await? else {
        bail!("management ConfigMap {} not found", id);
    };
    config_map::mgmt_config_params(&cm)
}

/// Whether the group of a custom resource is served by the API server.
async fn crds_exist<T>(client: &Client, crd: &str) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    let exists = client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt));
    if !exists {
        tracing::warn!(%crd, "Resource kind not found, skipping watches");
    }
    exists
}

// === impl Ports ===

impl std::str::FromStr for Ports {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.parse().map_err(Into::into))
            .collect::<Result<BTreeSet<u16>>>()
            .map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "nginx-ingress",
            "--pod-namespace=nginx-ingress",
            "--pod-name=nginx-ingress-abc",
            "--watch-namespace=default, cafe",
            "--enable-custom-resources=false",
            "--forbidden-listener-ports=80,443,9113",
        ])
        .expect("flags must parse");
        assert_eq!(args.watch_namespace.as_deref(), Some("default, cafe"));
        assert!(!args.enable_custom_resources);
        assert!(args.ssl_dynamic_reload);
        assert_eq!(
            args.forbidden_listener_ports.0,
            [80, 443, 9113].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn namespace_flags_conflict() {
        let res = Args::try_parse_from([
            "nginx-ingress",
            "--pod-namespace=nginx-ingress",
            "--pod-name=nginx-ingress-abc",
            "--watch-namespace=default",
            "--watch-namespace-label=app=cafe",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn invalid_ports() {
        assert!("80,http".parse::<Ports>().is_err());
        assert!("70000".parse::<Ports>().is_err());
    }
}
