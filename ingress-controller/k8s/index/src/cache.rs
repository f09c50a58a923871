//! Informer caches for every watched kind.
//!
//! Watches write into the [`Cache`] through kubert's index traits. A write
//! that changes what the controller observes of an object enqueues a sync
//! task for it; the dispatcher later reads the object back by key and treats
//! its absence as a deletion.

use crate::{secrets, ClusterInfo};
use ahash::AHashMap as HashMap;
use nginx_ingress_controller_core::{Kind, QueueError, ResourceId, Task, WorkQueue};
use nginx_ingress_controller_k8s_api::{
    app_protect::{APDosLogConf, APDosPolicy, APLogConf, APPolicy, APUserSig},
    configuration::{GlobalConfiguration, Policy, TransportServer, VirtualServer, VirtualServerRoute},
    dos::DosProtectedResource,
    ConfigMap, EndpointSlice, Ingress, Labels, Namespace, Pod, ResourceExt, Secret, Service,
    SERVICE_NAME_LABEL,
};
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedCache = Arc<RwLock<Cache>>;

type Store<T> = HashMap<ResourceId, Arc<T>>;

#[derive(Debug)]
pub struct Cache {
    cluster: Arc<ClusterInfo>,
    queue: WorkQueue<Task>,

    /// Labels of every namespace, tracked only when namespaces are selected
    /// by label.
    namespaces: HashMap<String, Labels>,

    ingresses: Store<Ingress>,
    services: Store<Service>,
    endpoint_slices: Store<EndpointSlice>,
    pods: Store<Pod>,
    secrets: Store<Secret>,
    config_maps: Store<ConfigMap>,
    virtual_servers: Store<VirtualServer>,
    virtual_server_routes: Store<VirtualServerRoute>,
    transport_servers: Store<TransportServer>,
    global_configurations: Store<GlobalConfiguration>,
    policies: Store<Policy>,
    app_protect_policies: Store<APPolicy>,
    app_protect_log_confs: Store<APLogConf>,
    app_protect_user_sigs: Store<APUserSig>,
    dos_policies: Store<APDosPolicy>,
    dos_log_confs: Store<APDosLogConf>,
    dos_protected_resources: Store<DosProtectedResource>,
}

/// An object kind held by the [`Cache`].
pub trait Cached: ResourceExt + Sized {
    const KIND: Kind;

    fn store(cache: &Cache) -> &Store<Self>;

    fn store_mut(cache: &mut Cache) -> &mut Store<Self>;

    /// Whether an update from `old` changes anything the controller uses.
    fn changed(&self, old: &Self) -> bool;

    /// Whether the object is synced at all.
    fn relevant(&self, _cluster: &ClusterInfo) -> bool {
        true
    }

    /// The id under which the object is synced.
    fn task_id(&self, id: ResourceId) -> Option<ResourceId> {
        Some(id)
    }
}

// === impl Cache ===

impl Cache {
    pub fn new(cluster: Arc<ClusterInfo>, queue: WorkQueue<Task>) -> Self {
        Self {
            cluster,
            queue,
            namespaces: HashMap::new(),
            ingresses: Store::new(),
            services: Store::new(),
            endpoint_slices: Store::new(),
            pods: Store::new(),
            secrets: Store::new(),
            config_maps: Store::new(),
            virtual_servers: Store::new(),
            virtual_server_routes: Store::new(),
            transport_servers: Store::new(),
            global_configurations: Store::new(),
            policies: Store::new(),
            app_protect_policies: Store::new(),
            app_protect_log_confs: Store::new(),
            app_protect_user_sigs: Store::new(),
            dos_policies: Store::new(),
            dos_log_confs: Store::new(),
            dos_protected_resources: Store::new(),
        }
    }

    pub fn shared(cluster: Arc<ClusterInfo>, queue: WorkQueue<Task>) -> SharedCache {
        Arc::new(RwLock::new(Self::new(cluster, queue)))
    }

    pub fn cluster(&self) -> &Arc<ClusterInfo> {
        &self.cluster
    }

    pub fn queue(&self) -> &WorkQueue<Task> {
        &self.queue
    }

    pub fn is_watched(&self, namespace: &str) -> bool {
        self.cluster
            .watched_namespaces
            .matches(namespace, self.namespaces.get(namespace))
    }

    /// Objects the controller is configured with by name are visible
    /// regardless of the watched namespaces.
    fn is_visible(&self, kind: Kind, id: &ResourceId) -> bool {
        let configured = match kind {
            Kind::Secret => self.cluster.special_secrets.kind_of(id).is_some(),
            Kind::ConfigMap => self.cluster.is_config_map(id),
            Kind::GlobalConfiguration => self.cluster.is_global_configuration(id),
            Kind::Service | Kind::EndpointSlice => self.cluster.is_external_service(id),
            _ => false,
        };
        configured || self.is_watched(&id.namespace)
    }

    /// Returns an object if it is cached and visible.
    pub fn get<T: Cached>(&self, id: &ResourceId) -> Option<Arc<T>> {
        if !self.is_visible(T::KIND, id) {
            return None;
        }
        T::store(self).get(id).cloned()
    }

    /// Every visible object of a kind, sorted by id.
    pub fn list<T: Cached>(&self) -> Vec<Arc<T>> {
        let mut objs = T::store(self)
            .iter()
            .filter(|(id, _)| self.is_visible(T::KIND, id))
            .collect::<Vec<_>>();
        objs.sort_by(|(a, _), (b, _)| a.cmp(b));
        objs.into_iter().map(|(_, obj)| obj.clone()).collect()
    }

    /// The number of cached objects of each kind, visible or not.
    pub fn sizes(&self) -> Vec<(&'static str, usize)> {
        vec![
            (Kind::Ingress.as_str(), self.ingresses.len()),
            (Kind::Service.as_str(), self.services.len()),
            (Kind::EndpointSlice.as_str(), self.endpoint_slices.len()),
            ("Pod", self.pods.len()),
            (Kind::Secret.as_str(), self.secrets.len()),
            (Kind::ConfigMap.as_str(), self.config_maps.len()),
            (Kind::VirtualServer.as_str(), self.virtual_servers.len()),
            (Kind::VirtualServerRoute.as_str(), self.virtual_server_routes.len()),
            (Kind::TransportServer.as_str(), self.transport_servers.len()),
            (Kind::GlobalConfiguration.as_str(), self.global_configurations.len()),
            (Kind::Policy.as_str(), self.policies.len()),
            (Kind::AppProtectPolicy.as_str(), self.app_protect_policies.len()),
            (Kind::AppProtectLogConf.as_str(), self.app_protect_log_confs.len()),
            (Kind::AppProtectUserSig.as_str(), self.app_protect_user_sigs.len()),
            (Kind::AppProtectDosPolicy.as_str(), self.dos_policies.len()),
            (Kind::AppProtectDosLogConf.as_str(), self.dos_log_confs.len()),
            (Kind::DosProtectedResource.as_str(), self.dos_protected_resources.len()),
        ]
    }

    /// The EndpointSlices labelled with a service's name.
    pub fn service_slices(&self, namespace: &str, service: &str) -> Vec<Arc<EndpointSlice>> {
        if !self.is_visible(Kind::Service, &ResourceId::new(namespace, service)) {
            return Vec::new();
        }
        let mut slices = self
            .endpoint_slices
            .iter()
            .filter(|(id, slice)| {
                id.namespace == namespace
                    && slice.labels().get(SERVICE_NAME_LABEL).map(String::as_str) == Some(service)
            })
            .collect::<Vec<_>>();
        slices.sort_by(|(a, _), (b, _)| a.cmp(b));
        slices.into_iter().map(|(_, s)| s.clone()).collect()
    }

    /// The pods matched by a service's selector. A service without a
    /// selector matches no pods.
    pub fn service_pods(&self, service: &Service) -> Vec<Arc<Pod>> {
        let selector = match service.spec.as_ref().and_then(|s| s.selector.as_ref()) {
            Some(selector) if !selector.is_empty() => selector,
            _ => return Vec::new(),
        };
        let namespace = service.namespace().unwrap_or_default();
        let mut pods = self
            .pods
            .iter()
            .filter(|(id, pod)| {
                let labels = pod.labels();
                id.namespace == namespace
                    && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
            })
            .collect::<Vec<_>>();
        pods.sort_by(|(a, _), (b, _)| a.cmp(b));
        pods.into_iter().map(|(_, p)| p.clone()).collect()
    }

    fn apply_resource<T: Cached>(&mut self, obj: T) {
        let id = ResourceId::of(&obj);
        let obj = Arc::new(obj);
        let prior = T::store_mut(self).insert(id.clone(), obj.clone());
        let sync = match prior {
            None => obj.relevant(&self.cluster),
            Some(old) => {
                (old.relevant(&self.cluster) || obj.relevant(&self.cluster)) && obj.changed(&old)
            }
        };
        if sync {
            self.enqueue(&*obj, id);
        }
    }

    fn delete_resource<T: Cached>(&mut self, id: ResourceId) {
        if let Some(old) = T::store_mut(self).remove(&id) {
            if old.relevant(&self.cluster) {
                self.enqueue(&*old, id);
            }
        }
    }

    fn enqueue<T: Cached>(&self, obj: &T, id: ResourceId) {
        let Some(id) = obj.task_id(id) else {
            return;
        };
        if !self.is_visible(T::KIND, &id) {
            return;
        }
        self.add_task(Task::new(T::KIND, id));
    }

    fn add_task(&self, task: Task) {
        tracing::trace!(%task, "Enqueued");
        if let Err(QueueError::ShuttingDown) = self.queue.add(task) {
            tracing::debug!("Work queue is shutting down");
        }
    }

    /// Enqueues every relevant cached object in a namespace.
    fn resync_namespace(&self, namespace: &str) {
        fn each<T: Cached>(cache: &Cache, namespace: &str) {
            for (id, obj) in T::store(cache) {
                if id.namespace != namespace || !obj.relevant(&cache.cluster) {
                    continue;
                }
                if let Some(id) = obj.task_id(id.clone()) {
                    cache.add_task(Task::new(T::KIND, id));
                }
            }
        }

        tracing::debug!(%namespace, "Resyncing namespace");
        each::<Ingress>(self, namespace);
        each::<Service>(self, namespace);
        each::<EndpointSlice>(self, namespace);
        each::<Secret>(self, namespace);
        each::<ConfigMap>(self, namespace);
        each::<VirtualServer>(self, namespace);
        each::<VirtualServerRoute>(self, namespace);
        each::<TransportServer>(self, namespace);
        each::<GlobalConfiguration>(self, namespace);
        each::<Policy>(self, namespace);
        each::<APPolicy>(self, namespace);
        each::<APLogConf>(self, namespace);
        each::<APUserSig>(self, namespace);
        each::<APDosPolicy>(self, namespace);
        each::<APDosLogConf>(self, namespace);
        each::<DosProtectedResource>(self, namespace);
    }
}

impl kubert::index::IndexClusterResource<Namespace> for Cache {
    fn apply(&mut self, ns: Namespace) {
        if !self.cluster.watched_namespaces.is_selector() {
            return;
        }
        let name = ns.name_unchecked();
        let was_watched = self.is_watched(&name);
        let labels = ns.metadata.labels.unwrap_or_default();
        self.namespaces.insert(name.clone(), Labels::from(labels));
        if self.is_watched(&name) != was_watched {
            tracing::info!(namespace = %name, watched = !was_watched, "Namespace watch changed");
            self.resync_namespace(&name);
        }
    }

    fn delete(&mut self, name: String) {
        if !self.cluster.watched_namespaces.is_selector() {
            return;
        }
        let was_watched = self.is_watched(&name);
        self.namespaces.remove(&name);
        if was_watched {
            tracing::info!(namespace = %name, "Watched namespace deleted");
            self.resync_namespace(&name);
        }
    }
}

macro_rules! cached {
    (
        $ty:ty, $kind:expr, $field:ident,
        |$new:ident, $old:ident| $changed:expr
        $(, { $($item:item)* })?
    ) => {
        impl Cached for $ty {
            const KIND: Kind = $kind;

            fn store(cache: &Cache) -> &Store<Self> {
                &cache.$field
            }

            fn store_mut(cache: &mut Cache) -> &mut Store<Self> {
                &mut cache.$field
            }

            fn changed(&self, $old: &Self) -> bool {
                let $new = self;
                $changed
            }

            $($($item)*)?
        }

        impl kubert::index::IndexNamespacedResource<$ty> for Cache {
            fn apply(&mut self, resource: $ty) {
                self.apply_resource(resource)
            }

            fn delete(&mut self, namespace: String, name: String) {
                self.delete_resource::<$ty>(ResourceId::new(namespace, name))
            }
        }
    };
}

cached!(Ingress, Kind::Ingress, ingresses, |new, old| {
    new.spec != old.spec || new.annotations() != old.annotations()
});
cached!(VirtualServer, Kind::VirtualServer, virtual_servers, |new, old| new.spec != old.spec);
cached!(VirtualServerRoute, Kind::VirtualServerRoute, virtual_server_routes, |new, old| {
    new.spec != old.spec
});
cached!(TransportServer, Kind::TransportServer, transport_servers, |new, old| new.spec != old.spec);
cached!(Policy, Kind::Policy, policies, |new, old| new.spec != old.spec);
cached!(APPolicy, Kind::AppProtectPolicy, app_protect_policies, |new, old| new.spec != old.spec);
cached!(APLogConf, Kind::AppProtectLogConf, app_protect_log_confs, |new, old| {
    new.spec != old.spec
});
cached!(APUserSig, Kind::AppProtectUserSig, app_protect_user_sigs, |new, old| {
    new.spec != old.spec
});
cached!(APDosPolicy, Kind::AppProtectDosPolicy, dos_policies, |new, old| new.spec != old.spec);
cached!(APDosLogConf, Kind::AppProtectDosLogConf, dos_log_confs, |new, old| new.spec != old.spec);
cached!(DosProtectedResource, Kind::DosProtectedResource, dos_protected_resources, |new, old| {
    new.spec != old.spec
});
cached!(Service, Kind::Service, services, |new, old| {
    new.spec != old.spec || new.status != old.status
});

// Slices are synced under the id of the service that owns them.
cached!(EndpointSlice, Kind::EndpointSlice, endpoint_slices, |new, old| {
    new.endpoints != old.endpoints || new.ports != old.ports
}, {
    fn task_id(&self, id: ResourceId) -> Option<ResourceId> {
        let service = self.labels().get(SERVICE_NAME_LABEL)?;
        Some(ResourceId::new(id.namespace, service.clone()))
    }
});

cached!(Secret, Kind::Secret, secrets, |new, old| {
    new.type_ != old.type_ || new.data != old.data
}, {
    fn relevant(&self, _: &ClusterInfo) -> bool {
        secrets::is_supported_type(secrets::secret_type(self))
    }
});

cached!(ConfigMap, Kind::ConfigMap, config_maps, |new, old| new.data != old.data, {
    fn relevant(&self, cluster: &ClusterInfo) -> bool {
        cluster.is_config_map(&ResourceId::of(self))
    }
});

cached!(GlobalConfiguration, Kind::GlobalConfiguration, global_configurations, |new, old| {
    new.spec != old.spec
}, {
    fn relevant(&self, cluster: &ClusterInfo) -> bool {
        cluster.is_global_configuration(&ResourceId::of(self))
    }
});

// Pods are only read while resolving endpoints; their changes surface
// through EndpointSlices.
impl kubert::index::IndexNamespacedResource<Pod> for Cache {
    fn apply(&mut self, pod: Pod) {
        let id = ResourceId::of(&pod);
        self.pods.insert(id, Arc::new(pod));
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.pods.remove(&ResourceId::new(namespace, name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cluster_info::{mk_cluster_info, WatchedNamespaces},
        test_util::{mk_ingress, mk_meta, mk_pod, mk_service, mk_slice},
    };
    use kubert::index::IndexNamespacedResource;
    use nginx_ingress_controller_k8s_api::{ByteString, Selector};

    fn mk_cache(cluster: ClusterInfo) -> Cache {
        Cache::new(Arc::new(cluster), WorkQueue::new())
    }

    /// Takes every queued task, marking each done.
    fn drain(cache: &Cache) -> Vec<Task> {
        let mut tasks = Vec::new();
        while !cache.queue().is_empty() {
            let task = tokio_test::block_on(cache.queue().get()).expect("queue is open");
            cache.queue().done(&task);
            tasks.push(task);
        }
        tasks.sort_by(|a, b| (a.kind, &a.id).cmp(&(b.kind, &b.id)));
        tasks
    }

    fn mk_secret(ns: &str, name: &str, type_: &str, value: &str) -> Secret {
        Secret {
            metadata: mk_meta(ns, name, None),
            type_: Some(type_.to_string()),
            data: Some(maplit::btreemap! {
                "jwk".to_string() => ByteString(value.as_bytes().to_vec()),
            }),
            ..Default::default()
        }
    }

    fn mk_namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
        Namespace {
            metadata: nginx_ingress_controller_k8s_api::ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn unchanged_updates_are_skipped() {
        let mut cache = mk_cache(mk_cluster_info());
        let ingress = mk_ingress("default", "cafe", 10, &["cafe.example.com"]);

        cache.apply(ingress.clone());
        assert_eq!(
            drain(&cache),
            vec![Task::new(Kind::Ingress, ResourceId::new("default", "cafe"))]
        );

        cache.apply(ingress.clone());
        assert!(drain(&cache).is_empty(), "identical spec must not resync");

        let mut annotated = ingress;
        annotated.metadata.annotations = Some(maplit::btreemap! {
            "nginx.org/rewrites".to_string() => "x".to_string(),
        });
        cache.apply(annotated);
        assert_eq!(drain(&cache).len(), 1, "annotation changes resync");

        IndexNamespacedResource::<Ingress>::delete(
            &mut cache,
            "default".to_string(),
            "cafe".to_string(),
        );
        assert_eq!(drain(&cache).len(), 1);
        assert!(cache.get::<Ingress>(&ResourceId::new("default", "cafe")).is_none());
    }

    #[test]
    fn slices_sync_as_their_service() {
        let mut cache = mk_cache(mk_cluster_info());
        cache.apply(mk_slice("default", "web-abc", "web", 80, &[("10.0.0.1", Some(true))]));
        let service = Task::new(Kind::EndpointSlice, ResourceId::new("default", "web"));
        assert_eq!(drain(&cache), vec![service.clone()]);

        IndexNamespacedResource::<EndpointSlice>::delete(
            &mut cache,
            "default".to_string(),
            "web-abc".to_string(),
        );
        assert_eq!(drain(&cache), vec![service]);
    }

    #[test]
    fn pods_are_not_synced() {
        let mut cache = mk_cache(mk_cluster_info());
        cache.apply(mk_pod("default", "web-1", "10.0.0.1", &[("app", "web")]));
        cache.apply(mk_pod("default", "db-1", "10.0.0.2", &[("app", "db")]));
        assert!(drain(&cache).is_empty());

        let svc = mk_service("default", "web", &[("http", 80, None)]);
        let pods = cache.service_pods(&svc);
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name_any(), "web-1");

        let mut headless = svc;
        if let Some(spec) = headless.spec.as_mut() {
            spec.selector = None;
        }
        assert!(cache.service_pods(&headless).is_empty());
    }

    #[test]
    fn unsupported_secrets_are_ignored() {
        let mut cache = mk_cache(mk_cluster_info());
        cache.apply(mk_secret("default", "token", "kubernetes.io/service-account-token", "a"));
        assert!(drain(&cache).is_empty());

        cache.apply(mk_secret("default", "jwk", "nginx.org/jwk", "a"));
        cache.apply(mk_secret("default", "jwk", "nginx.org/jwk", "a"));
        assert_eq!(drain(&cache).len(), 1);

        cache.apply(mk_secret("default", "jwk", "nginx.org/jwk", "b"));
        assert_eq!(drain(&cache).len(), 1);
    }

    #[test]
    fn config_maps_by_name() {
        let mut cache = mk_cache(mk_cluster_info());
        let mk_cm = |name: &str| ConfigMap {
            metadata: mk_meta("nginx-ingress", name, None),
            data: Some(maplit::btreemap! { "worker-processes".to_string() => "2".to_string() }),
            ..Default::default()
        };
        cache.apply(mk_cm("unrelated"));
        cache.apply(mk_cm("nginx-config"));
        assert_eq!(
            drain(&cache),
            vec![Task::new(
                Kind::ConfigMap,
                ResourceId::new("nginx-ingress", "nginx-config")
            )]
        );
    }

    #[test]
    fn namespaces_selected_by_label() {
        let selector = "team=cafe".parse::<Selector>().expect("valid selector");
        let mut cluster = mk_cluster_info();
        cluster.watched_namespaces = WatchedNamespaces::Selector(selector);
        let mut cache = mk_cache(cluster);

        cache.apply(mk_ingress("cafe", "ing", 10, &["cafe.example.com"]));
        assert!(drain(&cache).is_empty(), "namespace is not known yet");
        let id = ResourceId::new("cafe", "ing");
        assert!(cache.get::<Ingress>(&id).is_none());

        kubert::index::IndexClusterResource::apply(&mut cache, mk_namespace("cafe", &[("team", "cafe")]));
        assert_eq!(drain(&cache), vec![Task::new(Kind::Ingress, id.clone())]);
        assert!(cache.get::<Ingress>(&id).is_some());

        kubert::index::IndexClusterResource::apply(&mut cache, mk_namespace("cafe", &[("team", "cafe"), ("env", "prod")]));
        assert!(drain(&cache).is_empty(), "still watched");

        kubert::index::IndexClusterResource::apply(&mut cache, mk_namespace("cafe", &[]));
        assert_eq!(drain(&cache), vec![Task::new(Kind::Ingress, id.clone())]);
        assert!(cache.get::<Ingress>(&id).is_none());

        kubert::index::IndexClusterResource::apply(&mut cache, mk_namespace("cafe", &[("team", "cafe")]));
        drain(&cache);
        kubert::index::IndexClusterResource::<Namespace>::delete(&mut cache, "cafe".to_string());
        assert_eq!(drain(&cache), vec![Task::new(Kind::Ingress, id)]);
    }

    #[test]
    fn configured_objects_outside_watched_namespaces() {
        let mut cluster = mk_cluster_info();
        cluster.watched_namespaces =
            WatchedNamespaces::List(["default".to_string()].into_iter().collect());
        let mut cache = mk_cache(cluster);

        cache.apply(mk_secret("nginx-ingress", "default-server-secret", "nginx.org/jwk", "a"));
        cache.apply(mk_secret("nginx-ingress", "other", "nginx.org/jwk", "a"));
        assert_eq!(
            drain(&cache),
            vec![Task::new(
                Kind::Secret,
                ResourceId::new("nginx-ingress", "default-server-secret")
            )]
        );
        assert_eq!(cache.list::<Secret>().len(), 1);
    }
}
