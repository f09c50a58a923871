//! Prometheus instrumentation for the caches and the configuration store.

use crate::{cache::SharedCache, configuration::SharedConfiguration, Configuration};
use kube::ResourceExt;
use nginx_ingress_controller_core::Resource;
use nginx_ingress_controller_k8s_api::{
    configuration::TLS_PASSTHROUGH_LISTENER_NAME, Namespace,
};
use parking_lot::RwLock;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric},
    metrics::{counter::Counter, family::Family, gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Counts the watch events applied to an index.
pub struct IndexMetrics<T> {
    inner: T,

    index_applies: Family<NamespacedIndexLabels, Counter>,
    index_deletes: Family<NamespacedIndexLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedIndexLabels {
    namespace: String,
    kind: String,
}

/// Reports gauges read from the shared state at scrape time.
#[derive(Debug)]
struct Instrumented {
    cache: SharedCache,
    config: SharedConfiguration,
}

/// Accepted resources, by kind and type.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ResourceCounts {
    pub(crate) ingresses: BTreeMap<&'static str, u32>,
    pub(crate) virtual_servers: u32,
    pub(crate) virtual_server_routes: u32,
    pub(crate) transport_servers: BTreeMap<&'static str, u32>,
}

pub fn register(reg: &mut Registry, cache: SharedCache, config: SharedConfiguration) {
    reg.register_collector(Box::new(Instrumented { cache, config }));
}

// === impl IndexMetrics ===

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let index_applies = Family::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        Self {
            inner,
            index_applies,
            index_deletes,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    fn count(family: &Family<NamespacedIndexLabels, Counter>, namespace: &str, kind: &str) {
        family
            .get_or_create(&NamespacedIndexLabels {
                namespace: namespace.to_string(),
                kind: kind.to_string(),
            })
            .inc();
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: kubert::index::IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let namespace = resource.namespace().unwrap_or_default();
        Self::count(&self.index_applies, &namespace, &R::kind(&()));
        self.inner.write().apply(resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        Self::count(&self.index_deletes, &namespace, &R::kind(&()));
        self.inner.write().delete(namespace, name);
    }
}

impl<T> kubert::index::IndexClusterResource<Namespace> for IndexMetrics<Arc<RwLock<T>>>
where
    T: kubert::index::IndexClusterResource<Namespace>,
{
    fn apply(&mut self, ns: Namespace) {
        Self::count(&self.index_applies, "", "Namespace");
        self.inner.write().apply(ns);
    }

    fn delete(&mut self, name: String) {
        Self::count(&self.index_deletes, "", "Namespace");
        self.inner.write().delete(name);
    }
}

// === impl Instrumented ===

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), fmt::Error> {
        let sizes = self.cache.read().sizes();
        let counts = ResourceCounts::of(&self.config.read());

        let mut cache_encoder = encoder.encode_descriptor(
            "cache_size",
            "The number of objects in the informer caches",
            None,
            MetricType::Gauge,
        )?;
        for (kind, size) in sizes {
            let labels = [("kind", kind)];
            let size = ConstGauge::new(size as u32);
            size.encode(cache_encoder.encode_family(&labels)?)?;
        }

        let mut ingress_encoder = encoder.encode_descriptor(
            "ingress_resources_total",
            "The number of handled Ingress resources",
            None,
            MetricType::Gauge,
        )?;
        for (class, n) in &counts.ingresses {
            let labels = [("class", *class)];
            ConstGauge::new(*n).encode(ingress_encoder.encode_family(&labels)?)?;
        }

        let mut vs_encoder = encoder.encode_descriptor(
            "virtualserver_resources_total",
            "The number of handled VirtualServer resources",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(counts.virtual_servers).encode(vs_encoder.encode_family(&[("kind", "vs")])?)?;

        let mut vsr_encoder = encoder.encode_descriptor(
            "virtualserverroute_resources_total",
            "The number of handled VirtualServerRoute resources",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(counts.virtual_server_routes)
            .encode(vsr_encoder.encode_family(&[("kind", "vsr")])?)?;

        let mut ts_encoder = encoder.encode_descriptor(
            "transportserver_resources_total",
            "The number of handled TransportServer resources",
            None,
            MetricType::Gauge,
        )?;
        for (type_, n) in &counts.transport_servers {
            let labels = [("type", *type_)];
            ConstGauge::new(*n).encode(ts_encoder.encode_family(&labels)?)?;
        }

        Ok(())
    }
}

// === impl ResourceCounts ===

impl ResourceCounts {
    pub(crate) fn of(config: &Configuration) -> Self {
        let mut counts = Self {
            ingresses: ["master", "minion", "regular"]
                .into_iter()
                .map(|c| (c, 0))
                .collect(),
            transport_servers: ["passthrough", "tcp", "udp"]
                .into_iter()
                .map(|t| (t, 0))
                .collect(),
            ..Default::default()
        };
        for resource in config.get_resources() {
            match resource {
                Resource::Ingress(c) if c.is_master => {
                    *counts.ingresses.entry("master").or_default() += 1;
                    *counts.ingresses.entry("minion").or_default() += c.minions.len() as u32;
                }
                Resource::Ingress(_) => {
                    *counts.ingresses.entry("regular").or_default() += 1;
                }
                Resource::VirtualServer(c) => {
                    counts.virtual_servers += 1;
                    counts.virtual_server_routes += c.virtual_server_routes.len() as u32;
                }
                Resource::TransportServer(c) => {
                    let listener = &c.transport_server.spec.listener;
                    let type_ = if listener.name == TLS_PASSTHROUGH_LISTENER_NAME {
                        "passthrough"
                    } else if listener.protocol.eq_ignore_ascii_case("udp") {
                        "udp"
                    } else {
                        "tcp"
                    };
                    *counts.transport_servers.entry(type_).or_default() += 1;
                }
            }
        }
        counts
    }
}
