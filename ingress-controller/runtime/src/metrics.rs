use crate::core::Kind;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct DispatcherMetrics {
    syncs: Family<KindLabels, Counter>,
    requeues: Family<KindLabels, Counter>,
    dropped: Family<KindLabels, Counter>,
    batch_reloads: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

impl DispatcherMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let syncs = Family::default();
        prom.register("syncs", "Count of processed sync tasks", syncs.clone());

        let requeues = Family::default();
        prom.register(
            "requeues",
            "Count of sync tasks requeued after a transient failure",
            requeues.clone(),
        );

        let dropped = Family::default();
        prom.register(
            "dropped",
            "Count of sync tasks dropped after exhausting their retries",
            dropped.clone(),
        );

        let batch_reloads = Counter::default();
        prom.register(
            "batch_reloads",
            "Count of batches that ended with a reload",
            batch_reloads.clone(),
        );

        Self {
            syncs,
            requeues,
            dropped,
            batch_reloads,
        }
    }

    pub(crate) fn sync(&self, kind: Kind) {
        self.syncs.get_or_create(&labels(kind)).inc();
    }

    pub(crate) fn requeue(&self, kind: Kind) {
        self.requeues.get_or_create(&labels(kind)).inc();
    }

    pub(crate) fn dropped(&self, kind: Kind) {
        self.dropped.get_or_create(&labels(kind)).inc();
    }

    pub(crate) fn batch_reload(&self) {
        self.batch_reloads.inc();
    }
}

fn labels(kind: Kind) -> KindLabels {
    KindLabels {
        kind: kind.as_str().to_string(),
    }
}
