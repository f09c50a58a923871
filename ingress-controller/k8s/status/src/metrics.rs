use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    pub(crate) patch_succeeded: Family<KindLabels, Counter>,
    pub(crate) patch_failed: Family<KindLabels, Counter>,
    pub(crate) patch_timeout: Family<KindLabels, Counter>,
    pub(crate) patch_skipped: Counter,
    pub(crate) events_published: Counter,
    pub(crate) events_failed: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub(crate) struct KindLabels {
    pub(crate) kind: String,
}

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patch_succeeded = Family::default();
        prom.register(
            "patch_succeeded",
            "Count of successful status patches",
            patch_succeeded.clone(),
        );

        let patch_failed = Family::default();
        prom.register(
            "patch_failed",
            "Count of failed status patches",
            patch_failed.clone(),
        );

        let patch_timeout = Family::default();
        prom.register(
            "patch_timeout",
            "Count of status patches that timed out",
            patch_timeout.clone(),
        );

        let patch_skipped = Counter::default();
        prom.register(
            "patch_skipped",
            "Count of status patches dropped because this replica is not the leader",
            patch_skipped.clone(),
        );

        let events_published = Counter::default();
        prom.register(
            "events_published",
            "Count of published events",
            events_published.clone(),
        );

        let events_failed = Counter::default();
        prom.register(
            "events_failed",
            "Count of events that could not be published",
            events_failed.clone(),
        );

        Self {
            patch_succeeded,
            patch_failed,
            patch_timeout,
            patch_skipped,
            events_published,
            events_failed,
        }
    }

    pub(crate) fn kind(kind: impl ToString) -> KindLabels {
        KindLabels {
            kind: kind.to_string(),
        }
    }
}
