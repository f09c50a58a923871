use crate::{
    metrics::ControllerMetrics,
    updater::{Event, StatusPatch, Update},
};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::events::{self, EventType, Recorder, Reporter};
use kubert::lease::Claim;
use nginx_ingress_controller_core::{Kind, ResourceId};
use nginx_ingress_controller_k8s_api::{
    configuration::{Policy, TransportServer, VirtualServer, VirtualServerRoute},
    Api, Client, Ingress, Patch, PatchParams, Resource,
};
use serde::de::DeserializeOwned;
use std::{fmt::Debug, sync::Arc};
use tokio::{
    sync::{mpsc::UnboundedReceiver, watch},
    time::{self, Duration},
};

pub const FIELD_MANAGER: &str = "nginx-ingress-controller";

const EVENT_ACTION: &str = "Reconcile";

/// Applies [`Update`]s to the cluster.
pub struct Controller {
    claims: watch::Receiver<Arc<Claim>>,
    client: Client,
    name: String,
    updates: UnboundedReceiver<Update>,
    recorder: Recorder,
    patch_timeout: Duration,
    metrics: ControllerMetrics,
}

// === impl Controller ===

impl Controller {
    pub fn new(
        claims: watch::Receiver<Arc<Claim>>,
        client: Client,
        name: String,
        updates: UnboundedReceiver<Update>,
        patch_timeout: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.to_string(),
            instance: Some(name.clone()),
        };
        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            claims,
            client,
            name,
            updates,
            recorder,
            patch_timeout,
            metrics,
        }
    }

    /// Processes updates until every [`crate::StatusUpdater`] is dropped.
    pub async fn run(mut self) {
        while let Some(update) = self.updates.recv().await {
            match update {
                Update::Event(event) => self.publish(event).await,
                Update::Status(patch) => {
                    if self.claims.borrow().is_current_for(&self.name) {
                        self.patch(patch).await;
                    } else {
                        tracing::trace!(kind = %patch.kind, id = %patch.id, "Not the leader; skipping status update");
                        self.metrics.patch_skipped.inc();
                    }
                }
            }
        }
        tracing::debug!("Status updates closed");
    }

    async fn publish(&self, Event { reference, reason, message }: Event) {
        let event = events::Event {
            type_: if reason.is_warning() {
                EventType::Warning
            } else {
                EventType::Normal
            },
            reason: reason.to_string(),
            note: Some(message),
            action: EVENT_ACTION.to_string(),
            secondary: None,
        };
        match self.recorder.publish(&event, &reference).await {
            Ok(()) => {
                self.metrics.events_published.inc();
            }
            Err(error) => {
                tracing::warn!(name = ?reference.name, namespace = ?reference.namespace, %error, "Failed to publish event");
                self.metrics.events_failed.inc();
            }
        };
    }

    async fn patch(&self, StatusPatch { kind, id, patch }: StatusPatch) {
        let labels = ControllerMetrics::kind(kind);
        let client = self.client.clone();
        let res = match kind {
            Kind::Ingress => time::timeout(
                self.patch_timeout,
                patch_status::<Ingress>(client, &id, &patch),
            )
            .await,
            Kind::VirtualServer => time::timeout(
                self.patch_timeout,
                patch_status::<VirtualServer>(client, &id, &patch),
            )
            .await,
            Kind::VirtualServerRoute => time::timeout(
                self.patch_timeout,
                patch_status::<VirtualServerRoute>(client, &id, &patch),
            )
            .await,
            Kind::TransportServer => time::timeout(
                self.patch_timeout,
                patch_status::<TransportServer>(client, &id, &patch),
            )
            .await,
            Kind::Policy => time::timeout(
                self.patch_timeout,
                patch_status::<Policy>(client, &id, &patch),
            )
            .await,
            kind => {
                tracing::warn!(%kind, %id, "Status is not reported for this kind");
                return;
            }
        };
        match res {
            Ok(Ok(())) => {
                tracing::debug!(%kind, %id, "Patched status");
                self.metrics.patch_succeeded.get_or_create(&labels).inc();
            }
            Ok(Err(error)) => {
                tracing::error!(%kind, %id, %error, "Failed to patch status");
                self.metrics.patch_failed.get_or_create(&labels).inc();
            }
            Err(_) => {
                tracing::error!(%kind, %id, timeout = ?self.patch_timeout, "Status patch timed out");
                self.metrics.patch_timeout.get_or_create(&labels).inc();
            }
        }
    }
}

async fn patch_status<T>(
    client: Client,
    id: &ResourceId,
    patch: &Patch<serde_json::Value>,
) -> Result<(), kube::Error>
where
    T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    T: Clone + Debug + DeserializeOwned,
{
    let api = Api::<T>::namespaced(client, &id.namespace);
    api.patch_status(&id.name, &PatchParams::apply(FIELD_MANAGER), patch)
        .await?;
    Ok(())
}
