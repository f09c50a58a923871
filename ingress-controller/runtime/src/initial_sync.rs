use futures::prelude::*;
use kube::runtime::watcher;
use tokio::sync::watch;

/// Tracks whether every watch has delivered its initial listing.
#[derive(Debug, Default)]
pub struct InitialSync {
    synced: Vec<watch::Receiver<bool>>,
}

impl InitialSync {
    /// Wraps a watch so that its first complete listing is recorded.
    pub fn track<T, S>(&mut self, events: S) -> impl Stream<Item = watcher::Event<T>>
    where
        S: Stream<Item = watcher::Event<T>>,
    {
        let (tx, rx) = watch::channel(false);
        self.synced.push(rx);
        events.inspect(move |event| {
            if matches!(event, watcher::Event::InitDone) {
                tx.send_replace(true);
            }
        })
    }

    /// Waits until every tracked watch has listed its resources once.
    pub async fn wait(self) {
        for mut rx in self.synced {
            // A dropped watch never syncs; the runtime is shutting down.
            if rx.wait_for(|synced| *synced).await.is_err() {
                return;
            }
        }
    }
}
