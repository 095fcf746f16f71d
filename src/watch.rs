//! Watch loop translating orchestrator events into reconciler calls.
//!
//! Three typed watches feed one merged stream. Every event first refreshes
//! the local cache and then dispatches to the event reconciler together with
//! the previously cached version, so handlers see real transitions. The
//! first sight of an object only seeds the cache.

use std::sync::Arc;

use futures_util::{stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use kube::api::ListParams;
use kube::runtime::watcher;
use kube::runtime::watcher::Event;
use kube::{Api, Client, ResourceExt};
use tokio::sync::watch::Receiver;
use tracing::{error, info};

use crate::cache::object_key;
use crate::context::SyncerContext;
use crate::reconciler::EventReconciler;
use crate::sms::VolumeManager;

enum WatchedResource {
    Volume(Event<PersistentVolume>),
    Claim(Event<PersistentVolumeClaim>),
    Pod(Event<Pod>),
}

pub struct ResourceWatcher<M> {
    ctx: Arc<SyncerContext<M>>,
    reconciler: EventReconciler<M>,
}

impl<M: VolumeManager> ResourceWatcher<M> {
    pub fn new(ctx: Arc<SyncerContext<M>>) -> Self {
        ResourceWatcher {
            reconciler: EventReconciler::new(ctx.clone()),
            ctx,
        }
    }

    /// Streams volume, claim and pod events until `shutdown` flips.
    pub async fn run(&self, client: Client, mut shutdown: Receiver<bool>) {
        let volumes = Api::<PersistentVolume>::all(client.clone());
        let claims = Api::<PersistentVolumeClaim>::all(client.clone());
        let pods = Api::<Pod>::all(client);

        let volume_events =
            watcher(volumes, ListParams::default()).map_ok(WatchedResource::Volume);
        let claim_events =
            watcher(claims, ListParams::default()).map_ok(WatchedResource::Claim);
        let pod_events = watcher(pods, ListParams::default()).map_ok(WatchedResource::Pod);

        let stream = stream::select_all(vec![
            volume_events.boxed(),
            claim_events.boxed(),
            pod_events.boxed(),
        ]);
        tokio::pin!(stream);

        info!("watching volumes, claims and pods");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("event watcher stopping");
                    return;
                }
                item = stream.try_next() => match item {
                    Ok(Some(resource)) => self.dispatch(resource).await,
                    Ok(None) => {
                        error!("watch stream ended");
                        return;
                    }
                    Err(error) => error!("watch error: {:#}", error),
                }
            }
        }
    }

    async fn dispatch(&self, resource: WatchedResource) {
        match resource {
            WatchedResource::Volume(event) => self.volume_event(event).await,
            WatchedResource::Claim(event) => self.claim_event(event).await,
            WatchedResource::Pod(event) => self.pod_event(event).await,
        }
    }

    async fn volume_event(&self, event: Event<PersistentVolume>) {
        match event {
            Event::Applied(volume) => {
                let previous = self
                    .ctx
                    .caches
                    .volumes
                    .insert(volume.name_any(), volume.clone());
                if let Some(previous) = previous {
                    self.reconciler.volume_updated(&previous, &volume).await;
                }
            }
            Event::Deleted(volume) => {
                self.ctx.caches.volumes.remove(&volume.name_any());
                self.reconciler.volume_deleted(&volume).await;
            }
            Event::Restarted(volumes) => {
                self.ctx.caches.volumes.replace_all(
                    volumes
                        .into_iter()
                        .map(|volume| (volume.name_any(), volume)),
                );
            }
        }
    }

    async fn claim_event(&self, event: Event<PersistentVolumeClaim>) {
        match event {
            Event::Applied(claim) => {
                let key = object_key(&claim.namespace().unwrap_or_default(), &claim.name_any());
                let previous = self.ctx.caches.claims.insert(key, claim.clone());
                if let Some(previous) = previous {
                    self.reconciler.claim_updated(&previous, &claim).await;
                }
            }
            Event::Deleted(claim) => {
                let key = object_key(&claim.namespace().unwrap_or_default(), &claim.name_any());
                self.ctx.caches.claims.remove(&key);
                self.reconciler.claim_deleted(&claim).await;
            }
            Event::Restarted(claims) => {
                self.ctx.caches.claims.replace_all(claims.into_iter().map(|claim| {
                    (
                        object_key(&claim.namespace().unwrap_or_default(), &claim.name_any()),
                        claim,
                    )
                }));
            }
        }
    }

    async fn pod_event(&self, event: Event<Pod>) {
        match event {
            Event::Applied(pod) => {
                let key = object_key(&pod.namespace().unwrap_or_default(), &pod.name_any());
                let previous = self.ctx.caches.pods.insert(key, pod.clone());
                if let Some(previous) = previous {
                    self.reconciler.pod_updated(&previous, &pod).await;
                }
            }
            Event::Deleted(pod) => {
                let key = object_key(&pod.namespace().unwrap_or_default(), &pod.name_any());
                self.ctx.caches.pods.remove(&key);
                self.reconciler.pod_deleted(&pod).await;
            }
            Event::Restarted(pods) => {
                self.ctx.caches.pods.replace_all(pods.into_iter().map(|pod| {
                    (
                        object_key(&pod.namespace().unwrap_or_default(), &pod.name_any()),
                        pod,
                    )
                }));
            }
        }
    }
}
