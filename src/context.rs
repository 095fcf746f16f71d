//! Shared state of the event reconciler and the full synchronizer.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cache::Caches;
use crate::config::SyncerConfig;
use crate::full_sync::ledger::FullSyncLedger;
use crate::sms::{ContainerCluster, SmsError, UpdateSpec, VolumeManager};

/// Everything both writers share: configuration, the SMS client, the caches
/// and the volume operations lock.
///
/// The mutex guards the cross-sweep ledger, and holding it is what serialises
/// SMS mutations — one lock, two duties, so they can never disagree.
pub struct SyncerContext<M> {
    pub config: SyncerConfig,
    pub cluster: ContainerCluster,
    pub volume_manager: M,
    pub volume_ops: Mutex<FullSyncLedger>,
    pub caches: Caches,
}

impl<M: VolumeManager> SyncerContext<M> {
    pub fn new(config: SyncerConfig, volume_manager: M) -> Arc<Self> {
        let cluster = ContainerCluster {
            cluster_id: config.cluster_id.clone(),
            cluster_flavor: config.cluster_flavor,
            user: config.cluster_user.clone(),
        };

        Arc::new(SyncerContext {
            config,
            cluster,
            volume_manager,
            volume_ops: Mutex::new(FullSyncLedger::default()),
            caches: Caches::default(),
        })
    }

    /// Sends a metadata update with the volume operations lock held.
    pub async fn update_metadata(&self, spec: UpdateSpec) -> Result<(), SmsError> {
        let _ops = self.volume_ops.lock().await;
        self.volume_manager.update_metadata(spec).await
    }

    /// Deletes a catalog entry with the volume operations lock held.
    pub async fn delete_volume(&self, volume_handle: &str, delete_disk: bool) -> Result<(), SmsError> {
        let _ops = self.volume_ops.lock().await;
        self.volume_manager.delete_volume(volume_handle, delete_disk).await
    }
}
