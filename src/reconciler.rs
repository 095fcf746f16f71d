//! Event-driven reconciliation of orchestrator state transitions into SMS
//! metadata operations.
//!
//! Every handler is a terminal consumer: failures are logged and the handler
//! returns, leaving convergence to the next event or the next full sweep.

use std::sync::Arc;

use color_eyre::eyre::{bail, eyre, Result};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::context::SyncerContext;
use crate::ext::{ClaimExt, ClaimPhase, PodExt, PodPhase, SyncerResourceExt, VolumeExt, VolumePhase};
use crate::metadata;
use crate::sms::{QueryFilter, ReclaimPolicy, VolumeManager};

pub struct EventReconciler<M> {
    ctx: Arc<SyncerContext<M>>,
}

impl<M: VolumeManager> EventReconciler<M> {
    pub fn new(ctx: Arc<SyncerContext<M>>) -> Self {
        EventReconciler { ctx }
    }

    /// Claim changed. Only a claim that is Bound now and either just became
    /// Bound or changed its labels carries anything worth pushing.
    pub async fn claim_updated(&self, old: &PersistentVolumeClaim, new: &PersistentVolumeClaim) {
        if new.phase() != ClaimPhase::Bound {
            return;
        }
        if old.phase() == ClaimPhase::Bound && old.labels() == new.labels() {
            return;
        }

        if let Err(error) = self.push_claim_metadata(new).await {
            error!(
                "failed to sync metadata for claim {}: {:#}",
                new.full_name(),
                error
            );
        }
    }

    /// Claim removed by the user.
    pub async fn claim_deleted(&self, claim: &PersistentVolumeClaim) {
        if claim.phase() != ClaimPhase::Bound {
            return;
        }

        if let Err(error) = self.unlink_claim(claim).await {
            error!(
                "failed to unlink deleted claim {}: {:#}",
                claim.full_name(),
                error
            );
        }
    }

    async fn push_claim_metadata(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        let Some(volume) = self.bound_volume(claim)? else {
            return Ok(());
        };
        let volume_handle = volume
            .volume_handle()
            .ok_or_else(|| eyre!("volume {} has no handle", volume.name_any()))?;

        let entry =
            metadata::claim_metadata(claim, false, &self.ctx.cluster.cluster_id, &volume.name_any());
        let spec = metadata::update_spec(volume_handle, &self.ctx.cluster, vec![entry]);

        debug!(
            "updating claim metadata for {} on volume handle {}",
            claim.full_name(),
            volume_handle
        );
        self.ctx.update_metadata(spec).await?;
        Ok(())
    }

    async fn unlink_claim(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        let Some(volume) = self.bound_volume(claim)? else {
            return Ok(());
        };

        if volume.reclaim_policy() == Some(ReclaimPolicy::Delete) {
            // the volume deletion path tears down the whole record
            debug!(
                "claim {} is backed by a reclaim-delete volume, skipping unlink",
                claim.full_name()
            );
            return Ok(());
        }

        let volume_handle = volume
            .volume_handle()
            .ok_or_else(|| eyre!("volume {} has no handle", volume.name_any()))?;
        let entry =
            metadata::claim_metadata(claim, true, &self.ctx.cluster.cluster_id, &volume.name_any());
        let spec = metadata::update_spec(volume_handle, &self.ctx.cluster, vec![entry]);

        info!(
            "unlinking deleted claim {} from volume handle {}",
            claim.full_name(),
            volume_handle
        );
        self.ctx.update_metadata(spec).await?;
        Ok(())
    }

    /// Resolves the volume a bound claim points at. Claims bound to another
    /// driver's volume resolve to `None` and are skipped silently.
    fn bound_volume(&self, claim: &PersistentVolumeClaim) -> Result<Option<Arc<PersistentVolume>>> {
        let Some(volume_name) = claim.bound_volume_name() else {
            bail!("claim {} has no bound volume name", claim.full_name());
        };
        let Some(volume) = self.ctx.caches.get_volume(volume_name) else {
            bail!(
                "volume {} for claim {} is not in the cache",
                volume_name,
                claim.full_name()
            );
        };
        if !volume.is_driver_volume(&self.ctx.config.driver_name) {
            return Ok(None);
        }
        Ok(Some(volume))
    }

    /// Volume changed. Filters out transitions the deletion path or the CO
    /// controller already covers, then adopts or updates the SMS record.
    pub async fn volume_updated(&self, old: &PersistentVolume, new: &PersistentVolume) {
        let driver_name = &self.ctx.config.driver_name;
        if !old.is_driver_volume(driver_name) && !new.is_driver_volume(driver_name) {
            return;
        }
        if matches!(new.phase(), VolumePhase::Pending | VolumePhase::Failed) {
            return;
        }
        if old.phase() == VolumePhase::Available && old.labels() == new.labels() {
            return;
        }
        if old.phase() == VolumePhase::Bound
            && new.phase() == VolumePhase::Released
            && new.reclaim_policy() == Some(ReclaimPolicy::Delete)
        {
            // the CO is about to delete this volume; the delete handler owns cleanup
            return;
        }
        if new.being_deleted() {
            return;
        }

        if let Err(error) = self.sync_volume(old, new).await {
            error!(
                "failed to sync metadata for volume {}: {:#}",
                new.name_any(),
                error
            );
        }
    }

    async fn sync_volume(&self, old: &PersistentVolume, new: &PersistentVolume) -> Result<()> {
        let volume_handle = new
            .volume_handle()
            .ok_or_else(|| eyre!("volume {} has no handle", new.name_any()))?;

        if old.phase() == VolumePhase::Pending
            && new.phase() == VolumePhase::Available
            && new.has_empty_storage_class()
        {
            return self.adopt_volume(new, volume_handle).await;
        }

        let entry = metadata::volume_metadata(new, false, &self.ctx.cluster.cluster_id);
        let spec = metadata::update_spec(volume_handle, &self.ctx.cluster, vec![entry]);
        self.ctx.update_metadata(spec).await?;
        Ok(())
    }

    /// Statically provisioned volumes surface as Pending -> Available with an
    /// empty storage class. Register them with the SMS unless the catalog
    /// already has a record for the handle.
    async fn adopt_volume(&self, volume: &PersistentVolume, volume_handle: &str) -> Result<()> {
        let _ops = self.ctx.volume_ops.lock().await;

        let result = self
            .ctx
            .volume_manager
            .query(QueryFilter::by_handle(volume_handle))
            .await?;

        match result.volumes.first() {
            None => {
                let entry = metadata::volume_metadata(volume, false, &self.ctx.cluster.cluster_id);
                let spec = metadata::create_spec(volume, volume_handle, &self.ctx.cluster, vec![entry]);
                info!(
                    "registering statically provisioned volume {} with handle {}",
                    volume.name_any(),
                    volume_handle
                );
                self.ctx.volume_manager.create_volume(spec).await?;
                Ok(())
            }
            Some(record) if record.volume_handle == volume_handle => {
                let entry = metadata::volume_metadata(volume, false, &self.ctx.cluster.cluster_id);
                let spec = metadata::update_spec(volume_handle, &self.ctx.cluster, vec![entry]);
                self.ctx.volume_manager.update_metadata(spec).await?;
                Ok(())
            }
            Some(record) => {
                warn!(
                    "query for handle {} returned a record for {}; leaving the catalog untouched",
                    volume_handle, record.volume_handle
                );
                Ok(())
            }
        }
    }

    /// Volume removed from the CO.
    pub async fn volume_deleted(&self, volume: &PersistentVolume) {
        if !volume.is_driver_volume(&self.ctx.config.driver_name) {
            return;
        }
        if volume.claim_ref().is_some()
            && matches!(volume.phase(), VolumePhase::Available | VolumePhase::Released)
            && volume.reclaim_policy() == Some(ReclaimPolicy::Delete)
        {
            // reclaim is controller-managed; the CSI delete call covers the record
            return;
        }

        if let Err(error) = self.remove_volume(volume).await {
            error!(
                "failed to remove volume {} from the catalog: {:#}",
                volume.name_any(),
                error
            );
        }
    }

    async fn remove_volume(&self, volume: &PersistentVolume) -> Result<()> {
        let volume_handle = volume
            .volume_handle()
            .ok_or_else(|| eyre!("volume {} has no handle", volume.name_any()))?;

        if volume.is_file_volume() {
            // file volumes stay in the catalog; only this cluster's entry goes
            let entry = metadata::volume_metadata(volume, true, &self.ctx.cluster.cluster_id);
            let spec = metadata::update_spec(volume_handle, &self.ctx.cluster, vec![entry]);
            self.ctx.update_metadata(spec).await?;
            return Ok(());
        }

        let delete_disk = volume.claim_ref().is_some()
            && volume.reclaim_policy() == Some(ReclaimPolicy::Delete);
        info!(
            "removing volume {} (handle {}) from the catalog, delete_disk={}",
            volume.name_any(),
            volume_handle,
            delete_disk
        );
        self.ctx.delete_volume(volume_handle, delete_disk).await?;
        Ok(())
    }

    /// Pod reached Running; link it to every claim it mounts.
    pub async fn pod_updated(&self, old: &Pod, new: &Pod) {
        if !(old.phase() == PodPhase::Pending && new.phase() == PodPhase::Running) {
            return;
        }
        self.update_pod_metadata(new, false).await;
    }

    /// Pod removed; drop its entries unless it never left Pending.
    pub async fn pod_deleted(&self, pod: &Pod) {
        if pod.phase() == PodPhase::Pending {
            return;
        }
        self.update_pod_metadata(pod, true).await;
    }

    /// Pushes one pod entry per referenced claim. Failures are collected so a
    /// broken claim does not stop the rest of the pod's volumes.
    async fn update_pod_metadata(&self, pod: &Pod, delete: bool) {
        let claim_names = pod.claim_names();
        if claim_names.is_empty() {
            return;
        }

        let namespace = pod.namespace().unwrap_or_default();
        let mut failures = Vec::new();
        for claim_name in &claim_names {
            if let Err(error) = self.push_pod_entry(pod, &namespace, claim_name, delete).await {
                failures.push(format!("{}: {:#}", claim_name, error));
            }
        }

        if !failures.is_empty() {
            error!(
                "failed to sync pod {} metadata for {} of {} claim(s): [{}]",
                pod.full_name(),
                failures.len(),
                claim_names.len(),
                failures.join("; ")
            );
        }
    }

    async fn push_pod_entry(
        &self,
        pod: &Pod,
        namespace: &str,
        claim_name: &str,
        delete: bool,
    ) -> Result<()> {
        let claim = self
            .ctx
            .caches
            .get_claim(namespace, claim_name)
            .ok_or_else(|| eyre!("claim {}/{} is not in the cache", namespace, claim_name))?;
        let Some(volume) = self.bound_volume(&claim)? else {
            return Ok(());
        };
        let volume_handle = volume
            .volume_handle()
            .ok_or_else(|| eyre!("volume {} has no handle", volume.name_any()))?;

        let claim_ref = if delete { None } else { Some(claim.as_ref()) };
        let entry = metadata::pod_metadata(pod, delete, &self.ctx.cluster.cluster_id, claim_ref);
        let spec = metadata::update_spec(volume_handle, &self.ctx.cluster, vec![entry]);
        self.ctx.update_metadata(spec).await?;
        Ok(())
    }
}
