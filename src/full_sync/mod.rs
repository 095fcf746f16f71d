//! Periodic reconciliation of the whole CO <-> SMS mapping.
//!
//! A sweep snapshots both sides, diffs them by volume handle, and acts only
//! on asymmetries confirmed across two consecutive sweeps, so transient
//! eventual-consistency lag on either side never triggers a create or a
//! delete.

pub mod ledger;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use color_eyre::Result;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use kube::ResourceExt;
use tracing::{debug, error, info};

use crate::cache::object_key;
use crate::config::QUERY_PAGE_SIZE;
use crate::context::SyncerContext;
use crate::ext::{PodExt, PodPhase, VolumeExt, VolumePhase};
use crate::metadata;
use crate::sms::{EntityMetadata, QueryFilter, ReclaimPolicy, SmsError, VolumeManager, VolumeRecord};
use ledger::FullSyncLedger;

/// Everything a sweep needs from the CO side, captured once up front.
struct ClusterSnapshot {
    /// Driver-owned volumes in a stable phase, keyed by SMS handle.
    volumes: HashMap<String, Arc<PersistentVolume>>,
    /// Bound claims referenced by those volumes, keyed by `namespace/name`.
    claims: HashMap<String, Arc<PersistentVolumeClaim>>,
    /// Running pods mounting one of those claims, keyed by the claim key.
    pods_by_claim: HashMap<String, Vec<Arc<Pod>>>,
}

/// Counters reported after each sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Asymmetries parked in the ledger for the next sweep.
    pub deferred: usize,
}

pub struct FullSyncEngine<M> {
    ctx: Arc<SyncerContext<M>>,
}

impl<M: VolumeManager> FullSyncEngine<M> {
    pub fn new(ctx: Arc<SyncerContext<M>>) -> Self {
        FullSyncEngine { ctx }
    }

    /// Runs one sweep. The stages are strictly sequential; every SMS call is
    /// best-effort, and a failed action re-enters the next ledger so the
    /// retry happens on the following tick.
    pub async fn run_sweep(&self) -> Result<SweepSummary> {
        debug!("full sync: starting sweep");
        let co = self.snapshot_cluster();
        let sms = self.snapshot_sms().await?;

        let (prior_create, prior_delete) = self.ctx.volume_ops.lock().await.snapshot();

        let co_handles: HashSet<String> = co.volumes.keys().cloned().collect();
        let sms_handles: HashSet<String> = sms.keys().cloned().collect();

        let mut next = FullSyncLedger::default();
        let mut summary = SweepSummary::default();

        // volumes the CO knows and the SMS does not
        for volume_handle in co_handles.difference(&sms_handles) {
            if !prior_create.contains(volume_handle) {
                next.mark_pending_create(volume_handle);
                summary.deferred += 1;
                continue;
            }
            let volume = &co.volumes[volume_handle];
            match self.create_record(volume, volume_handle, &co).await {
                Ok(()) => summary.created += 1,
                Err(error) => {
                    error!(
                        "full sync: failed to register volume handle {}: {:#}",
                        volume_handle, error
                    );
                    next.mark_pending_create(volume_handle);
                }
            }
        }

        // records the SMS carries with no CO volume behind them
        for volume_handle in sms_handles.difference(&co_handles) {
            if !prior_delete.contains(volume_handle) {
                next.mark_pending_delete(volume_handle);
                summary.deferred += 1;
                continue;
            }
            let record = &sms[volume_handle];
            let delete_disk = record.reclaim_policy == Some(ReclaimPolicy::Delete);
            match self.ctx.delete_volume(volume_handle, delete_disk).await {
                Ok(()) => summary.deleted += 1,
                Err(error) => {
                    error!(
                        "full sync: failed to delete record for handle {}: {:#}",
                        volume_handle, error
                    );
                    next.mark_pending_delete(volume_handle);
                }
            }
        }

        // volumes present on both sides: push the projection when it drifted
        for volume_handle in co_handles.intersection(&sms_handles) {
            let volume = &co.volumes[volume_handle];
            let record = &sms[volume_handle];
            let projection = self.project(volume, &co);
            if metadata::metadata_matches(&projection, &record.metadata, &self.ctx.cluster.cluster_id)
            {
                continue;
            }
            let spec = metadata::update_spec(volume_handle, &self.ctx.cluster, projection);
            match self.ctx.update_metadata(spec).await {
                Ok(()) => summary.updated += 1,
                Err(error) => error!(
                    "full sync: failed to update metadata for handle {}: {:#}",
                    volume_handle, error
                ),
            }
        }

        *self.ctx.volume_ops.lock().await = next;

        info!(
            "full sync: sweep done, created={} updated={} deleted={} deferred={}",
            summary.created, summary.updated, summary.deleted, summary.deferred
        );
        Ok(summary)
    }

    fn snapshot_cluster(&self) -> ClusterSnapshot {
        let driver_name = &self.ctx.config.driver_name;

        let mut volumes = HashMap::new();
        for volume in self.ctx.caches.volumes.snapshot() {
            if !volume.is_driver_volume(driver_name) {
                continue;
            }
            if !matches!(
                volume.phase(),
                VolumePhase::Available | VolumePhase::Bound | VolumePhase::Released
            ) {
                continue;
            }
            let Some(volume_handle) = volume.volume_handle() else {
                continue;
            };
            volumes.insert(volume_handle.to_owned(), volume.clone());
        }

        let mut claims = HashMap::new();
        for volume in volumes.values() {
            let Some((namespace, name)) = volume.claim_ref() else {
                continue;
            };
            let key = object_key(&namespace, &name);
            if let Some(claim) = self.ctx.caches.claims.get(&key) {
                claims.insert(key, claim);
            }
        }

        let mut pods_by_claim: HashMap<String, Vec<Arc<Pod>>> = HashMap::new();
        for pod in self.ctx.caches.pods.snapshot() {
            if pod.phase() != PodPhase::Running {
                continue;
            }
            let namespace = pod.namespace().unwrap_or_default();
            for claim_name in pod.claim_names() {
                let key = object_key(&namespace, &claim_name);
                if claims.contains_key(&key) {
                    pods_by_claim.entry(key).or_default().push(pod.clone());
                }
            }
        }

        ClusterSnapshot {
            volumes,
            claims,
            pods_by_claim,
        }
    }

    async fn snapshot_sms(&self) -> Result<HashMap<String, VolumeRecord>> {
        let mut records = HashMap::new();
        let mut offset = 0;
        loop {
            let filter =
                QueryFilter::for_cluster(&self.ctx.cluster.cluster_id, offset, QUERY_PAGE_SIZE);
            let page = self.ctx.volume_manager.query(filter).await?;
            for record in page.volumes {
                records.insert(record.volume_handle.clone(), record);
            }
            match page.next_offset {
                Some(next_offset) => offset = next_offset,
                None => break,
            }
        }
        Ok(records)
    }

    fn project(&self, volume: &PersistentVolume, co: &ClusterSnapshot) -> Vec<EntityMetadata> {
        let claim_key = volume
            .claim_ref()
            .map(|(namespace, name)| object_key(&namespace, &name));
        let claim = claim_key.as_ref().and_then(|key| co.claims.get(key));
        let pods = claim_key
            .as_ref()
            .and_then(|key| co.pods_by_claim.get(key))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        metadata::project_metadata(
            volume,
            claim.map(|claim| claim.as_ref()),
            pods,
            &self.ctx.cluster.cluster_id,
        )
    }

    async fn create_record(
        &self,
        volume: &Arc<PersistentVolume>,
        volume_handle: &str,
        co: &ClusterSnapshot,
    ) -> Result<(), SmsError> {
        let projection = self.project(volume, co);
        let spec = metadata::create_spec(volume, volume_handle, &self.ctx.cluster, projection);

        let _ops = self.ctx.volume_ops.lock().await;
        self.ctx.volume_manager.create_volume(spec).await?;
        Ok(())
    }
}
