//! Typed accessors over the raw Kubernetes objects the syncer watches.

use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use kube::ResourceExt;

use crate::sms::ReclaimPolicy;

/// Filesystem kinds that mark a volume as file-backed rather than block-backed.
const FILE_FS_KINDS: [&str; 2] = ["nfs", "nfs4"];

pub trait SyncerResourceExt: ResourceExt {
    fn full_name(&self) -> String;
}

impl<K: ResourceExt> SyncerResourceExt for K {
    fn full_name(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_else(|| "<>".into()),
            self.name_any()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumePhase {
    Pending,
    Available,
    Bound,
    Released,
    Failed,
    Unknown,
}

impl VolumePhase {
    fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => VolumePhase::Pending,
            Some("Available") => VolumePhase::Available,
            Some("Bound") => VolumePhase::Bound,
            Some("Released") => VolumePhase::Released,
            Some("Failed") => VolumePhase::Failed,
            _ => VolumePhase::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
    Unknown,
}

impl ClaimPhase {
    fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => ClaimPhase::Pending,
            Some("Bound") => ClaimPhase::Bound,
            Some("Lost") => ClaimPhase::Lost,
            _ => ClaimPhase::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

pub trait VolumeExt {
    /// Whether this volume is provisioned by the given CSI driver. Volumes of
    /// other drivers are invisible to the syncer.
    fn is_driver_volume(&self, driver_name: &str) -> bool;

    fn volume_handle(&self) -> Option<&str>;

    fn phase(&self) -> VolumePhase;

    fn reclaim_policy(&self) -> Option<ReclaimPolicy>;

    /// An empty storage class is the mark of a statically provisioned volume.
    fn has_empty_storage_class(&self) -> bool;

    fn is_file_volume(&self) -> bool;

    /// `(namespace, name)` of the bound claim, if any.
    fn claim_ref(&self) -> Option<(String, String)>;

    fn being_deleted(&self) -> bool;
}

impl VolumeExt for PersistentVolume {
    fn is_driver_volume(&self, driver_name: &str) -> bool {
        self.spec
            .as_ref()
            .and_then(|spec| spec.csi.as_ref())
            .is_some_and(|csi| csi.driver == driver_name)
    }

    fn volume_handle(&self) -> Option<&str> {
        self.spec
            .as_ref()?
            .csi
            .as_ref()
            .map(|csi| csi.volume_handle.as_str())
    }

    fn phase(&self) -> VolumePhase {
        VolumePhase::parse(self.status.as_ref().and_then(|status| status.phase.as_deref()))
    }

    fn reclaim_policy(&self) -> Option<ReclaimPolicy> {
        match self
            .spec
            .as_ref()?
            .persistent_volume_reclaim_policy
            .as_deref()
        {
            Some("Delete") => Some(ReclaimPolicy::Delete),
            Some("Retain") => Some(ReclaimPolicy::Retain),
            _ => None,
        }
    }

    fn has_empty_storage_class(&self) -> bool {
        self.spec
            .as_ref()
            .and_then(|spec| spec.storage_class_name.as_deref())
            .unwrap_or("")
            .is_empty()
    }

    fn is_file_volume(&self) -> bool {
        self.spec
            .as_ref()
            .and_then(|spec| spec.csi.as_ref())
            .and_then(|csi| csi.fs_type.as_deref())
            .is_some_and(|fs_type| FILE_FS_KINDS.contains(&fs_type))
    }

    fn claim_ref(&self) -> Option<(String, String)> {
        let claim_ref = self.spec.as_ref()?.claim_ref.as_ref()?;
        let name = claim_ref.name.clone()?;
        Some((claim_ref.namespace.clone().unwrap_or_default(), name))
    }

    fn being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

pub trait ClaimExt {
    fn phase(&self) -> ClaimPhase;

    fn bound_volume_name(&self) -> Option<&str>;
}

impl ClaimExt for PersistentVolumeClaim {
    fn phase(&self) -> ClaimPhase {
        ClaimPhase::parse(self.status.as_ref().and_then(|status| status.phase.as_deref()))
    }

    fn bound_volume_name(&self) -> Option<&str> {
        self.spec
            .as_ref()?
            .volume_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

pub trait PodExt {
    fn phase(&self) -> PodPhase;

    /// Names of every claim this pod mounts.
    fn claim_names(&self) -> Vec<String>;
}

impl PodExt for Pod {
    fn phase(&self) -> PodPhase {
        PodPhase::parse(self.status.as_ref().and_then(|status| status.phase.as_deref()))
    }

    fn claim_names(&self) -> Vec<String> {
        self.spec
            .as_ref()
            .and_then(|spec| spec.volumes.as_ref())
            .map(|volumes| {
                volumes
                    .iter()
                    .filter_map(|volume| volume.persistent_volume_claim.as_ref())
                    .map(|claim_source| claim_source.claim_name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
