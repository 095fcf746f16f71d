//! Pure constructors for the metadata payloads sent to the SMS.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use kube::ResourceExt;

use crate::ext::VolumeExt;
use crate::sms::{
    BackingObject, ContainerCluster, CreateSpec, EntityKind, EntityMetadata, EntityReference,
    UpdateSpec, VolumeType,
};

/// Claim participation entry. Labels ride along only while the claim exists;
/// a delete entry identifies the claim and nothing else. The owning volume is
/// always referenced so the catalog can resolve the binding.
pub fn claim_metadata(
    claim: &PersistentVolumeClaim,
    delete: bool,
    cluster_id: &str,
    volume_name: &str,
) -> EntityMetadata {
    EntityMetadata {
        kind: EntityKind::Claim,
        name: claim.name_any(),
        namespace: claim.namespace().unwrap_or_default(),
        labels: if delete {
            BTreeMap::new()
        } else {
            claim.labels().clone()
        },
        delete,
        cluster_id: cluster_id.to_owned(),
        references: vec![EntityReference {
            kind: EntityKind::Volume,
            name: volume_name.to_owned(),
            namespace: String::new(),
            cluster_id: cluster_id.to_owned(),
        }],
    }
}

/// Volume participation entry. Volumes are cluster-scoped, so the namespace
/// stays empty.
pub fn volume_metadata(volume: &PersistentVolume, delete: bool, cluster_id: &str) -> EntityMetadata {
    EntityMetadata {
        kind: EntityKind::Volume,
        name: volume.name_any(),
        namespace: String::new(),
        labels: if delete {
            BTreeMap::new()
        } else {
            volume.labels().clone()
        },
        delete,
        cluster_id: cluster_id.to_owned(),
        references: Vec::new(),
    }
}

/// Pod participation entry. The claim back-reference is carried on creation
/// and update; a delete entry stands alone.
pub fn pod_metadata(
    pod: &Pod,
    delete: bool,
    cluster_id: &str,
    claim: Option<&PersistentVolumeClaim>,
) -> EntityMetadata {
    let references = match claim {
        Some(claim) if !delete => vec![EntityReference {
            kind: EntityKind::Claim,
            name: claim.name_any(),
            namespace: claim.namespace().unwrap_or_default(),
            cluster_id: cluster_id.to_owned(),
        }],
        _ => Vec::new(),
    };

    EntityMetadata {
        kind: EntityKind::Pod,
        name: pod.name_any(),
        namespace: pod.namespace().unwrap_or_default(),
        labels: BTreeMap::new(),
        delete,
        cluster_id: cluster_id.to_owned(),
        references,
    }
}

pub fn update_spec(
    volume_handle: &str,
    cluster: &ContainerCluster,
    metadata: Vec<EntityMetadata>,
) -> UpdateSpec {
    UpdateSpec {
        volume_handle: volume_handle.to_owned(),
        container_cluster: cluster.clone(),
        metadata,
    }
}

/// Registration payload for a volume the SMS does not know yet. NFS-family
/// filesystems register as file volumes, everything else as block; the SMS
/// handle doubles as the backing identifier.
pub fn create_spec(
    volume: &PersistentVolume,
    volume_handle: &str,
    cluster: &ContainerCluster,
    metadata: Vec<EntityMetadata>,
) -> CreateSpec {
    let volume_type = if volume.is_file_volume() {
        VolumeType::File
    } else {
        VolumeType::Block
    };

    let backing = match volume_type {
        VolumeType::Block => BackingObject::BackingDiskId {
            disk_id: volume_handle.to_owned(),
        },
        VolumeType::File => BackingObject::BackingFileId {
            file_id: volume_handle.to_owned(),
        },
    };

    CreateSpec {
        name: volume.name_any(),
        volume_type,
        container_cluster: cluster.clone(),
        metadata,
        backing,
        reclaim_policy: volume.reclaim_policy(),
    }
}

/// Full entity list for one volume: the volume itself, its bound claim when
/// known, and every running pod mounting that claim.
pub fn project_metadata(
    volume: &PersistentVolume,
    claim: Option<&PersistentVolumeClaim>,
    pods: &[Arc<Pod>],
    cluster_id: &str,
) -> Vec<EntityMetadata> {
    let mut entries = vec![volume_metadata(volume, false, cluster_id)];

    if let Some(claim) = claim {
        entries.push(claim_metadata(claim, false, cluster_id, &volume.name_any()));
        for pod in pods {
            entries.push(pod_metadata(pod, false, cluster_id, Some(claim)));
        }
    }

    entries
}

/// Compares a freshly computed projection against the entries a record
/// already carries for this cluster. Ordering and entries belonging to other
/// clusters are ignored.
pub fn metadata_matches(
    projection: &[EntityMetadata],
    recorded: &[EntityMetadata],
    cluster_id: &str,
) -> bool {
    fn keyed<'a>(
        entries: &'a [EntityMetadata],
        cluster_id: &str,
    ) -> BTreeMap<(EntityKind, &'a str, &'a str), &'a EntityMetadata> {
        entries
            .iter()
            .filter(|entry| entry.cluster_id == cluster_id && !entry.delete)
            .map(|entry| (entry.entity_key(), entry))
            .collect()
    }

    let ours = keyed(projection, cluster_id);
    let theirs = keyed(recorded, cluster_id);

    ours.len() == theirs.len()
        && ours.iter().all(|(key, entry)| {
            theirs
                .get(key)
                .is_some_and(|other| other.labels == entry.labels && other.references == entry.references)
        })
}
