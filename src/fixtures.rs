//! Object builders and a recording SMS mock shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimStatus, PersistentVolumeClaimVolumeSource, PersistentVolumeSpec,
    PersistentVolumeStatus, Pod, PodSpec, PodStatus, Volume,
};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::config::SyncerConfig;
use crate::context::SyncerContext;
use crate::ext::VolumeExt;
use crate::sms::{
    BackingObject, ClusterFlavor, ContainerCluster, CreateSpec, QueryFilter, QueryResult, SmsError,
    UpdateSpec, VolumeManager, VolumeRecord, VolumeType,
};

pub const TEST_DRIVER: &str = "csi.storage.example.com";

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

pub fn volume(name: &str, volume_handle: &str, phase: &str, reclaim: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            csi: Some(CSIPersistentVolumeSource {
                driver: TEST_DRIVER.to_string(),
                volume_handle: volume_handle.to_string(),
                ..Default::default()
            }),
            persistent_volume_reclaim_policy: Some(reclaim.to_string()),
            storage_class_name: Some("fast".to_string()),
            ..Default::default()
        }),
        status: Some(PersistentVolumeStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

/// A statically provisioned volume: no storage class, reclaim Retain.
pub fn static_volume(name: &str, volume_handle: &str, phase: &str) -> PersistentVolume {
    let mut volume = volume(name, volume_handle, phase, "Retain");
    volume.spec.as_mut().unwrap().storage_class_name = None;
    volume
}

pub fn file_volume(name: &str, volume_handle: &str, phase: &str) -> PersistentVolume {
    let mut volume = volume(name, volume_handle, phase, "Retain");
    volume.spec.as_mut().unwrap().csi.as_mut().unwrap().fs_type = Some("nfs4".to_string());
    volume
}

pub fn foreign_volume(name: &str, volume_handle: &str, phase: &str) -> PersistentVolume {
    let mut volume = volume(name, volume_handle, phase, "Delete");
    volume.spec.as_mut().unwrap().csi.as_mut().unwrap().driver =
        "other.driver.example.com".to_string();
    volume
}

pub fn with_claim_ref(
    mut volume: PersistentVolume,
    namespace: &str,
    claim_name: &str,
) -> PersistentVolume {
    volume.spec.as_mut().unwrap().claim_ref = Some(ObjectReference {
        namespace: Some(namespace.to_string()),
        name: Some(claim_name.to_string()),
        ..Default::default()
    });
    volume
}

pub fn claim(
    namespace: &str,
    name: &str,
    phase: &str,
    volume_name: Option<&str>,
    claim_labels: BTreeMap<String, String>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: if claim_labels.is_empty() {
                None
            } else {
                Some(claim_labels)
            },
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            volume_name: volume_name.map(str::to_string),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

pub fn pod(namespace: &str, name: &str, phase: &str, claim_names: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            volumes: if claim_names.is_empty() {
                None
            } else {
                Some(
                    claim_names
                        .iter()
                        .map(|claim_name| Volume {
                            name: format!("{}-mount", claim_name),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: claim_name.to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                )
            },
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

pub fn test_config() -> SyncerConfig {
    SyncerConfig {
        driver_name: TEST_DRIVER.to_string(),
        cluster_id: "cluster-1".to_string(),
        cluster_user: "syncer-tests".to_string(),
        cluster_flavor: ClusterFlavor::Vanilla,
        full_sync_interval_minutes: 30,
        sms_endpoint: "http://sms.invalid".to_string(),
    }
}

pub fn test_cluster() -> ContainerCluster {
    ContainerCluster {
        cluster_id: "cluster-1".to_string(),
        cluster_flavor: ClusterFlavor::Vanilla,
        user: "syncer-tests".to_string(),
    }
}

pub fn test_context() -> Arc<SyncerContext<MockVolumeManager>> {
    SyncerContext::new(test_config(), MockVolumeManager::default())
}

/// A catalog record as the SMS would hold it right after registration: just
/// the volume entity, typed by the volume's filesystem kind.
pub fn record_for(volume: &PersistentVolume, cluster: &ContainerCluster) -> VolumeRecord {
    let volume_handle = volume.volume_handle().unwrap().to_string();
    VolumeRecord {
        volume_handle,
        name: volume.name_any(),
        volume_type: if volume.is_file_volume() {
            VolumeType::File
        } else {
            VolumeType::Block
        },
        cluster_id: cluster.cluster_id.clone(),
        clusters: vec![cluster.clone()],
        metadata: vec![crate::metadata::volume_metadata(
            volume,
            false,
            &cluster.cluster_id,
        )],
        reclaim_policy: volume.reclaim_policy(),
    }
}

/// A record whose metadata equals the full projection of a bound volume with
/// one claim and no pods, i.e. exactly what a sweep would push.
pub fn record_with_projection(
    ctx: &SyncerContext<MockVolumeManager>,
    volume_name: &str,
    volume_handle: &str,
    namespace: &str,
    claim_name: &str,
) -> VolumeRecord {
    let volume = with_claim_ref(
        volume(volume_name, volume_handle, "Bound", "Delete"),
        namespace,
        claim_name,
    );
    let claim = claim(namespace, claim_name, "Bound", Some(volume_name), BTreeMap::new());
    let metadata =
        crate::metadata::project_metadata(&volume, Some(&claim), &[], &ctx.cluster.cluster_id);

    VolumeRecord {
        volume_handle: volume_handle.to_string(),
        name: volume_name.to_string(),
        volume_type: VolumeType::Block,
        cluster_id: ctx.cluster.cluster_id.clone(),
        clusters: vec![ctx.cluster.clone()],
        metadata,
        reclaim_policy: volume.reclaim_policy(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsCall {
    Query(Vec<String>),
    /// Volume name passed to `create_volume`.
    Create(String),
    /// Volume handle passed to `update_metadata`.
    Update(String),
    Delete {
        volume_handle: String,
        delete_disk: bool,
    },
}

/// In-memory SMS double. Records every call, keeps a live catalog so
/// idempotence and convergence can be asserted, and injects transient
/// failures on demand.
#[derive(Default)]
pub struct MockVolumeManager {
    pub records: Mutex<HashMap<String, VolumeRecord>>,
    pub calls: Mutex<Vec<SmsCall>>,
    pub creates: Mutex<Vec<CreateSpec>>,
    pub updates: Mutex<Vec<UpdateSpec>>,
    pub fail_mutations: AtomicBool,
    /// When set, the next query returns this instead of the catalog.
    pub query_response: Mutex<Option<QueryResult>>,
}

impl MockVolumeManager {
    pub fn insert_record(&self, record: VolumeRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.volume_handle.clone(), record);
    }

    pub fn calls(&self) -> Vec<SmsCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that mutate the catalog, i.e. everything but queries.
    pub fn mutation_calls(&self) -> Vec<SmsCall> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, SmsCall::Query(_)))
            .collect()
    }

    fn maybe_fail(&self) -> Result<(), SmsError> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            Err(SmsError::Transient("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VolumeManager for MockVolumeManager {
    async fn query(&self, filter: QueryFilter) -> Result<QueryResult, SmsError> {
        self.calls
            .lock()
            .unwrap()
            .push(SmsCall::Query(filter.volume_handles.clone()));

        if let Some(response) = self.query_response.lock().unwrap().take() {
            return Ok(response);
        }

        let records = self.records.lock().unwrap();
        let volumes = records
            .values()
            .filter(|record| {
                filter.volume_handles.is_empty()
                    || filter.volume_handles.contains(&record.volume_handle)
            })
            .filter(|record| {
                filter
                    .cluster_id
                    .as_deref()
                    .map_or(true, |cluster_id| record.cluster_id == cluster_id)
            })
            .cloned()
            .collect();

        Ok(QueryResult {
            volumes,
            next_offset: None,
        })
    }

    async fn create_volume(&self, spec: CreateSpec) -> Result<String, SmsError> {
        self.calls
            .lock()
            .unwrap()
            .push(SmsCall::Create(spec.name.clone()));
        self.maybe_fail()?;

        let volume_handle = match &spec.backing {
            BackingObject::BackingDiskId { disk_id } => disk_id.clone(),
            BackingObject::BackingFileId { file_id } => file_id.clone(),
        };

        let record = VolumeRecord {
            volume_handle: volume_handle.clone(),
            name: spec.name.clone(),
            volume_type: spec.volume_type,
            cluster_id: spec.container_cluster.cluster_id.clone(),
            clusters: vec![spec.container_cluster.clone()],
            metadata: spec.metadata.clone(),
            reclaim_policy: spec.reclaim_policy,
        };
        self.records
            .lock()
            .unwrap()
            .insert(volume_handle.clone(), record);
        self.creates.lock().unwrap().push(spec);

        Ok(volume_handle)
    }

    async fn update_metadata(&self, spec: UpdateSpec) -> Result<(), SmsError> {
        self.calls
            .lock()
            .unwrap()
            .push(SmsCall::Update(spec.volume_handle.clone()));
        self.maybe_fail()?;

        if let Some(record) = self.records.lock().unwrap().get_mut(&spec.volume_handle) {
            for entry in &spec.metadata {
                record
                    .metadata
                    .retain(|existing| existing.entity_key() != entry.entity_key());
                if !entry.delete {
                    record.metadata.push(entry.clone());
                }
            }
        }
        self.updates.lock().unwrap().push(spec);

        Ok(())
    }

    async fn delete_volume(&self, volume_handle: &str, delete_disk: bool) -> Result<(), SmsError> {
        self.calls.lock().unwrap().push(SmsCall::Delete {
            volume_handle: volume_handle.to_string(),
            delete_disk,
        });
        self.maybe_fail()?;

        self.records.lock().unwrap().remove(volume_handle);
        Ok(())
    }
}
