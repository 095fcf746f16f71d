//! Types and client interface for the storage management service (SMS).
//!
//! The SMS keeps a catalog of volumes and the container entities attached to
//! them. The syncer only ever talks to it through the [`VolumeManager`]
//! trait, so the transport can be swapped out per cluster flavor.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;

/// Errors surfaced by [`VolumeManager`] implementations.
#[derive(Debug, Error)]
pub enum SmsError {
    /// The service could not be reached or failed on its side. Safe to retry.
    #[error("storage management service unreachable: {0}")]
    Transient(String),

    /// The service understood the request and refused it.
    #[error("storage management service rejected the request: {0}")]
    Rejected(String),
}

/// Flavor of the cluster this syncer serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClusterFlavor {
    Vanilla,
    Supervisor,
    Guest,
}

/// Identity of this cluster, carried in every SMS payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerCluster {
    pub cluster_id: String,
    pub cluster_flavor: ClusterFlavor,
    pub user: String,
}

/// Kind of container entity an [`EntityMetadata`] element describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Claim,
    Volume,
    Pod,
}

/// Reference from one entity to another, e.g. from a claim to its volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityReference {
    pub kind: EntityKind,
    pub name: String,
    /// Empty for cluster-scoped entities.
    pub namespace: String,
    pub cluster_id: String,
}

/// One entity's participation in a volume, as recorded in the SMS catalog.
///
/// The catalog keys entries by `(kind, name, namespace)`; an entry with
/// `delete` set removes whatever is stored under that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetadata {
    pub kind: EntityKind,
    pub name: String,
    /// Empty for cluster-scoped entities.
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub delete: bool,
    pub cluster_id: String,
    pub references: Vec<EntityReference>,
}

impl EntityMetadata {
    /// Identity under which the SMS keys metadata entries.
    pub fn entity_key(&self) -> (EntityKind, &str, &str) {
        (self.kind, self.name.as_str(), self.namespace.as_str())
    }
}

/// Whether a volume is backed by a block disk or a shared file target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeType {
    Block,
    File,
}

/// Reclaim behavior the orchestrator declared for a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    Delete,
    Retain,
}

/// Backing object detail attached to a [`CreateSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum BackingObject {
    BackingDiskId { disk_id: String },
    BackingFileId { file_id: String },
}

/// Payload registering a volume with the SMS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSpec {
    pub name: String,
    pub volume_type: VolumeType,
    pub container_cluster: ContainerCluster,
    pub metadata: Vec<EntityMetadata>,
    pub backing: BackingObject,
    /// Recorded so orphan cleanup can later decide whether the backing disk
    /// goes away with the catalog entry.
    pub reclaim_policy: Option<ReclaimPolicy>,
}

/// Partial metadata update for one volume. Entries replace whatever the
/// catalog holds under the same entity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSpec {
    pub volume_handle: String,
    pub container_cluster: ContainerCluster,
    pub metadata: Vec<EntityMetadata>,
}

/// The SMS's projection of one volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRecord {
    pub volume_handle: String,
    pub name: String,
    pub volume_type: VolumeType,
    pub cluster_id: String,
    pub clusters: Vec<ContainerCluster>,
    pub metadata: Vec<EntityMetadata>,
    pub reclaim_policy: Option<ReclaimPolicy>,
}

/// Server-side filter for [`VolumeManager::query`]. A `limit` of zero leaves
/// the page size to the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    pub volume_handles: Vec<String>,
    pub cluster_id: Option<String>,
    pub offset: u64,
    pub limit: u64,
}

impl QueryFilter {
    /// Filter matching a single volume handle.
    pub fn by_handle(volume_handle: &str) -> Self {
        QueryFilter {
            volume_handles: vec![volume_handle.to_owned()],
            ..QueryFilter::default()
        }
    }

    /// One page of the records belonging to a cluster.
    pub fn for_cluster(cluster_id: &str, offset: u64, limit: u64) -> Self {
        QueryFilter {
            volume_handles: Vec::new(),
            cluster_id: Some(cluster_id.to_owned()),
            offset,
            limit,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub volumes: Vec<VolumeRecord>,
    /// Offset of the next page, when more records match the filter.
    pub next_offset: Option<u64>,
}

/// Client interface to the SMS volume catalog.
///
/// Queries for unknown handles return an empty page, not an error. Creates
/// are idempotent on `(name, backing id)` and updates replace per-entity
/// entries, so retrying after a transient failure is always safe.
#[async_trait]
pub trait VolumeManager: Send + Sync {
    async fn query(&self, filter: QueryFilter) -> Result<QueryResult, SmsError>;

    async fn create_volume(&self, spec: CreateSpec) -> Result<String, SmsError>;

    async fn update_metadata(&self, spec: UpdateSpec) -> Result<(), SmsError>;

    /// Removes a catalog entry. `delete_disk` additionally destroys the
    /// backing disk; with it unset the disk survives for manual cleanup.
    async fn delete_volume(&self, volume_handle: &str, delete_disk: bool) -> Result<(), SmsError>;
}
