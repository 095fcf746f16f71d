use std::time::Duration;

use clap::Parser;
use tracing::warn;

use crate::sms::ClusterFlavor;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_DRIVER_NAME: &str = "csi.storage.example.com";

/// Default and maximum accepted full sync interval, in minutes.
pub const DEFAULT_FULL_SYNC_INTERVAL_MINUTES: u64 = 30;
pub const MAX_FULL_SYNC_INTERVAL_MINUTES: u64 = 30;

/// Records fetched per query page while snapshotting the SMS.
pub const QUERY_PAGE_SIZE: u64 = 500;

#[derive(Parser, Debug, Clone)]
pub struct SyncerConfig {
    /// CSI driver name; volumes provisioned by other drivers are ignored
    #[arg(long, env = "DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
    pub driver_name: String,

    /// Identifier of this cluster in the storage management service
    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: String,

    /// User the storage management service attributes catalog changes to
    #[arg(long, env = "CLUSTER_USER", default_value = "metadata-syncer")]
    pub cluster_user: String,

    /// Flavor of the cluster this syncer serves
    #[arg(long, env = "CLUSTER_FLAVOR", value_enum, default_value = "vanilla")]
    pub cluster_flavor: ClusterFlavor,

    /// Minutes between full sync sweeps (1-30)
    #[arg(
        long,
        env = "FULL_SYNC_INTERVAL_MINUTES",
        default_value_t = DEFAULT_FULL_SYNC_INTERVAL_MINUTES
    )]
    pub full_sync_interval_minutes: u64,

    /// Base URL of the storage management service
    #[arg(long, env = "SMS_ENDPOINT")]
    pub sms_endpoint: String,
}

impl SyncerConfig {
    /// Effective full sync period. Zero or out-of-range values fall back to
    /// the default.
    pub fn full_sync_interval(&self) -> Duration {
        let minutes = self.full_sync_interval_minutes;
        let minutes = if minutes == 0 || minutes > MAX_FULL_SYNC_INTERVAL_MINUTES {
            warn!(
                "full sync interval of {} minutes is outside 1-{}, using the default of {}",
                minutes, MAX_FULL_SYNC_INTERVAL_MINUTES, DEFAULT_FULL_SYNC_INTERVAL_MINUTES
            );
            DEFAULT_FULL_SYNC_INTERVAL_MINUTES
        } else {
            minutes
        };

        Duration::from_secs(minutes * 60)
    }
}
