//! Periodic trigger for the full synchronizer.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use crate::full_sync::FullSyncEngine;
use crate::sms::VolumeManager;

pub struct FullSyncScheduler<M> {
    engine: FullSyncEngine<M>,
    period: Duration,
}

impl<M: VolumeManager> FullSyncScheduler<M> {
    pub fn new(engine: FullSyncEngine<M>, period: Duration) -> Self {
        FullSyncScheduler { engine, period }
    }

    /// Runs sweeps until `shutdown` flips. The first tick fires immediately;
    /// a tick that lands while the previous sweep is still running is
    /// dropped, never queued.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "full sync scheduled every {} seconds",
            self.period.as_secs()
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("full sync scheduler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.engine.run_sweep().await {
                        error!("full sync sweep failed: {:#}", error);
                    }
                }
            }
        }
    }
}
