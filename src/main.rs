use build_time::build_time_local;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use kube::api::ListParams;
use kube::{Api, Client, Config, ResourceExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cache::object_key;
use crate::config::SyncerConfig;
use crate::context::SyncerContext;
use crate::full_sync::FullSyncEngine;
use crate::scheduler::FullSyncScheduler;
use crate::sms::http::HttpVolumeManager;
use crate::watch::ResourceWatcher;

pub mod cache;
pub mod config;
pub mod context;
pub mod ext;
pub mod full_sync;
pub mod metadata;
pub mod reconciler;
pub mod scheduler;
pub mod sms;
pub mod watch;

#[cfg(test)]
pub mod fixtures;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: SyncerConfig,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single full sync sweep and exit
    FullSync,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(
        "running csi-metadata-syncer v{} built at {}",
        config::VERSION,
        build_time_local!()
    );

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .or_else(|_| {
            Client::try_from(
                Config::incluster_env().expect("Failed to load in-cluster Kube config"),
            )
        })
        .expect("Failed to create Kube client");

    let volume_manager = HttpVolumeManager::new(&cli.config.sms_endpoint)?;
    let ctx = SyncerContext::new(cli.config.clone(), volume_manager);

    match &cli.command {
        Some(Command::FullSync) => {
            prime_caches(client, &ctx).await?;
            let summary = FullSyncEngine::new(ctx).run_sweep().await?;
            info!(
                "full sync finished: created={} updated={} deleted={} deferred={}",
                summary.created, summary.updated, summary.deleted, summary.deferred
            );
            Ok(())
        }
        None => run_syncer(client, ctx).await,
    }
}

async fn run_syncer(
    client: Client,
    ctx: std::sync::Arc<SyncerContext<HttpVolumeManager>>,
) -> Result<()> {
    prime_caches(client.clone(), &ctx).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let resource_watcher = ResourceWatcher::new(ctx.clone());
    let watcher_shutdown = shutdown_rx.clone();
    let watch_task = tokio::spawn(async move {
        resource_watcher.run(client, watcher_shutdown).await;
    });

    let scheduler = FullSyncScheduler::new(
        FullSyncEngine::new(ctx.clone()),
        ctx.config.full_sync_interval(),
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(watch_task, scheduler_task);
    Ok(())
}

/// Seeds the caches with a one-shot list, so the first sweep and the first
/// events start from the real cluster state instead of an empty mirror.
async fn prime_caches<M>(client: Client, ctx: &SyncerContext<M>) -> Result<()> {
    let volumes = Api::<PersistentVolume>::all(client.clone())
        .list(&ListParams::default())
        .await?;
    ctx.caches.volumes.replace_all(
        volumes
            .items
            .into_iter()
            .map(|volume| (volume.name_any(), volume)),
    );

    let claims = Api::<PersistentVolumeClaim>::all(client.clone())
        .list(&ListParams::default())
        .await?;
    ctx.caches.claims.replace_all(claims.items.into_iter().map(|claim| {
        (
            object_key(&claim.namespace().unwrap_or_default(), &claim.name_any()),
            claim,
        )
    }));

    let pods = Api::<Pod>::all(client)
        .list(&ListParams::default())
        .await?;
    ctx.caches.pods.replace_all(pods.items.into_iter().map(|pod| {
        (
            object_key(&pod.namespace().unwrap_or_default(), &pod.name_any()),
            pod,
        )
    }));

    Ok(())
}
