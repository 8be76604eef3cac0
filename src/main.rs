//! nxgate - Entry point.
//!
//! This binary takes over an already-open TUN descriptor, answers DNS
//! queries for blocked domains with NXDOMAIN, and forwards everything else
//! to a DNS-over-HTTPS resolver. Filter lists are refreshed in the
//! background on a timer and on SIGHUP.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use nxgate::blocklist::{
    BlocklistManager, BlocklistSource, ListCache, RefreshTrigger, RemoteLoader,
    spawn_refresh_task,
};
use nxgate::config::Config;
use nxgate::dns::{DohResolver, DomainMatcher};
use nxgate::server::{LoopOptions, QueryHandler, run_packet_loop};
use nxgate::shutdown;
use nxgate::stats::{QueryHistory, spawn_query_logger};
use nxgate::store::{MemoryAllowStore, MemorySourceStore};

/// Interval between query summaries in the log.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Forward SIGHUP to the refresh task.
fn spawn_reload_listener(
    trigger: RefreshTrigger,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown::requested(&mut shutdown_rx) => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    if trigger.trigger() {
                        info!("SIGHUP received, refreshing filter lists");
                    } else {
                        debug!("SIGHUP received, refresh already pending");
                    }
                }
            }
        }
    }))
}

/// Wait for Ctrl-C or the end of the packet loop, then stop every task.
async fn wait_for_shutdown(
    shutdown_tx: watch::Sender<bool>,
    mut loop_handle: JoinHandle<nxgate::Result<nxgate::server::LoopStats>>,
    background: Vec<JoinHandle<()>>,
) -> Result<()> {
    let loop_result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down...");
            let _ = shutdown_tx.send(true);
            loop_handle.await
        }
        result = &mut loop_handle => {
            let _ = shutdown_tx.send(true);
            result
        }
    };

    for handle in background {
        if let Err(err) = handle.await {
            warn!(error = %err, "background task failed");
        }
    }

    match loop_result.context("Packet loop task failed")? {
        Ok(stats) => {
            info!(
                packets = stats.packets_read,
                blocked = stats.blocked,
                forwarded = stats.forwarded,
                written = stats.packets_written,
                "Shutdown complete."
            );
            Ok(())
        }
        Err(err) => Err(err).context("Packet loop failed"),
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed("config.toml"));
    let config = Config::load(config_path.as_ref()).context("Failed to load configuration")?;

    // Initialize metrics (must be done early, before any metrics are recorded)
    nxgate::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    info!("Starting nxgate DNS filter...");
    info!("Upstream resolver: {}", config.upstream_url);
    info!("Allowlist entries: {}", config.allowlist.len());
    info!(
        "Blocklist sources configured: {}",
        config.blocklist_sources.len()
    );

    let Some(fd) = config.tunnel.fd else {
        bail!("No tunnel descriptor configured (tunnel.fd)");
    };

    // Storage collaborators seeded from the configuration
    let sources = MemorySourceStore::with_sources(
        config
            .blocklist_sources
            .iter()
            .map(BlocklistSource::from),
    );
    let allowlist = MemoryAllowStore::with_domains(&config.allowlist);

    let cache_dir = config.blocklist_cache_dir();
    info!("Filter list cache: {}", cache_dir.display());

    let matcher = Arc::new(DomainMatcher::new());
    let fetcher =
        RemoteLoader::new(config.fetch_timeout()).context("Failed to create list fetcher")?;
    let manager = Arc::new(
        BlocklistManager::new(
            Arc::clone(&matcher),
            sources,
            allowlist,
            fetcher,
            ListCache::new(cache_dir),
        )
        .with_concurrent_downloads(config.concurrent_downloads),
    );
    manager
        .initialize()
        .await
        .context("Failed to initialize blocklist manager")?;
    info!(
        "Blocklist manager initialized with {} blocked domains",
        matcher.blocked_len()
    );

    for source in manager.sources().await? {
        debug!(
            name = %source.name,
            enabled = source.enabled,
            domains = source.domain_count,
            "blocklist source"
        );
    }

    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    // Background tasks
    let (trigger, refresh_handle) = spawn_refresh_task(
        Arc::clone(&manager),
        config.refresh_interval(),
        shutdown_rx.clone(),
    );
    let reload_handle = spawn_reload_listener(trigger, shutdown_rx.clone())?;

    let history = Arc::new(Mutex::new(QueryHistory::new(config.history_capacity)));
    let (query_logger, logger_handle) = spawn_query_logger(
        history,
        config.channel_capacity,
        SUMMARY_INTERVAL,
        shutdown_rx.clone(),
    );

    // Packet path
    let resolver = DohResolver::new(&config.upstream_url, config.upstream_timeout())
        .context("Failed to create upstream resolver")?;
    let handler = QueryHandler::new(matcher, resolver, query_logger);

    // SAFETY: the platform layer hands the descriptor over to this process
    // and does not use it afterwards.
    let (reader, writer) =
        unsafe { nxgate::network::open_fd(fd) }.context("Failed to open tunnel descriptor")?;
    info!(fd, mtu = config.tunnel.mtu, "Tunnel attached");

    let options = LoopOptions {
        mtu: config.tunnel.mtu,
        max_inflight: config.max_inflight_queries,
        channel_capacity: config.channel_capacity,
    };
    let loop_handle = tokio::spawn(run_packet_loop(
        reader,
        writer,
        handler,
        options,
        shutdown_rx,
    ));

    wait_for_shutdown(
        shutdown_tx,
        loop_handle,
        vec![refresh_handle, reload_handle, logger_handle],
    )
    .await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    run().await
}
