//! Builds every subsystem and runs them until shutdown.

use crate::adapters::{ChainClientAdapter, ChainDbAdapter};
use crate::container::GatewayConfig;
use anyhow::Context;
use gateway_telemetry::UNCAUGHT_EXCEPTIONS;
use gw_api_gateway::AppState;
use gw_block_importer::{BlockImporter, BlockImporterConfig};
use gw_chain_client::{ArweaveClient, BlobStore, ChainClientConfig};
use gw_chain_db::ChainDb;
use gw_data_source::{ChunkSource, TxChunksDataSource};
use gw_tx_ingest::{
    fetcher::DEFAULT_QUEUE_CAPACITY, new_tx_fetcher, RepairConfig, RepairWorker, TxImporter,
    TxSink, TxSource,
};
use shared_bus::{EventFilter, EventPublisher, EventTopic, GatewayEvent, InMemoryEventBus};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Run the gateway with the given configuration until a shutdown signal
/// or a fatal importer error.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let _metrics = gateway_telemetry::register_metrics()
        .map_err(|e| anyhow::anyhow!("metrics registration failed: {e}"))?;

    // Storage.
    let db = Arc::new(ChainDb::open(config.sqlite_path()).context("opening chain database")?);
    let block_store = BlobStore::new(config.block_store_dir());
    let tx_store = BlobStore::new(config.tx_store_dir());

    // Chain client.
    let client_config = ChainClientConfig {
        trusted_node_url: config.trusted_node_url.clone(),
        skip_cache: config.skip_cache,
        simulated_failure_rate: config.simulated_request_failure_rate,
        ..ChainClientConfig::default()
    };
    let client = ArweaveClient::new(client_config, block_store, tx_store)
        .map_err(|e| anyhow::anyhow!("building chain client: {e}"))?;

    let chain = Arc::new(ChainClientAdapter::new(client.clone()));
    let index = Arc::new(ChainDbAdapter::new(Arc::clone(&db)));
    let bus = Arc::new(InMemoryEventBus::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Peer refresher.
    let refresher = spawn_peer_refresher(client, shutdown_rx.clone());

    // Tx fetcher and its feed from block-tx-fetch-failed events.
    let (fetcher, fetch_worker) = new_tx_fetcher(
        Arc::clone(&chain) as Arc<dyn TxSource>,
        Arc::clone(&bus) as Arc<dyn EventPublisher>,
        DEFAULT_QUEUE_CAPACITY,
        shutdown_rx.clone(),
    );
    let fetch_handle = tokio::spawn(fetch_worker.run());

    let feed_handle = {
        let mut subscription = bus.subscribe(EventFilter::topic(EventTopic::BlockTxFetchFailed));
        let fetcher = fetcher.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    maybe = subscription.recv() => {
                        let Some(event) = maybe else { break };
                        if let GatewayEvent::BlockTxFetchFailed { tx_id, height } = event {
                            if let Err(e) = fetcher.queue_tx_id(tx_id) {
                                warn!(height, error = %e, "missing tx not queued");
                            }
                        }
                    }
                }
            }
        })
    };

    // Tx importer.
    let tx_importer = TxImporter::new(
        bus.subscribe(EventFilter::topic(EventTopic::TxFetched)),
        Arc::clone(&index) as Arc<dyn TxSink>,
        shutdown_rx.clone(),
    );
    let tx_import_handle = tokio::spawn(tx_importer.run());

    // Repair worker.
    let repair = RepairWorker::new(
        Arc::clone(&index) as Arc<dyn TxSink>,
        fetcher.clone(),
        RepairConfig::default(),
        shutdown_rx.clone(),
    );
    let repair_handle = tokio::spawn(repair.run());

    // Block importer.
    let importer_config = BlockImporterConfig {
        start_height: config.start_height,
        stop_height: config.stop_height,
        ..BlockImporterConfig::default()
    };
    let importer = BlockImporter::new(
        Arc::clone(&chain),
        Arc::clone(&index),
        Arc::clone(&bus) as Arc<dyn EventPublisher>,
        importer_config,
        shutdown_rx.clone(),
    );
    let mut import_handle = tokio::spawn(importer.run());

    // HTTP facade.
    let data_source = Arc::new(TxChunksDataSource::new(
        Arc::clone(&chain) as Arc<dyn ChunkSource>
    ));
    let http_state = AppState::new(Arc::clone(&db), data_source);
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let http_handle = tokio::spawn(gw_api_gateway::serve(
        http_addr,
        http_state,
        shutdown_rx.clone(),
    ));

    info!(
        start_height = config.start_height,
        trusted_node = %config.trusted_node_url,
        port = config.port,
        "gateway running"
    );

    // Run until a signal arrives or the importer finishes (clean stop
    // height, or fatal fork-depth overflow).
    let importer_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for shutdown signal")?;
            info!("shutdown signal received");
            None
        }
        joined = &mut import_handle => Some(joined),
    };

    shutdown_tx.send(true).ok();

    match importer_result {
        Some(joined) => report_importer(joined),
        None => report_importer(import_handle.await),
    }

    join_quietly("tx_fetcher", fetch_handle).await;
    join_quietly("tx_fetch_feed", feed_handle).await;
    join_quietly("tx_importer", tx_import_handle).await;
    join_quietly("repair", repair_handle).await;
    join_quietly("peer_refresher", refresher).await;
    match http_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "http server exited with error"),
        Err(e) => log_join_error("http", &e),
    }

    info!("gateway stopped");
    Ok(())
}

fn spawn_peer_refresher(
    client: ArweaveClient,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = client.config().peer_refresh_interval;
        loop {
            if let Err(e) = client.refresh_peers().await {
                warn!(error = %e, "peer refresh failed");
            }
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

fn report_importer(joined: Result<Result<(), gw_block_importer::ImportError>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "block importer aborted"),
        Err(e) => log_join_error("block_importer", &e),
    }
}

async fn join_quietly(name: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        log_join_error(name, &e);
    }
}

fn log_join_error(name: &str, e: &tokio::task::JoinError) {
    if e.is_panic() {
        UNCAUGHT_EXCEPTIONS.inc();
        error!(task = name, "task panicked");
    }
}
