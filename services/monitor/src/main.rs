// ChainPulse monitor entry point: spawn per-chain pipelines, the hourly
// aggregator, and the streaming API, then wait for shutdown
use chainpulse_common::{Config, MetricsCollector};
use chainpulse_monitor::http::{self, AppState, ChainHandle};
use chainpulse_monitor::stats::ChainAggregation;
use chainpulse_monitor::{
    BroadcastHub, ChainMonitor, NativePrice, PoolScanner, RpcClient, RpcSettings,
    StatsAggregator, Storage,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chainpulse_monitor=info,tower_http=warn".into()),
        )
        .init();

    info!("🚀 Starting ChainPulse monitor v0.1.0");

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("installing metrics recorder: {}", e))?;

    let config = Config::load()?;
    let metrics = Arc::new(MetricsCollector::new());

    // an unreachable store or broken schema at startup is fatal; the
    // orchestrator restarts us
    let storage = Arc::new(Storage::connect(&config.database, metrics.clone()).await?);
    storage.bootstrap().await?;

    let hub = Arc::new(BroadcastHub::new(
        config.hub.max_subscribers,
        config.hub.mailbox_capacity,
        Duration::from_secs(config.hub.heartbeat_secs),
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    let mut chain_handles = Vec::new();

    for chain in &config.chains {
        info!(
            chain = %chain.name,
            chain_id = chain.chain_id,
            routers = chain.dex_routers.len(),
            pools = chain.pools.len(),
            "starting chain pipelines"
        );

        let rpc = Arc::new(RpcClient::new(
            chain.name.clone(),
            chain.rpc_endpoints.clone(),
            RpcSettings::default(),
            metrics.clone(),
        )?);
        let price = NativePrice::new(chain.native_token_usd_price);

        let monitor = Arc::new(ChainMonitor::new(
            chain.clone(),
            rpc.clone(),
            storage.clone(),
            hub.clone(),
            price.clone(),
            metrics.clone(),
        )?);
        let scanner = PoolScanner::new(
            chain.clone(),
            rpc.clone(),
            storage.clone(),
            hub.clone(),
            metrics.clone(),
            monitor.tip_handle(),
        );

        chain_handles.push(ChainHandle {
            name: chain.name.clone(),
            chain_id: chain.chain_id,
            rpc: rpc.clone(),
            synced: monitor.synced_handle(),
            tip: monitor.tip_handle(),
        });

        tasks.push(tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { monitor.run(shutdown).await }
        }));
        tasks.push(tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { scanner.run(shutdown).await }
        }));
    }

    let aggregator = StatsAggregator::new(
        storage.clone(),
        config.chains.iter().map(ChainAggregation::from).collect(),
        config.aggregator.offset_minutes,
    );
    tasks.push(tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { aggregator.run(shutdown).await }
    }));

    tasks.push(tokio::spawn({
        let hub = hub.clone();
        let shutdown = shutdown_rx.clone();
        async move { hub.run_heartbeat(shutdown).await }
    }));

    let state = AppState {
        hub: hub.clone(),
        chains: chain_handles,
        prometheus,
        metrics: metrics.clone(),
    };
    let app = http::router(state);
    let bind_addr = format!("{}:{}", config.server.host, config.server.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("🌐 API listening on {} (/ws /health /metrics)", bind_addr);

    let server = tokio::spawn({
        let mut shutdown = shutdown_rx.clone();
        async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await;
            if let Err(e) = result {
                warn!(err = %e, "API server exited with error");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // each loop finishes its current unit; cap the drain at the 5s target
    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
        let _ = server.await;
    };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        warn!("shutdown grace elapsed with tasks outstanding");
    }

    info!("ChainPulse monitor stopped");
    Ok(())
}
