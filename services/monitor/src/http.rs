// HTTP surface: websocket upgrade, health, Prometheus metrics
use crate::hub::BroadcastHub;
use crate::rpc::RpcClient;
use crate::ws;
use axum::{extract::State, routing::get, Json, Router};
use chainpulse_common::MetricsCollector;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Live handles into one chain's pipeline, surfaced by `/health`.
#[derive(Clone)]
pub struct ChainHandle {
    pub name: String,
    pub chain_id: u64,
    pub rpc: Arc<RpcClient>,
    pub synced: Arc<AtomicU64>,
    pub tip: Arc<AtomicU64>,
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub chains: Vec<ChainHandle>,
    pub prometheus: PrometheusHandle,
    pub metrics: Arc<MetricsCollector>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/ws", get(ws::websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.record_uptime();

    let chains: Vec<serde_json::Value> = state
        .chains
        .iter()
        .map(|chain| {
            let synced = chain.synced.load(Ordering::Relaxed);
            let tip = chain.tip.load(Ordering::Relaxed);
            json!({
                "name": chain.name,
                "chain_id": chain.chain_id,
                "synced": synced,
                "tip": tip,
                "blocks_behind": tip.saturating_sub(synced),
                "endpoints": chain.rpc.endpoint_statuses(),
            })
        })
        .collect();

    Json(json!({
        "status": "healthy",
        "subscribers": state.hub.subscriber_count(),
        "chains": chains,
    }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> String {
    state.prometheus.render()
}
