// Metrics collection for ChainPulse services
use metrics::{counter, gauge, histogram};
use std::time::Instant;

pub struct MetricsCollector {
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    // RPC connector metrics
    pub fn record_rpc_request(&self, chain: &str, endpoint: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("rpc_requests_total",
            "chain" => chain.to_string(),
            "endpoint" => endpoint.to_string(),
            "status" => status.to_string())
        .increment(1);
    }

    pub fn record_rpc_latency(&self, latency_ms: f64, chain: &str, method: &str) {
        histogram!("rpc_request_latency_ms",
            "chain" => chain.to_string(),
            "method" => method.to_string())
        .record(latency_ms);
    }

    pub fn record_circuit_state(&self, chain: &str, endpoint: &str, state: &str) {
        let value = match state {
            "closed" => 0.0,
            "half-open" => 1.0,
            _ => 2.0,
        };
        gauge!("rpc_endpoint_circuit_state",
            "chain" => chain.to_string(),
            "endpoint" => endpoint.to_string())
        .set(value);
    }

    pub fn record_failover(&self, chain: &str, endpoint: &str) {
        counter!("rpc_failovers_total",
            "chain" => chain.to_string(),
            "endpoint" => endpoint.to_string())
        .increment(1);
    }

    // Chain pipeline metrics
    pub fn record_blocks_behind(&self, chain: &str, behind: u64) {
        gauge!("blocks_behind", "chain" => chain.to_string()).set(behind as f64);
    }

    pub fn record_block_processed(&self, chain: &str) {
        counter!("blocks_processed_total", "chain" => chain.to_string()).increment(1);
    }

    pub fn record_transaction_detected(&self, chain: &str, strategy: &str) {
        counter!("arbitrage_transactions_total",
            "chain" => chain.to_string(),
            "strategy" => strategy.to_string())
        .increment(1);
    }

    pub fn record_opportunity_detected(&self, chain: &str, small: bool) {
        let band = if small { "small" } else { "regular" };
        counter!("opportunities_detected_total",
            "chain" => chain.to_string(),
            "band" => band.to_string())
        .increment(1);
    }

    pub fn record_pool_scan_error(&self, chain: &str, pool: &str) {
        counter!("pool_scan_errors_total",
            "chain" => chain.to_string(),
            "pool" => pool.to_string())
        .increment(1);
    }

    // Persistence metrics
    pub fn record_db_operation(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("db_operations_total",
            "operation" => operation.to_string(),
            "status" => status.to_string())
        .increment(1);
    }

    pub fn record_db_latency(&self, latency_ms: f64, operation: &str) {
        histogram!("db_operation_latency_ms", "operation" => operation.to_string())
            .record(latency_ms);
    }

    // Broadcast hub metrics
    pub fn record_hub_delivered(&self, channel: &str) {
        counter!("hub_messages_delivered_total", "channel" => channel.to_string()).increment(1);
    }

    pub fn record_hub_dropped(&self, channel: &str) {
        counter!("hub_messages_dropped_total", "channel" => channel.to_string()).increment(1);
    }

    pub fn record_hub_subscribers(&self, count: usize) {
        gauge!("hub_subscribers").set(count as f64);
    }

    pub fn record_hub_rejected(&self) {
        counter!("hub_subscribers_rejected_total").increment(1);
    }

    pub fn record_uptime(&self) {
        let uptime_seconds = self.start_time.elapsed().as_secs() as f64;
        gauge!("uptime_seconds").set(uptime_seconds);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
