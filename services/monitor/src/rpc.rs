// JSON-RPC chain connector with endpoint failover and circuit breaking
use chainpulse_common::{EndpointBreaker, MetricsCollector, MonitorError, Result};
use ethers::types::{Block, Bytes, Transaction, TransactionReceipt, H256};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub attempts_per_endpoint: u32,
    pub initial_backoff: Duration,
    pub request_timeout: Duration,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            attempts_per_endpoint: 3,
            initial_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(60),
        }
    }
}

/// Point-in-time health of one endpoint, for the health surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EndpointStatus {
    pub url: String,
    pub circuit_state: String,
    pub consecutive_failures: u32,
}

struct Endpoint {
    url: String,
    breaker: EndpointBreaker,
}

/// Read-only JSON-RPC client over an ordered endpoint list.
///
/// Every call walks the endpoints in order, skipping any whose breaker is
/// open, and retries each admitted endpoint with exponential backoff before
/// failing over. The connector never aborts the process; exhaustion surfaces
/// as `AllEndpointsUnavailable`.
pub struct RpcClient {
    chain: String,
    client: reqwest::Client,
    endpoints: Vec<Endpoint>,
    settings: RpcSettings,
    metrics: Arc<MetricsCollector>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(
        chain: impl Into<String>,
        endpoint_urls: Vec<String>,
        settings: RpcSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let chain = chain.into();
        if endpoint_urls.is_empty() {
            return Err(MonitorError::Config(format!(
                "chain {} has no RPC endpoints",
                chain
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        let endpoints = endpoint_urls
            .into_iter()
            .map(|url| Endpoint {
                url,
                breaker: EndpointBreaker::new(settings.breaker_threshold, settings.breaker_cooldown),
            })
            .collect();

        Ok(Self {
            chain,
            client,
            endpoints,
            settings,
            metrics,
            next_id: AtomicU64::new(1),
        })
    }

    pub async fn latest_height(&self) -> Result<u64> {
        let value = self.request("eth_blockNumber", json!([])).await?;
        let hex = value
            .as_str()
            .ok_or_else(|| MonitorError::Decode("eth_blockNumber: non-string result".into()))?;
        parse_hex_u64(hex)
    }

    /// Fetch a block with full transaction objects. `None` means the node has
    /// not seen the height yet.
    pub async fn block_with_txs(&self, height: u64) -> Result<Option<Block<Transaction>>> {
        let params = json!([format!("{:#x}", height), true]);
        let value = self.request("eth_getBlockByNumber", params).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| MonitorError::Decode(format!("block {}: {}", height, e)))
    }

    pub async fn receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        let value = self
            .request("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| MonitorError::Decode(format!("receipt {:#x}: {}", tx_hash, e)))
    }

    /// `eth_call` against `to` with pre-encoded calldata, at the latest block.
    pub async fn eth_call(&self, to: &str, data: &str) -> Result<Bytes> {
        let params = json!([{ "to": to, "data": data }, "latest"]);
        let value = self.request("eth_call", params).await?;
        let hex = value
            .as_str()
            .ok_or_else(|| MonitorError::Decode("eth_call: non-string result".into()))?;
        hex.parse::<Bytes>()
            .map_err(|e| MonitorError::Decode(format!("eth_call result: {}", e)))
    }

    pub fn endpoint_statuses(&self) -> Vec<EndpointStatus> {
        self.endpoints
            .iter()
            .map(|e| EndpointStatus {
                url: e.url.clone(),
                circuit_state: e.breaker.state().as_str().to_string(),
                consecutive_failures: e.breaker.consecutive_failures(),
            })
            .collect()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        for endpoint in &self.endpoints {
            if !endpoint.breaker.try_acquire() {
                debug!(
                    chain = %self.chain,
                    endpoint = %endpoint.url,
                    "circuit open, skipping endpoint"
                );
                continue;
            }

            match self.attempt_endpoint(endpoint, method, &params).await {
                Ok(value) => {
                    endpoint.breaker.record_success();
                    self.metrics
                        .record_circuit_state(&self.chain, &endpoint.url, "closed");
                    return Ok(value);
                }
                // A well-formed JSON-RPC error or a decodable-but-wrong body
                // means the endpoint itself is alive; surface it to the
                // caller instead of failing over.
                Err(e @ (MonitorError::Rpc { .. } | MonitorError::Decode(_))) => {
                    endpoint.breaker.record_success();
                    return Err(e);
                }
                Err(e) => {
                    endpoint.breaker.record_failure();
                    self.metrics.record_failover(&self.chain, &endpoint.url);
                    self.metrics.record_circuit_state(
                        &self.chain,
                        &endpoint.url,
                        endpoint.breaker.state().as_str(),
                    );
                    warn!(
                        chain = %self.chain,
                        endpoint = %endpoint.url,
                        err = %e,
                        "endpoint exhausted, failing over"
                    );
                }
            }
        }

        Err(MonitorError::AllEndpointsUnavailable {
            chain: self.chain.clone(),
        })
    }

    /// Up to `attempts_per_endpoint` tries with exponential backoff and
    /// jitter. Transport failures, 5xx responses, and elapsed deadlines all
    /// consume an attempt.
    async fn attempt_endpoint(
        &self,
        endpoint: &Endpoint,
        method: &str,
        params: &Value,
    ) -> Result<Value> {
        let mut delay = self.settings.initial_backoff;
        let mut last_error = MonitorError::Timeout(self.settings.request_timeout);

        for attempt in 1..=self.settings.attempts_per_endpoint {
            let started = Instant::now();
            let result = self.call_once(&endpoint.url, method, params).await;
            self.metrics.record_rpc_latency(
                started.elapsed().as_secs_f64() * 1000.0,
                &self.chain,
                method,
            );
            self.metrics
                .record_rpc_request(&self.chain, &endpoint.url, result.is_ok());

            match result {
                Ok(value) => return Ok(value),
                Err(e @ (MonitorError::Rpc { .. } | MonitorError::Decode(_))) => return Err(e),
                Err(e) => {
                    warn!(
                        chain = %self.chain,
                        endpoint = %endpoint.url,
                        method,
                        attempt,
                        err = %e,
                        "RPC attempt failed"
                    );
                    last_error = e;
                    if attempt < self.settings.attempts_per_endpoint {
                        tokio::time::sleep(with_jitter(delay)).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn call_once(&self, url: &str, method: &str, params: &Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let fut = async {
            let response = self
                .client
                .post(url)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;

            let envelope: Value = response.json().await?;

            if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
                return Err(MonitorError::Rpc {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                });
            }

            envelope
                .get("result")
                .cloned()
                .ok_or_else(|| MonitorError::Decode(format!("{}: missing result", method)))
        };

        match tokio::time::timeout(self.settings.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::Timeout(self.settings.request_timeout)),
        }
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

fn parse_hex_u64(hex: &str) -> Result<u64> {
    let stripped = hex.strip_prefix("0x").unwrap_or(hex);
    u64::from_str_radix(stripped, 16)
        .map_err(|e| MonitorError::Decode(format!("hex quantity {}: {}", hex, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpulse_common::BreakerState;

    fn test_settings() -> RpcSettings {
        RpcSettings {
            attempts_per_endpoint: 2,
            initial_backoff: Duration::from_millis(1),
            request_timeout: Duration::from_secs(2),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_millis(100),
        }
    }

    fn client_for(urls: Vec<String>, settings: RpcSettings) -> RpcClient {
        RpcClient::new(
            "testchain",
            urls,
            settings,
            Arc::new(MetricsCollector::new()),
        )
        .unwrap()
    }

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[tokio::test]
    async fn fails_over_to_the_next_endpoint() {
        let mut bad = mockito::Server::new_async().await;
        let mut good = mockito::Server::new_async().await;

        let bad_mock = bad
            .mock("POST", "/")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;
        let good_mock = good
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x2a"}"#)
            .create_async()
            .await;

        let client = client_for(vec![bad.url(), good.url()], test_settings());
        let height = client.latest_height().await.unwrap();

        assert_eq!(height, 42);
        bad_mock.assert_async().await;
        good_mock.assert_async().await;

        let statuses = client.endpoint_statuses();
        assert_eq!(statuses[0].consecutive_failures, 1);
        assert_eq!(statuses[1].circuit_state, "closed");
    }

    #[tokio::test]
    async fn open_breaker_skips_endpoint_without_io() {
        let mut bad = mockito::Server::new_async().await;
        let mut good = mockito::Server::new_async().await;

        let mut settings = test_settings();
        settings.attempts_per_endpoint = 1;
        settings.breaker_threshold = 1;
        settings.breaker_cooldown = Duration::from_secs(60);

        // exactly one request reaches the failing endpoint; once its breaker
        // opens, subsequent calls go straight to the healthy one
        let bad_mock = bad
            .mock("POST", "/")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let good_mock = good
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#)
            .expect(2)
            .create_async()
            .await;

        let client = client_for(vec![bad.url(), good.url()], settings);

        assert_eq!(client.latest_height().await.unwrap(), 1);
        assert_eq!(
            client.endpoint_statuses()[0].circuit_state,
            BreakerState::Open.as_str()
        );

        assert_eq!(client.latest_height().await.unwrap(), 1);

        bad_mock.assert_async().await;
        good_mock.assert_async().await;
    }

    #[tokio::test]
    async fn rpc_error_is_returned_without_failover() {
        let mut first = mockito::Server::new_async().await;
        let mut second = mockito::Server::new_async().await;

        let first_mock = first
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#)
            .expect(1)
            .create_async()
            .await;
        let second_mock = second
            .mock("POST", "/")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let client = client_for(vec![first.url(), second.url()], test_settings());
        let err = client.latest_height().await.unwrap_err();

        match err {
            MonitorError::Rpc { code, .. } => assert_eq!(code, -32000),
            other => panic!("expected Rpc error, got {}", other),
        }
        first_mock.assert_async().await;
        second_mock.assert_async().await;

        // a protocol-level reply is not an endpoint failure
        assert_eq!(client.endpoint_statuses()[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn all_endpoints_down_surfaces_unavailable() {
        let mut bad = mockito::Server::new_async().await;
        let _mock = bad
            .mock("POST", "/")
            .with_status(503)
            .create_async()
            .await;

        let client = client_for(vec![bad.url()], test_settings());
        let err = client.latest_height().await.unwrap_err();
        assert!(matches!(err, MonitorError::AllEndpointsUnavailable { .. }));
    }
}
