// Periodic pool reserve sampling and constant-product imbalance detection
use crate::hub::BroadcastHub;
use crate::rpc::RpcClient;
use crate::storage::Storage;
use chainpulse_common::{ChainConfig, MetricsCollector, MonitorError, Opportunity, Result};
use chrono::Utc;
use ethers::types::U256;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// `getReserves()` on the standard V2 pair interface.
const GET_RESERVES_SELECTOR: &str = "0x0902f1ac";

pub struct PoolScanner {
    chain: ChainConfig,
    rpc: Arc<RpcClient>,
    storage: Arc<Storage>,
    hub: Arc<BroadcastHub>,
    metrics: Arc<MetricsCollector>,
    /// Chain tip observed by the block pipeline; opportunities are stamped
    /// with this height at detection.
    tip: Arc<AtomicU64>,
}

impl PoolScanner {
    pub fn new(
        chain: ChainConfig,
        rpc: Arc<RpcClient>,
        storage: Arc<Storage>,
        hub: Arc<BroadcastHub>,
        metrics: Arc<MetricsCollector>,
        tip: Arc<AtomicU64>,
    ) -> Self {
        Self {
            chain,
            rpc,
            storage,
            hub,
            metrics,
            tip,
        }
    }

    /// One scan tick per interval until shutdown. A failed pool read logs
    /// and moves on; the tick itself never aborts.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            chain = %self.chain.name,
            pools = self.chain.pools.len(),
            interval_secs = self.chain.scan_interval_seconds,
            "pool scanner started"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.chain.scan_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.scan_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(chain = %self.chain.name, "pool scanner stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn scan_once(&self) {
        for (label, address) in &self.chain.pools {
            match self.scan_pool(label, address).await {
                Ok(Some(mut opportunity)) => {
                    let small = opportunity.profit_usd >= self.chain.small_opportunity_min_usd
                        && opportunity.profit_usd <= self.chain.small_opportunity_max_usd;
                    self.metrics
                        .record_opportunity_detected(&self.chain.name, small);
                    info!(
                        chain = %self.chain.name,
                        pool = %label,
                        imbalance_pct = %opportunity.imbalance_pct,
                        profit_usd = %opportunity.profit_usd,
                        "imbalance opportunity detected"
                    );

                    if let Err(e) = self.storage.insert_opportunity(&mut opportunity).await {
                        error!(
                            chain = %self.chain.name,
                            pool = %label,
                            err = %e,
                            "failed to persist opportunity"
                        );
                        continue;
                    }
                    self.hub.publish_opportunity(&opportunity);
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_pool_scan_error(&self.chain.name, label);
                    warn!(
                        chain = %self.chain.name,
                        pool = %label,
                        err = %e,
                        "pool read failed, continuing"
                    );
                }
            }
        }
    }

    async fn scan_pool(&self, label: &str, address: &str) -> Result<Option<Opportunity>> {
        let data = self.rpc.eth_call(address, GET_RESERVES_SELECTOR).await?;
        let Some((reserve0, reserve1)) = decode_reserves(&data)? else {
            debug!(chain = %self.chain.name, pool = %label, "empty pool, skipped");
            return Ok(None);
        };

        let (imbalance_pct, profit_native) =
            evaluate_reserves(reserve0, reserve1, self.chain.fee_fraction)?;
        if imbalance_pct < self.chain.imbalance_threshold_pct {
            return Ok(None);
        }

        // token1 ~ USD heuristic: the native estimate doubles as the USD one
        Ok(Some(Opportunity {
            id: None,
            chain_id: self.chain.chain_id as i64,
            pool_label: label.to_string(),
            pool_address: address.to_string(),
            imbalance_pct,
            profit_usd: profit_native,
            profit_native,
            reserve0,
            reserve1,
            block_number: self.tip.load(Ordering::Relaxed) as i64,
            detected_at: Utc::now(),
            captured: false,
            captured_by: None,
            capture_tx_hash: None,
        }))
    }
}

/// Decode `(uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast)`.
/// `None` when either reserve is zero: an empty pool is skipped, not an
/// error.
pub fn decode_reserves(data: &[u8]) -> Result<Option<(Decimal, Decimal)>> {
    if data.len() < 96 {
        return Err(MonitorError::Decode(format!(
            "getReserves returned {} bytes, expected 96",
            data.len()
        )));
    }

    let reserve0 = U256::from_big_endian(&data[0..32]);
    let reserve1 = U256::from_big_endian(&data[32..64]);
    if reserve0.is_zero() || reserve1.is_zero() {
        return Ok(None);
    }

    let reserve0 = Decimal::from_str(&reserve0.to_string())
        .map_err(|_| MonitorError::Decode("reserve0 exceeds decimal range".into()))?;
    let reserve1 = Decimal::from_str(&reserve1.to_string())
        .map_err(|_| MonitorError::Decode("reserve1 exceeds decimal range".into()))?;
    Ok(Some((reserve0, reserve1)))
}

/// Constant-product imbalance: distance of the reserves from the balanced
/// `(sqrt k, sqrt k)` point, as a percentage, plus the fee-adjusted profit
/// heuristic over the thinner side.
pub fn evaluate_reserves(
    reserve0: Decimal,
    reserve1: Decimal,
    fee_fraction: Decimal,
) -> Result<(Decimal, Decimal)> {
    let k = reserve0
        .checked_mul(reserve1)
        .ok_or_else(|| MonitorError::Decode("reserve product exceeds decimal range".into()))?;
    let optimal = decimal_sqrt(k);
    if optimal <= Decimal::ZERO {
        return Err(MonitorError::Decode("degenerate reserve product".into()));
    }

    let deviation0 = (reserve0 - optimal).abs() / optimal;
    let deviation1 = (reserve1 - optimal).abs() / optimal;
    let imbalance_pct = deviation0.max(deviation1) * dec!(100);

    let margin = (imbalance_pct / dec!(100) - fee_fraction).max(Decimal::ZERO);
    let profit_native = margin * reserve0.min(reserve1);

    Ok((imbalance_pct, profit_native))
}

/// Decimal square root: f64 seed refined by Newton's method.
pub fn decimal_sqrt(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let seed = value
        .to_f64()
        .map(f64::sqrt)
        .and_then(Decimal::from_f64)
        .filter(|s| *s > Decimal::ZERO)
        .unwrap_or_else(|| value / dec!(2));

    let mut x = seed;
    for _ in 0..12 {
        let Some(quotient) = value.checked_div(x) else {
            return x;
        };
        let next = (x + quotient) / dec!(2);
        if (next - x).abs() < dec!(0.000001) {
            return next;
        }
        x = next;
    }

    x
}
