// Per-chain block pipeline: poll heights, filter router traffic, classify,
// reconstruct profit, persist, broadcast
use crate::analyzer::{address_to_string, SwapEvent, TxAnalyzer};
use crate::hub::BroadcastHub;
use crate::price::NativePrice;
use crate::profit::{ProfitBreakdown, ProfitCalculator};
use crate::rpc::RpcClient;
use crate::storage::Storage;
use crate::tracker::ArbitrageurTracker;
use chainpulse_common::{
    ArbitrageTransaction, ChainConfig, MetricsCollector, MonitorError, Result, Strategy,
};
use chrono::{DateTime, TimeZone, Utc};
use ethers::types::{Transaction, U256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ChainMonitor {
    chain: ChainConfig,
    rpc: Arc<RpcClient>,
    analyzer: TxAnalyzer,
    storage: Arc<Storage>,
    tracker: ArbitrageurTracker,
    hub: Arc<BroadcastHub>,
    price: NativePrice,
    metrics: Arc<MetricsCollector>,
    synced: Arc<AtomicU64>,
    tip: Arc<AtomicU64>,
}

impl ChainMonitor {
    pub fn new(
        chain: ChainConfig,
        rpc: Arc<RpcClient>,
        storage: Arc<Storage>,
        hub: Arc<BroadcastHub>,
        price: NativePrice,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let analyzer = TxAnalyzer::new(chain.dex_routers.values(), &chain.swap_selectors)?;
        let tracker = ArbitrageurTracker::new(storage.clone());

        Ok(Self {
            chain,
            rpc,
            analyzer,
            storage,
            tracker,
            hub,
            price,
            metrics,
            synced: Arc::new(AtomicU64::new(0)),
            tip: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Shared height gauges for the health surface and the pool scanner.
    pub fn synced_handle(&self) -> Arc<AtomicU64> {
        self.synced.clone()
    }

    pub fn tip_handle(&self) -> Arc<AtomicU64> {
        self.tip.clone()
    }

    /// Poll loop: strictly ascending block heights, one chain per monitor.
    /// `synced` only advances past a block that processed cleanly, so the
    /// next tick retries the first unprocessed height.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let Some(mut synced) = self.initial_height(&mut shutdown).await else {
            return;
        };
        self.synced.store(synced, Ordering::Relaxed);
        self.tip.store(synced, Ordering::Relaxed);
        info!(chain = %self.chain.name, height = synced, "chain monitor synced");

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.chain.poll_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let tip = match self.rpc.latest_height().await {
                        Ok(tip) => tip,
                        Err(e) => {
                            warn!(chain = %self.chain.name, err = %e, "height poll failed");
                            continue;
                        }
                    };
                    self.tip.store(tip, Ordering::Relaxed);
                    self.metrics
                        .record_blocks_behind(&self.chain.name, tip.saturating_sub(synced));

                    for height in (synced + 1)..=tip {
                        match self.process_block(height).await {
                            Ok(()) => {
                                synced = height;
                                self.synced.store(height, Ordering::Relaxed);
                                self.metrics.record_block_processed(&self.chain.name);
                            }
                            Err(e) => {
                                warn!(
                                    chain = %self.chain.name,
                                    block = height,
                                    err = %e,
                                    "block processing failed, retrying next tick"
                                );
                                break;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(chain = %self.chain.name, "chain monitor stopping");
                        break;
                    }
                }
            }
        }
    }

    /// First successful height read; `None` when shutdown arrives first.
    async fn initial_height(
        &self,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> Option<u64> {
        loop {
            match self.rpc.latest_height().await {
                Ok(height) => return Some(height),
                Err(e) => {
                    warn!(chain = %self.chain.name, err = %e, "initial height read failed");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.chain.poll_interval_seconds)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return None;
                    }
                }
            }
        }
    }

    async fn process_block(&self, height: u64) -> Result<()> {
        let block = self
            .rpc
            .block_with_txs(height)
            .await?
            .ok_or_else(|| MonitorError::Decode(format!("block {} not yet available", height)))?;
        let block_timestamp = timestamp_from_seconds(block.timestamp);

        for tx in &block.transactions {
            let Some(to) = tx.to else { continue };
            if !self.analyzer.is_known_router(&to) {
                continue;
            }

            // one bad transaction never halts the block
            if let Err(e) = self
                .process_router_transaction(tx, height as i64, block_timestamp)
                .await
            {
                warn!(
                    chain = %self.chain.name,
                    tx_hash = %format!("{:#x}", tx.hash),
                    block = height,
                    err = %e,
                    "transaction skipped"
                );
            }
        }

        Ok(())
    }

    async fn process_router_transaction(
        &self,
        tx: &Transaction,
        block_number: i64,
        block_timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let receipt = self
            .rpc
            .receipt(tx.hash)
            .await?
            .ok_or_else(|| MonitorError::Decode("receipt not available".into()))?;

        if !self.analyzer.is_arbitrage(tx, &receipt) {
            return Ok(());
        }

        let swaps = self.analyzer.decode_swaps(&receipt)?;
        if swaps.len() < 2 {
            return Err(MonitorError::Invariant(format!(
                "classified arbitrage decoded to {} swaps",
                swaps.len()
            )));
        }

        let gas_used = receipt.gas_used.unwrap_or_default();
        let effective_gas_price = receipt
            .effective_gas_price
            .or(tx.gas_price)
            .unwrap_or_default();
        let breakdown =
            ProfitCalculator::calculate(&swaps, gas_used, effective_gas_price, self.price.get())?;

        let record = build_transaction_record(
            self.chain.chain_id as i64,
            tx,
            &swaps,
            &breakdown,
            gas_used,
            block_number,
            block_timestamp,
        );

        // persist first: (chain_id, tx_hash) uniqueness makes re-ingestion a no-op
        let Some(_) = self.storage.insert_transaction(&record).await? else {
            debug!(
                chain = %self.chain.name,
                tx_hash = %record.tx_hash,
                "transaction already recorded"
            );
            return Ok(());
        };

        self.metrics
            .record_transaction_detected(&self.chain.name, record.strategy.as_str());
        info!(
            chain = %self.chain.name,
            tx_hash = %record.tx_hash,
            strategy = %record.strategy,
            swap_count = record.swap_count,
            profit_net_usd = ?record.profit_net_usd,
            "arbitrage transaction detected"
        );

        if let Err(e) = self
            .storage
            .mark_opportunities_captured(
                record.chain_id,
                &record.pools_involved,
                &record.from_address,
                &record.tx_hash,
                self.chain.capture_window_minutes,
            )
            .await
        {
            warn!(
                chain = %self.chain.name,
                tx_hash = %record.tx_hash,
                err = %e,
                "capture marking failed"
            );
        }

        let success = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
        if let Err(e) = self.tracker.record(&record, success).await {
            warn!(
                chain = %self.chain.name,
                tx_hash = %record.tx_hash,
                err = %e,
                "arbitrageur update failed"
            );
        }

        self.hub.publish_transaction(&record);
        Ok(())
    }
}

fn timestamp_from_seconds(seconds: U256) -> DateTime<Utc> {
    let seconds = i64::try_from(seconds.low_u64()).unwrap_or(0);
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now)
}

fn build_transaction_record(
    chain_id: i64,
    tx: &Transaction,
    swaps: &[SwapEvent],
    breakdown: &ProfitBreakdown,
    gas_used: U256,
    block_number: i64,
    block_timestamp: DateTime<Utc>,
) -> ArbitrageTransaction {
    ArbitrageTransaction {
        id: None,
        chain_id,
        tx_hash: format!("{:#x}", tx.hash),
        from_address: address_to_string(&tx.from),
        block_number,
        block_timestamp,
        gas_price_gwei: breakdown.gas_price_gwei,
        gas_used: gas_used.low_u64() as i64,
        gas_cost_native: breakdown.gas_cost_native,
        gas_cost_usd: breakdown.gas_cost_usd,
        swap_count: swaps.len() as i32,
        strategy: Strategy::from_swap_count(swaps.len()),
        profit_gross_usd: breakdown.gross_usd,
        profit_net_usd: breakdown.net_usd,
        roi_pct: breakdown.roi_pct,
        pools_involved: swaps.iter().map(|s| s.pool_address.clone()).collect(),
        tokens_involved: Vec::new(),
        detected_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::SWAP_TOPIC;
    use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256};
    use rust_decimal_macros::dec;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn topic_for(address: Address) -> H256 {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(address.as_bytes());
        H256::from(bytes)
    }

    fn swap_log(pool: Address, amounts: [u64; 4], log_index: u64) -> Log {
        let mut data = Vec::with_capacity(128);
        for amount in amounts {
            let mut word = [0u8; 32];
            U256::from(amount).to_big_endian(&mut word);
            data.extend_from_slice(&word);
        }
        Log {
            address: pool,
            topics: vec![*SWAP_TOPIC, topic_for(addr(0xaa)), topic_for(addr(0xbb))],
            data: Bytes::from(data),
            log_index: Some(log_index.into()),
            ..Default::default()
        }
    }

    #[test]
    fn timestamps_come_from_the_block_header() {
        let at = timestamp_from_seconds(U256::from(1_700_000_000u64));
        assert_eq!(at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn assembles_a_two_hop_record_end_to_end() {
        // classic two-hop: swaps through pools A and B, 150k gas at 5 gwei,
        // native at $300
        let pool_a = addr(0xa1);
        let pool_b = addr(0xb2);
        let router = addr(0x01);

        let routers = vec![address_to_string(&router)];
        let analyzer = TxAnalyzer::new(routers.iter(), &[]).unwrap();

        let mut input = vec![0x38, 0xed, 0x17, 0x39];
        input.extend_from_slice(&[0u8; 64]);
        let tx = Transaction {
            hash: H256::from([0x11; 32]),
            from: addr(0xfe),
            to: Some(router),
            input: Bytes::from(input),
            ..Default::default()
        };
        let receipt = TransactionReceipt {
            logs: vec![
                swap_log(pool_a, [0, 1000, 1100, 0], 0),
                swap_log(pool_b, [1100, 0, 0, 1050], 1),
            ],
            gas_used: Some(U256::from(150_000u64)),
            effective_gas_price: Some(U256::from(5_000_000_000u64)),
            ..Default::default()
        };

        assert!(analyzer.is_arbitrage(&tx, &receipt));
        let swaps = analyzer.decode_swaps(&receipt).unwrap();
        let breakdown = ProfitCalculator::calculate(
            &swaps,
            receipt.gas_used.unwrap(),
            receipt.effective_gas_price.unwrap(),
            dec!(300),
        )
        .unwrap();

        let record = build_transaction_record(
            56,
            &tx,
            &swaps,
            &breakdown,
            receipt.gas_used.unwrap(),
            1000,
            Utc::now(),
        );

        assert_eq!(record.swap_count, 2);
        assert_eq!(record.strategy, Strategy::TwoHop);
        assert_eq!(
            record.pools_involved,
            vec![address_to_string(&pool_a), address_to_string(&pool_b)]
        );
        assert_eq!(record.profit_gross_usd, Some(dec!(15000)));
        assert_eq!(record.profit_net_usd, Some(dec!(14999.775)));
        assert_eq!(record.gas_cost_usd, dec!(0.225));
        assert_eq!(record.gas_used, 150_000);
        assert_eq!(record.from_address, address_to_string(&addr(0xfe)));
        assert!(record.tokens_involved.is_empty());
    }

    #[test]
    fn strategy_buckets_follow_swap_count() {
        let swaps: Vec<SwapEvent> = (0u64..5)
            .map(|i| SwapEvent {
                pool_address: address_to_string(&addr(i as u8 + 1)),
                sender: address_to_string(&addr(0xaa)),
                recipient: address_to_string(&addr(0xbb)),
                amount0_in: U256::from(100u64),
                amount1_in: U256::zero(),
                amount0_out: U256::zero(),
                amount1_out: U256::from(100u64),
                log_index: i,
            })
            .collect();

        let breakdown = ProfitCalculator::calculate(
            &swaps,
            U256::from(21_000u64),
            U256::from(1_000_000_000u64),
            dec!(1),
        )
        .unwrap();

        let tx = Transaction::default();
        let record = build_transaction_record(
            137,
            &tx,
            &swaps,
            &breakdown,
            U256::from(21_000u64),
            5,
            Utc::now(),
        );

        assert_eq!(record.strategy, Strategy::NHop);
        assert_eq!(record.pools_involved.len(), 5);
    }
}
