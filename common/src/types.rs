// Domain entities shared across ChainPulse services
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Hop-count label for a detected arbitrage transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "2-hop")]
    TwoHop,
    #[serde(rename = "3-hop")]
    ThreeHop,
    #[serde(rename = "4-hop")]
    FourHop,
    #[serde(rename = "N-hop")]
    NHop,
}

impl Strategy {
    pub fn from_swap_count(count: usize) -> Self {
        match count {
            2 => Strategy::TwoHop,
            3 => Strategy::ThreeHop,
            4 => Strategy::FourHop,
            _ => Strategy::NHop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::TwoHop => "2-hop",
            Strategy::ThreeHop => "3-hop",
            Strategy::FourHop => "4-hop",
            Strategy::NHop => "N-hop",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2-hop" => Ok(Strategy::TwoHop),
            "3-hop" => Ok(Strategy::ThreeHop),
            "4-hop" => Ok(Strategy::FourHop),
            "N-hop" => Ok(Strategy::NHop),
            other => Err(format!("unknown strategy label: {}", other)),
        }
    }
}

/// A pool-imbalance opportunity emitted by the scanner.
///
/// `id` is assigned by the persistence gateway; an in-flight opportunity
/// carries `None` until committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Option<i64>,
    pub chain_id: i64,
    pub pool_label: String,
    pub pool_address: String,
    pub imbalance_pct: Decimal,
    pub profit_usd: Decimal,
    pub profit_native: Decimal,
    pub reserve0: Decimal,
    pub reserve1: Decimal,
    pub block_number: i64,
    pub detected_at: DateTime<Utc>,
    pub captured: bool,
    pub captured_by: Option<String>,
    pub capture_tx_hash: Option<String>,
}

/// A confirmed multi-hop arbitrage transaction reconstructed from a receipt.
/// Immutable once persisted; `(chain_id, tx_hash)` is unique in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageTransaction {
    pub id: Option<i64>,
    pub chain_id: i64,
    pub tx_hash: String,
    pub from_address: String,
    pub block_number: i64,
    pub block_timestamp: DateTime<Utc>,
    pub gas_price_gwei: Decimal,
    pub gas_used: i64,
    pub gas_cost_native: Decimal,
    pub gas_cost_usd: Decimal,
    pub swap_count: i32,
    pub strategy: Strategy,
    /// Null when the token flow could not be determined from the swap logs.
    pub profit_gross_usd: Option<Decimal>,
    pub profit_net_usd: Option<Decimal>,
    pub roi_pct: Option<Decimal>,
    pub pools_involved: Vec<String>,
    pub tokens_involved: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

/// Per-address cumulative statistics, upserted on every detected transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arbitrageur {
    pub address: String,
    pub chain_id: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_transactions: i64,
    pub successful_transactions: i64,
    pub failed_transactions: i64,
    pub total_profit_usd: Decimal,
    pub total_gas_spent_usd: Decimal,
    pub avg_gas_price_gwei: Decimal,
    pub preferred_strategy: Strategy,
    /// Exact observation counts per strategy label, so `preferred_strategy`
    /// stays an argmax rather than a guess.
    pub strategy_counts: HashMap<String, i64>,
}

/// Hourly roll-up for one chain. `(chain_id, hour_timestamp)` is unique and
/// re-aggregation overwrites the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStat {
    pub chain_id: i64,
    pub hour_timestamp: DateTime<Utc>,
    pub opportunities_detected: i64,
    pub opportunities_captured: i64,
    pub small_opportunities_count: i64,
    pub small_opps_captured: i64,
    pub transactions_detected: i64,
    pub unique_arbitrageurs: i64,
    pub total_profit_usd: Decimal,
    pub capture_rate: Decimal,
    pub small_opp_capture_rate: Decimal,
    pub avg_competition_level: Decimal,
    pub profit_min: Option<Decimal>,
    pub profit_max: Option<Decimal>,
    pub profit_avg: Option<Decimal>,
    pub profit_median: Option<Decimal>,
    pub profit_p95: Option<Decimal>,
    pub total_gas_spent_usd: Decimal,
}
