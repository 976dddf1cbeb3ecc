// Per-address arbitrageur statistics, updated on every detected transaction
use crate::storage::Storage;
use chainpulse_common::{ArbitrageTransaction, Result, Strategy};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// One detected transaction's contribution to an arbitrageur row.
#[derive(Debug, Clone)]
pub struct ArbitrageurObservation {
    pub address: String,
    pub chain_id: i64,
    /// Follows the receipt's status field, never the profit sign.
    pub success: bool,
    pub profit_net_usd: Option<Decimal>,
    pub gas_cost_usd: Decimal,
    pub gas_price_gwei: Decimal,
    pub strategy: Strategy,
    pub observed_at: DateTime<Utc>,
}

pub struct ArbitrageurTracker {
    storage: Arc<Storage>,
}

impl ArbitrageurTracker {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn record(&self, tx: &ArbitrageTransaction, success: bool) -> Result<()> {
        let observation = ArbitrageurObservation {
            address: tx.from_address.clone(),
            chain_id: tx.chain_id,
            success,
            profit_net_usd: tx.profit_net_usd,
            gas_cost_usd: tx.gas_cost_usd,
            gas_price_gwei: tx.gas_price_gwei,
            strategy: tx.strategy,
            observed_at: Utc::now(),
        };
        self.storage.upsert_arbitrageur(&observation).await
    }
}

/// Contribution of one transaction to `total_profit_usd`: losses and missing
/// profit data count as zero.
pub fn realized_profit(profit_net_usd: Option<Decimal>) -> Decimal {
    profit_net_usd
        .filter(|net| *net > Decimal::ZERO)
        .unwrap_or(Decimal::ZERO)
}

/// Running mean over `previous_count` observations extended by one value.
pub fn running_mean(previous_mean: Decimal, previous_count: i64, new_value: Decimal) -> Decimal {
    if previous_count <= 0 {
        return new_value;
    }
    let count = Decimal::from(previous_count);
    (previous_mean * count + new_value) / (count + Decimal::ONE)
}

pub fn bump_strategy(counts: &mut HashMap<String, i64>, strategy: Strategy) {
    *counts.entry(strategy.as_str().to_string()).or_insert(0) += 1;
}

/// Argmax over observed strategy counts. Ties resolve to the lower hop
/// bucket; labels that are not valid strategies are ignored.
pub fn preferred_strategy(counts: &HashMap<String, i64>) -> Strategy {
    let mut best = Strategy::NHop;
    let mut best_count = i64::MIN;

    for strategy in [
        Strategy::TwoHop,
        Strategy::ThreeHop,
        Strategy::FourHop,
        Strategy::NHop,
    ] {
        let count = counts.get(strategy.as_str()).copied().unwrap_or(0);
        if count > best_count {
            best = strategy;
            best_count = count;
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn realized_profit_clamps_losses_and_nulls() {
        assert_eq!(realized_profit(Some(dec!(120.5))), dec!(120.5));
        assert_eq!(realized_profit(Some(dec!(-40))), Decimal::ZERO);
        assert_eq!(realized_profit(None), Decimal::ZERO);
    }

    #[test]
    fn running_mean_matches_arithmetic_mean() {
        // observations: 10, 20, 60
        let mut mean = running_mean(Decimal::ZERO, 0, dec!(10));
        mean = running_mean(mean, 1, dec!(20));
        mean = running_mean(mean, 2, dec!(60));
        assert_eq!(mean, dec!(30));
    }

    #[test]
    fn preferred_strategy_is_the_argmax() {
        let mut counts = HashMap::new();
        bump_strategy(&mut counts, Strategy::TwoHop);
        bump_strategy(&mut counts, Strategy::ThreeHop);
        bump_strategy(&mut counts, Strategy::ThreeHop);

        assert_eq!(preferred_strategy(&counts), Strategy::ThreeHop);

        bump_strategy(&mut counts, Strategy::TwoHop);
        // tie: the lower hop bucket wins
        assert_eq!(preferred_strategy(&counts), Strategy::TwoHop);
    }

    #[test]
    fn repeated_identical_observations_accumulate_linearly() {
        // the upsert is linear, not idempotent: two identical observations
        // double every counter
        let mut counts = HashMap::new();
        let mut mean = Decimal::ZERO;
        let mut total = 0i64;
        let mut profit = Decimal::ZERO;

        for _ in 0..2 {
            bump_strategy(&mut counts, Strategy::TwoHop);
            mean = running_mean(mean, total, dec!(5));
            total += 1;
            profit += realized_profit(Some(dec!(120)));
        }

        assert_eq!(counts["2-hop"], 2);
        assert_eq!(total, 2);
        assert_eq!(profit, dec!(240));
        assert_eq!(mean, dec!(5));
    }

    #[test]
    fn unknown_labels_are_ignored() {
        let mut counts = HashMap::new();
        counts.insert("flashloan".to_string(), 99i64);
        bump_strategy(&mut counts, Strategy::FourHop);

        assert_eq!(preferred_strategy(&counts), Strategy::FourHop);
    }
}
