// Hourly roll-up of opportunities, captures, and profit distribution
use crate::storage::Storage;
use chainpulse_common::{ChainConfig, ChainStat, Result};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Per-chain parameters the aggregator needs from configuration.
#[derive(Debug, Clone)]
pub struct ChainAggregation {
    pub name: String,
    pub chain_id: i64,
    pub small_band_min: Decimal,
    pub small_band_max: Decimal,
}

impl From<&ChainConfig> for ChainAggregation {
    fn from(chain: &ChainConfig) -> Self {
        Self {
            name: chain.name.clone(),
            chain_id: chain.chain_id as i64,
            small_band_min: chain.small_opportunity_min_usd,
            small_band_max: chain.small_opportunity_max_usd,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfitDistribution {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    pub avg: Option<Decimal>,
    pub median: Option<Decimal>,
    pub p95: Option<Decimal>,
}

/// Distribution over an ascending-sorted profit vector. Empty input yields
/// all-`None` so a quiet hour never fabricates zeros.
pub fn profit_distribution(sorted: &[Decimal]) -> ProfitDistribution {
    if sorted.is_empty() {
        return ProfitDistribution::default();
    }

    let n = sorted.len();
    let sum: Decimal = sorted.iter().copied().sum();
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / dec!(2)
    };
    // nearest-rank percentile
    let p95_index = ((dec!(0.95) * Decimal::from(n)).ceil())
        .try_into()
        .map(|rank: u64| (rank as usize).clamp(1, n) - 1)
        .unwrap_or(n - 1);

    ProfitDistribution {
        min: Some(sorted[0]),
        max: Some(sorted[n - 1]),
        avg: Some(sum / Decimal::from(n as i64)),
        median: Some(median),
        p95: Some(sorted[p95_index]),
    }
}

/// `numerator / denominator * 100`, 0 when the denominator is 0.
pub fn rate_pct(numerator: i64, denominator: i64) -> Decimal {
    if denominator == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(numerator) / Decimal::from(denominator) * dec!(100)
}

/// Arbitrageurs per opportunity, 0 when no opportunities were detected.
pub fn competition_level(unique_arbitrageurs: i64, opportunities: i64) -> Decimal {
    if opportunities == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(unique_arbitrageurs) / Decimal::from(opportunities)
}

/// Truncate to the containing UTC hour.
pub fn hour_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    let ts = at.timestamp();
    Utc.timestamp_opt(ts - ts.rem_euclid(3600), 0).unwrap()
}

/// Sleep target: `offset_minutes` past the next hour boundary.
pub fn duration_until_next_run(now: DateTime<Utc>, offset_minutes: u64) -> Duration {
    let mut next =
        hour_floor(now) + ChronoDuration::hours(1) + ChronoDuration::minutes(offset_minutes as i64);
    if next <= now {
        next = next + ChronoDuration::hours(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

pub struct StatsAggregator {
    storage: Arc<Storage>,
    chains: Vec<ChainAggregation>,
    offset_minutes: u64,
}

impl StatsAggregator {
    pub fn new(storage: Arc<Storage>, chains: Vec<ChainAggregation>, offset_minutes: u64) -> Self {
        Self {
            storage,
            chains,
            offset_minutes,
        }
    }

    /// Roll up the just-closed hour for every chain, once per hour, until
    /// shutdown. A failed chain logs and does not block the others.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            let wait = duration_until_next_run(Utc::now(), self.offset_minutes);
            info!(seconds = wait.as_secs(), "next stats roll-up scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let hour_start = hour_floor(Utc::now() - ChronoDuration::hours(1));
                    for chain in &self.chains {
                        match self.aggregate_chain_hour(chain, hour_start).await {
                            Ok(stat) => info!(
                                chain = %chain.name,
                                hour = %stat.hour_timestamp,
                                opportunities = stat.opportunities_detected,
                                transactions = stat.transactions_detected,
                                "hourly stats aggregated"
                            ),
                            Err(e) => error!(
                                chain = %chain.name,
                                err = %e,
                                "hourly aggregation failed"
                            ),
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Aggregate one chain's closed hour and upsert the row. Re-running for
    /// the same hour overwrites with identical values.
    pub async fn aggregate_chain_hour(
        &self,
        chain: &ChainAggregation,
        hour_start: DateTime<Utc>,
    ) -> Result<ChainStat> {
        let hour_end = hour_start + ChronoDuration::hours(1);

        let (opportunities, captured) = self
            .storage
            .opportunity_counts(chain.chain_id, hour_start, hour_end)
            .await?;
        let (small, small_captured) = self
            .storage
            .small_opportunity_counts(
                chain.chain_id,
                hour_start,
                hour_end,
                chain.small_band_min,
                chain.small_band_max,
            )
            .await?;
        let transactions = self
            .storage
            .transaction_count(chain.chain_id, hour_start, hour_end)
            .await?;
        let unique_arbitrageurs = self
            .storage
            .unique_arbitrageur_count(chain.chain_id, hour_start, hour_end)
            .await?;
        let profits = self
            .storage
            .net_profits(chain.chain_id, hour_start, hour_end)
            .await?;
        let gas_spent = self
            .storage
            .gas_spent_usd(chain.chain_id, hour_start, hour_end)
            .await?;

        let distribution = profit_distribution(&profits);
        let total_profit: Decimal = profits.iter().copied().sum();

        let stat = ChainStat {
            chain_id: chain.chain_id,
            hour_timestamp: hour_start,
            opportunities_detected: opportunities,
            opportunities_captured: captured,
            small_opportunities_count: small,
            small_opps_captured: small_captured,
            transactions_detected: transactions,
            unique_arbitrageurs,
            total_profit_usd: total_profit,
            capture_rate: rate_pct(captured, opportunities),
            small_opp_capture_rate: rate_pct(small_captured, small),
            avg_competition_level: competition_level(unique_arbitrageurs, opportunities),
            profit_min: distribution.min,
            profit_max: distribution.max,
            profit_avg: distribution.avg,
            profit_median: distribution.median,
            profit_p95: distribution.p95,
            total_gas_spent_usd: gas_spent,
        };

        self.storage.upsert_chain_stat(&stat).await?;
        Ok(stat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decs(values: &[i64]) -> Vec<Decimal> {
        values.iter().map(|v| Decimal::from(*v)).collect()
    }

    #[test]
    fn distribution_over_odd_count() {
        let profits = decs(&[1, 2, 3, 4, 5]);
        let d = profit_distribution(&profits);

        assert_eq!(d.min, Some(dec!(1)));
        assert_eq!(d.max, Some(dec!(5)));
        assert_eq!(d.avg, Some(dec!(3)));
        assert_eq!(d.median, Some(dec!(3)));
        assert_eq!(d.p95, Some(dec!(5)));
    }

    #[test]
    fn distribution_over_even_count() {
        let profits = decs(&[1, 2, 3, 4]);
        let d = profit_distribution(&profits);

        assert_eq!(d.median, Some(dec!(2.5)));
        assert_eq!(d.p95, Some(dec!(4)));
    }

    #[test]
    fn empty_distribution_is_all_none() {
        let d = profit_distribution(&[]);
        assert!(d.min.is_none());
        assert!(d.max.is_none());
        assert!(d.avg.is_none());
        assert!(d.median.is_none());
        assert!(d.p95.is_none());
    }

    #[test]
    fn p95_uses_nearest_rank() {
        // 20 values 1..=20: rank = ceil(0.95 * 20) = 19 -> value 19
        let profits = decs(&(1..=20).collect::<Vec<_>>());
        let d = profit_distribution(&profits);
        assert_eq!(d.p95, Some(dec!(19)));
    }

    #[test]
    fn rates_handle_zero_denominators() {
        assert_eq!(rate_pct(0, 0), Decimal::ZERO);
        assert_eq!(rate_pct(5, 10), dec!(50));
        assert_eq!(rate_pct(10, 10), dec!(100));
        assert_eq!(competition_level(4, 0), Decimal::ZERO);
        assert_eq!(competition_level(4, 8), dec!(0.5));
    }

    #[test]
    fn hour_floor_truncates_to_the_hour() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 12, 34, 56).unwrap();
        let floored = hour_floor(at);
        assert_eq!(floored, Utc.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap());
        assert_eq!(hour_floor(floored), floored);
    }

    #[test]
    fn next_run_lands_offset_past_the_hour() {
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 12, 34, 0).unwrap();
        let wait = duration_until_next_run(now, 2);
        assert_eq!(wait, Duration::from_secs(28 * 60));

        // already past this hour's offset: schedule the next hour
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 12, 1, 0).unwrap();
        let wait = duration_until_next_run(now, 2);
        assert_eq!(wait, Duration::from_secs(61 * 60));
    }
}
