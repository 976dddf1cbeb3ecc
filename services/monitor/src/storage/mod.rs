// Persistence gateway: pooled Postgres access, idempotent bootstrap,
// parameterized reads and writes
mod schema;

use crate::tracker::{self, ArbitrageurObservation};
use chainpulse_common::config::DatabaseConfig;
use chainpulse_common::{
    ArbitrageTransaction, ChainStat, MetricsCollector, MonitorError, Opportunity, Result,
    RetryPolicy, Strategy,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Rows returned per page are capped regardless of the caller's ask.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Time-period selector used by the historical query surface, resolved
/// against `hour_timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    OneHour,
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl Period {
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let hours = match self {
            Period::OneHour => 1,
            Period::OneDay => 24,
            Period::SevenDays => 24 * 7,
            Period::ThirtyDays => 24 * 30,
        };
        now - ChronoDuration::hours(hours)
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Period::OneHour),
            "24h" => Ok(Period::OneDay),
            "7d" => Ok(Period::SevenDays),
            "30d" => Ok(Period::ThirtyDays),
            other => Err(format!("unknown period: {}", other)),
        }
    }
}

/// Adapter-facing filter set for historical transaction reads.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub chain_id: Option<i64>,
    pub min_profit: Option<Decimal>,
    pub max_profit: Option<Decimal>,
    pub from_address: Option<String>,
    pub min_swaps: Option<i32>,
    pub strategy: Option<Strategy>,
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct OpportunityQuery {
    pub chain_id: Option<i64>,
    pub min_profit: Option<Decimal>,
    pub captured: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

pub struct Storage {
    pool: PgPool,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
}

impl Storage {
    pub async fn connect(config: &DatabaseConfig, metrics: Arc<MetricsCollector>) -> Result<Self> {
        let statement_timeout_ms = (config.operation_timeout_secs * 1000).to_string();
        let options = sqlx::postgres::PgConnectOptions::from_str(&config.url)
            .map_err(|e| MonitorError::Config(format!("database url: {}", e)))?
            .options([("statement_timeout", statement_timeout_ms.as_str())]);

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.operation_timeout_secs))
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            retry: RetryPolicy::persistence(),
            metrics,
        })
    }

    /// Create tables and indices; safe to re-run on every start.
    pub async fn bootstrap(&self) -> Result<()> {
        for statement in schema::SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("schema bootstrap complete");
        Ok(())
    }

    /// Transient write failures are retried 0.5s -> 1s -> 2s; exhaustion
    /// surfaces `Persistence`, which callers log and skip.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let started = Instant::now();
        let result = self
            .retry
            .execute_if(f, |e: &sqlx::Error| {
                matches!(
                    e,
                    sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
                )
            })
            .await;

        self.metrics
            .record_db_latency(started.elapsed().as_secs_f64() * 1000.0, operation);
        self.metrics.record_db_operation(operation, result.is_ok());

        result.map_err(|e| MonitorError::Persistence(format!("{}: {}", operation, e)))
    }

    // ---- opportunities ----

    pub async fn insert_opportunity(&self, opportunity: &mut Opportunity) -> Result<()> {
        let pool = &self.pool;
        let opp = &*opportunity;
        let id: i64 = self
            .with_retry("insert_opportunity", || async move {
                let row = sqlx::query(
                    r#"
                    INSERT INTO opportunities
                        (chain_id, pool_label, pool_address, imbalance_pct, profit_usd,
                         profit_native, reserve0, reserve1, block_number, detected_at,
                         captured, captured_by, capture_tx_hash)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    RETURNING id
                    "#,
                )
                .bind(opp.chain_id)
                .bind(&opp.pool_label)
                .bind(&opp.pool_address)
                .bind(opp.imbalance_pct)
                .bind(opp.profit_usd)
                .bind(opp.profit_native)
                .bind(opp.reserve0)
                .bind(opp.reserve1)
                .bind(opp.block_number)
                .bind(opp.detected_at)
                .bind(opp.captured)
                .bind(&opp.captured_by)
                .bind(&opp.capture_tx_hash)
                .fetch_one(pool)
                .await?;
                row.try_get(0)
            })
            .await?;

        opportunity.id = Some(id);
        Ok(())
    }

    /// Mark still-open opportunities on `chain_id` whose pool appears in
    /// `pools` as captured by the given transaction. Only opportunities
    /// detected within the capture window qualify.
    pub async fn mark_opportunities_captured(
        &self,
        chain_id: i64,
        pools: &[String],
        captured_by: &str,
        capture_tx_hash: &str,
        window_minutes: i64,
    ) -> Result<u64> {
        let pool = &self.pool;
        let cutoff = Utc::now() - ChronoDuration::minutes(window_minutes);

        self.with_retry("mark_opportunities_captured", || async move {
            let result = sqlx::query(
                r#"
                UPDATE opportunities
                SET captured = TRUE, captured_by = $1, capture_tx_hash = $2
                WHERE chain_id = $3
                  AND NOT captured
                  AND pool_address = ANY($4)
                  AND detected_at >= $5
                "#,
            )
            .bind(captured_by)
            .bind(capture_tx_hash)
            .bind(chain_id)
            .bind(pools)
            .bind(cutoff)
            .execute(pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    pub async fn list_opportunities(&self, query: &OpportunityQuery) -> Result<Vec<Opportunity>> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "SELECT id, chain_id, pool_label, pool_address, imbalance_pct, profit_usd, \
             profit_native, reserve0, reserve1, block_number, detected_at, captured, \
             captured_by, capture_tx_hash FROM opportunities WHERE 1=1",
        );
        if let Some(chain_id) = query.chain_id {
            builder.push(" AND chain_id = ").push_bind(chain_id);
        }
        if let Some(min_profit) = query.min_profit {
            builder.push(" AND profit_usd >= ").push_bind(min_profit);
        }
        if let Some(captured) = query.captured {
            builder.push(" AND captured = ").push_bind(captured);
        }
        if let Some(since) = query.since {
            builder.push(" AND detected_at >= ").push_bind(since);
        }
        builder
            .push(" ORDER BY detected_at DESC LIMIT ")
            .push_bind(clamp_limit(query.limit))
            .push(" OFFSET ")
            .push_bind(query.offset.max(0));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(opportunity_from_row).collect()
    }

    // ---- arbitrage transactions ----

    /// Idempotent insert keyed on `(chain_id, tx_hash)`. Returns the new row
    /// id, or `None` when the transaction was already recorded.
    pub async fn insert_transaction(&self, tx: &ArbitrageTransaction) -> Result<Option<i64>> {
        let pool = &self.pool;

        self.with_retry("insert_transaction", || async move {
            let row = sqlx::query(
                r#"
                INSERT INTO arbitrage_transactions
                    (chain_id, tx_hash, from_address, block_number, block_timestamp,
                     gas_price_gwei, gas_used, gas_cost_native, gas_cost_usd,
                     swap_count, strategy, profit_gross_usd, profit_net_usd, roi_pct,
                     pools_involved, tokens_involved, detected_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                        $15, $16, $17)
                ON CONFLICT (chain_id, tx_hash) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(tx.chain_id)
            .bind(&tx.tx_hash)
            .bind(&tx.from_address)
            .bind(tx.block_number)
            .bind(tx.block_timestamp)
            .bind(tx.gas_price_gwei)
            .bind(tx.gas_used)
            .bind(tx.gas_cost_native)
            .bind(tx.gas_cost_usd)
            .bind(tx.swap_count)
            .bind(tx.strategy.as_str())
            .bind(tx.profit_gross_usd)
            .bind(tx.profit_net_usd)
            .bind(tx.roi_pct)
            .bind(&tx.pools_involved)
            .bind(&tx.tokens_involved)
            .bind(tx.detected_at)
            .fetch_optional(pool)
            .await?;

            match row {
                Some(row) => Ok(Some(row.try_get::<i64, _>(0)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_transactions(
        &self,
        query: &TransactionQuery,
    ) -> Result<Vec<ArbitrageTransaction>> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "SELECT id, chain_id, tx_hash, from_address, block_number, block_timestamp, \
             gas_price_gwei, gas_used, gas_cost_native, gas_cost_usd, swap_count, strategy, \
             profit_gross_usd, profit_net_usd, roi_pct, pools_involved, tokens_involved, \
             detected_at FROM arbitrage_transactions WHERE 1=1",
        );
        if let Some(chain_id) = query.chain_id {
            builder.push(" AND chain_id = ").push_bind(chain_id);
        }
        if let Some(min_profit) = query.min_profit {
            builder.push(" AND profit_net_usd >= ").push_bind(min_profit);
        }
        if let Some(max_profit) = query.max_profit {
            builder.push(" AND profit_net_usd <= ").push_bind(max_profit);
        }
        if let Some(from_address) = &query.from_address {
            builder.push(" AND from_address = ").push_bind(from_address);
        }
        if let Some(min_swaps) = query.min_swaps {
            builder.push(" AND swap_count >= ").push_bind(min_swaps);
        }
        if let Some(strategy) = query.strategy {
            builder.push(" AND strategy = ").push_bind(strategy.as_str());
        }
        if let Some(since) = query.since {
            builder.push(" AND detected_at >= ").push_bind(since);
        }
        builder
            .push(" ORDER BY detected_at DESC LIMIT ")
            .push_bind(clamp_limit(query.limit))
            .push(" OFFSET ")
            .push_bind(query.offset.max(0));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(transaction_from_row).collect()
    }

    // ---- arbitrageurs ----

    /// Linear (not idempotent) upsert serialized per `(address, chain_id)`
    /// through row locking, preserving `total = successful + failed`.
    pub async fn upsert_arbitrageur(&self, observation: &ArbitrageurObservation) -> Result<()> {
        self.with_retry("upsert_arbitrageur", || {
            self.upsert_arbitrageur_once(observation)
        })
        .await
    }

    async fn upsert_arbitrageur_once(
        &self,
        obs: &ArbitrageurObservation,
    ) -> std::result::Result<(), sqlx::Error> {
        let mut dbtx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT total_transactions, successful_transactions, failed_transactions,
                   total_profit_usd, total_gas_spent_usd, avg_gas_price_gwei,
                   strategy_counts
            FROM arbitrageurs
            WHERE address = $1 AND chain_id = $2
            FOR UPDATE
            "#,
        )
        .bind(&obs.address)
        .bind(obs.chain_id)
        .fetch_optional(&mut *dbtx)
        .await?;

        match existing {
            None => {
                let mut counts: HashMap<String, i64> = HashMap::new();
                tracker::bump_strategy(&mut counts, obs.strategy);

                sqlx::query(
                    r#"
                    INSERT INTO arbitrageurs
                        (address, chain_id, first_seen, last_seen, total_transactions,
                         successful_transactions, failed_transactions, total_profit_usd,
                         total_gas_spent_usd, avg_gas_price_gwei, preferred_strategy,
                         strategy_counts)
                    VALUES ($1, $2, $3, $3, 1, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(&obs.address)
                .bind(obs.chain_id)
                .bind(obs.observed_at)
                .bind(if obs.success { 1i64 } else { 0i64 })
                .bind(if obs.success { 0i64 } else { 1i64 })
                .bind(tracker::realized_profit(obs.profit_net_usd))
                .bind(obs.gas_cost_usd)
                .bind(obs.gas_price_gwei)
                .bind(obs.strategy.as_str())
                .bind(counts_to_json(&counts))
                .execute(&mut *dbtx)
                .await?;
            }
            Some(row) => {
                let total: i64 = row.try_get("total_transactions")?;
                let successful: i64 = row.try_get("successful_transactions")?;
                let failed: i64 = row.try_get("failed_transactions")?;
                let total_profit: Decimal = row.try_get("total_profit_usd")?;
                let total_gas: Decimal = row.try_get("total_gas_spent_usd")?;
                let avg_gas_price: Decimal = row.try_get("avg_gas_price_gwei")?;
                let mut counts = counts_from_json(row.try_get("strategy_counts")?)?;

                tracker::bump_strategy(&mut counts, obs.strategy);
                let preferred = tracker::preferred_strategy(&counts);
                let new_avg = tracker::running_mean(avg_gas_price, total, obs.gas_price_gwei);

                sqlx::query(
                    r#"
                    UPDATE arbitrageurs
                    SET last_seen = $3,
                        total_transactions = $4,
                        successful_transactions = $5,
                        failed_transactions = $6,
                        total_profit_usd = $7,
                        total_gas_spent_usd = $8,
                        avg_gas_price_gwei = $9,
                        preferred_strategy = $10,
                        strategy_counts = $11
                    WHERE address = $1 AND chain_id = $2
                    "#,
                )
                .bind(&obs.address)
                .bind(obs.chain_id)
                .bind(obs.observed_at)
                .bind(total + 1)
                .bind(successful + if obs.success { 1 } else { 0 })
                .bind(failed + if obs.success { 0 } else { 1 })
                .bind(total_profit + tracker::realized_profit(obs.profit_net_usd))
                .bind(total_gas + obs.gas_cost_usd)
                .bind(new_avg)
                .bind(preferred.as_str())
                .bind(counts_to_json(&counts))
                .execute(&mut *dbtx)
                .await?;
            }
        }

        dbtx.commit().await
    }

    // ---- hourly aggregation reads/writes ----

    /// `(detected, captured)` opportunity counts in `[from, to)`.
    pub async fn opportunity_counts(
        &self,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS detected,
                   COUNT(*) FILTER (WHERE captured) AS captured
            FROM opportunities
            WHERE chain_id = $1 AND detected_at >= $2 AND detected_at < $3
            "#,
        )
        .bind(chain_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_get("detected")?, row.try_get("captured")?))
    }

    /// Same, restricted to the configured small-profit band.
    pub async fn small_opportunity_counts(
        &self,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        band_min: Decimal,
        band_max: Decimal,
    ) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS detected,
                   COUNT(*) FILTER (WHERE captured) AS captured
            FROM opportunities
            WHERE chain_id = $1 AND detected_at >= $2 AND detected_at < $3
              AND profit_usd BETWEEN $4 AND $5
            "#,
        )
        .bind(chain_id)
        .bind(from)
        .bind(to)
        .bind(band_min)
        .bind(band_max)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_get("detected")?, row.try_get("captured")?))
    }

    pub async fn transaction_count(
        &self,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM arbitrage_transactions \
             WHERE chain_id = $1 AND detected_at >= $2 AND detected_at < $3",
        )
        .bind(chain_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn unique_arbitrageur_count(
        &self,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT from_address) AS n FROM arbitrage_transactions \
             WHERE chain_id = $1 AND detected_at >= $2 AND detected_at < $3",
        )
        .bind(chain_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    /// Net profits (non-null only) in the window, ascending.
    pub async fn net_profits(
        &self,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Decimal>> {
        let rows = sqlx::query(
            "SELECT profit_net_usd FROM arbitrage_transactions \
             WHERE chain_id = $1 AND detected_at >= $2 AND detected_at < $3 \
               AND profit_net_usd IS NOT NULL \
             ORDER BY profit_net_usd ASC",
        )
        .bind(chain_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<Decimal, _>(0).map_err(MonitorError::from))
            .collect()
    }

    pub async fn gas_spent_usd(
        &self,
        chain_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Decimal> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(gas_cost_usd), 0) AS total FROM arbitrage_transactions \
             WHERE chain_id = $1 AND detected_at >= $2 AND detected_at < $3",
        )
        .bind(chain_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("total")?)
    }

    /// Idempotent per `(chain_id, hour_timestamp)`: re-running a closed hour
    /// overwrites the row with identical values.
    pub async fn upsert_chain_stat(&self, stat: &ChainStat) -> Result<()> {
        let pool = &self.pool;

        self.with_retry("upsert_chain_stat", || async move {
            sqlx::query(
                r#"
                INSERT INTO chain_stats
                    (chain_id, hour_timestamp, opportunities_detected, opportunities_captured,
                     small_opportunities_count, small_opps_captured, transactions_detected,
                     unique_arbitrageurs, total_profit_usd, capture_rate,
                     small_opp_capture_rate, avg_competition_level, profit_min, profit_max,
                     profit_avg, profit_median, profit_p95, total_gas_spent_usd)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                        $16, $17, $18)
                ON CONFLICT (chain_id, hour_timestamp) DO UPDATE SET
                    opportunities_detected = EXCLUDED.opportunities_detected,
                    opportunities_captured = EXCLUDED.opportunities_captured,
                    small_opportunities_count = EXCLUDED.small_opportunities_count,
                    small_opps_captured = EXCLUDED.small_opps_captured,
                    transactions_detected = EXCLUDED.transactions_detected,
                    unique_arbitrageurs = EXCLUDED.unique_arbitrageurs,
                    total_profit_usd = EXCLUDED.total_profit_usd,
                    capture_rate = EXCLUDED.capture_rate,
                    small_opp_capture_rate = EXCLUDED.small_opp_capture_rate,
                    avg_competition_level = EXCLUDED.avg_competition_level,
                    profit_min = EXCLUDED.profit_min,
                    profit_max = EXCLUDED.profit_max,
                    profit_avg = EXCLUDED.profit_avg,
                    profit_median = EXCLUDED.profit_median,
                    profit_p95 = EXCLUDED.profit_p95,
                    total_gas_spent_usd = EXCLUDED.total_gas_spent_usd
                "#,
            )
            .bind(stat.chain_id)
            .bind(stat.hour_timestamp)
            .bind(stat.opportunities_detected)
            .bind(stat.opportunities_captured)
            .bind(stat.small_opportunities_count)
            .bind(stat.small_opps_captured)
            .bind(stat.transactions_detected)
            .bind(stat.unique_arbitrageurs)
            .bind(stat.total_profit_usd)
            .bind(stat.capture_rate)
            .bind(stat.small_opp_capture_rate)
            .bind(stat.avg_competition_level)
            .bind(stat.profit_min)
            .bind(stat.profit_max)
            .bind(stat.profit_avg)
            .bind(stat.profit_median)
            .bind(stat.profit_p95)
            .bind(stat.total_gas_spent_usd)
            .execute(pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Hourly rows covering the selected look-back period, oldest first.
    pub async fn chain_stats_for_period(
        &self,
        chain_id: i64,
        period: Period,
    ) -> Result<Vec<ChainStat>> {
        self.chain_stats_since(chain_id, period.since(Utc::now())).await
    }

    /// Hourly rows for one chain from `since` on, oldest first.
    pub async fn chain_stats_since(
        &self,
        chain_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChainStat>> {
        let rows = sqlx::query(
            "SELECT * FROM chain_stats \
             WHERE chain_id = $1 AND hour_timestamp >= $2 \
             ORDER BY hour_timestamp ASC",
        )
        .bind(chain_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chain_stat_from_row).collect()
    }
}

fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        MAX_PAGE_SIZE
    } else {
        limit.min(MAX_PAGE_SIZE)
    }
}

fn counts_to_json(counts: &HashMap<String, i64>) -> serde_json::Value {
    serde_json::to_value(counts).unwrap_or_else(|_| serde_json::json!({}))
}

fn counts_from_json(
    value: serde_json::Value,
) -> std::result::Result<HashMap<String, i64>, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| sqlx::Error::Decode(e.into()))
}

fn opportunity_from_row(row: &PgRow) -> Result<Opportunity> {
    Ok(Opportunity {
        id: Some(row.try_get("id")?),
        chain_id: row.try_get("chain_id")?,
        pool_label: row.try_get("pool_label")?,
        pool_address: row.try_get("pool_address")?,
        imbalance_pct: row.try_get("imbalance_pct")?,
        profit_usd: row.try_get("profit_usd")?,
        profit_native: row.try_get("profit_native")?,
        reserve0: row.try_get("reserve0")?,
        reserve1: row.try_get("reserve1")?,
        block_number: row.try_get("block_number")?,
        detected_at: row.try_get("detected_at")?,
        captured: row.try_get("captured")?,
        captured_by: row.try_get("captured_by")?,
        capture_tx_hash: row.try_get("capture_tx_hash")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<ArbitrageTransaction> {
    let strategy: String = row.try_get("strategy")?;
    Ok(ArbitrageTransaction {
        id: Some(row.try_get("id")?),
        chain_id: row.try_get("chain_id")?,
        tx_hash: row.try_get("tx_hash")?,
        from_address: row.try_get("from_address")?,
        block_number: row.try_get("block_number")?,
        block_timestamp: row.try_get("block_timestamp")?,
        gas_price_gwei: row.try_get("gas_price_gwei")?,
        gas_used: row.try_get("gas_used")?,
        gas_cost_native: row.try_get("gas_cost_native")?,
        gas_cost_usd: row.try_get("gas_cost_usd")?,
        swap_count: row.try_get("swap_count")?,
        strategy: Strategy::from_str(&strategy)
            .map_err(|e| MonitorError::Decode(format!("strategy column: {}", e)))?,
        profit_gross_usd: row.try_get("profit_gross_usd")?,
        profit_net_usd: row.try_get("profit_net_usd")?,
        roi_pct: row.try_get("roi_pct")?,
        pools_involved: row.try_get("pools_involved")?,
        tokens_involved: row.try_get("tokens_involved")?,
        detected_at: row.try_get("detected_at")?,
    })
}

fn chain_stat_from_row(row: &PgRow) -> Result<ChainStat> {
    Ok(ChainStat {
        chain_id: row.try_get("chain_id")?,
        hour_timestamp: row.try_get("hour_timestamp")?,
        opportunities_detected: row.try_get("opportunities_detected")?,
        opportunities_captured: row.try_get("opportunities_captured")?,
        small_opportunities_count: row.try_get("small_opportunities_count")?,
        small_opps_captured: row.try_get("small_opps_captured")?,
        transactions_detected: row.try_get("transactions_detected")?,
        unique_arbitrageurs: row.try_get("unique_arbitrageurs")?,
        total_profit_usd: row.try_get("total_profit_usd")?,
        capture_rate: row.try_get("capture_rate")?,
        small_opp_capture_rate: row.try_get("small_opp_capture_rate")?,
        avg_competition_level: row.try_get("avg_competition_level")?,
        profit_min: row.try_get("profit_min")?,
        profit_max: row.try_get("profit_max")?,
        profit_avg: row.try_get("profit_avg")?,
        profit_median: row.try_get("profit_median")?,
        profit_p95: row.try_get("profit_p95")?,
        total_gas_spent_usd: row.try_get("total_gas_spent_usd")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limits_are_clamped() {
        assert_eq!(clamp_limit(0), MAX_PAGE_SIZE);
        assert_eq!(clamp_limit(-5), MAX_PAGE_SIZE);
        assert_eq!(clamp_limit(50), 50);
        assert_eq!(clamp_limit(5000), MAX_PAGE_SIZE);
    }

    #[test]
    fn periods_parse_and_resolve() {
        use chrono::TimeZone;

        assert_eq!(Period::from_str("1h").unwrap(), Period::OneHour);
        assert_eq!(Period::from_str("24h").unwrap(), Period::OneDay);
        assert_eq!(Period::from_str("7d").unwrap(), Period::SevenDays);
        assert_eq!(Period::from_str("30d").unwrap(), Period::ThirtyDays);
        assert!(Period::from_str("90d").is_err());

        let now = Utc.with_ymd_and_hms(2025, 3, 8, 12, 0, 0).unwrap();
        assert_eq!(
            Period::SevenDays.since(now),
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn strategy_counts_round_trip_through_json() {
        let mut counts = HashMap::new();
        counts.insert("2-hop".to_string(), 3i64);
        counts.insert("N-hop".to_string(), 1i64);

        let value = counts_to_json(&counts);
        let back = counts_from_json(value).unwrap();
        assert_eq!(back, counts);
    }

    #[test]
    fn schema_statements_are_idempotent_by_construction() {
        for statement in schema::SCHEMA_STATEMENTS {
            let trimmed = statement.trim_start();
            assert!(
                trimmed.starts_with("CREATE TABLE IF NOT EXISTS")
                    || trimmed.starts_with("CREATE INDEX IF NOT EXISTS"),
                "non-idempotent bootstrap statement: {}",
                &trimmed[..trimmed.len().min(60)]
            );
        }
    }
}
