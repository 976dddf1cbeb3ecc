// Idempotent schema bootstrap, executed statement by statement at startup.
// Every statement is safe to re-run against an already-provisioned database.

pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS opportunities (
        id              BIGSERIAL PRIMARY KEY,
        chain_id        BIGINT NOT NULL,
        pool_label      TEXT NOT NULL,
        pool_address    TEXT NOT NULL,
        imbalance_pct   NUMERIC NOT NULL,
        profit_usd      NUMERIC NOT NULL,
        profit_native   NUMERIC NOT NULL,
        reserve0        NUMERIC NOT NULL,
        reserve1        NUMERIC NOT NULL,
        block_number    BIGINT NOT NULL,
        detected_at     TIMESTAMPTZ NOT NULL,
        captured        BOOLEAN NOT NULL DEFAULT FALSE,
        captured_by     TEXT,
        capture_tx_hash TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_opportunities_chain_detected
        ON opportunities (chain_id, detected_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_opportunities_open
        ON opportunities (chain_id, pool_address)
        WHERE NOT captured
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS arbitrage_transactions (
        id               BIGSERIAL PRIMARY KEY,
        chain_id         BIGINT NOT NULL,
        tx_hash          TEXT NOT NULL,
        from_address     TEXT NOT NULL,
        block_number     BIGINT NOT NULL,
        block_timestamp  TIMESTAMPTZ NOT NULL,
        gas_price_gwei   NUMERIC NOT NULL,
        gas_used         BIGINT NOT NULL,
        gas_cost_native  NUMERIC NOT NULL,
        gas_cost_usd     NUMERIC NOT NULL,
        swap_count       INTEGER NOT NULL CHECK (swap_count >= 2),
        strategy         TEXT NOT NULL,
        profit_gross_usd NUMERIC,
        profit_net_usd   NUMERIC,
        roi_pct          NUMERIC,
        pools_involved   TEXT[] NOT NULL,
        tokens_involved  TEXT[] NOT NULL DEFAULT '{}',
        detected_at      TIMESTAMPTZ NOT NULL,
        UNIQUE (chain_id, tx_hash)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_chain_block
        ON arbitrage_transactions (chain_id, block_number DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_chain_detected
        ON arbitrage_transactions (chain_id, detected_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_from_detected
        ON arbitrage_transactions (from_address, detected_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_net_profit
        ON arbitrage_transactions (profit_net_usd DESC)
    "#,
    // co-located archive target for the external retention job
    r#"
    CREATE TABLE IF NOT EXISTS transactions_archive
        (LIKE arbitrage_transactions INCLUDING DEFAULTS INCLUDING CONSTRAINTS)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS arbitrageurs (
        address                 TEXT NOT NULL,
        chain_id                BIGINT NOT NULL,
        first_seen              TIMESTAMPTZ NOT NULL,
        last_seen               TIMESTAMPTZ NOT NULL,
        total_transactions      BIGINT NOT NULL,
        successful_transactions BIGINT NOT NULL,
        failed_transactions     BIGINT NOT NULL,
        total_profit_usd        NUMERIC NOT NULL,
        total_gas_spent_usd     NUMERIC NOT NULL,
        avg_gas_price_gwei      NUMERIC NOT NULL,
        preferred_strategy      TEXT NOT NULL,
        strategy_counts         JSONB NOT NULL DEFAULT '{}'::jsonb,
        PRIMARY KEY (address, chain_id),
        CHECK (total_transactions = successful_transactions + failed_transactions)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chain_stats (
        chain_id                  BIGINT NOT NULL,
        hour_timestamp            TIMESTAMPTZ NOT NULL,
        opportunities_detected    BIGINT NOT NULL,
        opportunities_captured    BIGINT NOT NULL,
        small_opportunities_count BIGINT NOT NULL,
        small_opps_captured       BIGINT NOT NULL,
        transactions_detected     BIGINT NOT NULL,
        unique_arbitrageurs       BIGINT NOT NULL,
        total_profit_usd          NUMERIC NOT NULL,
        capture_rate              NUMERIC NOT NULL,
        small_opp_capture_rate    NUMERIC NOT NULL,
        avg_competition_level     NUMERIC NOT NULL,
        profit_min                NUMERIC,
        profit_max                NUMERIC,
        profit_avg                NUMERIC,
        profit_median             NUMERIC,
        profit_p95                NUMERIC,
        total_gas_spent_usd       NUMERIC NOT NULL,
        PRIMARY KEY (chain_id, hour_timestamp)
    )
    "#,
];
