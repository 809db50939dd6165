//! Versioned schema migrations.
//!
//! A totally-ordered numbered list of named DDL batches, recorded in
//! `schema_migrations` and never rolled back. All unapplied migrations run
//! inside a single write transaction; additive ensure-column steps run after
//! the ordered list so older files pick up later columns without renumbering.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::db::now_ms;

/// One DDL batch.
#[derive(Debug)]
pub struct Migration {
    pub id: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// A named, ordered migration list plus its additive column set.
#[derive(Debug)]
pub struct MigrationSet {
    pub migrations: &'static [Migration],
    /// `(table, column, declaration)` triples added if missing.
    pub ensure_columns: &'static [(&'static str, &'static str, &'static str)],
}

/// Full schema of the primary store.
pub static PRIMARY: &MigrationSet = &MigrationSet {
    migrations: &[
        Migration {
            id: 1,
            name: "create_symbols",
            sql: "
                CREATE TABLE IF NOT EXISTS symbols (
                    symbol        TEXT NOT NULL,
                    venue         TEXT NOT NULL,
                    base_asset    TEXT NOT NULL,
                    quote_asset   TEXT NOT NULL,
                    status        TEXT NOT NULL,
                    contract_type TEXT,
                    delivery_date INTEGER,
                    tick_size     REAL,
                    step_size     REAL,
                    updated_at    INTEGER NOT NULL,
                    PRIMARY KEY (symbol, venue)
                );
            ",
        },
        Migration {
            id: 2,
            name: "create_candles",
            sql: "
                CREATE TABLE IF NOT EXISTS candles_1m (
                    symbol       TEXT NOT NULL,
                    open_time    INTEGER NOT NULL,
                    open         REAL NOT NULL,
                    high         REAL NOT NULL,
                    low          REAL NOT NULL,
                    close        REAL NOT NULL,
                    volume       REAL NOT NULL,
                    quote_volume REAL NOT NULL,
                    trade_count  INTEGER NOT NULL,
                    close_time   INTEGER NOT NULL,
                    PRIMARY KEY (symbol, open_time)
                );
                CREATE INDEX IF NOT EXISTS idx_candles_1m_open_time
                    ON candles_1m (open_time);
                CREATE TABLE IF NOT EXISTS candles_30m (
                    symbol       TEXT NOT NULL,
                    open_time    INTEGER NOT NULL,
                    open         REAL NOT NULL,
                    high         REAL NOT NULL,
                    low          REAL NOT NULL,
                    close        REAL NOT NULL,
                    volume       REAL NOT NULL,
                    quote_volume REAL NOT NULL,
                    trade_count  INTEGER NOT NULL,
                    close_time   INTEGER NOT NULL,
                    PRIMARY KEY (symbol, open_time)
                );
                CREATE INDEX IF NOT EXISTS idx_candles_30m_open_time
                    ON candles_30m (open_time);
                CREATE TABLE IF NOT EXISTS candles_1d (
                    symbol       TEXT NOT NULL,
                    open_time    INTEGER NOT NULL,
                    open         REAL NOT NULL,
                    high         REAL NOT NULL,
                    low          REAL NOT NULL,
                    close        REAL NOT NULL,
                    volume       REAL NOT NULL,
                    quote_volume REAL NOT NULL,
                    trade_count  INTEGER NOT NULL,
                    close_time   INTEGER NOT NULL,
                    PRIMARY KEY (symbol, open_time)
                );
                CREATE INDEX IF NOT EXISTS idx_candles_1d_open_time
                    ON candles_1d (open_time);
            ",
        },
        Migration {
            id: 3,
            name: "create_trade_data",
            sql: "
                CREATE TABLE IF NOT EXISTS trade_data (
                    symbol      TEXT NOT NULL,
                    venue       TEXT NOT NULL,
                    trade_id    INTEGER NOT NULL,
                    timestamp   INTEGER NOT NULL,
                    price       REAL NOT NULL,
                    amount      REAL NOT NULL,
                    direction   TEXT NOT NULL,
                    stream_type TEXT NOT NULL,
                    PRIMARY KEY (symbol, venue, trade_id)
                );
                CREATE INDEX IF NOT EXISTS idx_trade_data_stream
                    ON trade_data (symbol, venue, stream_type);
            ",
        },
        Migration {
            id: 4,
            name: "create_agg_trades",
            sql: "
                CREATE TABLE IF NOT EXISTS agg_trades (
                    symbol         TEXT NOT NULL,
                    venue          TEXT NOT NULL,
                    trade_id       INTEGER NOT NULL,
                    price          REAL NOT NULL,
                    quantity       REAL NOT NULL,
                    first_trade_id INTEGER NOT NULL,
                    last_trade_id  INTEGER NOT NULL,
                    trade_time     INTEGER NOT NULL,
                    is_buyer_maker INTEGER NOT NULL,
                    is_best_match  INTEGER,
                    source         TEXT NOT NULL,
                    PRIMARY KEY (symbol, venue, trade_id)
                );
                CREATE INDEX IF NOT EXISTS idx_agg_trades_time
                    ON agg_trades (symbol, venue, trade_time);
            ",
        },
        Migration {
            id: 5,
            name: "create_liquidation_events",
            sql: "
                CREATE TABLE IF NOT EXISTS liquidation_events (
                    event_id          TEXT PRIMARY KEY,
                    symbol            TEXT NOT NULL,
                    venue             TEXT NOT NULL,
                    side              TEXT NOT NULL,
                    price             REAL NOT NULL,
                    original_quantity REAL NOT NULL,
                    filled_quantity   REAL NOT NULL,
                    event_time        INTEGER NOT NULL,
                    trade_time        INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_liquidation_events_time
                    ON liquidation_events (symbol, event_time);
            ",
        },
        Migration {
            id: 6,
            name: "create_top_trader_ratios",
            sql: "
                CREATE TABLE IF NOT EXISTS top_trader_positions (
                    symbol           TEXT NOT NULL,
                    timestamp        INTEGER NOT NULL,
                    long_short_ratio REAL NOT NULL,
                    long_account     REAL NOT NULL,
                    short_account    REAL NOT NULL,
                    PRIMARY KEY (symbol, timestamp)
                );
                CREATE INDEX IF NOT EXISTS idx_top_trader_positions_time
                    ON top_trader_positions (timestamp);
                CREATE TABLE IF NOT EXISTS top_trader_accounts (
                    symbol           TEXT NOT NULL,
                    timestamp        INTEGER NOT NULL,
                    long_short_ratio REAL NOT NULL,
                    long_account     REAL NOT NULL,
                    short_account    REAL NOT NULL,
                    PRIMARY KEY (symbol, timestamp)
                );
                CREATE INDEX IF NOT EXISTS idx_top_trader_accounts_time
                    ON top_trader_accounts (timestamp);
            ",
        },
        Migration {
            id: 7,
            name: "create_cvd_records",
            sql: "
                CREATE TABLE IF NOT EXISTS cvd_records (
                    aggregator_id TEXT NOT NULL,
                    timestamp     INTEGER NOT NULL,
                    cvd_value     REAL NOT NULL,
                    z_score       REAL NOT NULL,
                    delta         REAL NOT NULL,
                    delta_z_score REAL NOT NULL,
                    PRIMARY KEY (aggregator_id, timestamp)
                );
            ",
        },
        Migration {
            id: 8,
            name: "create_processing_state",
            sql: "
                CREATE TABLE IF NOT EXISTS processing_state (
                    process_name   TEXT NOT NULL,
                    key            TEXT NOT NULL,
                    last_row_id    INTEGER NOT NULL,
                    last_timestamp INTEGER NOT NULL,
                    updated_at     INTEGER NOT NULL,
                    PRIMARY KEY (process_name, key)
                );
            ",
        },
        Migration {
            id: 9,
            name: "create_alert_queue",
            sql: "
                CREATE TABLE IF NOT EXISTS alert_queue (
                    id              INTEGER PRIMARY KEY AUTOINCREMENT,
                    alert_type      TEXT NOT NULL,
                    symbol          TEXT NOT NULL,
                    timestamp       INTEGER NOT NULL,
                    trigger_source  TEXT NOT NULL,
                    trigger_z_score REAL NOT NULL,
                    z_score         REAL NOT NULL,
                    delta           REAL NOT NULL,
                    delta_z_score   REAL NOT NULL,
                    threshold       REAL NOT NULL,
                    payload         TEXT NOT NULL,
                    attempt_count   INTEGER NOT NULL DEFAULT 0,
                    last_error      TEXT,
                    processed_at    INTEGER,
                    created_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_alert_queue_pending
                    ON alert_queue (processed_at, timestamp, id);
            ",
        },
        Migration {
            id: 10,
            name: "create_alert_history",
            sql: "
                CREATE TABLE IF NOT EXISTS alert_history (
                    id         INTEGER PRIMARY KEY AUTOINCREMENT,
                    alert_type TEXT NOT NULL,
                    symbol     TEXT NOT NULL,
                    timestamp  INTEGER NOT NULL,
                    payload    TEXT NOT NULL,
                    sent_at    INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_alert_history_lookup
                    ON alert_history (alert_type, symbol, timestamp);
            ",
        },
    ],
    ensure_columns: &[
        ("symbols", "min_notional", "REAL"),
        ("symbols", "onboard_date", "INTEGER"),
        ("alert_queue", "cumulative_value", "REAL NOT NULL DEFAULT 0"),
    ],
};

/// Reduced schema used by per-asset aggregated-trade stores.
pub static ASSET: &MigrationSet = &MigrationSet {
    migrations: &[Migration {
        id: 1,
        name: "create_agg_trades",
        sql: "
            CREATE TABLE IF NOT EXISTS agg_trades (
                symbol         TEXT NOT NULL,
                venue          TEXT NOT NULL,
                trade_id       INTEGER NOT NULL,
                price          REAL NOT NULL,
                quantity       REAL NOT NULL,
                first_trade_id INTEGER NOT NULL,
                last_trade_id  INTEGER NOT NULL,
                trade_time     INTEGER NOT NULL,
                is_buyer_maker INTEGER NOT NULL,
                is_best_match  INTEGER,
                source         TEXT NOT NULL,
                PRIMARY KEY (symbol, venue, trade_id)
            );
            CREATE INDEX IF NOT EXISTS idx_agg_trades_time
                ON agg_trades (symbol, venue, trade_time);
        ",
    }],
    ensure_columns: &[],
};

/// Applies every unapplied migration of `set`, then the ensure-column steps.
///
/// Running twice is equivalent to running once.
///
/// # Errors
/// Returns an error when DDL fails; already-applied migrations are skipped.
pub async fn run(pool: &SqlitePool, set: &MigrationSet) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id         INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let applied: Vec<i64> = sqlx::query_scalar("SELECT id FROM schema_migrations ORDER BY id")
        .fetch_all(pool)
        .await?;

    let pending: Vec<&Migration> = set
        .migrations
        .iter()
        .filter(|m| !applied.contains(&m.id))
        .collect();

    if !pending.is_empty() {
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
        for migration in &pending {
            sqlx::raw_sql(migration.sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("migration {} ({})", migration.id, migration.name))?;

            sqlx::query("INSERT INTO schema_migrations (id, name, applied_at) VALUES (?, ?, ?)")
                .bind(migration.id)
                .bind(migration.name)
                .bind(now_ms())
                .execute(&mut *tx)
                .await?;

            tracing::info!(id = migration.id, name = migration.name, "applied migration");
        }
        tx.commit().await?;
    }

    for (table, column, decl) in set.ensure_columns {
        ensure_column(pool, table, column, decl).await?;
    }

    Ok(())
}

/// Adds `column` to `table` when absent. Additive only.
async fn ensure_column(pool: &SqlitePool, table: &str, column: &str, decl: &str) -> Result<()> {
    let exists: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;

    if exists == 0 {
        sqlx::raw_sql(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
            .execute(pool)
            .await
            .with_context(|| format!("adding column {table}.{column}"))?;
        tracing::info!(table, column, "added schema column");
    }

    Ok(())
}
