use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, error};

use crate::db::models::SmaRow;
use crate::error::Result;
use crate::types::{Pair, SmaRecord, Window};

/// Storage port for SMA records, keyed by (pair, day).
#[async_trait]
pub trait SmaRepository: Send + Sync {
    /// Inserts or overwrites every record in one transaction. All-or-nothing.
    async fn upsert_batch(&self, records: &[SmaRecord]) -> Result<()>;

    /// Records with `from <= day <= to`, ascending by day. Every stored record
    /// carries all three windows; `window` selects which series the caller wants.
    async fn find_by_pair_and_range(
        &self,
        pair: Pair,
        from: NaiveDate,
        to: NaiveDate,
        window: Window,
    ) -> Result<Vec<SmaRecord>>;

    async fn distinct_days_with_data(
        &self,
        pair: Pair,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>>;

    async fn last_stored_day(&self, pair: Pair) -> Result<Option<NaiveDate>>;
}

/// Opens (creating if needed) the SQLite file and applies migrations.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

pub struct SqliteSmaRepository {
    pool: SqlitePool,
}

impl SqliteSmaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SmaRepository for SqliteSmaRepository {
    async fn upsert_batch(&self, records: &[SmaRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let updated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let mut tx = self.pool.begin().await?;
        for r in records {
            let result = sqlx::query(
                r#"
                INSERT INTO sma (pair, day, sma20, sma50, sma200, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(pair, day) DO UPDATE SET
                    sma20 = excluded.sma20,
                    sma50 = excluded.sma50,
                    sma200 = excluded.sma200,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(r.pair.as_str())
            .bind(r.day)
            .bind(r.sma20)
            .bind(r.sma50)
            .bind(r.sma200)
            .bind(updated_at)
            .execute(&mut *tx)
            .await;

            if let Err(e) = result {
                error!(pair = %r.pair, day = %r.day, "SMA upsert failed, rolling back batch: {e}");
                return Err(e.into());
            }
        }
        tx.commit().await?;

        debug!(records = records.len(), "SMA batch committed");
        Ok(())
    }

    async fn find_by_pair_and_range(
        &self,
        pair: Pair,
        from: NaiveDate,
        to: NaiveDate,
        window: Window,
    ) -> Result<Vec<SmaRecord>> {
        let rows: Vec<SmaRow> = sqlx::query_as(
            r#"
            SELECT pair, day, sma20, sma50, sma200
            FROM sma
            WHERE pair = ? AND day BETWEEN ? AND ?
            ORDER BY day ASC
            "#,
        )
        .bind(pair.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        debug!(pair = %pair, window = %window, rows = rows.len(), "SMA range query");
        rows.into_iter().map(SmaRecord::try_from).collect()
    }

    async fn distinct_days_with_data(
        &self,
        pair: Pair,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>> {
        let days: Vec<NaiveDate> = sqlx::query_scalar(
            "SELECT DISTINCT day FROM sma WHERE pair = ? AND day BETWEEN ? AND ?",
        )
        .bind(pair.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(days.into_iter().collect())
    }

    async fn last_stored_day(&self, pair: Pair) -> Result<Option<NaiveDate>> {
        let last: Option<NaiveDate> = sqlx::query_scalar("SELECT MAX(day) FROM sma WHERE pair = ?")
            .bind(pair.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(last)
    }
}
