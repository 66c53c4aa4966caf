//! Database row types for the `sma` table (see migrations/0001_create_sma.sql).
//! Days are bound as `NaiveDate` and stored as `YYYY-MM-DD` text.

use chrono::NaiveDate;

use crate::error::AppError;
use crate::types::{Pair, SmaRecord};

#[derive(Debug, sqlx::FromRow)]
pub struct SmaRow {
    pub pair: String,
    pub day: NaiveDate,
    pub sma20: f64,
    pub sma50: f64,
    pub sma200: f64,
}

impl TryFrom<SmaRow> for SmaRecord {
    type Error = AppError;

    fn try_from(row: SmaRow) -> Result<Self, Self::Error> {
        Ok(SmaRecord {
            pair: row.pair.parse::<Pair>()?,
            day: row.day,
            sma20: row.sma20,
            sma50: row.sma50,
            sma200: row.sma200,
        })
    }
}
