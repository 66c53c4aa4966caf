use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::completeness::{check_completeness, trailing_window};
use crate::config::SMA_LOOKBACK_DAYS;
use crate::db::SmaRepository;
use crate::error::Result;
use crate::fetcher::CandleSource;
use crate::sma::compute_sma;
use crate::types::{CompletenessReport, Pair, SmaPoint, Window};

/// Glue between the candle source, the SMA engine and storage.
#[derive(Clone)]
pub struct SmaService {
    repo: Arc<dyn SmaRepository>,
    candles: Arc<dyn CandleSource>,
}

impl SmaService {
    pub fn new(repo: Arc<dyn SmaRepository>, candles: Arc<dyn CandleSource>) -> Self {
        Self { repo, candles }
    }

    pub fn repo(&self) -> &dyn SmaRepository {
        self.repo.as_ref()
    }

    /// Fetches `[from - 200d, to]`, computes SMAs for `[from, to]` and upserts
    /// them as one batch. Returns the number of records written.
    pub async fn calculate_and_save_for_range(
        &self,
        pair: Pair,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<usize> {
        let fetch_from = from - Duration::days(SMA_LOOKBACK_DAYS);
        let candles = self.candles.fetch(pair, fetch_from, to).await?;
        let records = compute_sma(pair, &candles, from, to)?;

        self.repo.upsert_batch(&records).await?;
        info!(
            pair = %pair,
            candles = candles.len(),
            records = records.len(),
            "SMA range {from}..{to} saved"
        );
        Ok(records.len())
    }

    /// Per-window series for `[from, to]`, ascending by day.
    pub async fn get_sma_series(
        &self,
        pair: Pair,
        from: NaiveDate,
        to: NaiveDate,
        window: Window,
    ) -> Result<Vec<SmaPoint>> {
        let records = self.repo.find_by_pair_and_range(pair, from, to, window).await?;
        debug!(pair = %pair, window = %window, points = records.len(), "SMA series loaded");

        Ok(records
            .iter()
            .map(|r| SmaPoint {
                timestamp: r.day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc().timestamp(),
                value: r.value(window),
            })
            .collect())
    }

    /// Completeness of the trailing 365 days ending yesterday.
    pub async fn check_data_completeness(&self, pair: Pair, today: NaiveDate) -> Result<CompletenessReport> {
        let (from, to) = trailing_window(today);
        check_completeness(self.repo.as_ref(), pair, from, to).await
    }
}
