//! In-memory doubles for the candle, storage and alert ports.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};

use crate::alert::AlertSink;
use crate::db::SmaRepository;
use crate::error::{AppError, Result};
use crate::fetcher::CandleSource;
use crate::types::{Candle, Pair, SmaRecord, Window};

/// `n` consecutive daily candles ending on `last_day`; `close(i)` for the i-th.
pub fn daily_candles(pair: Pair, last_day: NaiveDate, n: usize, close: impl Fn(usize) -> f64) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let c = close(i);
            Candle {
                pair,
                day: last_day - Duration::days((n - 1 - i) as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRepository {
    rows: Mutex<BTreeMap<(Pair, NaiveDate), SmaRecord>>,
    /// Number of upcoming `upsert_batch` calls that fail.
    pub failing_upserts: AtomicUsize,
    pub upsert_calls: AtomicUsize,
}

impl FakeRepository {
    pub fn seed(&self, records: &[SmaRecord]) {
        let mut rows = self.rows.lock().unwrap();
        for r in records {
            rows.insert((r.pair, r.day), r.clone());
        }
    }

    pub fn records(&self, pair: Pair) -> Vec<SmaRecord> {
        let rows = self.rows.lock().unwrap();
        rows.values().filter(|r| r.pair == pair).cloned().collect()
    }
}

#[async_trait]
impl SmaRepository for FakeRepository {
    async fn upsert_batch(&self, records: &[SmaRecord]) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_upserts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_upserts.store(failing - 1, Ordering::SeqCst);
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        self.seed(records);
        Ok(())
    }

    async fn find_by_pair_and_range(
        &self,
        pair: Pair,
        from: NaiveDate,
        to: NaiveDate,
        _window: Window,
    ) -> Result<Vec<SmaRecord>> {
        if from > to {
            return Ok(Vec::new());
        }
        let rows = self.rows.lock().unwrap();
        Ok(rows.range((pair, from)..=(pair, to)).map(|(_, r)| r.clone()).collect())
    }

    async fn distinct_days_with_data(
        &self,
        pair: Pair,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>> {
        if from > to {
            return Ok(BTreeSet::new());
        }
        let rows = self.rows.lock().unwrap();
        Ok(rows.range((pair, from)..=(pair, to)).map(|((_, d), _)| *d).collect())
    }

    async fn last_stored_day(&self, pair: Pair) -> Result<Option<NaiveDate>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.keys().filter(|(p, _)| *p == pair).map(|(_, d)| *d).max())
    }
}

// ---------------------------------------------------------------------------
// Candle source
// ---------------------------------------------------------------------------

type FetchFn = dyn Fn(Pair, NaiveDate, NaiveDate) -> Result<Vec<Candle>> + Send + Sync;

pub struct ScriptedCandleSource {
    respond: Box<FetchFn>,
    pub calls: Mutex<Vec<(Pair, NaiveDate, NaiveDate)>>,
}

impl ScriptedCandleSource {
    pub fn new(respond: impl Fn(Pair, NaiveDate, NaiveDate) -> Result<Vec<Candle>> + Send + Sync + 'static) -> Self {
        Self { respond: Box::new(respond), calls: Mutex::new(Vec::new()) }
    }

    pub fn failing() -> Self {
        Self::new(|pair, _, _| Err(AppError::Fetch(format!("{pair}: connection refused"))))
    }

    pub fn calls_for(&self, pair: Pair) -> usize {
        self.calls.lock().unwrap().iter().filter(|(p, _, _)| *p == pair).count()
    }
}

#[async_trait]
impl CandleSource for ScriptedCandleSource {
    async fn fetch(&self, pair: Pair, from: NaiveDate, to: NaiveDate) -> Result<Vec<Candle>> {
        self.calls.lock().unwrap().push((pair, from, to));
        (self.respond)(pair, from, to)
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingAlertSink {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingAlertSink {
    pub fn types(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn send(&self, alert_type: &str, message: &str) {
        self.sent.lock().unwrap().push((alert_type.to_string(), message.to_string()));
    }
}
