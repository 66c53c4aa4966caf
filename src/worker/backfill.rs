use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Months, NaiveDate, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alert::{AlertKind, AlertSink};
use crate::api::health::HealthState;
use crate::config::{Config, ALERT_MAX_LISTED_DAYS};
use crate::service::SmaService;
use crate::types::{CompletenessReport, Pair};

#[derive(Debug, Clone)]
pub struct BackfillSettings {
    pub pairs: Vec<Pair>,
    pub retry_attempts: u32,
    pub retry_interval: StdDuration,
}

impl From<&Config> for BackfillSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            pairs: cfg.pairs.clone(),
            retry_attempts: cfg.retry_attempts,
            retry_interval: cfg.retry_interval,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    /// Backfill succeeded on attempt `attempts`.
    Updated { records: usize, attempts: u32 },
    /// Nothing between the last stored day and yesterday.
    UpToDate,
    /// Every attempt failed; an `update_failure` alert was sent.
    Failed { attempts: u32, error: String },
    /// Stopped by the cancellation token.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PairReport {
    pub pair: Pair,
    pub outcome: PairOutcome,
    /// `None` when the check itself failed or the pair was cancelled.
    pub completeness: Option<CompletenessReport>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub pairs: Vec<PairReport>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p.outcome, PairOutcome::Failed { .. }))
            .count()
    }

    pub fn incomplete(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| p.completeness.as_ref().is_some_and(|c| !c.is_complete()))
            .count()
    }
}

/// Range to backfill: the day after the last stored one (or one year back when
/// nothing is stored) through yesterday. Empty when `from > to`.
pub fn determine_range(last_stored: Option<NaiveDate>, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let to = today - Duration::days(1);
    let from = match last_stored {
        Some(last) => last + Duration::days(1),
        None => today
            .checked_sub_months(Months::new(12))
            .unwrap_or(today - Duration::days(365)),
    };
    (from, to)
}

/// Daily backfill: brings each configured pair up to yesterday, then checks
/// the trailing year for gaps. Pairs run one after another.
pub struct BackfillWorker {
    service: SmaService,
    alerts: Arc<dyn AlertSink>,
    health: Arc<HealthState>,
    settings: BackfillSettings,
}

impl BackfillWorker {
    pub fn new(
        service: SmaService,
        alerts: Arc<dyn AlertSink>,
        health: Arc<HealthState>,
        settings: BackfillSettings,
    ) -> Self {
        Self { service, alerts, health, settings }
    }

    /// Runs immediately, then once per `every`, until `cancel` fires.
    pub async fn run_scheduled(self, every: StdDuration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        // A run can outlast the interval while it backs off; don't burst afterwards.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Backfill scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            self.run_once(Utc::now().date_naive(), &cancel).await;
        }
    }

    /// One pass over all pairs. Per-pair failures are alerted, never returned.
    pub async fn run_once(&self, today: NaiveDate, cancel: &CancellationToken) -> RunReport {
        self.health.run_started();
        info!(pairs = self.settings.pairs.len(), %today, "Backfill run started");

        let mut report = RunReport::default();
        for &pair in &self.settings.pairs {
            if cancel.is_cancelled() {
                warn!(pair = %pair, "Backfill run cancelled before pair started");
                break;
            }
            report.pairs.push(self.process_pair(pair, today, cancel).await);
        }

        let failed = report.failed();
        let incomplete = report.incomplete();
        self.health
            .run_finished(Utc::now().timestamp(), failed as u64, incomplete as u64);
        info!(
            processed = report.pairs.len(),
            failed,
            incomplete,
            "Backfill run complete: {} pairs processed, {failed} failed, {incomplete} incomplete",
            report.pairs.len(),
        );
        report
    }

    async fn process_pair(&self, pair: Pair, today: NaiveDate, cancel: &CancellationToken) -> PairReport {
        let outcome = self.backfill_pair(pair, today, cancel).await;
        if outcome == PairOutcome::Cancelled {
            return PairReport { pair, outcome, completeness: None };
        }
        let completeness = self.verify_completeness(pair, today).await;
        PairReport { pair, outcome, completeness }
    }

    async fn backfill_pair(&self, pair: Pair, today: NaiveDate, cancel: &CancellationToken) -> PairOutcome {
        let last_stored = match self.service.repo().last_stored_day(pair).await {
            Ok(last) => last,
            Err(e) => {
                error!(pair = %pair, "Could not read last stored day: {e}");
                self.alert(AlertKind::UpdateFailure, format!("Daily update failed for {pair}: {e}"))
                    .await;
                return PairOutcome::Failed { attempts: 0, error: e.to_string() };
            }
        };

        let (from, to) = determine_range(last_stored, today);
        if from > to {
            info!(pair = %pair, last_stored = ?last_stored, "Already up to date");
            return PairOutcome::UpToDate;
        }

        let max_attempts = self.settings.retry_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                info!(pair = %pair, attempt, "Retrying in {:?}", self.settings.retry_interval);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        warn!(pair = %pair, attempt, "Backfill cancelled during backoff");
                        return PairOutcome::Cancelled;
                    }
                    _ = tokio::time::sleep(self.settings.retry_interval) => {}
                }
            }
            if cancel.is_cancelled() {
                return PairOutcome::Cancelled;
            }

            match self.service.calculate_and_save_for_range(pair, from, to).await {
                Ok(records) => {
                    info!(pair = %pair, attempt, records, "Daily update succeeded");
                    return PairOutcome::Updated { records, attempts: attempt };
                }
                Err(e) => {
                    warn!(pair = %pair, attempt, max_attempts, "Daily update attempt failed: {e}");
                    last_error = e.to_string();
                }
            }
        }

        error!(pair = %pair, attempts = max_attempts, "Daily update failed after all attempts");
        self.alert(
            AlertKind::UpdateFailure,
            format!("Daily update failed for {pair} after {max_attempts} attempts: {last_error}"),
        )
        .await;
        PairOutcome::Failed { attempts: max_attempts, error: last_error }
    }

    async fn verify_completeness(&self, pair: Pair, today: NaiveDate) -> Option<CompletenessReport> {
        let report = match self.service.check_data_completeness(pair, today).await {
            Ok(r) => r,
            Err(e) => {
                error!(pair = %pair, "Completeness check failed: {e}");
                return None;
            }
        };

        if !report.is_complete() {
            warn!(pair = %pair, missing = report.missing_days.len(), "Incomplete data detected");
            self.alert(AlertKind::IncompleteData, incomplete_message(&report)).await;
        }
        Some(report)
    }

    async fn alert(&self, kind: AlertKind, message: String) {
        self.alerts.send(kind.as_str(), &message).await;
    }
}

fn incomplete_message(report: &CompletenessReport) -> String {
    let total = report.missing_days.len();
    let listed: Vec<String> = report
        .missing_days
        .iter()
        .take(ALERT_MAX_LISTED_DAYS)
        .map(|d| d.to_string())
        .collect();
    let more = total.saturating_sub(listed.len());
    let suffix = if more > 0 { format!(" (+{more} more)") } else { String::new() };
    format!(
        "Incomplete data for {}: {total} missing day(s) between {} and {}: {}{suffix}",
        report.pair,
        report.from,
        report.to,
        listed.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completeness::trailing_window;
    use crate::fetcher::CandleSource;
    use crate::testutil::{daily_candles, FakeRepository, RecordingAlertSink, ScriptedCandleSource};
    use crate::types::SmaRecord;
    use std::sync::atomic::Ordering;
    use tokio::time::Instant;

    const HOUR: StdDuration = StdDuration::from_secs(3600);

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 15).unwrap()
    }

    fn yesterday() -> NaiveDate {
        today() - Duration::days(1)
    }

    struct Harness {
        repo: Arc<FakeRepository>,
        source: Arc<ScriptedCandleSource>,
        alerts: Arc<RecordingAlertSink>,
        health: Arc<HealthState>,
        worker: BackfillWorker,
    }

    fn harness(source: ScriptedCandleSource, pairs: Vec<Pair>) -> Harness {
        let repo = Arc::new(FakeRepository::default());
        let source = Arc::new(source);
        let alerts = Arc::new(RecordingAlertSink::default());
        let health = Arc::new(HealthState::new());
        let service = SmaService::new(repo.clone(), source.clone() as Arc<dyn CandleSource>);
        let settings = BackfillSettings { pairs, retry_attempts: 5, retry_interval: HOUR };
        let worker = BackfillWorker::new(service, alerts.clone(), health.clone(), settings);
        Harness { repo, source, alerts, health, worker }
    }

    fn full_year(pair: Pair) -> Vec<SmaRecord> {
        let (from, to) = trailing_window(today());
        from.iter_days()
            .take_while(|d| *d <= to)
            .map(|day| SmaRecord { pair, day, sma20: 1.0, sma50: 1.0, sma200: 1.0 })
            .collect()
    }

    #[test]
    fn range_starts_one_year_back_or_after_last_stored_day() {
        let (from, to) = determine_range(None, today());
        assert_eq!(from, NaiveDate::from_ymd_opt(2024, 5, 15).unwrap());
        assert_eq!(to, yesterday());

        let last = NaiveDate::from_ymd_opt(2025, 5, 10).unwrap();
        assert_eq!(determine_range(Some(last), today()).0, NaiveDate::from_ymd_opt(2025, 5, 11).unwrap());

        let (from, to) = determine_range(Some(yesterday()), today());
        assert!(from > to);
    }

    #[tokio::test]
    async fn fresh_pair_stores_last_51_days_of_250_candles() {
        let h = harness(
            ScriptedCandleSource::new(|pair, _, to| {
                Ok(daily_candles(pair, to, 250, |i| 100_000.0 + i as f64))
            }),
            vec![Pair::Brlbtc],
        );

        let report = h.worker.run_once(today(), &CancellationToken::new()).await;

        assert_eq!(report.pairs[0].outcome, PairOutcome::Updated { records: 51, attempts: 1 });
        let stored = h.repo.records(Pair::Brlbtc);
        assert_eq!(stored.len(), 51);
        assert_eq!(stored[0].day, yesterday() - Duration::days(50));

        let last = stored.last().unwrap();
        assert_eq!(last.day, yesterday());
        assert!((last.sma20 - 100_239.5).abs() < 1e-6);
        assert!((last.sma50 - 100_224.5).abs() < 1e-6);
        assert!((last.sma200 - 100_149.5).abs() < 1e-6);

        // Fetch covered the lookback buffer before the one-year start.
        let calls = h.source.calls.lock().unwrap().clone();
        let (from, _) = determine_range(None, today());
        assert_eq!(calls, vec![(Pair::Brlbtc, from - Duration::days(200), yesterday())]);

        // Only 51 of the trailing 365 days exist, so the gap alert fires.
        assert_eq!(h.alerts.types(), vec!["incomplete_data".to_string()]);
        let (_, message) = h.alerts.sent.lock().unwrap()[0].clone();
        assert!(message.contains("314 missing day(s)"), "{message}");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_alert_once_and_move_to_next_pair() {
        let h = harness(
            ScriptedCandleSource::new(|pair, _, to| match pair {
                Pair::Brlbtc => Err(crate::error::AppError::Fetch("upstream down".into())),
                Pair::Brleth => Ok(daily_candles(pair, to, 600, |_| 10.0)),
            }),
            vec![Pair::Brlbtc, Pair::Brleth],
        );

        let started = Instant::now();
        let report = h.worker.run_once(today(), &CancellationToken::new()).await;
        let elapsed = started.elapsed();

        assert_eq!(h.source.calls_for(Pair::Brlbtc), 5);
        assert!(elapsed >= 4 * HOUR && elapsed < 4 * HOUR + StdDuration::from_secs(60), "{elapsed:?}");
        assert!(matches!(report.pairs[0].outcome, PairOutcome::Failed { attempts: 5, .. }));

        let failures: Vec<_> = h
            .alerts
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == "update_failure")
            .map(|(_, m)| m.clone())
            .collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("BRLBTC"));

        // The failed pair is still verified, and the next pair still runs.
        assert!(report.pairs[0].completeness.is_some());
        assert_eq!(h.source.calls_for(Pair::Brleth), 1);
        assert!(matches!(report.pairs[1].outcome, PairOutcome::Updated { attempts: 1, .. }));
        assert_eq!(h.health.last_failed_pairs.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_history_consumes_the_retry_budget() {
        let h = harness(
            ScriptedCandleSource::new(|pair, _, to| Ok(daily_candles(pair, to, 120, |_| 1.0))),
            vec![Pair::Brleth],
        );

        let report = h.worker.run_once(today(), &CancellationToken::new()).await;

        assert_eq!(h.source.calls_for(Pair::Brleth), 5);
        match &report.pairs[0].outcome {
            PairOutcome::Failed { error, .. } => assert!(error.contains("insufficient history")),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(h.alerts.types().contains(&"update_failure".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn persist_failure_reruns_the_whole_unit() {
        let h = harness(
            ScriptedCandleSource::new(|pair, _, to| Ok(daily_candles(pair, to, 600, |i| i as f64))),
            vec![Pair::Brlbtc],
        );
        h.repo.seed(&full_year(Pair::Brlbtc)[..300]);
        h.repo.failing_upserts.store(2, Ordering::SeqCst);

        let report = h.worker.run_once(today(), &CancellationToken::new()).await;

        assert!(matches!(report.pairs[0].outcome, PairOutcome::Updated { attempts: 3, .. }));
        assert_eq!(h.source.calls_for(Pair::Brlbtc), 3);
        assert_eq!(h.repo.upsert_calls.load(Ordering::SeqCst), 3);
        assert!(h.alerts.types().is_empty(), "{:?}", h.alerts.types());
    }

    #[tokio::test]
    async fn up_to_date_pair_skips_fetch_but_is_verified() {
        let h = harness(ScriptedCandleSource::failing(), vec![Pair::Brlbtc]);
        h.repo.seed(&full_year(Pair::Brlbtc));

        let report = h.worker.run_once(today(), &CancellationToken::new()).await;

        assert_eq!(report.pairs[0].outcome, PairOutcome::UpToDate);
        assert_eq!(h.source.calls_for(Pair::Brlbtc), 0);
        assert!(report.pairs[0].completeness.as_ref().unwrap().is_complete());
        assert!(h.alerts.types().is_empty());
    }

    #[tokio::test]
    async fn gap_in_stored_history_raises_incomplete_data() {
        let h = harness(ScriptedCandleSource::failing(), vec![Pair::Brleth]);
        let mut year = full_year(Pair::Brleth);
        let gap = year.remove(100).day;
        h.repo.seed(&year);

        let report = h.worker.run_once(today(), &CancellationToken::new()).await;

        let completeness = report.pairs[0].completeness.clone().unwrap();
        assert_eq!(completeness.missing_days, vec![gap]);
        let sent = h.alerts.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "incomplete_data");
        assert!(sent[0].1.contains(&gap.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_the_run() {
        let h = harness(ScriptedCandleSource::failing(), vec![Pair::Brlbtc, Pair::Brleth]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_secs(1800)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = h.worker.run_once(today(), &cancel).await;

        assert!(started.elapsed() < HOUR);
        assert_eq!(report.pairs.len(), 1);
        assert_eq!(report.pairs[0].outcome, PairOutcome::Cancelled);
        assert_eq!(h.source.calls_for(Pair::Brlbtc), 1);
        assert_eq!(h.source.calls_for(Pair::Brleth), 0);
        assert!(h.alerts.types().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_immediately_then_every_interval() {
        let h = harness(ScriptedCandleSource::new(|_, _, _| Ok(Vec::new())), vec![Pair::Brlbtc]);
        let health = h.health.clone();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(25 * HOUR).await;
            trigger.cancel();
        });

        h.worker.run_scheduled(24 * HOUR, cancel).await;

        assert_eq!(health.runs_completed.load(Ordering::Relaxed), 2);
        assert!(!health.running.load(Ordering::Relaxed));
    }
}
