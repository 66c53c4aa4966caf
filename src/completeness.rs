use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};

use crate::config::COMPLETENESS_WINDOW_DAYS;
use crate::db::SmaRepository;
use crate::error::Result;
use crate::types::{CompletenessReport, Pair};

/// Every calendar day in `[from, to]` absent from `present`, ascending.
pub fn missing_days(from: NaiveDate, to: NaiveDate, present: &BTreeSet<NaiveDate>) -> Vec<NaiveDate> {
    from.iter_days()
        .take_while(|d| *d <= to)
        .filter(|d| !present.contains(d))
        .collect()
}

/// The trailing window checked after each run: the 365 days ending yesterday.
pub fn trailing_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(COMPLETENESS_WINDOW_DAYS), today - Duration::days(1))
}

/// Pair-level check: a day counts as present if any SMA row exists for it.
pub async fn check_completeness(
    repo: &dyn SmaRepository,
    pair: Pair,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<CompletenessReport> {
    let present = repo.distinct_days_with_data(pair, from, to).await?;
    Ok(CompletenessReport {
        pair,
        from,
        to,
        missing_days: missing_days(from, to, &present),
    })
}
