use chrono::NaiveDate;
use thiserror::Error;
use tracing::debug;

use crate::types::{Candle, Pair, SmaRecord, Window};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SmaError {
    #[error("insufficient history: {have} candles, need at least {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("invalid candle sequence: {0}")]
    InvalidSequence(String),
}

/// Sorts candles by day and collapses duplicate days.
///
/// The sort is stable, so among candles sharing a day the one that arrived last
/// wins. Candles belonging to another pair make the whole sequence invalid.
pub fn normalize_candles(pair: Pair, candles: &[Candle]) -> Result<Vec<Candle>, SmaError> {
    if let Some(foreign) = candles.iter().find(|c| c.pair != pair) {
        return Err(SmaError::InvalidSequence(format!(
            "candle for {} on {} in a {pair} sequence",
            foreign.pair, foreign.day
        )));
    }

    let mut sorted = candles.to_vec();
    sorted.sort_by_key(|c| c.day);

    let mut out: Vec<Candle> = Vec::with_capacity(sorted.len());
    for candle in sorted {
        match out.last_mut() {
            Some(prev) if prev.day == candle.day => *prev = candle,
            _ => out.push(candle),
        }
    }

    if out.len() != candles.len() {
        debug!(
            pair = %pair,
            dropped = candles.len() - out.len(),
            "collapsed duplicate candle days"
        );
    }
    Ok(out)
}

/// Computes SMA20/50/200 for every candle whose day falls in `[from, to]` and
/// which has a full 200-candle window behind it (itself included).
///
/// Lookback is positional over the candles actually supplied; calendar gaps in
/// the input are not filled. Candles before `from` only seed the windows.
pub fn compute_sma(
    pair: Pair,
    candles: &[Candle],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<SmaRecord>, SmaError> {
    if candles.is_empty() {
        return Ok(Vec::new());
    }

    let candles = normalize_candles(pair, candles)?;
    let need = Window::largest().period();
    if candles.len() < need {
        return Err(SmaError::InsufficientHistory { have: candles.len(), need });
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut records = Vec::new();

    for (i, candle) in candles.iter().enumerate().skip(need - 1) {
        if candle.day < from || candle.day > to {
            continue;
        }
        records.push(SmaRecord {
            pair,
            day: candle.day,
            sma20: trailing_mean(&closes, i, Window::W20),
            sma50: trailing_mean(&closes, i, Window::W50),
            sma200: trailing_mean(&closes, i, Window::W200),
        });
    }

    let skipped = candles[..need - 1]
        .iter()
        .filter(|c| c.day >= from && c.day <= to)
        .count();
    if skipped > 0 {
        debug!(pair = %pair, skipped, "in-range candles without a full 200-candle window");
    }

    Ok(records)
}

/// Mean of the `window` closes ending at index `end` (inclusive).
fn trailing_mean(closes: &[f64], end: usize, window: Window) -> f64 {
    let n = window.period();
    let sum: f64 = closes[end + 1 - n..=end].iter().sum();
    sum / n as f64
}
