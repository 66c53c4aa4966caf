use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Pair
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Pair {
    Brlbtc,
    Brleth,
}

impl Pair {
    pub const ALL: [Pair; 2] = [Pair::Brlbtc, Pair::Brleth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pair::Brlbtc => "BRLBTC",
            Pair::Brleth => "BRLETH",
        }
    }

    /// Upstream symbol format: `BRLBTC` → `BTC-BRL`.
    pub fn upstream_symbol(&self) -> String {
        format!("{}-BRL", &self.as_str()[3..])
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Pair {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "BRLBTC" => Ok(Pair::Brlbtc),
            "BRLETH" => Ok(Pair::Brleth),
            other => Err(AppError::InvalidPair(format!(
                "'{other}' is not supported, use BRLBTC or BRLETH"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// One of the three fixed SMA lookback lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Window {
    W20,
    W50,
    W200,
}

impl Window {
    /// Number of candles averaged.
    pub fn period(&self) -> usize {
        match self {
            Window::W20 => 20,
            Window::W50 => 50,
            Window::W200 => 200,
        }
    }

    /// The largest window; also the minimum history needed to emit anything.
    pub fn largest() -> Window {
        Window::W200
    }

    pub fn from_period(period: u32) -> Option<Window> {
        match period {
            20 => Some(Window::W20),
            50 => Some(Window::W50),
            200 => Some(Window::W200),
            _ => None,
        }
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.period())
    }
}

impl std::str::FromStr for Window {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(Window::from_period)
            .ok_or_else(|| AppError::InvalidWindow(format!("'{s}' is not one of 20, 50 or 200")))
    }
}

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// Daily OHLCV bar as returned by the candle source.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub pair: Pair,
    pub day: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ---------------------------------------------------------------------------
// SMA record
// ---------------------------------------------------------------------------

/// SMA values for one pair on one day. Keyed by (pair, day) in storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmaRecord {
    pub pair: Pair,
    pub day: NaiveDate,
    pub sma20: f64,
    pub sma50: f64,
    pub sma200: f64,
}

impl SmaRecord {
    pub fn value(&self, window: Window) -> f64 {
        match window {
            Window::W20 => self.sma20,
            Window::W50 => self.sma50,
            Window::W200 => self.sma200,
        }
    }
}

/// A single point of the per-window series served by the query API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmaPoint {
    /// Unix seconds at UTC midnight of the day.
    pub timestamp: i64,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Completeness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CompletenessReport {
    pub pair: Pair,
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Ascending calendar days with no stored SMA row.
    pub missing_days: Vec<NaiveDate>,
}

impl CompletenessReport {
    pub fn is_complete(&self) -> bool {
        self.missing_days.is_empty()
    }
}
