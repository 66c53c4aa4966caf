use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;

use crate::api::health::{HealthSnapshot, HealthState};
use crate::config::MAX_QUERY_AGE_DAYS;
use crate::error::{AppError, Result};
use crate::service::SmaService;
use crate::types::{Pair, SmaPoint, Window};

#[derive(Clone)]
pub struct ApiState {
    pub service: SmaService,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/v1/:pair/mms", get(get_mms))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query params
// ---------------------------------------------------------------------------

/// Raw query string. Kept as strings so bad input gets our own error body.
#[derive(Debug, Deserialize)]
pub struct MmsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub range: Option<String>,
}

#[derive(Debug, PartialEq)]
pub struct SeriesRequest {
    pub pair: Pair,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub window: Window,
}

/// Validates a series request against `today` (UTC).
pub fn parse_series_request(pair: &str, q: &MmsQuery, today: NaiveDate) -> Result<SeriesRequest> {
    let pair: Pair = pair.parse()?;

    let from = match q.from.as_deref() {
        Some(raw) => unix_to_day("from", raw)?,
        None => return Err(AppError::InvalidTimestamp("'from' is required".to_string())),
    };
    let to = match q.to.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => unix_to_day("to", raw)?,
        None => today - Duration::days(1),
    };

    let window = match q.range.as_deref() {
        Some(raw) => raw.parse::<Window>()?,
        None => {
            return Err(AppError::InvalidWindow("'range' is required, use 20, 50 or 200".to_string()))
        }
    };

    if from < today - Duration::days(MAX_QUERY_AGE_DAYS) {
        return Err(AppError::OutOfRange { max_days: MAX_QUERY_AGE_DAYS });
    }
    if to < from {
        return Err(AppError::InvalidTimestamp("'to' is before 'from'".to_string()));
    }

    Ok(SeriesRequest { pair, from, to, window })
}

fn unix_to_day(name: &str, raw: &str) -> Result<NaiveDate> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.date_naive())
        .ok_or_else(|| AppError::InvalidTimestamp(format!("'{name}' must be a unix timestamp, got '{raw}'")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_mms(
    State(state): State<ApiState>,
    Path(pair): Path<String>,
    Query(params): Query<MmsQuery>,
) -> Result<Json<Vec<SmaPoint>>> {
    let req = parse_series_request(&pair, &params, Utc::now().date_naive())?;
    let points = state
        .service
        .get_sma_series(req.pair, req.from, req.to, req.window)
        .await?;
    Ok(Json(points))
}
