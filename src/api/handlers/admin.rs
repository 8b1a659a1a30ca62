use std::time::Duration;

use axum::Json;
use axum::extract::State;

use crate::analytics::skew_benchmark::SkewOverride;
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{
    CalendarThresholdsRequest, CalendarThresholdsResponse, ExpiriesResponse, IntervalRequest, IntervalResponse,
    LoggedInResponse, LoginRequest, OkResponse, SkewBenchmarkRequest, VolBenchmarkRequest,
};
use crate::expiry::Bucket;
use crate::gateway::auth::Credentials;

pub async fn set_interval(
    State(state): State<AppState>,
    Json(req): Json<IntervalRequest>,
) -> Result<Json<IntervalResponse>, ApiError> {
    if req.interval_ms == 0 {
        return Err(ApiError::BadRequest("interval_ms must be positive".into()));
    }
    state.inner.interval.send_replace(Duration::from_millis(req.interval_ms));
    tracing::info!(interval_ms = req.interval_ms, "tick interval change requested");
    Ok(Json(IntervalResponse {
        interval_ms: req.interval_ms,
    }))
}

pub async fn set_calendar_thresholds(
    State(state): State<AppState>,
    Json(req): Json<CalendarThresholdsRequest>,
) -> Result<Json<CalendarThresholdsResponse>, ApiError> {
    for v in [req.low_ivp, req.high_ivp].into_iter().flatten() {
        if !(0.0..=100.0).contains(&v) {
            return Err(ApiError::BadRequest(format!("IVP limit {v} outside 0..=100")));
        }
    }
    let config = state.inner.config.update(|c| {
        if let Some(low) = req.low_ivp {
            c.cal_low_ivp_limit = low;
        }
        if let Some(high) = req.high_ivp {
            c.cal_high_ivp_limit = high;
        }
    })?;
    state.inner.calendar.refilter(&config);
    tracing::info!(
        low = config.cal_low_ivp_limit,
        high = config.cal_high_ivp_limit,
        "calendar thresholds updated"
    );
    Ok(Json(CalendarThresholdsResponse {
        low_ivp: config.cal_low_ivp_limit,
        high_ivp: config.cal_high_ivp_limit,
    }))
}

pub async fn override_vol_benchmark(
    State(state): State<AppState>,
    Json(req): Json<VolBenchmarkRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let bucket: Bucket = req.bucket.parse()?;
    state
        .inner
        .vol
        .override_benchmark(bucket, &req.ticker, req.benchmark, req.change_pct)?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn override_skew_benchmark(
    State(state): State<AppState>,
    Json(req): Json<SkewBenchmarkRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let bucket: Bucket = req.bucket.parse()?;
    let update = SkewOverride {
        ppf: req.ppf,
        pcf: req.pcf,
        ccb: req.ccb,
        four_leg_f: req.four_leg_f,
    };
    state.inner.skew_benchmark.override_benchmark(bucket, &req.ticker, update)?;
    Ok(Json(OkResponse { ok: true }))
}

/// Verify against upstream before persisting, so a bad login leaves the
/// cached credentials in place.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let creds = Credentials {
        username: req.username,
        password: req.password,
    };
    state.inner.gateway.verify_credentials(&creds).await?;
    state.inner.credentials.save(&creds)?;
    state.inner.gateway.reset_auth().await;
    tracing::info!(username = %creds.username, "credentials replaced");
    Ok(Json(OkResponse { ok: true }))
}

pub async fn is_logged_in(State(state): State<AppState>) -> Json<LoggedInResponse> {
    let creds = state.inner.credentials.load_optional();
    Json(LoggedInResponse {
        logged_in: creds.is_some(),
        username: creds.map(|c| c.username),
    })
}

pub async fn expiries(State(state): State<AppState>) -> Json<ExpiriesResponse> {
    let b = &state.inner.buckets;
    Json(ExpiriesResponse {
        near: b.near(),
        next: b.next(),
        far: b.far(),
    })
}
