use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Request types ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct IntervalRequest {
    pub interval_ms: u64,
}

/// Either limit may be omitted to keep its current value.
#[derive(Deserialize)]
pub struct CalendarThresholdsRequest {
    pub low_ivp: Option<f64>,
    pub high_ivp: Option<f64>,
}

#[derive(Deserialize)]
pub struct VolBenchmarkRequest {
    pub ticker: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub benchmark: Option<f64>,
    pub change_pct: Option<f64>,
}

#[derive(Deserialize)]
pub struct SkewBenchmarkRequest {
    pub ticker: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub ppf: Option<f64>,
    pub pcf: Option<f64>,
    pub ccb: Option<f64>,
    pub four_leg_f: Option<f64>,
}

fn default_bucket() -> String {
    "near".to_string()
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// ── Response types ───────────────────────────────────────────────────

#[derive(Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct TableSummary {
    pub name: String,
    pub rows: usize,
}

#[derive(Serialize)]
pub struct IntervalResponse {
    pub interval_ms: u64,
}

#[derive(Serialize)]
pub struct CalendarThresholdsResponse {
    pub low_ivp: f64,
    pub high_ivp: f64,
}

#[derive(Serialize)]
pub struct LoggedInResponse {
    pub logged_in: bool,
    pub username: Option<String>,
}

#[derive(Serialize)]
pub struct ExpiriesResponse {
    pub near: NaiveDate,
    pub next: NaiveDate,
    pub far: NaiveDate,
}
