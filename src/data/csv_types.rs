use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::gateway::types::AssetType;

/// `iv_stats.csv`: per-symbol move thresholds and historical IV levels.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IvStatsRow {
    pub symbol: String,
    pub long_move: Option<f64>,
    pub full_move: Option<f64>,
    pub fut_close: Option<f64>,
    #[serde(default)]
    pub avg_normal_iv: Option<f64>,
    #[serde(default, rename = "higest_normal_iv")]
    pub highest_normal_iv: Option<f64>,
    #[serde(default)]
    pub lowest_normal_iv: Option<f64>,
    #[serde(default)]
    pub bench_mark_iv: Option<f64>,
}

/// `forward_vol_expiry_{1,2}.csv`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ForwardVolRow {
    pub symbol: String,
    pub forward_vol: f64,
}

/// `correlation.csv`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorrelationRow {
    pub stock_1: String,
    pub stock_2: String,
    pub avg_ratio: f64,
}

/// `skew_expiry_{1,2}.csv`: operator-maintained skew benchmarks.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SkewBenchmarkRow {
    pub symbol: String,
    pub ppf: Option<f64>,
    pub pcf: Option<f64>,
    pub ccb: Option<f64>,
    #[serde(rename = "4l_f")]
    pub four_leg_f: Option<f64>,
}

/// `avg_risk_prem.csv`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RiskPremiumRow {
    pub symbol: String,
    pub avg_risk_prem: Option<f64>,
}

/// `confirm_results.csv` / `expected_results.csv`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResultDateRow {
    pub symbol: String,
    pub date: NaiveDate,
}

/// `latest_atr_per_symbol.csv`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AtrRow {
    pub symbol: String,
    #[serde(rename = "ATR_pct")]
    pub atr_pct: f64,
}

/// `strike_diff.csv`: listed strike increment per underlying.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StrikeDiffRow {
    pub symbol: String,
    pub strike_diff: f64,
}

/// `intraday_iv_surface.csv` / `eod_iv_surface.csv`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SurfaceRefRow {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub asset_type: AssetType,
    pub strike_offset: i64,
    pub ema_bid_iv: Option<f64>,
    pub ema_ask_iv: Option<f64>,
    pub avg_bid_iv: Option<f64>,
    pub avg_ask_iv: Option<f64>,
}
