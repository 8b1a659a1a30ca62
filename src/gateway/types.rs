use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

// ── Instrument row ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    Future,
    CallOption,
    PutOption,
}

impl AssetType {
    /// Exchange shorthand used in display tables.
    pub fn short(&self) -> &'static str {
        match self {
            AssetType::Future => "FUT",
            AssetType::CallOption => "CE",
            AssetType::PutOption => "PE",
        }
    }

    pub fn is_option(&self) -> bool {
        !matches!(self, AssetType::Future)
    }
}

/// One option or future leg, flattened from the token-set payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentRow {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub asset_type: AssetType,
    pub strike_price: f64,
    pub delta: f64,
    pub bid: f64,
    pub ask: f64,
    pub ltp: f64,
    pub bid_iv: Option<f64>,
    pub ask_iv: Option<f64>,
    pub last_iv: f64,
    pub liquidity: f64,
    pub last_trade_time: Option<NaiveDateTime>,
}

impl InstrumentRow {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

// ── Token-set request ────────────────────────────────────────────────

/// Signed delta window per side, sent as strings.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaRange {
    pub pe: [String; 2],
    pub ce: [String; 2],
}

impl DeltaRange {
    pub fn new(pe: (f64, f64), ce: (f64, f64)) -> Self {
        Self {
            pe: [pe.0.to_string(), pe.1.to_string()],
            ce: [ce.0.to_string(), ce.1.to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenSetQuery {
    pub oi: Option<String>,
    pub delta: Option<DeltaRange>,
    pub expiry: Option<Vec<NaiveDate>>,
    pub symbols: Option<Vec<String>>,
    pub strike_diff: Option<Vec<String>>,
    pub strikes: Option<serde_json::Value>,
}

impl TokenSetQuery {
    pub fn new(delta: DeltaRange, expiry: Vec<NaiveDate>) -> Self {
        Self {
            delta: Some(delta),
            expiry: if expiry.is_empty() { None } else { Some(expiry) },
            ..Default::default()
        }
    }
}

// ── Token-set response ───────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TokenSetEntry {
    pub symbol: String,
    pub markers: TokenMarkers,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenMarkers {
    pub expiry: NaiveDate,
    #[serde(default)]
    pub pe_data: Vec<TokenLeg>,
    #[serde(default)]
    pub ce_data: Vec<TokenLeg>,
    #[serde(default)]
    pub fut_data: Vec<TokenLeg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenLeg {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub strike_price: Option<f64>,
    pub pk: TokenKey,
    pub params: TokenParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenKey {
    pub asset_type: AssetType,
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenParams {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub delta: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub ask: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub ltp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub bid_iv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub ask_iv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub last_iv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub liquidity: Option<f64>,
    #[serde(default)]
    pub ltt: Option<String>,
}

/// Flatten the nested token-set payload into one row per leg.
pub fn flatten_token_set(entries: &[TokenSetEntry]) -> Vec<InstrumentRow> {
    let mut rows = Vec::new();
    for entry in entries {
        let markers = &entry.markers;
        let legs = markers
            .fut_data
            .iter()
            .chain(&markers.ce_data)
            .chain(&markers.pe_data);
        for leg in legs {
            let p = &leg.params;
            rows.push(InstrumentRow {
                symbol: entry.symbol.clone(),
                expiry: leg.pk.expiry.unwrap_or(markers.expiry),
                asset_type: leg.pk.asset_type,
                strike_price: leg.strike_price.unwrap_or(0.0),
                delta: p.delta.unwrap_or(0.0),
                bid: p.bid.unwrap_or(0.0),
                ask: p.ask.unwrap_or(0.0),
                ltp: p.ltp.unwrap_or(0.0),
                bid_iv: p.bid_iv,
                ask_iv: p.ask_iv,
                last_iv: p.last_iv.unwrap_or(0.0),
                liquidity: p.liquidity.unwrap_or(f64::INFINITY),
                last_trade_time: p.ltt.as_deref().and_then(parse_timestamp),
            });
        }
    }
    rows
}

/// Accepts `2024-03-01 10:15:00`, ISO `T` form, and fractional seconds.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    let raw = raw.trim().trim_end_matches('Z');
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

// ── ATM-IV response ──────────────────────────────────────────────────

/// Historical IV levels attached to every ATM-IV row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IvStats {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub avg_normal_iv: Option<f64>,
    #[serde(default, rename = "higest_normal_iv", deserialize_with = "lenient_f64")]
    pub highest_normal_iv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lowest_normal_iv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub bench_mark_iv: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentChange {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fut: Option<f64>,
}

/// Per-symbol ATM-IV record: parallel arrays, one slot per listed expiry.
#[derive(Debug, Clone, Deserialize)]
pub struct AtmIvRecord {
    pub symbol: String,
    #[serde(default)]
    pub expiry: Vec<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_f64_vec")]
    pub atm_strike: Vec<Option<f64>>,
    #[serde(default, rename = "type")]
    pub option_type: Vec<Option<String>>,
    #[serde(default, deserialize_with = "lenient_f64_vec")]
    pub delta: Vec<Option<f64>>,
    #[serde(default, deserialize_with = "lenient_f64_vec")]
    pub ltp: Vec<Option<f64>>,
    #[serde(default, deserialize_with = "lenient_f64_vec")]
    pub atm_iv: Vec<Option<f64>>,
    #[serde(default)]
    pub iv_stats: Vec<Option<IvStats>>,
    #[serde(default)]
    pub percent_change: Vec<Option<PercentChange>>,
    #[serde(default, deserialize_with = "lenient_f64_vec")]
    pub ivp: Vec<Option<f64>>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub z_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub hv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fair_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fwd_iv: Option<f64>,
}

// ── Skew response ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SkewRecord {
    pub symbol: String,
    #[serde(default)]
    pub individual: Vec<SkewExpiry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkewExpiry {
    pub expiry: Option<NaiveDate>,
    #[serde(default)]
    pub atm_data: Option<AtmData>,
    #[serde(default)]
    pub pe_pe: Option<SkewLeg>,
    #[serde(default)]
    pub pe_ce: Option<SkewLeg>,
    #[serde(default)]
    pub ce_ce: Option<SkewLeg>,
    #[serde(default)]
    pub four_leg: Option<SkewLeg>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtmData {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub strike_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub iv: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkewLeg {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub z_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub ivp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub skew: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub skew_avg: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub skew_std: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub skew_avg_yest: Option<f64>,
    #[serde(default)]
    pub elements: Vec<SkewElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkewElement {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub delta: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub iv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub strike_price: Option<f64>,
    #[serde(default, rename = "type_")]
    pub option_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub atm_iv_diff: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub atm_strike_diff: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub liquidity: Option<f64>,
}

// ── Auth + expiry responses ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshData {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpiriesResponse {
    pub expiries: Option<Vec<NaiveDate>>,
}

// ── Lenient numbers ──────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Num(f64),
    Str(String),
}

impl RawNumber {
    fn value(self) -> Option<f64> {
        match self {
            RawNumber::Num(v) => Some(v),
            RawNumber::Str(s) => s.trim().parse::<f64>().ok(),
        }
        .filter(|v| v.is_finite())
    }
}

/// Upstream sends some prices as strings; accept number, numeric string or null.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawNumber>::deserialize(deserializer)?.and_then(RawNumber::value))
}

fn lenient_f64_vec<'de, D>(deserializer: D) -> Result<Vec<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Option<RawNumber>>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|v| v.and_then(RawNumber::value))
        .collect())
}
