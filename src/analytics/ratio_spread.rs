use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use super::atm_iv::{self, AtmIvRow};
use super::calendar;
use super::{Analytic, AnalyticDeps, INDEX_SYMBOLS, TickContext, index_by, is_index, ratio, scale, sort_desc_by};
use crate::config::ScanConfig;
use crate::data::write_csv_once;
use crate::error::Result;
use crate::gateway::types::{AssetType, InstrumentRow};
use crate::store::{SnapshotStore, Table};

pub const BULL_CALL: &str = "ratio_spread.bull_call";
pub const BEAR_PUT: &str = "ratio_spread.bear_put";
pub const INDEX_STRADDLE: &str = "ratio_spread.index_straddle";

/// Largest distance from the target delta a near leg may have.
const NEAR_DELTA_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioSpreadRow {
    pub symbol: String,
    pub pct_change: Option<f64>,
    pub ivp: Option<f64>,
    pub strike_price: f64,
    pub opt_ltp: f64,
    pub delta: f64,
    pub ltp: Option<f64>,
    pub strike_price_far: f64,
    pub opt_ltp_far: f64,
    pub delta_far: f64,
    pub value: f64,
    pub sort_val: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StraddleRow {
    pub symbol: String,
    pub expiry: String,
    pub strike_price: f64,
    pub ltp: f64,
    pub dte: i64,
}

/// One side of the scan: which legs, how far apart, and how many far legs
/// are sold per near leg.
#[derive(Debug, Clone, Copy)]
pub struct SpreadShape {
    pub kind: AssetType,
    pub target_delta: f64,
    pub min_delta_diff: f64,
    pub ratio: f64,
}

impl SpreadShape {
    pub fn bull_call(config: &ScanConfig) -> Self {
        Self {
            kind: AssetType::CallOption,
            target_delta: (config.bcrs_call_strike_1_delta_low + config.bcrs_call_strike_1_delta_high) / 2.0,
            min_delta_diff: config.bcrs_call_strike_2_min_delta_diff,
            ratio: config.bcrs_call_ratio,
        }
    }

    pub fn bear_put(config: &ScanConfig) -> Self {
        Self {
            kind: AssetType::PutOption,
            target_delta: (config.bprs_put_strike_1_delta_low + config.bprs_put_strike_1_delta_high) / 2.0,
            min_delta_diff: config.bprs_put_strike_2_min_delta_diff,
            ratio: config.bprs_put_ratio,
        }
    }

    /// Delta distance from near to far, positive when moving out of the money.
    fn delta_gap(&self, near: f64, far: f64) -> f64 {
        match self.kind {
            AssetType::PutOption => far - near,
            _ => near - far,
        }
    }
}

/// Far leg of `symbol` with the smallest gap that still clears the minimum.
fn far_leg<'a>(legs: &[&'a InstrumentRow], symbol: &str, near_delta: f64, shape: &SpreadShape) -> Option<&'a InstrumentRow> {
    let mut best: Option<(&InstrumentRow, f64)> = None;
    for leg in legs.iter().copied().filter(|l| l.symbol == symbol) {
        let gap = shape.delta_gap(near_delta, leg.delta);
        if gap < shape.min_delta_diff {
            continue;
        }
        if best.is_none_or(|(_, g)| gap < g) {
            best = Some((leg, gap));
        }
    }
    best.map(|(leg, _)| leg)
}

/// Ratio spreads for one side over near-expiry stock legs. Index legs are
/// left to [`index_straddles`]; symbols without a qualifying far leg are
/// dropped.
pub fn scan(
    token_set: &[InstrumentRow],
    root: &[AtmIvRow],
    near_expiry: NaiveDate,
    liquidity_limit: f64,
    shape: &SpreadShape,
) -> Vec<RatioSpreadRow> {
    let mut legs: Vec<&InstrumentRow> = token_set
        .iter()
        .filter(|l| {
            l.asset_type == shape.kind
                && l.expiry == near_expiry
                && l.liquidity <= liquidity_limit
                && !is_index(&l.symbol)
        })
        .collect();
    legs.sort_by(|a, b| {
        a.symbol.cmp(&b.symbol).then(
            (a.delta - shape.target_delta)
                .abs()
                .total_cmp(&(b.delta - shape.target_delta).abs()),
        )
    });

    let quotes = index_by(root, |r| r.symbol.as_str());
    let mut rows = Vec::new();
    let mut last_symbol: Option<&str> = None;

    for near in legs.iter().copied() {
        if last_symbol == Some(near.symbol.as_str()) {
            continue;
        }
        if (near.delta - shape.target_delta).abs() > NEAR_DELTA_TOLERANCE {
            continue;
        }
        last_symbol = Some(near.symbol.as_str());

        let Some(far) = far_leg(&legs, &near.symbol, near.delta, shape) else {
            continue;
        };
        let quote = quotes.get(near.symbol.as_str());
        let ltp = quote.map(|q| q.ltp);
        let value = far.mid() * shape.ratio - near.mid();
        rows.push(RatioSpreadRow {
            symbol: near.symbol.clone(),
            pct_change: quote.map(|q| q.pct_change),
            ivp: quote.and_then(|q| scale(q.ivp, 100.0)),
            strike_price: near.strike_price,
            opt_ltp: near.mid(),
            delta: near.delta,
            ltp,
            strike_price_far: far.strike_price,
            opt_ltp_far: far.mid(),
            delta_far: far.delta,
            value,
            sort_val: ratio(Some(value), ltp),
        });
    }

    sort_desc_by(&mut rows, |r| r.sort_val);
    rows
}

/// ATM straddle price per index and expiry: the strike closest to the
/// underlying, CE and PE mids summed.
pub fn index_straddles(token_set: &[InstrumentRow], root: &[AtmIvRow], today: NaiveDate) -> Vec<StraddleRow> {
    let mut rows = Vec::new();
    for symbol in INDEX_SYMBOLS {
        let mut expiries: Vec<NaiveDate> = root
            .iter()
            .filter(|r| r.symbol == symbol)
            .map(|r| r.expiry)
            .collect();
        expiries.sort();
        expiries.dedup();

        for expiry in expiries {
            let Some(quote) = root.iter().find(|r| r.symbol == symbol && r.expiry == expiry) else {
                continue;
            };
            let legs: Vec<&InstrumentRow> = token_set
                .iter()
                .filter(|l| l.symbol == symbol && l.expiry == expiry && l.asset_type.is_option())
                .collect();

            let mut atm: Option<(f64, f64)> = None;
            for leg in &legs {
                let gap = (leg.strike_price - quote.ltp).abs();
                if atm.is_none_or(|(_, g)| gap < g) {
                    atm = Some((leg.strike_price, gap));
                }
            }
            let Some((strike, _)) = atm else {
                continue;
            };

            let ltp = legs.iter().filter(|l| l.strike_price == strike).map(|l| l.mid()).sum();
            rows.push(StraddleRow {
                symbol: symbol.to_string(),
                expiry: expiry.format("%d-%b-%Y").to_string(),
                strike_price: strike,
                ltp,
                dte: (expiry - today).num_days() + 1,
            });
        }
    }
    rows
}

// ── Analytic ─────────────────────────────────────────────────────────

/// Bull-call and bear-put ratio spreads plus index straddles, priced from
/// the calendar scan's token set.
pub struct RatioSpread {
    store: Arc<SnapshotStore>,
    snapshot_dir: PathBuf,
    bull_call: Table<RatioSpreadRow>,
    bear_put: Table<RatioSpreadRow>,
    straddle: Table<StraddleRow>,
}

impl RatioSpread {
    pub fn new(deps: &AnalyticDeps) -> Self {
        let store = &deps.store;
        Self {
            store: Arc::clone(store),
            snapshot_dir: deps.assets.ratio_spread_dir(),
            bull_call: store.table(BULL_CALL),
            bear_put: store.table(BEAR_PUT),
            straddle: store.table(INDEX_STRADDLE),
        }
    }

    fn save_once(&self, today: NaiveDate, side: &str, rows: &[RatioSpreadRow]) {
        let path = self.snapshot_dir.join(format!("{today}_{side}_ratio_spread.csv"));
        match write_csv_once(&path, rows) {
            Ok(true) => tracing::info!(path = %path.display(), rows = rows.len(), "ratio spread snapshot saved"),
            Ok(false) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "ratio spread snapshot failed"),
        }
    }
}

#[async_trait]
impl Analytic for RatioSpread {
    fn name(&self) -> &'static str {
        "ratio_spread"
    }

    async fn update(&self, ctx: &TickContext) -> Result<()> {
        let config = &ctx.config;
        let save_after = config.csv_save_time()?;
        let token_set = self.store.read::<InstrumentRow>(calendar::TOKEN_SET);
        let near = self.store.read::<AtmIvRow>(atm_iv::NEAR);
        let all = self.store.read::<AtmIvRow>(atm_iv::ALL);

        let limit = config.bcrs_liquidity_limit();
        let near_expiry = ctx.buckets.near();
        let bull_call = scan(&token_set, &near, near_expiry, limit, &SpreadShape::bull_call(config));
        let bear_put = scan(&token_set, &near, near_expiry, limit, &SpreadShape::bear_put(config));
        let straddles = index_straddles(&token_set, &all, ctx.today());

        if ctx.now.time() >= save_after {
            self.save_once(ctx.today(), "bull_call", &bull_call);
            self.save_once(ctx.today(), "bear_put", &bear_put);
        }

        self.bull_call.publish(bull_call);
        self.bear_put.publish(bear_put);
        self.straddle.publish(straddles);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn leg(symbol: &str, kind: AssetType, strike: f64, delta: f64, bid: f64, ask: f64) -> InstrumentRow {
        InstrumentRow {
            symbol: symbol.into(),
            expiry: d(3, 28),
            asset_type: kind,
            strike_price: strike,
            delta,
            bid,
            ask,
            ltp: bid,
            bid_iv: None,
            ask_iv: None,
            last_iv: 0.2,
            liquidity: 0.01,
            last_trade_time: None,
        }
    }

    fn root(symbol: &str, ltp: f64, expiry: NaiveDate) -> AtmIvRow {
        AtmIvRow {
            symbol: symbol.into(),
            expiry,
            atm_strike: None,
            option_type: None,
            delta: None,
            ltp,
            atm_iv: 0.3,
            ivp: Some(0.5),
            iv_stats: None,
            pct_change: 0.4,
            z_score: None,
            hv: None,
            fair_price: None,
            fwd_iv: None,
            days_theta: None,
        }
    }

    fn call_shape() -> SpreadShape {
        SpreadShape::bull_call(&ScanConfig::default())
    }

    #[test]
    fn picks_nearest_far_leg_past_minimum() {
        let legs = vec![
            leg("ABC", AssetType::CallOption, 100.0, 0.52, 4.0, 4.2),
            leg("ABC", AssetType::CallOption, 105.0, 0.40, 2.0, 2.2),
            leg("ABC", AssetType::CallOption, 110.0, 0.28, 1.4, 1.6),
            leg("ABC", AssetType::CallOption, 115.0, 0.15, 0.6, 0.8),
        ];
        let rows = scan(&legs, &[root("ABC", 100.0, d(3, 28))], d(3, 28), 999.0, &call_shape());
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.strike_price, 100.0);
        assert_eq!(r.strike_price_far, 110.0);
        assert!((r.value - (1.5 * 2.0 - 4.1)).abs() < 1e-9);
        assert_eq!(r.ivp, Some(50.0));
    }

    #[test]
    fn symbol_without_far_leg_is_dropped() {
        let legs = vec![
            leg("ABC", AssetType::CallOption, 100.0, 0.50, 4.0, 4.2),
            leg("ABC", AssetType::CallOption, 105.0, 0.40, 2.0, 2.2),
        ];
        assert!(scan(&legs, &[], d(3, 28), 999.0, &call_shape()).is_empty());
    }

    #[test]
    fn put_side_mirrors_delta_gap() {
        let shape = SpreadShape::bear_put(&ScanConfig::default());
        let legs = vec![
            leg("ABC", AssetType::PutOption, 100.0, -0.50, 4.0, 4.2),
            leg("ABC", AssetType::PutOption, 90.0, -0.25, 1.0, 1.2),
            leg("ABC", AssetType::PutOption, 110.0, -0.75, 9.0, 9.2),
        ];
        let rows = scan(&legs, &[], d(3, 28), 999.0, &shape);
        assert_eq!(rows[0].strike_price_far, 90.0);
        assert_eq!(rows[0].sort_val, None);
    }

    #[test]
    fn index_legs_stay_out_of_stock_spreads() {
        let legs = vec![
            leg("NIFTY", AssetType::CallOption, 22000.0, 0.50, 100.0, 102.0),
            leg("NIFTY", AssetType::CallOption, 22300.0, 0.25, 30.0, 32.0),
            leg("ABC", AssetType::CallOption, 100.0, 0.50, 4.0, 4.2),
            leg("ABC", AssetType::CallOption, 110.0, 0.25, 1.4, 1.6),
        ];
        let quotes = [root("NIFTY", 22010.0, d(3, 28)), root("ABC", 100.0, d(3, 28))];
        let rows = scan(&legs, &quotes, d(3, 28), 999.0, &call_shape());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "ABC");
        assert_eq!(rows[0].ltp, Some(100.0));
    }

    #[test]
    fn straddle_sums_atm_mids() {
        let mut legs = vec![
            leg("NIFTY", AssetType::CallOption, 22000.0, 0.5, 100.0, 102.0),
            leg("NIFTY", AssetType::PutOption, 22000.0, -0.5, 90.0, 92.0),
            leg("NIFTY", AssetType::CallOption, 22100.0, 0.4, 60.0, 62.0),
        ];
        legs.push(leg("ABC", AssetType::CallOption, 100.0, 0.5, 1.0, 1.0));
        let rows = index_straddles(&legs, &[root("NIFTY", 22030.0, d(3, 28))], d(3, 1));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].strike_price, 22000.0);
        assert_eq!(rows[0].ltp, 192.0);
        assert_eq!(rows[0].dte, 28);
        assert_eq!(rows[0].expiry, "28-Mar-2024");
    }
}
