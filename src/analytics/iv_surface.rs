use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;

use super::{Analytic, AnalyticDeps, TickContext, index_by, ratio, sort_desc_by};
use crate::data::csv_types::{StrikeDiffRow, SurfaceRefRow};
use crate::data::load_csv;
use crate::error::{Result, ScreenerError};
use crate::gateway::UpstreamGateway;
use crate::gateway::types::{AssetType, DeltaRange, InstrumentRow, TokenSetQuery};
use crate::store::{SnapshotStore, Table};

const INTRADAY_REF: &str = "intraday_iv_surface.csv";
const EOD_REF: &str = "eod_iv_surface.csv";

/// Names whose surfaces are too liquid or too noisy to scan.
pub const EXCLUDED_SYMBOLS: [&str; 24] = [
    "NIFTY", "BANKNIFTY", "AXISBANK", "RELIANCE", "LT", "ICICIBANK", "TORNTPHARM", "HDFCBANK", "SUNPHARMA",
    "AUROPHARMA", "DIVISLAB", "LUPIN", "GRANULES", "SYNGENE", "DRREDDY", "DIXON", "KOTAKBANK", "DELHIVERY",
    "TATAPOWER", "MCX", "LICHSGFIN", "ITC", "GODREJPROP", "EICHERMOT",
];

/// Number of most recent reference expiries requested from upstream.
const FETCH_EXPIRIES: usize = 3;

/// Option leg positioned on the surface grid relative to its future.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLeg {
    pub leg: InstrumentRow,
    pub fut_ltp: f64,
    pub strike_offset: i64,
}

/// Attach futures prices and strike offsets. Legs without a future or a
/// strike increment are dropped.
pub fn place_on_grid(legs: &[InstrumentRow], strike_diffs: &[StrikeDiffRow]) -> Vec<GridLeg> {
    let futures: HashMap<(&str, NaiveDate), f64> = legs
        .iter()
        .filter(|l| l.asset_type == AssetType::Future)
        .map(|l| ((l.symbol.as_str(), l.expiry), l.ltp))
        .collect();
    let diffs = index_by(strike_diffs, |r| r.symbol.as_str());

    legs.iter()
        .filter(|l| l.asset_type.is_option() && !EXCLUDED_SYMBOLS.contains(&l.symbol.as_str()))
        .filter_map(|l| {
            let fut_ltp = *futures.get(&(l.symbol.as_str(), l.expiry))?;
            let step = diffs.get(l.symbol.as_str())?.strike_diff;
            if step == 0.0 {
                return None;
            }
            Some(GridLeg {
                leg: l.clone(),
                fut_ltp,
                strike_offset: ((l.strike_price - fut_ltp) / step).round_ties_even() as i64,
            })
        })
        .collect()
}

/// Which reference IV pair a leg is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    Ema,
    Avg,
}

impl Basis {
    fn quotes(&self, r: &SurfaceRefRow) -> (Option<f64>, Option<f64>) {
        match self {
            Basis::Ema => (r.ema_bid_iv, r.ema_ask_iv),
            Basis::Avg => (r.avg_bid_iv, r.avg_ask_iv),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceRow {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub asset_type: AssetType,
    pub strike_price: f64,
    pub strike_offset: i64,
    pub fut_ltp: f64,
    pub bid_iv: Option<f64>,
    pub ask_iv: Option<f64>,
    pub ref_bid_iv: Option<f64>,
    pub ref_ask_iv: Option<f64>,
    pub iv_edge: Option<f64>,
}

/// Legs quoted through the reference: (short where live bid > ref ask,
/// long where live ask < ref bid), each sorted by edge descending.
pub fn compare(grid: &[GridLeg], reference: &[SurfaceRefRow], basis: Basis) -> (Vec<SurfaceRow>, Vec<SurfaceRow>) {
    let mut refs: HashMap<(&str, NaiveDate, AssetType, i64), Vec<&SurfaceRefRow>> = HashMap::new();
    for r in reference {
        refs.entry((r.symbol.as_str(), r.expiry, r.asset_type, r.strike_offset))
            .or_default()
            .push(r);
    }

    let mut short = Vec::new();
    let mut long = Vec::new();
    for g in grid {
        let key = (g.leg.symbol.as_str(), g.leg.expiry, g.leg.asset_type, g.strike_offset);
        for r in refs.get(&key).into_iter().flatten() {
            let (ref_bid, ref_ask) = basis.quotes(r);
            let row = |iv_edge| SurfaceRow {
                symbol: g.leg.symbol.clone(),
                expiry: g.leg.expiry,
                asset_type: g.leg.asset_type,
                strike_price: g.leg.strike_price,
                strike_offset: g.strike_offset,
                fut_ltp: g.fut_ltp,
                bid_iv: g.leg.bid_iv,
                ask_iv: g.leg.ask_iv,
                ref_bid_iv: ref_bid,
                ref_ask_iv: ref_ask,
                iv_edge,
            };
            match (g.leg.bid_iv, ref_ask) {
                (Some(bid), Some(ask)) if bid > ask => short.push(row(ratio(Some(bid - ask), Some(ask)))),
                _ => {}
            }
            match (g.leg.ask_iv, ref_bid) {
                (Some(ask), Some(bid)) if ask < bid => long.push(row(ratio(Some(bid - ask), Some(ask)))),
                _ => {}
            }
        }
    }
    sort_desc_by(&mut short, |r| r.iv_edge);
    sort_desc_by(&mut long, |r| r.iv_edge);
    (short, long)
}

/// Latest `n` distinct expiries present in a reference table, ascending.
pub fn latest_expiries(reference: &[SurfaceRefRow], n: usize) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = reference.iter().map(|r| r.expiry).collect();
    dates.sort();
    dates.dedup();
    let skip = dates.len().saturating_sub(n);
    dates.split_off(skip)
}

struct References {
    intraday: Vec<SurfaceRefRow>,
    eod: Vec<SurfaceRefRow>,
}

struct Outputs {
    short: Table<SurfaceRow>,
    long: Table<SurfaceRow>,
}

impl Outputs {
    fn new(store: &SnapshotStore, prefix: &str, suffix: &str) -> Self {
        Self {
            short: store.table(&format!("iv_surface.{prefix}_short{suffix}")),
            long: store.table(&format!("iv_surface.{prefix}_long{suffix}")),
        }
    }

    fn publish(&self, (short, long): (Vec<SurfaceRow>, Vec<SurfaceRow>)) {
        self.short.publish(short);
        self.long.publish(long);
    }
}

/// Live bid/ask IV against intraday and end-of-day reference surfaces.
pub struct IvSurface {
    gateway: Arc<dyn UpstreamGateway>,
    dir: PathBuf,
    strike_diffs: Vec<StrikeDiffRow>,
    references: Mutex<References>,
    // intraday ema, intraday avg, eod ema, eod avg
    outputs: [Outputs; 4],
}

impl IvSurface {
    pub fn new(deps: &AnalyticDeps) -> Result<Self> {
        let dir = deps.assets.local.clone();
        let strike_diffs = load_csv(&dir, "strike_diff.csv")?;
        let intraday = load_csv(&dir, INTRADAY_REF)?;
        let eod = load_csv(&dir, EOD_REF)?;
        Ok(Self::from_reference(deps, dir, strike_diffs, intraday, eod))
    }

    pub fn from_reference(
        deps: &AnalyticDeps,
        dir: PathBuf,
        strike_diffs: Vec<StrikeDiffRow>,
        intraday: Vec<SurfaceRefRow>,
        eod: Vec<SurfaceRefRow>,
    ) -> Self {
        let store = &deps.store;
        Self {
            gateway: Arc::clone(&deps.gateway),
            dir,
            strike_diffs,
            references: Mutex::new(References { intraday, eod }),
            outputs: [
                Outputs::new(store, "intraday", ""),
                Outputs::new(store, "intraday", "_avg"),
                Outputs::new(store, "eod", ""),
                Outputs::new(store, "eod", "_avg"),
            ],
        }
    }

    /// Re-read both reference surfaces; a file that fails to load keeps
    /// its previous contents.
    fn reload_references(&self) {
        let intraday = load_csv::<SurfaceRefRow>(&self.dir, INTRADAY_REF);
        let eod = load_csv::<SurfaceRefRow>(&self.dir, EOD_REF);
        let mut refs = self.references.lock();
        match intraday {
            Ok(rows) => refs.intraday = rows,
            Err(e) => tracing::warn!(error = %e, "intraday surface reload failed, keeping previous"),
        }
        match eod {
            Ok(rows) => refs.eod = rows,
            Err(e) => tracing::warn!(error = %e, "eod surface reload failed, keeping previous"),
        }
    }
}

#[async_trait]
impl Analytic for IvSurface {
    fn name(&self) -> &'static str {
        "iv_surface"
    }

    async fn update(&self, _ctx: &TickContext) -> Result<()> {
        self.reload_references();
        let expiries = latest_expiries(&self.references.lock().intraday, FETCH_EXPIRIES);
        let query = TokenSetQuery::new(DeltaRange::new((-0.5, -0.2), (0.2, 0.5)), expiries);

        let Some(legs) = self.gateway.fetch_token_set(&query).await? else {
            return Err(ScreenerError::UpstreamUnavailable("surface token set returned no data".into()));
        };
        let grid = place_on_grid(&legs, &self.strike_diffs);
        if grid.is_empty() {
            tracing::warn!(legs = legs.len(), "no option legs could be placed on the surface grid");
        }

        let refs = self.references.lock();
        self.outputs[0].publish(compare(&grid, &refs.intraday, Basis::Ema));
        self.outputs[1].publish(compare(&grid, &refs.intraday, Basis::Avg));
        self.outputs[2].publish(compare(&grid, &refs.eod, Basis::Ema));
        self.outputs[3].publish(compare(&grid, &refs.eod, Basis::Avg));
        Ok(())
    }
}
