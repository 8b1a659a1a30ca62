use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::atm_iv::{self, AtmIvRow};
use super::{Analytic, AnalyticDeps, TickContext, index_by, scale, sort_desc_by};
use crate::data::csv_types::{AtrRow, IvStatsRow};
use crate::data::load_csv;
use crate::error::Result;
use crate::store::{SnapshotStore, Table};

/// ATR percentage scaled to an annualised-vol figure for each side.
const LONG_HV_FACTOR: f64 = 0.6 * 15.0;
const SHORT_HV_FACTOR: f64 = 20.0 * 0.6;

/// Per-symbol ATR vol estimate joined with historical IV extremes.
#[derive(Debug, Clone, PartialEq)]
pub struct AtrReference {
    pub symbol: String,
    pub long_hv: f64,
    pub short_hv: f64,
    pub highest_iv: Option<f64>,
    pub lowest_iv: Option<f64>,
}

/// Inner join of ATR rows with `iv_stats.csv` by symbol.
pub fn reference(atr: &[AtrRow], stats: &[IvStatsRow]) -> Vec<AtrReference> {
    let stats = index_by(stats, |r| r.symbol.as_str());
    atr.iter()
        .filter_map(|a| {
            let s = stats.get(a.symbol.as_str())?;
            Some(AtrReference {
                symbol: a.symbol.clone(),
                long_hv: a.atr_pct * LONG_HV_FACTOR,
                short_hv: a.atr_pct * SHORT_HV_FACTOR,
                highest_iv: s.highest_normal_iv,
                lowest_iv: s.lowest_normal_iv,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtrScanRow {
    #[serde(flatten)]
    pub atm: AtmIvRow,
    pub long_hv: f64,
    pub short_hv: f64,
    pub highest_iv: Option<f64>,
    pub lowest_iv: f64,
    pub fair_iv: Option<f64>,
    pub short_diff: Option<f64>,
    pub long_diff: f64,
}

/// (short candidates, long candidates), both ranked by their diff descending.
pub fn scan(root: &[AtmIvRow], reference: &[AtrReference]) -> (Vec<AtrScanRow>, Vec<AtrScanRow>) {
    let refs = index_by(reference, |r| r.symbol.as_str());
    let rows: Vec<AtrScanRow> = root
        .iter()
        .filter(|r| r.is_live())
        .filter_map(|r| {
            let atr = refs.get(r.symbol.as_str())?;
            let lowest_iv = atr.lowest_iv.filter(|v| *v > 0.0)?;
            let fair_iv = r.avg_normal_iv();
            Some(AtrScanRow {
                atm: AtmIvRow {
                    ivp: scale(r.ivp, 100.0),
                    ..r.clone()
                },
                long_hv: atr.long_hv,
                short_hv: atr.short_hv,
                highest_iv: atr.highest_iv,
                lowest_iv,
                fair_iv,
                short_diff: fair_iv.map(|f| 2.0 * r.atm_iv - f - atr.short_hv),
                long_diff: lowest_iv + atr.long_hv - 2.0 * r.atm_iv,
            })
        })
        .collect();

    let mut short = rows.clone();
    sort_desc_by(&mut short, |r| r.short_diff);
    let mut long = rows;
    sort_desc_by(&mut long, |r| Some(r.long_diff));
    (short, long)
}

/// IV versus an ATR-derived realised-vol estimate.
pub struct AtrScan {
    store: Arc<SnapshotStore>,
    reference: Vec<AtrReference>,
    outputs: [(&'static str, Table<AtrScanRow>, Table<AtrScanRow>); 2],
}

impl AtrScan {
    pub fn new(deps: &AnalyticDeps) -> Result<Self> {
        let network = &deps.assets.network;
        let atr: Vec<AtrRow> = load_csv(network, "latest_atr_per_symbol.csv")?;
        let stats: Vec<IvStatsRow> = load_csv(network, "iv_stats.csv")?;
        Ok(Self::from_reference(&deps.store, reference(&atr, &stats)))
    }

    pub fn from_reference(store: &Arc<SnapshotStore>, reference: Vec<AtrReference>) -> Self {
        Self {
            store: Arc::clone(store),
            reference,
            outputs: [
                (atm_iv::NEAR, store.table("atr_scan.near_short"), store.table("atr_scan.near_long")),
                (atm_iv::NEXT, store.table("atr_scan.next_short"), store.table("atr_scan.next_long")),
            ],
        }
    }
}

#[async_trait]
impl Analytic for AtrScan {
    fn name(&self) -> &'static str {
        "atr_scan"
    }

    async fn update(&self, _ctx: &TickContext) -> Result<()> {
        for (source, short, long) in &self.outputs {
            let root = self.store.read::<AtmIvRow>(source);
            let (s, l) = scan(&root, &self.reference);
            short.publish(s);
            long.publish(l);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::IvStats;
    use chrono::NaiveDate;

    fn row(symbol: &str, atm_iv: f64, avg: Option<f64>) -> AtmIvRow {
        AtmIvRow {
            symbol: symbol.into(),
            expiry: NaiveDate::from_ymd_opt(2024, 3, 28).unwrap(),
            atm_strike: None,
            option_type: None,
            delta: None,
            ltp: 100.0,
            atm_iv,
            ivp: Some(0.3),
            iv_stats: avg.map(|a| IvStats {
                avg_normal_iv: Some(a),
                ..Default::default()
            }),
            pct_change: 0.0,
            z_score: None,
            hv: None,
            fair_price: None,
            fwd_iv: None,
            days_theta: None,
        }
    }

    fn reference_row(symbol: &str, lowest: f64) -> AtrReference {
        AtrReference {
            symbol: symbol.into(),
            long_hv: 9.0,
            short_hv: 12.0,
            highest_iv: Some(60.0),
            lowest_iv: Some(lowest),
        }
    }

    #[test]
    fn factors_scale_atr() {
        let atr = [AtrRow {
            symbol: "ABC".into(),
            atr_pct: 1.0,
        }];
        let stats = [IvStatsRow {
            symbol: "ABC".into(),
            long_move: None,
            full_move: None,
            fut_close: None,
            avg_normal_iv: None,
            highest_normal_iv: Some(50.0),
            lowest_normal_iv: Some(15.0),
            bench_mark_iv: None,
        }];
        let r = reference(&atr, &stats);
        assert!((r[0].long_hv - 9.0).abs() < 1e-9);
        assert!((r[0].short_hv - 12.0).abs() < 1e-9);
        assert_eq!(r[0].lowest_iv, Some(15.0));
    }

    #[test]
    fn diffs_and_zero_floor() {
        let root = [row("A", 20.0, Some(25.0)), row("B", 30.0, Some(25.0)), row("C", 30.0, None)];
        let refs = [reference_row("A", 15.0), reference_row("B", 15.0), reference_row("C", 0.0)];
        let (short, long) = scan(&root, &refs);

        assert_eq!(short.len(), 2);
        assert_eq!(short[0].atm.symbol, "B");
        assert_eq!(short[0].short_diff, Some(60.0 - 25.0 - 12.0));
        assert_eq!(long[0].atm.symbol, "A");
        assert_eq!(long[0].long_diff, 15.0 + 9.0 - 40.0);
    }
}
