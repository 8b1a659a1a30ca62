use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::atm_iv::{self, AtmIvRow};
use super::{Analytic, AnalyticDeps, TickContext, index_by, ratio, sort_desc_by};
use crate::data::csv_types::CorrelationRow;
use crate::data::load_csv;
use crate::error::Result;
use crate::store::{SnapshotStore, Table};

pub const NEAR: &str = "correlation.near";
pub const NEXT: &str = "correlation.next";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairRow {
    pub stock_1: String,
    pub stock_2: String,
    pub avg_ratio: f64,
    pub atm_iv_1: Option<f64>,
    pub atm_iv_2: Option<f64>,
    pub ratio: Option<f64>,
    pub sort_ratio: Option<f64>,
}

#[derive(Debug, Clone)]
struct Pair {
    stock_1: String,
    stock_2: String,
    avg_ratio: f64,
}

/// Historical pairs with `avg_ratio` inverted, followed by every pair
/// reversed with the reciprocal.
fn expand_pairs(reference: &[CorrelationRow]) -> Vec<Pair> {
    let forward: Vec<Pair> = reference
        .iter()
        .map(|r| Pair {
            stock_1: r.stock_1.clone(),
            stock_2: r.stock_2.clone(),
            avg_ratio: 1.0 / r.avg_ratio,
        })
        .collect();
    let reversed = forward.iter().map(|p| Pair {
        stock_1: p.stock_2.clone(),
        stock_2: p.stock_1.clone(),
        avg_ratio: 1.0 / p.avg_ratio,
    });
    let mut all = forward.clone();
    all.extend(reversed);
    all
}

fn rank(pairs: &[Pair], root: &[AtmIvRow]) -> Vec<PairRow> {
    let iv = index_by(root, |r| r.symbol.as_str());
    let live_iv = |symbol: &str| iv.get(symbol).map(|r| r.atm_iv).filter(|v| *v != 0.0);

    let mut seen = HashSet::new();
    let mut rows: Vec<PairRow> = pairs
        .iter()
        .filter(|p| seen.insert((p.stock_1.as_str(), p.stock_2.as_str())))
        .map(|p| {
            let atm_iv_1 = live_iv(&p.stock_1);
            let atm_iv_2 = live_iv(&p.stock_2);
            let ratio = ratio(atm_iv_1, atm_iv_2);
            PairRow {
                stock_1: p.stock_1.clone(),
                stock_2: p.stock_2.clone(),
                avg_ratio: p.avg_ratio,
                atm_iv_1,
                atm_iv_2,
                ratio,
                sort_ratio: super::ratio(ratio, Some(p.avg_ratio)),
            }
        })
        .collect();
    sort_desc_by(&mut rows, |r| r.sort_ratio);
    rows
}

/// IV ratio of correlated pairs against their historical average.
pub struct Correlation {
    store: Arc<SnapshotStore>,
    pairs: Vec<Pair>,
    near: Table<PairRow>,
    next: Table<PairRow>,
}

impl Correlation {
    pub fn new(deps: &AnalyticDeps) -> Result<Self> {
        let reference: Vec<CorrelationRow> = load_csv(&deps.assets.network, "correlation.csv")?;
        Ok(Self::from_reference(&deps.store, &reference))
    }

    pub fn from_reference(store: &Arc<SnapshotStore>, reference: &[CorrelationRow]) -> Self {
        Self {
            store: Arc::clone(store),
            pairs: expand_pairs(reference),
            near: store.table(NEAR),
            next: store.table(NEXT),
        }
    }
}

#[async_trait]
impl Analytic for Correlation {
    fn name(&self) -> &'static str {
        "correlation"
    }

    async fn update(&self, _ctx: &TickContext) -> Result<()> {
        let near = self.store.read::<AtmIvRow>(atm_iv::NEAR);
        let next = self.store.read::<AtmIvRow>(atm_iv::NEXT);
        self.near.publish(rank(&self.pairs, &near));
        self.next.publish(rank(&self.pairs, &next));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn iv(symbol: &str, atm_iv: f64) -> AtmIvRow {
        AtmIvRow {
            symbol: symbol.into(),
            expiry: NaiveDate::from_ymd_opt(2024, 3, 28).unwrap(),
            atm_strike: None,
            option_type: None,
            delta: None,
            ltp: 0.0,
            atm_iv,
            ivp: None,
            iv_stats: None,
            pct_change: 0.0,
            z_score: None,
            hv: None,
            fair_price: None,
            fwd_iv: None,
            days_theta: None,
        }
    }

    #[test]
    fn pairs_are_mirrored_and_ranked() {
        let reference = vec![CorrelationRow {
            stock_1: "A".into(),
            stock_2: "B".into(),
            avg_ratio: 2.0,
        }];
        let pairs = expand_pairs(&reference);
        let rows = rank(&pairs, &[iv("A", 30.0), iv("B", 20.0)]);

        assert_eq!(rows.len(), 2);
        // A/B: ratio 1.5, avg 0.5 -> 3.0; B/A: ratio 0.667, avg 2 -> 0.333
        assert_eq!(rows[0].stock_1, "A");
        assert_eq!(rows[0].avg_ratio, 0.5);
        assert!((rows[0].sort_ratio.unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(rows[1].stock_1, "B");
    }

    #[test]
    fn zero_denominator_has_no_ratio() {
        let reference = vec![CorrelationRow {
            stock_1: "A".into(),
            stock_2: "B".into(),
            avg_ratio: 1.0,
        }];
        let rows = rank(&expand_pairs(&reference), &[iv("A", 30.0), iv("B", 0.0)]);
        let ab = rows.iter().find(|r| r.stock_1 == "A").unwrap();
        assert_eq!(ab.ratio, None);
        assert_eq!(rows.last().unwrap().sort_ratio, None);
    }
}
