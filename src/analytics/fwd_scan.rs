use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::atm_iv::{self, AtmIvRow};
use super::{Analytic, AnalyticDeps, TickContext, index_by, scale, sort_asc_by, sort_desc_by};
use crate::data::csv_types::ForwardVolRow;
use crate::data::load_csv;
use crate::error::Result;
use crate::store::{SnapshotStore, Table};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FwdScanRow {
    /// `fwd_iv` holds the reference forward vol, `ivp` is in percent.
    #[serde(flatten)]
    pub atm: AtmIvRow,
    pub diff: f64,
}

/// Split live rows into (above forward vol, below forward vol).
pub fn scan(root: &[AtmIvRow], reference: &[ForwardVolRow]) -> (Vec<FwdScanRow>, Vec<FwdScanRow>) {
    let fwd = index_by(reference, |r| r.symbol.as_str());
    let mut above = Vec::new();
    let mut below = Vec::new();

    for row in root.iter().filter(|r| r.is_live()) {
        let Some(reference) = fwd.get(row.symbol.as_str()) else {
            continue;
        };
        let fwd_iv = reference.forward_vol;
        let scanned = FwdScanRow {
            atm: AtmIvRow {
                ivp: scale(row.ivp, 100.0),
                fwd_iv: Some(fwd_iv),
                ..row.clone()
            },
            diff: (row.atm_iv - fwd_iv) / row.atm_iv,
        };
        if row.atm_iv >= fwd_iv {
            above.push(scanned);
        } else {
            below.push(scanned);
        }
    }

    sort_desc_by(&mut above, |r| Some(r.diff));
    sort_asc_by(&mut below, |r| Some(r.diff));
    (above, below)
}

struct BucketScan {
    source: &'static str,
    reference: Vec<ForwardVolRow>,
    above: Table<FwdScanRow>,
    below: Table<FwdScanRow>,
}

/// ATM IV against the reference forward vol.
pub struct FwdScan {
    store: Arc<SnapshotStore>,
    scans: [BucketScan; 2],
}

impl FwdScan {
    pub fn new(deps: &AnalyticDeps) -> Result<Self> {
        let near = load_csv(&deps.assets.network, "forward_vol_expiry_1.csv")?;
        let next = load_csv(&deps.assets.network, "forward_vol_expiry_2.csv")?;
        Ok(Self::from_reference(&deps.store, near, next))
    }

    pub fn from_reference(store: &Arc<SnapshotStore>, near: Vec<ForwardVolRow>, next: Vec<ForwardVolRow>) -> Self {
        Self {
            store: Arc::clone(store),
            scans: [
                BucketScan {
                    source: atm_iv::NEAR,
                    reference: near,
                    above: store.table("fwd_scan.near_above"),
                    below: store.table("fwd_scan.near_below"),
                },
                BucketScan {
                    source: atm_iv::NEXT,
                    reference: next,
                    above: store.table("fwd_scan.next_above"),
                    below: store.table("fwd_scan.next_below"),
                },
            ],
        }
    }
}

#[async_trait]
impl Analytic for FwdScan {
    fn name(&self) -> &'static str {
        "fwd_scan"
    }

    async fn update(&self, _ctx: &TickContext) -> Result<()> {
        for bucket in &self.scans {
            let root = self.store.read::<AtmIvRow>(bucket.source);
            let (above, below) = scan(&root, &bucket.reference);
            bucket.above.publish(above);
            bucket.below.publish(below);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(symbol: &str, atm_iv: f64) -> AtmIvRow {
        AtmIvRow {
            symbol: symbol.into(),
            expiry: NaiveDate::from_ymd_opt(2024, 3, 28).unwrap(),
            atm_strike: None,
            option_type: None,
            delta: None,
            ltp: 0.0,
            atm_iv,
            ivp: Some(0.4),
            iv_stats: None,
            pct_change: 0.0,
            z_score: None,
            hv: None,
            fair_price: None,
            fwd_iv: None,
            days_theta: None,
        }
    }

    fn fwd(symbol: &str, v: f64) -> ForwardVolRow {
        ForwardVolRow {
            symbol: symbol.into(),
            forward_vol: v,
        }
    }

    #[test]
    fn splits_and_ranks() {
        let root = [row("A", 30.0), row("B", 40.0), row("C", 10.0), row("D", 0.0), row("E", 25.0)];
        let reference = [fwd("A", 20.0), fwd("B", 20.0), fwd("C", 20.0), fwd("D", 20.0)];
        let (above, below) = scan(&root, &reference);

        let names: Vec<_> = above.iter().map(|r| r.atm.symbol.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(below.len(), 1);
        assert_eq!(below[0].diff, -1.0);
        assert_eq!(above[0].atm.ivp, Some(40.0));
    }
}
