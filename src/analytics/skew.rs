use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use super::atm_iv::{self, AtmIvRow};
use super::{Analytic, AnalyticDeps, TickContext, index_by};
use crate::error::{Result, ScreenerError};
use crate::expiry::{Bucket, ExpiryBuckets};
use crate::gateway::UpstreamGateway;
use crate::gateway::types::{SkewElement, SkewLeg, SkewRecord};
use crate::store::{SnapshotStore, Table};

pub const LEGS: &str = "skew.legs";

/// z-score the upstream uses for "not computed".
const MISSING_Z_SCORE: f64 = -999.0;

pub fn table_for(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::Near => "skew.near",
        Bucket::Next => "skew.next",
        Bucket::Far => "skew.far",
    }
}

// ── Classification ───────────────────────────────────────────────────

/// Skew shape. `F` variants are forward-leaning (positive z-score).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SkewKind {
    #[serde(rename = "PPF")]
    PutPutForward,
    #[serde(rename = "PPB")]
    PutPutBackward,
    #[serde(rename = "PCF")]
    PutCallForward,
    #[serde(rename = "PCB")]
    PutCallBackward,
    #[serde(rename = "CCF")]
    CallCallForward,
    #[serde(rename = "CCB")]
    CallCallBackward,
    #[serde(rename = "FourLeg_F")]
    FourLegForward,
    #[serde(rename = "FourLeg_B")]
    FourLegBackward,
}

impl SkewKind {
    pub const ORDER: [SkewKind; 8] = [
        SkewKind::PutPutForward,
        SkewKind::PutPutBackward,
        SkewKind::PutCallForward,
        SkewKind::PutCallBackward,
        SkewKind::CallCallForward,
        SkewKind::CallCallBackward,
        SkewKind::FourLegForward,
        SkewKind::FourLegBackward,
    ];

    /// Kinds ranked by z-score descending; the rest ascending.
    fn ranks_descending(self) -> bool {
        matches!(
            self,
            SkewKind::PutPutForward
                | SkewKind::PutCallForward
                | SkewKind::CallCallForward
                | SkewKind::FourLegBackward
        )
    }

    /// Kinds whose skew, skew_avg and skew_avg_yest are sign-flipped.
    fn flips_sign(self) -> bool {
        matches!(
            self,
            SkewKind::PutPutForward | SkewKind::PutCallBackward | SkewKind::CallCallBackward
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkewRow {
    pub expiry: NaiveDate,
    #[serde(rename = "type")]
    pub kind: SkewKind,
    pub symbol: String,
    pub strike_price: Option<f64>,
    pub iv: Option<f64>,
    pub z_score: f64,
    pub ivp: Option<f64>,
    pub skew: Option<f64>,
    pub skew_avg: Option<f64>,
    pub skew_std: Option<f64>,
    pub skew_avg_yest: Option<f64>,
    pub skew_diff: Option<f64>,
    pub pct_change: Option<f64>,
    pub elements: Vec<SkewElement>,
}

/// Raw skew values per (symbol, expiry), before any sign convention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkewLegsRow {
    pub symbol: String,
    pub expiry: NaiveDate,
    #[serde(rename = "pe_pe.skew")]
    pub pe_pe_skew: Option<f64>,
    #[serde(rename = "pe_ce.skew")]
    pub pe_ce_skew: Option<f64>,
    #[serde(rename = "ce_ce.skew")]
    pub ce_ce_skew: Option<f64>,
    #[serde(rename = "four_leg.skew")]
    pub four_leg_skew: Option<f64>,
}

fn neg(v: Option<f64>) -> Option<f64> {
    v.map(|x| -x)
}

fn diff(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? - b?)
}

struct RowBase<'a> {
    expiry: NaiveDate,
    symbol: &'a str,
    strike_price: Option<f64>,
    iv: Option<f64>,
    pct_change: Option<f64>,
}

fn two_leg_row(base: &RowBase<'_>, leg: &SkewLeg, forward: SkewKind, backward: SkewKind) -> SkewRow {
    let z_score = leg.z_score.unwrap_or(0.0);
    let kind = if z_score > 0.0 { forward } else { backward };
    let sign = |v: Option<f64>| if kind.flips_sign() { neg(v) } else { v };
    let skew = sign(leg.skew);
    let skew_avg_yest = sign(leg.skew_avg_yest);
    SkewRow {
        expiry: base.expiry,
        kind,
        symbol: base.symbol.to_string(),
        strike_price: base.strike_price,
        iv: base.iv,
        z_score,
        ivp: leg.ivp,
        skew,
        skew_avg: sign(leg.skew_avg),
        skew_std: leg.skew_std,
        skew_avg_yest,
        skew_diff: diff(skew, skew_avg_yest),
        pct_change: base.pct_change,
        elements: leg.elements.clone(),
    }
}

fn four_leg_rows(base: &RowBase<'_>, leg: &SkewLeg) -> [SkewRow; 2] {
    let skew = neg(leg.skew);
    let row = SkewRow {
        expiry: base.expiry,
        kind: SkewKind::FourLegForward,
        symbol: base.symbol.to_string(),
        strike_price: base.strike_price,
        iv: base.iv,
        z_score: leg.z_score.unwrap_or(0.0),
        ivp: leg.ivp,
        skew,
        skew_avg: leg.skew_avg,
        skew_std: leg.skew_std,
        skew_avg_yest: leg.skew_avg_yest,
        skew_diff: diff(skew, leg.skew_avg_yest),
        pct_change: base.pct_change,
        elements: leg.elements.clone(),
    };
    let backward = SkewRow {
        kind: SkewKind::FourLegBackward,
        ..row.clone()
    };
    [row, backward]
}

/// Classify every leg of every record. Entries with no expiry are dropped.
pub fn classify(records: &[SkewRecord], near: &[AtmIvRow]) -> (Vec<SkewRow>, Vec<SkewLegsRow>) {
    let pct = index_by(near, |r| r.symbol.as_str());
    let mut rows = Vec::new();
    let mut legs = Vec::new();

    for rec in records {
        for item in &rec.individual {
            let Some(expiry) = item.expiry else { continue };
            let atm = item.atm_data.clone().unwrap_or_default();
            let base = RowBase {
                expiry,
                symbol: &rec.symbol,
                strike_price: atm.strike_price,
                iv: atm.iv,
                pct_change: pct.get(rec.symbol.as_str()).map(|r| r.pct_change),
            };

            legs.push(SkewLegsRow {
                symbol: rec.symbol.clone(),
                expiry,
                pe_pe_skew: item.pe_pe.as_ref().and_then(|l| l.skew),
                pe_ce_skew: item.pe_ce.as_ref().and_then(|l| l.skew),
                ce_ce_skew: item.ce_ce.as_ref().and_then(|l| l.skew),
                four_leg_skew: item.four_leg.as_ref().and_then(|l| l.skew),
            });

            if let Some(leg) = &item.pe_pe {
                rows.push(two_leg_row(&base, leg, SkewKind::PutPutForward, SkewKind::PutPutBackward));
            }
            if let Some(leg) = &item.pe_ce {
                rows.push(two_leg_row(&base, leg, SkewKind::PutCallForward, SkewKind::PutCallBackward));
            }
            if let Some(leg) = &item.ce_ce {
                rows.push(two_leg_row(&base, leg, SkewKind::CallCallForward, SkewKind::CallCallBackward));
            }
            if let Some(leg) = &item.four_leg {
                rows.extend(four_leg_rows(&base, leg));
            }
        }
    }
    (rows, legs)
}

/// Rows for one expiry, grouped by kind in display order, each group
/// ranked by z-score.
pub fn rank_expiry(rows: &[SkewRow], expiry: NaiveDate) -> Vec<SkewRow> {
    let mut groups: HashMap<SkewKind, Vec<SkewRow>> = HashMap::new();
    for row in rows {
        if row.expiry == expiry && row.z_score != MISSING_Z_SCORE {
            groups.entry(row.kind).or_default().push(row.clone());
        }
    }

    let mut out = Vec::with_capacity(rows.len());
    for kind in SkewKind::ORDER {
        let Some(mut group) = groups.remove(&kind) else { continue };
        if kind.ranks_descending() {
            group.sort_by(|a, b| b.z_score.total_cmp(&a.z_score));
        } else {
            group.sort_by(|a, b| a.z_score.total_cmp(&b.z_score));
        }
        out.extend(group);
    }
    out
}

// ── Analytic ─────────────────────────────────────────────────────────

/// Skew classification over the upstream skew feed.
pub struct Skew {
    store: Arc<SnapshotStore>,
    gateway: Arc<dyn UpstreamGateway>,
    buckets: [Table<SkewRow>; 3],
    legs: Table<SkewLegsRow>,
}

impl Skew {
    pub fn new(deps: &AnalyticDeps) -> Self {
        Self {
            store: Arc::clone(&deps.store),
            gateway: Arc::clone(&deps.gateway),
            buckets: Bucket::ALL.map(|b| deps.store.table(table_for(b))),
            legs: deps.store.table(LEGS),
        }
    }

    fn publish(&self, records: &[SkewRecord], buckets: &ExpiryBuckets) {
        let near = self.store.read::<AtmIvRow>(atm_iv::NEAR);
        let (rows, legs) = classify(records, &near);
        for (bucket, table) in Bucket::ALL.into_iter().zip(&self.buckets) {
            table.publish(rank_expiry(&rows, buckets.get(bucket)));
        }
        self.legs.publish(legs);
    }
}

#[async_trait]
impl Analytic for Skew {
    fn name(&self) -> &'static str {
        "skew"
    }

    async fn update(&self, ctx: &TickContext) -> Result<()> {
        let Some(records) = self.gateway.fetch_skew().await? else {
            return Err(ScreenerError::UpstreamUnavailable("skew returned no data".into()));
        };
        self.publish(&records, &ctx.buckets);
        Ok(())
    }
}
