use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use serde::Serialize;

use super::atm_iv::{self, AtmIvRow};
use super::{Analytic, AnalyticDeps, TickContext, index_by, scale, sort_asc_by, sort_desc_by};
use crate::data::csv_types::{ForwardVolRow, ResultDateRow, RiskPremiumRow};
use crate::data::{load_csv, load_csv_or_empty};
use crate::error::Result;
use crate::expiry::ExpiryBuckets;
use crate::store::{SnapshotStore, Table};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongShortRow {
    /// `fwd_iv` holds the reference forward vol, `ivp` is in percent.
    #[serde(flatten)]
    pub atm: AtmIvRow,
    pub avg_risk_prem: Option<f64>,
    pub diff: Option<f64>,
}

/// Confirmed and expected earnings dates. Expected dates are dropped for
/// symbols that already have a confirmed one.
#[derive(Debug, Clone, Default)]
pub struct ResultCalendar {
    confirmed: Vec<ResultDateRow>,
    expected: Vec<ResultDateRow>,
}

impl ResultCalendar {
    pub fn new(confirmed: Vec<ResultDateRow>, expected: Vec<ResultDateRow>) -> Self {
        let known: HashSet<&str> = confirmed.iter().map(|r| r.symbol.as_str()).collect();
        let expected = expected
            .into_iter()
            .filter(|r| !known.contains(r.symbol.as_str()))
            .collect();
        Self { confirmed, expected }
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.expected.is_empty()
    }

    /// Symbols reporting within `horizon` days of `today` and inside
    /// `[from, until)`.
    pub fn reporting(&self, today: NaiveDate, horizon: i64, from: NaiveDate, until: NaiveDate) -> HashSet<String> {
        let horizon_end = today
            .checked_add_days(Days::new(horizon.max(0) as u64))
            .unwrap_or(NaiveDate::MAX);
        self.confirmed
            .iter()
            .chain(&self.expected)
            .filter(|r| r.date >= from && r.date < until)
            .filter(|r| r.date >= today && r.date <= horizon_end)
            .map(|r| r.symbol.clone())
            .collect()
    }
}

/// Plain short/long ranking on `atm_iv − hv − avg_risk_prem`.
pub fn rank(
    root: &[AtmIvRow],
    premiums: &[RiskPremiumRow],
    forward: &[ForwardVolRow],
) -> (Vec<LongShortRow>, Vec<LongShortRow>) {
    let prem = index_by(premiums, |r| r.symbol.as_str());
    let fwd = index_by(forward, |r| r.symbol.as_str());

    let rows: Vec<LongShortRow> = root
        .iter()
        .filter(|r| r.is_live())
        .map(|r| {
            let avg_risk_prem = prem.get(r.symbol.as_str()).and_then(|p| p.avg_risk_prem);
            let diff = match (r.hv, avg_risk_prem) {
                (Some(hv), Some(p)) => Some(r.atm_iv - hv - p),
                _ => None,
            };
            LongShortRow {
                atm: AtmIvRow {
                    ivp: scale(r.ivp, 100.0),
                    fwd_iv: fwd.get(r.symbol.as_str()).map(|f| f.forward_vol),
                    ..r.clone()
                },
                avg_risk_prem,
                diff,
            }
        })
        .collect();

    let mut short = rows.clone();
    sort_desc_by(&mut short, |r| r.diff);
    let mut long = rows;
    sort_asc_by(&mut long, |r| r.diff);
    (short, long)
}

/// Earnings-aware split: names reporting soon go long (IVP ascending),
/// everything else short (IVP descending).
pub fn split_on_results(rows: &[LongShortRow], reporting: &HashSet<String>) -> (Vec<LongShortRow>, Vec<LongShortRow>) {
    let (mut long, mut short): (Vec<_>, Vec<_>) = rows
        .iter()
        .cloned()
        .partition(|r| reporting.contains(&r.atm.symbol));
    sort_desc_by(&mut short, |r| r.atm.ivp);
    sort_asc_by(&mut long, |r| r.atm.ivp);
    (short, long)
}

struct Side {
    source: &'static str,
    forward: Vec<ForwardVolRow>,
    short: Table<LongShortRow>,
    long: Table<LongShortRow>,
    short_result: Table<LongShortRow>,
    long_result: Table<LongShortRow>,
}

impl Side {
    fn new(store: &SnapshotStore, prefix: &str, source: &'static str, forward: Vec<ForwardVolRow>) -> Self {
        Self {
            source,
            forward,
            short: store.table(&format!("{prefix}_short")),
            long: store.table(&format!("{prefix}_long")),
            short_result: store.table(&format!("{prefix}_short_result")),
            long_result: store.table(&format!("{prefix}_long_result")),
        }
    }
}

/// Rich/cheap IV versus realised vol, with an earnings-aware variant.
pub struct LongShort {
    store: Arc<SnapshotStore>,
    premiums: Vec<RiskPremiumRow>,
    results: ResultCalendar,
    sides: [Side; 2],
}

impl LongShort {
    pub fn new(deps: &AnalyticDeps) -> Result<Self> {
        let network = &deps.assets.network;
        let premiums = load_csv(network, "avg_risk_prem.csv")?;
        let results = ResultCalendar::new(
            load_csv_or_empty(network, "confirm_results.csv"),
            load_csv_or_empty(&deps.assets.local, "expected_results.csv"),
        );
        let near = load_csv(network, "forward_vol_expiry_1.csv")?;
        let next = load_csv(network, "forward_vol_expiry_2.csv")?;
        Ok(Self::from_reference(&deps.store, premiums, results, near, next))
    }

    pub fn from_reference(
        store: &Arc<SnapshotStore>,
        premiums: Vec<RiskPremiumRow>,
        results: ResultCalendar,
        near: Vec<ForwardVolRow>,
        next: Vec<ForwardVolRow>,
    ) -> Self {
        Self {
            store: Arc::clone(store),
            premiums,
            results,
            sides: [
                Side::new(store, "long_short.near", atm_iv::NEAR, near),
                Side::new(store, "long_short.next", atm_iv::NEXT, next),
            ],
        }
    }

    fn windows(buckets: &ExpiryBuckets, today: NaiveDate) -> [(NaiveDate, NaiveDate); 2] {
        [(today, buckets.near()), (buckets.near(), buckets.next())]
    }
}

#[async_trait]
impl Analytic for LongShort {
    fn name(&self) -> &'static str {
        "long_short"
    }

    async fn update(&self, ctx: &TickContext) -> Result<()> {
        let today = ctx.today();
        let horizon = ctx.config.no_of_days_to_result;
        for (side, (from, until)) in self.sides.iter().zip(Self::windows(&ctx.buckets, today)) {
            let root = self.store.read::<AtmIvRow>(side.source);
            let (short, long) = rank(&root, &self.premiums, &side.forward);

            let (short_result, long_result) = if self.results.is_empty() {
                (short.clone(), long.clone())
            } else {
                let reporting = self.results.reporting(today, horizon, from, until);
                split_on_results(&short, &reporting)
            };

            side.short.publish(short);
            side.long.publish(long);
            side.short_result.publish(short_result);
            side.long_result.publish(long_result);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn row(symbol: &str, atm_iv: f64, hv: Option<f64>, ivp: f64) -> AtmIvRow {
        AtmIvRow {
            symbol: symbol.into(),
            expiry: d(3, 28),
            atm_strike: None,
            option_type: None,
            delta: None,
            ltp: 100.0,
            atm_iv,
            ivp: Some(ivp),
            iv_stats: None,
            pct_change: 0.0,
            z_score: None,
            hv,
            fair_price: None,
            fwd_iv: None,
            days_theta: None,
        }
    }

    fn prem(symbol: &str, p: f64) -> RiskPremiumRow {
        RiskPremiumRow {
            symbol: symbol.into(),
            avg_risk_prem: Some(p),
        }
    }

    fn result(symbol: &str, date: NaiveDate) -> ResultDateRow {
        ResultDateRow {
            symbol: symbol.into(),
            date,
        }
    }

    #[test]
    fn diff_ranks_both_ways() {
        let root = [
            row("A", 30.0, Some(20.0), 0.5),
            row("B", 40.0, Some(20.0), 0.5),
            row("C", 25.0, None, 0.5),
            row("Z", 0.0, Some(1.0), 0.5),
        ];
        let (short, long) = rank(&root, &[prem("A", 2.0), prem("B", 2.0), prem("C", 2.0)], &[]);
        let s: Vec<_> = short.iter().map(|r| r.atm.symbol.as_str()).collect();
        let l: Vec<_> = long.iter().map(|r| r.atm.symbol.as_str()).collect();
        assert_eq!(s, vec!["B", "A", "C"]);
        assert_eq!(l, vec!["A", "B", "C"]);
        assert_eq!(short[0].diff, Some(18.0));
        assert_eq!(short[0].atm.ivp, Some(50.0));
    }

    #[test]
    fn confirmed_date_hides_expected() {
        let cal = ResultCalendar::new(
            vec![result("A", d(4, 10))],
            vec![result("A", d(3, 5)), result("B", d(3, 6)), result("C", d(3, 20))],
        );
        let near = cal.reporting(d(3, 1), 7, d(3, 1), d(3, 28));
        assert!(near.contains("B"));
        assert!(!near.contains("A"));
        assert!(!near.contains("C"));
    }

    #[test]
    fn reporting_names_go_long() {
        let root = [row("A", 30.0, Some(20.0), 0.9), row("B", 30.0, Some(20.0), 0.2), row("C", 30.0, Some(20.0), 0.6)];
        let (short, _) = rank(&root, &[], &[]);
        let reporting: HashSet<String> = ["B".to_string()].into_iter().collect();
        let (short, long) = split_on_results(&short, &reporting);
        let s: Vec<_> = short.iter().map(|r| r.atm.symbol.as_str()).collect();
        assert_eq!(s, vec!["A", "C"]);
        assert_eq!(long[0].atm.symbol, "B");
    }
}
