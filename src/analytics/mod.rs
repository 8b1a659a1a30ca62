pub mod atm_iv;
pub mod atr_scan;
pub mod calendar;
pub mod correlation;
pub mod fwd_scan;
pub mod intraday_long_short;
pub mod iv_surface;
pub mod long_short;
pub mod metadata;
pub mod move_tracker;
pub mod price_change;
pub mod ratio_spread;
pub mod skew;
pub mod skew_benchmark;
pub mod vol;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::config::ScanConfig;
use crate::data::AssetDirs;
use crate::error::Result;
use crate::expiry::ExpiryBuckets;
use crate::gateway::UpstreamGateway;
use crate::store::SnapshotStore;

/// Index and large-cap names the spread scans skip.
pub const INDEX_SYMBOLS: [&str; 2] = ["NIFTY", "BANKNIFTY"];

pub fn is_index(symbol: &str) -> bool {
    INDEX_SYMBOLS.contains(&symbol)
}

// ── Tick context ─────────────────────────────────────────────────────

/// Everything an analytic needs to know about the current tick.
#[derive(Debug, Clone)]
pub struct TickContext {
    pub now: NaiveDateTime,
    pub buckets: ExpiryBuckets,
    pub config: Arc<ScanConfig>,
}

impl TickContext {
    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }
}

// ── Analytic trait ───────────────────────────────────────────────────

/// One recompute step that reads inputs and publishes its own tables.
///
/// An `Err` leaves every table this analytic owns at its last published
/// value; the coordinator logs it and moves on.
#[async_trait]
pub trait Analytic: Send + Sync {
    fn name(&self) -> &'static str;

    async fn update(&self, ctx: &TickContext) -> Result<()>;
}

/// Shared handles every analytic is constructed with.
#[derive(Clone)]
pub struct AnalyticDeps {
    pub store: Arc<SnapshotStore>,
    pub gateway: Arc<dyn UpstreamGateway>,
    pub assets: AssetDirs,
}

// ── Ranking helpers ──────────────────────────────────────────────────

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| !x.is_nan())
}

/// Descending on `key`, missing values last. Stable, so ties keep input order.
pub fn sort_desc_by<T>(rows: &mut [T], key: impl Fn(&T) -> Option<f64>) {
    rows.sort_by(|a, b| match (finite(key(a)), finite(key(b))) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Ascending on `key`, missing values last. Stable.
pub fn sort_asc_by<T>(rows: &mut [T], key: impl Fn(&T) -> Option<f64>) {
    rows.sort_by(|a, b| match (finite(key(a)), finite(key(b))) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// First row per key, for left joins against reference tables.
pub fn index_by<'a, T>(rows: &'a [T], key: impl Fn(&T) -> &str) -> HashMap<&'a str, &'a T> {
    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        map.entry(key(row)).or_insert(row);
    }
    map
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

/// `a / b`, `None` when `b` is zero or either side is missing.
pub fn ratio(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) if b != 0.0 => Some(a / b),
        _ => None,
    }
}

pub fn scale(v: Option<f64>, by: f64) -> Option<f64> {
    v.map(|x| x * by)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_is_stable_with_missing_last() {
        let mut rows = vec![("a", Some(1.0)), ("b", None), ("c", Some(3.0)), ("d", Some(1.0))];
        sort_desc_by(&mut rows, |r| r.1);
        let order: Vec<_> = rows.iter().map(|r| r.0).collect();
        assert_eq!(order, vec!["c", "a", "d", "b"]);

        sort_asc_by(&mut rows, |r| r.1);
        let order: Vec<_> = rows.iter().map(|r| r.0).collect();
        assert_eq!(order, vec!["a", "d", "c", "b"]);
    }

    #[test]
    fn ratio_guards_zero() {
        assert_eq!(ratio(Some(1.0), Some(0.0)), None);
        assert_eq!(ratio(Some(1.0), None), None);
        assert_eq!(ratio(Some(3.0), Some(2.0)), Some(1.5));
    }

    #[test]
    fn index_keeps_first() {
        let rows = vec![("A", 1), ("A", 2), ("B", 3)];
        let idx = index_by(&rows, |r| r.0);
        assert_eq!(idx["A"].1, 1);
        assert_eq!(idx.len(), 2);
    }
}
