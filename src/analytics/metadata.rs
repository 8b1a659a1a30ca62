use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use super::{Analytic, AnalyticDeps, TickContext};
use crate::data::csv_types::ResultDateRow;
use crate::data::load_csv_or_empty;
use crate::error::Result;
use crate::expiry::ExpiryBuckets;
use crate::store::Table;

pub const TABLE: &str = "metadata";

/// Earnings dates per ticker with the display highlight the UI uses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataRow {
    pub ticker: String,
    pub expected: Option<NaiveDate>,
    pub confirmed: Option<NaiveDate>,
    pub color: Option<&'static str>,
}

pub fn color(confirmed: Option<NaiveDate>, expected: Option<NaiveDate>, today: NaiveDate, buckets: &ExpiryBuckets) -> Option<&'static str> {
    if let Some(c) = confirmed {
        if c < today {
            return Some("orange");
        }
        if c < buckets.near() {
            return Some("cyan");
        }
        if c < buckets.next() {
            return Some("yellow");
        }
    }
    match expected {
        Some(e) if today < e && e < buckets.near() => Some("lightblue"),
        _ => None,
    }
}

/// Outer join of expected and confirmed dates, ordered by ticker.
pub fn build(
    expected: &[ResultDateRow],
    confirmed: &[ResultDateRow],
    today: NaiveDate,
    buckets: &ExpiryBuckets,
) -> Vec<MetadataRow> {
    let mut dates: BTreeMap<&str, (Option<NaiveDate>, Option<NaiveDate>)> = BTreeMap::new();
    for r in expected {
        let slot = dates.entry(r.symbol.as_str()).or_default();
        slot.0.get_or_insert(r.date);
    }
    for r in confirmed {
        let slot = dates.entry(r.symbol.as_str()).or_default();
        slot.1.get_or_insert(r.date);
    }
    dates
        .into_iter()
        .map(|(ticker, (expected, confirmed))| MetadataRow {
            ticker: ticker.to_string(),
            expected,
            confirmed,
            color: color(confirmed, expected, today, buckets),
        })
        .collect()
}

/// Publishes the earnings metadata table. The inputs are read once; the
/// colours depend on the day and the buckets so they are recomputed.
pub struct Metadata {
    expected: Vec<ResultDateRow>,
    confirmed: Vec<ResultDateRow>,
    table: Table<MetadataRow>,
}

impl Metadata {
    pub fn new(deps: &AnalyticDeps) -> Self {
        Self {
            expected: load_csv_or_empty(&deps.assets.local, "expected_results.csv"),
            confirmed: load_csv_or_empty(&deps.assets.network, "confirm_results.csv"),
            table: deps.store.table(TABLE),
        }
    }
}

#[async_trait]
impl Analytic for Metadata {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn update(&self, ctx: &TickContext) -> Result<()> {
        self.table
            .publish(build(&self.expected, &self.confirmed, ctx.today(), &ctx.buckets));
        Ok(())
    }
}
