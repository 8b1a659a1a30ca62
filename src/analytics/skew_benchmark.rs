use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;

use super::skew::{self, SkewLegsRow};
use super::{Analytic, AnalyticDeps, TickContext};
use crate::data::csv_types::SkewBenchmarkRow;
use crate::data::{load_csv, write_csv};
use crate::error::{Result, ScreenerError};
use crate::expiry::{Bucket, ExpiryBuckets};
use crate::store::{SnapshotStore, Table};

const TABLES: [&str; 2] = ["skew_benchmark.near", "skew_benchmark.next"];

fn reference_file(bucket: Bucket) -> String {
    format!("skew_expiry_{}.csv", bucket.ordinal())
}

fn slot(bucket: Bucket) -> Result<usize> {
    match bucket {
        Bucket::Near => Ok(0),
        Bucket::Next => Ok(1),
        Bucket::Far => Err(ScreenerError::Config("skew benchmarks exist for near and next only".into())),
    }
}

/// Benchmark row joined with the live skew of the same symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkewBenchmarkView {
    pub symbol: String,
    pub ppf: Option<f64>,
    pub pcf: Option<f64>,
    pub ccb: Option<f64>,
    #[serde(rename = "4l_f")]
    pub four_leg_f: Option<f64>,
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

/// Inner join of benchmarks with the skew legs of `expiry`.
pub fn join(benchmarks: &[SkewBenchmarkRow], legs: &[SkewLegsRow], expiry: NaiveDate) -> Vec<SkewBenchmarkView> {
    let mut out = Vec::new();
    for b in benchmarks {
        for leg in legs.iter().filter(|l| l.expiry == expiry && l.symbol == b.symbol) {
            out.push(SkewBenchmarkView {
                symbol: b.symbol.clone(),
                ppf: b.ppf,
                pcf: b.pcf,
                ccb: b.ccb,
                four_leg_f: b.four_leg_f,
                expiry,
                pe_pe_skew: leg.pe_pe_skew,
                pe_ce_skew: leg.pe_ce_skew,
                ce_ce_skew: leg.ce_ce_skew,
                four_leg_skew: leg.four_leg_skew,
            });
        }
    }
    out
}

/// Partial benchmark update; `None` fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct SkewOverride {
    pub ppf: Option<f64>,
    pub pcf: Option<f64>,
    pub ccb: Option<f64>,
    pub four_leg_f: Option<f64>,
}

/// Operator-maintained skew benchmarks next to the live skew.
pub struct SkewBenchmark {
    store: Arc<SnapshotStore>,
    dir: PathBuf,
    benchmarks: Mutex<[Vec<SkewBenchmarkRow>; 2]>,
    outputs: [Table<SkewBenchmarkView>; 2],
    last_buckets: Mutex<Option<ExpiryBuckets>>,
}

impl SkewBenchmark {
    pub fn new(deps: &AnalyticDeps) -> Result<Self> {
        let dir = deps.assets.local.clone();
        let near = load_csv(&dir, &reference_file(Bucket::Near))?;
        let next = load_csv(&dir, &reference_file(Bucket::Next))?;
        Ok(Self::from_reference(&deps.store, dir, near, next))
    }

    pub fn from_reference(
        store: &Arc<SnapshotStore>,
        dir: PathBuf,
        near: Vec<SkewBenchmarkRow>,
        next: Vec<SkewBenchmarkRow>,
    ) -> Self {
        Self {
            store: Arc::clone(store),
            dir,
            benchmarks: Mutex::new([near, next]),
            outputs: TABLES.map(|name| store.table(name)),
            last_buckets: Mutex::new(None),
        }
    }

    fn publish(&self, benchmarks: &[Vec<SkewBenchmarkRow>; 2], buckets: &ExpiryBuckets) {
        let legs = self.store.read::<SkewLegsRow>(skew::LEGS);
        for (i, bucket) in [Bucket::Near, Bucket::Next].into_iter().enumerate() {
            self.outputs[i].publish(join(&benchmarks[i], &legs, buckets.get(bucket)));
        }
    }

    /// Update one ticker's benchmarks, persist the file, and republish.
    pub fn override_benchmark(&self, bucket: Bucket, ticker: &str, update: SkewOverride) -> Result<()> {
        let i = slot(bucket)?;
        let mut benchmarks = self.benchmarks.lock();
        let mut found = false;
        for row in benchmarks[i].iter_mut().filter(|r| r.symbol == ticker) {
            found = true;
            if let Some(v) = update.ppf {
                row.ppf = Some(v);
            }
            if let Some(v) = update.pcf {
                row.pcf = Some(v);
            }
            if let Some(v) = update.ccb {
                row.ccb = Some(v);
            }
            if let Some(v) = update.four_leg_f {
                row.four_leg_f = Some(v);
            }
        }
        if !found {
            return Err(ScreenerError::NotFound(format!("ticker {ticker} not found in {bucket} skew benchmarks")));
        }

        write_csv(&self.dir.join(reference_file(bucket)), &benchmarks[i])?;
        tracing::info!(ticker, %bucket, ?update, "skew benchmark overridden");

        if let Some(buckets) = *self.last_buckets.lock() {
            self.publish(&benchmarks, &buckets);
        }
        Ok(())
    }
}

#[async_trait]
impl Analytic for SkewBenchmark {
    fn name(&self) -> &'static str {
        "skew_benchmark"
    }

    async fn update(&self, ctx: &TickContext) -> Result<()> {
        *self.last_buckets.lock() = Some(ctx.buckets);
        let benchmarks = self.benchmarks.lock();
        self.publish(&benchmarks, &ctx.buckets);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn bench(symbol: &str) -> SkewBenchmarkRow {
        SkewBenchmarkRow {
            symbol: symbol.into(),
            ppf: Some(0.1),
            pcf: None,
            ccb: None,
            four_leg_f: None,
        }
    }

    fn legs(symbol: &str, expiry: NaiveDate) -> SkewLegsRow {
        SkewLegsRow {
            symbol: symbol.into(),
            expiry,
            pe_pe_skew: Some(0.2),
            pe_ce_skew: None,
            ce_ce_skew: None,
            four_leg_skew: None,
        }
    }

    #[test]
    fn join_is_inner_per_expiry() {
        let rows = join(
            &[bench("ABC"), bench("NOPE")],
            &[legs("ABC", d(3, 28)), legs("ABC", d(4, 25))],
            d(3, 28),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pe_pe_skew, Some(0.2));
    }

    #[test]
    fn override_persists_and_rejects_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new());
        let sb = SkewBenchmark::from_reference(&store, dir.path().to_path_buf(), vec![bench("ABC")], vec![]);

        let err = sb.override_benchmark(Bucket::Near, "XYZ", SkewOverride::default());
        assert!(matches!(err, Err(ScreenerError::NotFound(_))));

        sb.override_benchmark(
            Bucket::Near,
            "ABC",
            SkewOverride {
                ccb: Some(0.4),
                ..Default::default()
            },
        )
        .unwrap();
        let on_disk: Vec<SkewBenchmarkRow> = load_csv(dir.path(), "skew_expiry_1.csv").unwrap();
        assert_eq!(on_disk[0].ccb, Some(0.4));
        assert_eq!(on_disk[0].ppf, Some(0.1));
    }
}
