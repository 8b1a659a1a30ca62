use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::Serialize;

use super::atm_iv::{self, AtmIvRow};
use super::{Analytic, AnalyticDeps, TickContext, index_by, round_to};
use crate::data::csv_types::ForwardVolRow;
use crate::data::load_csv;
use crate::error::{Result, ScreenerError};
use crate::expiry::Bucket;
use crate::store::{SnapshotStore, Table};

// ── Row ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolRow {
    pub symbol: String,
    pub forward_vol: f64,
    pub vol_benchmark: f64,
    pub vol_benchmark_prev: f64,
    pub vol_threshold_percentage: f64,
    pub vol_threshold_val: f64,
    pub vol_up_updated_at: Option<NaiveDateTime>,
    pub vol_down_updated_at: Option<NaiveDateTime>,
    pub atm_iv: Option<f64>,
    pub fwd_iv: Option<f64>,
    pub pct_change: Option<f64>,
}

impl VolRow {
    fn seed(reference: &ForwardVolRow, tracker_perc: f64) -> Self {
        let forward_vol = round_to(reference.forward_vol, 1);
        let pct = tracker_perc / 100.0;
        Self {
            symbol: reference.symbol.clone(),
            forward_vol,
            vol_benchmark: forward_vol,
            vol_benchmark_prev: forward_vol,
            vol_threshold_percentage: pct,
            vol_threshold_val: forward_vol * pct,
            vol_up_updated_at: None,
            vol_down_updated_at: None,
            atm_iv: None,
            fwd_iv: None,
            pct_change: None,
        }
    }

    /// Step the benchmark against the current IV. The down check sees the
    /// benchmark as already raised by the up check.
    fn step(&mut self, now: NaiveDateTime) -> (bool, bool) {
        let Some(iv) = self.atm_iv.filter(|v| *v != 0.0) else {
            return (false, false);
        };
        let mut up = false;
        let mut down = false;
        if iv - self.vol_benchmark >= self.vol_threshold_val {
            self.vol_up_updated_at = Some(now);
            self.vol_benchmark_prev = self.vol_benchmark;
            self.vol_benchmark += self.vol_threshold_val;
            up = true;
        }
        if self.vol_benchmark - iv > self.vol_threshold_val {
            self.vol_down_updated_at = Some(now);
            self.vol_benchmark_prev = self.vol_benchmark;
            self.vol_benchmark -= self.vol_threshold_val;
            down = true;
        }
        (up, down)
    }
}

// ── Per-bucket book ──────────────────────────────────────────────────

#[derive(Default)]
struct VolBook {
    rows: Vec<VolRow>,
    up: VecDeque<VolRow>,
    down: VecDeque<VolRow>,
}

impl VolBook {
    fn new(reference: &[ForwardVolRow], tracker_perc: f64) -> Self {
        let rows = reference
            .iter()
            .map(|r| VolRow::seed(r, tracker_perc))
            .filter(|r| r.forward_vol != 0.0)
            .collect();
        Self {
            rows,
            ..Default::default()
        }
    }

    fn tick(&mut self, root: &[AtmIvRow], now: NaiveDateTime, history_limit: usize) {
        let live = index_by(root, |r| r.symbol.as_str());
        for row in &mut self.rows {
            let quote = live.get(row.symbol.as_str());
            row.atm_iv = quote.map(|q| q.atm_iv);
            row.fwd_iv = quote.and_then(|q| q.fwd_iv);
            row.pct_change = quote.map(|q| q.pct_change);

            let (up, down) = row.step(now);
            if up {
                self.up.push_front(row.clone());
            }
            if down {
                self.down.push_front(row.clone());
            }
        }
        self.up.truncate(history_limit);
        self.down.truncate(history_limit);

        for shown in self.up.iter_mut().chain(self.down.iter_mut()) {
            shown.atm_iv = live.get(shown.symbol.as_str()).map(|q| q.atm_iv);
        }
    }
}

/// (state, up history, down history) per tracked bucket.
const TABLES: [(&str, &str, &str); 2] = [
    ("vol.near", "vol.near_up", "vol.near_down"),
    ("vol.next", "vol.next_up", "vol.next_down"),
];

struct Outputs {
    state: Table<VolRow>,
    up: Table<VolRow>,
    down: Table<VolRow>,
}

impl Outputs {
    fn new(store: &SnapshotStore, (state, up, down): (&str, &str, &str)) -> Self {
        Self {
            state: store.table(state),
            up: store.table(up),
            down: store.table(down),
        }
    }

    fn publish(&self, book: &VolBook) {
        self.state.publish(book.rows.clone());
        self.up.publish(book.up.iter().cloned().collect());
        self.down.publish(book.down.iter().cloned().collect());
    }
}

// ── Analytic ─────────────────────────────────────────────────────────

/// Stepped IV benchmark per symbol, seeded from forward vol.
pub struct VolBenchmark {
    store: Arc<SnapshotStore>,
    books: Mutex<[VolBook; 2]>,
    outputs: [Outputs; 2],
}

fn slot(bucket: Bucket) -> Result<usize> {
    match bucket {
        Bucket::Near => Ok(0),
        Bucket::Next => Ok(1),
        Bucket::Far => Err(ScreenerError::Config("vol benchmarks exist for near and next only".into())),
    }
}

impl VolBenchmark {
    pub fn new(deps: &AnalyticDeps, tracker_perc: f64) -> Result<Self> {
        let near: Vec<ForwardVolRow> = load_csv(&deps.assets.network, "forward_vol_expiry_1.csv")?;
        let next: Vec<ForwardVolRow> = load_csv(&deps.assets.network, "forward_vol_expiry_2.csv")?;
        Ok(Self::from_reference(&deps.store, &near, &next, tracker_perc))
    }

    pub fn from_reference(
        store: &Arc<SnapshotStore>,
        near: &[ForwardVolRow],
        next: &[ForwardVolRow],
        tracker_perc: f64,
    ) -> Self {
        Self {
            store: Arc::clone(store),
            books: Mutex::new([VolBook::new(near, tracker_perc), VolBook::new(next, tracker_perc)]),
            outputs: TABLES.map(|names| Outputs::new(store, names)),
        }
    }

    /// Operator override. `change_pct` re-derives the step from forward vol.
    pub fn override_benchmark(
        &self,
        bucket: Bucket,
        ticker: &str,
        benchmark: Option<f64>,
        change_pct: Option<f64>,
    ) -> Result<()> {
        let i = slot(bucket)?;
        if let Some(pct) = change_pct {
            if pct <= 0.0 {
                return Err(ScreenerError::Config(format!("change must be positive, got {pct}")));
            }
        }

        let mut books = self.books.lock();
        let row = books[i]
            .rows
            .iter_mut()
            .find(|r| r.symbol == ticker)
            .ok_or_else(|| ScreenerError::NotFound(format!("{ticker} has no {bucket} vol benchmark")))?;
        if let Some(b) = benchmark {
            row.vol_benchmark_prev = row.vol_benchmark;
            row.vol_benchmark = b;
        }
        if let Some(pct) = change_pct {
            row.vol_threshold_percentage = pct / 100.0;
            row.vol_threshold_val = row.forward_vol * pct / 100.0;
        }
        tracing::info!(ticker, %bucket, ?benchmark, ?change_pct, "vol benchmark overridden");
        self.outputs[i].publish(&books[i]);
        Ok(())
    }
}

#[async_trait]
impl Analytic for VolBenchmark {
    fn name(&self) -> &'static str {
        "vol"
    }

    async fn update(&self, ctx: &TickContext) -> Result<()> {
        let near = self.store.read::<AtmIvRow>(atm_iv::NEAR);
        let next = self.store.read::<AtmIvRow>(atm_iv::NEXT);
        let limit = ctx.config.display_history_limit;

        let mut books = self.books.lock();
        books[0].tick(&near, ctx.now, limit);
        books[1].tick(&next, ctx.now, limit);
        self.outputs[0].publish(&books[0]);
        self.outputs[1].publish(&books[1]);
        Ok(())
    }
}
