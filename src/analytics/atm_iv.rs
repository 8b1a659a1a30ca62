use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

use super::move_tracker::{MISSING_DATA_FLOOR, MoveEvent, MoveTracker, PriceTick};
use super::{Analytic, AnalyticDeps, TickContext};
use crate::config::ScanConfig;
use crate::data::csv_types::IvStatsRow;
use crate::data::load_csv;
use crate::error::{Result, ScreenerError};
use crate::expiry::{Bucket, ExpiryBuckets};
use crate::gateway::UpstreamGateway;
use crate::gateway::types::{AtmIvRecord, IvStats};
use crate::store::{SnapshotStore, Table};

pub const NEAR: &str = "atm_iv.near";
pub const NEXT: &str = "atm_iv.next";
pub const FAR: &str = "atm_iv.far";
pub const ALL: &str = "atm_iv.all";
pub const MOVES: &str = "atm_iv.moves";

/// `pct_change` stand-in when the upstream has no futures change.
pub const MISSING_PCT_CHANGE: f64 = -999.0;

pub fn table_for(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::Near => NEAR,
        Bucket::Next => NEXT,
        Bucket::Far => FAR,
    }
}

// ── Row ──────────────────────────────────────────────────────────────

/// One (symbol, expiry) row of the root table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtmIvRow {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub atm_strike: Option<f64>,
    #[serde(rename = "type")]
    pub option_type: Option<String>,
    pub delta: Option<f64>,
    pub ltp: f64,
    pub atm_iv: f64,
    pub ivp: Option<f64>,
    pub iv_stats: Option<IvStats>,
    pub pct_change: f64,
    pub z_score: Option<f64>,
    pub hv: Option<f64>,
    pub fair_price: Option<f64>,
    pub fwd_iv: Option<f64>,
    pub days_theta: Option<f64>,
}

impl AtmIvRow {
    /// Rows with a zero IV carry no quote this tick.
    pub fn is_live(&self) -> bool {
        self.atm_iv != 0.0
    }

    pub fn avg_normal_iv(&self) -> Option<f64> {
        self.iv_stats.as_ref().and_then(|s| s.avg_normal_iv)
    }
}

fn slot<T: Clone>(values: &[Option<T>], i: usize) -> Option<T> {
    values.get(i).cloned().flatten()
}

/// Explode parallel per-expiry arrays into one row per expiry.
pub fn flatten(records: &[AtmIvRecord]) -> Vec<AtmIvRow> {
    let mut rows = Vec::new();
    for rec in records {
        for (i, expiry) in rec.expiry.iter().enumerate() {
            rows.push(AtmIvRow {
                symbol: rec.symbol.clone(),
                expiry: *expiry,
                atm_strike: slot(&rec.atm_strike, i),
                option_type: slot(&rec.option_type, i),
                delta: slot(&rec.delta, i),
                ltp: slot(&rec.ltp, i).unwrap_or(0.0),
                atm_iv: slot(&rec.atm_iv, i).unwrap_or(0.0),
                ivp: slot(&rec.ivp, i),
                iv_stats: slot(&rec.iv_stats, i),
                pct_change: slot(&rec.percent_change, i)
                    .and_then(|p| p.fut)
                    .unwrap_or(MISSING_PCT_CHANGE),
                z_score: rec.z_score,
                hv: rec.hv,
                fair_price: rec.fair_price,
                fwd_iv: rec.fwd_iv,
                days_theta: None,
            });
        }
    }
    rows
}

// ── Engine ───────────────────────────────────────────────────────────

struct RootState {
    buckets: [IndexMap<String, AtmIvRow>; 3],
    tracker: MoveTracker,
    moves: VecDeque<MoveEvent>,
}

fn index(bucket: Bucket) -> usize {
    bucket.ordinal() - 1
}

/// Root analytic: owns the ATM-IV tables and the move tracker.
pub struct AtmIvEngine {
    gateway: Arc<dyn UpstreamGateway>,
    checkpoint_dir: PathBuf,
    near: Table<AtmIvRow>,
    next: Table<AtmIvRow>,
    far: Table<AtmIvRow>,
    all: Table<AtmIvRow>,
    moves: Table<MoveEvent>,
    state: Mutex<RootState>,
}

impl AtmIvEngine {
    /// `iv_stats.csv` is required; a bad threshold aborts startup.
    pub fn new(deps: &AnalyticDeps, config: &ScanConfig, today: NaiveDate) -> Result<Self> {
        let stats: Vec<IvStatsRow> = load_csv(&deps.assets.network, "iv_stats.csv")?;
        let checkpoint_dir = deps.assets.checkpoint_dir();
        let tracker = MoveTracker::load(&checkpoint_dir, &stats, config.move_tracker_val, today)?;
        Ok(Self::with_tracker(&deps.store, Arc::clone(&deps.gateway), checkpoint_dir, tracker))
    }

    pub fn with_tracker(
        store: &SnapshotStore,
        gateway: Arc<dyn UpstreamGateway>,
        checkpoint_dir: PathBuf,
        tracker: MoveTracker,
    ) -> Self {
        Self {
            gateway,
            checkpoint_dir,
            near: store.table(NEAR),
            next: store.table(NEXT),
            far: store.table(FAR),
            all: store.table(ALL),
            moves: store.table(MOVES),
            state: Mutex::new(RootState {
                buckets: Default::default(),
                tracker,
                moves: VecDeque::new(),
            }),
        }
    }

    /// Fold freshly fetched rows into state and publish. Synchronous so the
    /// state lock never spans an await.
    fn apply(&self, rows: Vec<AtmIvRow>, buckets: &ExpiryBuckets, now: NaiveDateTime, history_limit: usize) {
        let mut state = self.state.lock();

        let mut unbucketed = 0usize;
        for row in rows {
            match buckets.bucket_of(row.expiry) {
                Some(b) => {
                    state.buckets[index(b)].insert(row.symbol.clone(), row);
                }
                None => unbucketed += 1,
            }
        }
        if unbucketed > 0 {
            tracing::debug!(unbucketed, "rows outside the tracked expiries");
        }

        let RootState {
            buckets: maps,
            tracker,
            moves,
        } = &mut *state;

        let ticks = maps[index(Bucket::Near)].values().map(|r| PriceTick {
            symbol: &r.symbol,
            ltp: r.ltp,
            pct_change: r.pct_change,
        });
        let events = tracker.observe(ticks, now);
        if !events.is_empty() {
            tracing::info!(count = events.len(), "underlyings moved");
        }
        for event in events {
            moves.push_front(event);
        }
        moves.truncate(history_limit);

        match tracker.checkpoint(&self.checkpoint_dir, now.date()) {
            Ok(true) => tracing::info!(dir = %self.checkpoint_dir.display(), "move tracker checkpoint written"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "move tracker checkpoint failed"),
        }
        if let Err(e) = tracker.save_close(&self.checkpoint_dir, now.date()) {
            tracing::warn!(error = %e, "closing move counts not saved");
        }

        let snapshot = |b: Bucket| -> Vec<AtmIvRow> {
            maps[index(b)]
                .values()
                .map(|r| AtmIvRow {
                    days_theta: tracker.days_theta(&r.symbol),
                    ..r.clone()
                })
                .collect()
        };
        let near = snapshot(Bucket::Near);
        let next = snapshot(Bucket::Next);
        let far = snapshot(Bucket::Far);
        let all: Vec<AtmIvRow> = near.iter().chain(&next).chain(&far).cloned().collect();

        self.near.publish(near);
        self.next.publish(next);
        self.far.publish(far);
        self.all.publish(all);
        self.moves.publish(moves.iter().cloned().collect());
    }

    pub fn tracker_snapshot(&self) -> MoveTracker {
        self.state.lock().tracker.clone()
    }
}

#[async_trait]
impl Analytic for AtmIvEngine {
    fn name(&self) -> &'static str {
        "atm_iv"
    }

    async fn update(&self, ctx: &TickContext) -> Result<()> {
        let records = match self.gateway.fetch_atm_iv().await? {
            Some(records) if !records.is_empty() => records,
            _ => {
                return Err(ScreenerError::UpstreamUnavailable("atm_iv returned no data".into()));
            }
        };
        let rows = flatten(&records);
        self.apply(rows, &ctx.buckets, ctx.now, ctx.config.display_history_limit);
        Ok(())
    }
}

/// Near-bucket rows with a live quote and a usable price change.
pub fn priced(rows: &[AtmIvRow]) -> impl Iterator<Item = &AtmIvRow> {
    rows.iter()
        .filter(|r| r.is_live() && r.pct_change > MISSING_DATA_FLOOR)
}
