use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use super::atm_iv::{self, AtmIvRow};
use super::move_tracker::{newest_prior_checkpoint, newest_prior_close, read_checkpoint};
use super::{Analytic, AnalyticDeps, TickContext, index_by, scale};
use crate::data::csv_types::{ForwardVolRow, IvStatsRow};
use crate::data::load_csv;
use crate::error::Result;
use crate::store::{SnapshotStore, Table};

pub const SHORT: &str = "intraday_long_short.short";
pub const LONG: &str = "intraday_long_short.long";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntradayRow {
    pub symbol: String,
    pub pct_change: f64,
    pub ivp: Option<f64>,
    pub atm_iv: f64,
    pub fwd_iv: f64,
    pub days_theta: Option<f64>,
    pub hv: Option<f64>,
    pub long_moves_yest: f64,
    pub bench_mark_iv: Option<f64>,
}

/// Session phase for the ladder; the reference IV and the long-side
/// theta gate both tighten after the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Early,
    Late,
}

fn gt(a: f64, b: Option<f64>) -> bool {
    b.is_some_and(|b| a > b)
}

fn lt(a: f64, b: Option<f64>) -> bool {
    b.is_some_and(|b| a < b)
}

impl IntradayRow {
    fn tier_reference(&self, session: Session) -> Option<f64> {
        match session {
            Session::Early => Some(self.fwd_iv),
            Session::Late => self.bench_mark_iv.map(|b| (self.fwd_iv + b) / 2.0),
        }
    }

    fn in_band(&self, lo: f64, hi: f64) -> bool {
        self.ivp.is_some_and(|p| p >= lo && p <= hi)
    }

    fn above(&self, hi: f64) -> bool {
        self.ivp.is_some_and(|p| p > hi)
    }

    pub fn is_short(&self, session: Session) -> bool {
        let gate = self.days_theta.is_some_and(|t| t <= 0.5)
            && self.hv.is_some_and(|hv| hv <= 0.9 * self.atm_iv)
            && self.long_moves_yest <= 2.0;
        let tier1 = self.in_band(30.0, 60.0) && self.atm_iv > self.fwd_iv;
        let tier2 = self.in_band(60.0, 90.0) && gt(self.atm_iv, self.tier_reference(session));
        let tier3 = self.above(90.0) && gt(self.atm_iv, self.bench_mark_iv);
        gate && (tier1 || tier2 || tier3)
    }

    pub fn is_long(&self, session: Session) -> bool {
        let min_theta = match session {
            Session::Early => 0.0,
            Session::Late => 0.5,
        };
        let gate = self.days_theta.is_some_and(|t| t >= min_theta)
            && self.hv.is_some_and(|hv| hv >= 0.9 * self.atm_iv)
            && self.long_moves_yest >= 3.0;
        let tier1 = self.in_band(30.0, 60.0) && self.atm_iv < self.fwd_iv;
        let tier2 = self.in_band(60.0, 90.0) && lt(self.atm_iv, self.tier_reference(session));
        let tier3 = self.above(90.0) && lt(self.atm_iv, self.bench_mark_iv);
        gate && (tier1 || tier2 || tier3)
    }
}

/// Inner join of the near bucket with forward vol, IV benchmarks and
/// yesterday's move counts.
pub fn join(
    root: &[AtmIvRow],
    forward: &[ForwardVolRow],
    stats: &[IvStatsRow],
    yesterday: &HashMap<String, f64>,
) -> Vec<IntradayRow> {
    let fwd = index_by(forward, |r| r.symbol.as_str());
    let stats = index_by(stats, |r| r.symbol.as_str());
    root.iter()
        .filter(|r| r.is_live())
        .filter_map(|r| {
            let fwd_iv = fwd.get(r.symbol.as_str())?.forward_vol;
            let bench_mark_iv = stats.get(r.symbol.as_str())?.bench_mark_iv;
            let long_moves_yest = *yesterday.get(&r.symbol)?;
            Some(IntradayRow {
                symbol: r.symbol.clone(),
                pct_change: r.pct_change,
                ivp: scale(r.ivp, 100.0),
                atm_iv: r.atm_iv,
                fwd_iv,
                days_theta: r.days_theta,
                hv: r.hv,
                long_moves_yest,
                bench_mark_iv,
            })
        })
        .collect()
}

/// Yesterday's `long_moves` per symbol, read from the newest closing-count
/// file before `today`. Falls back to the day checkpoint when no closing
/// file exists; nothing at all yields an empty map.
pub fn yesterday_moves(dir: &std::path::Path, today: NaiveDate) -> Result<HashMap<String, f64>> {
    let source = match newest_prior_close(dir, today)? {
        Some(found) => Some(found),
        None => {
            let found = newest_prior_checkpoint(dir, today)?;
            if found.is_some() {
                tracing::warn!(dir = %dir.display(), "no closing move counts, using first-tick checkpoint");
            }
            found
        }
    };
    let Some((date, path)) = source else {
        tracing::warn!(dir = %dir.display(), "no prior move checkpoint, intraday scan will be empty");
        return Ok(HashMap::new());
    };
    tracing::debug!(%date, file = %path.display(), "loaded prior move counts");
    Ok(read_checkpoint(&path)?
        .into_iter()
        .map(|e| (e.symbol, e.long_moves))
        .collect())
}

/// Near-bucket intraday long/short ladder.
pub struct IntradayLongShort {
    store: Arc<SnapshotStore>,
    forward: Vec<ForwardVolRow>,
    stats: Vec<IvStatsRow>,
    yesterday: HashMap<String, f64>,
    short: Table<IntradayRow>,
    long: Table<IntradayRow>,
}

impl IntradayLongShort {
    pub fn new(deps: &AnalyticDeps, today: NaiveDate) -> Result<Self> {
        let network = &deps.assets.network;
        Ok(Self::from_reference(
            &deps.store,
            load_csv(network, "forward_vol_expiry_1.csv")?,
            load_csv(network, "iv_stats.csv")?,
            yesterday_moves(&deps.assets.checkpoint_dir(), today)?,
        ))
    }

    pub fn from_reference(
        store: &Arc<SnapshotStore>,
        forward: Vec<ForwardVolRow>,
        stats: Vec<IvStatsRow>,
        yesterday: HashMap<String, f64>,
    ) -> Self {
        Self {
            store: Arc::clone(store),
            forward,
            stats,
            yesterday,
            short: store.table(SHORT),
            long: store.table(LONG),
        }
    }
}

#[async_trait]
impl Analytic for IntradayLongShort {
    fn name(&self) -> &'static str {
        "intraday_long_short"
    }

    async fn update(&self, ctx: &TickContext) -> Result<()> {
        let session = if ctx.now.time() < ctx.config.intraday_cutoff_time()? {
            Session::Early
        } else {
            Session::Late
        };
        let root = self.store.read::<AtmIvRow>(atm_iv::NEAR);
        let rows = join(&root, &self.forward, &self.stats, &self.yesterday);

        let short = rows.iter().filter(|r| r.is_short(session)).cloned().collect();
        let long = rows.iter().filter(|r| r.is_long(session)).cloned().collect();
        self.short.publish(short);
        self.long.publish(long);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ivp: f64, atm_iv: f64, fwd_iv: f64, bench: f64, theta: f64, hv: f64, moves: f64) -> IntradayRow {
        IntradayRow {
            symbol: "ABC".into(),
            pct_change: 0.0,
            ivp: Some(ivp),
            atm_iv,
            fwd_iv,
            days_theta: Some(theta),
            hv: Some(hv),
            long_moves_yest: moves,
            bench_mark_iv: Some(bench),
        }
    }

    #[test]
    fn tier_one_short_and_long() {
        let short = row(45.0, 30.0, 25.0, 28.0, 0.0, 20.0, 1.0);
        assert!(short.is_short(Session::Early));
        assert!(!short.is_long(Session::Early));

        let long = row(45.0, 20.0, 25.0, 28.0, 1.0, 19.0, 4.0);
        assert!(long.is_long(Session::Late));
        assert!(!long.is_short(Session::Late));
    }

    #[test]
    fn tier_two_reference_switches_at_cutoff() {
        // fwd 25, bench 35: early reference 25, late reference 30.
        let r = row(75.0, 28.0, 25.0, 35.0, 0.0, 20.0, 0.0);
        assert!(r.is_short(Session::Early));
        assert!(!r.is_short(Session::Late));
    }

    #[test]
    fn tier_three_needs_high_ivp() {
        let r = row(50.0, 40.0, 45.0, 30.0, 0.0, 20.0, 0.0);
        assert!(!r.is_short(Session::Early));
        let r = row(95.0, 40.0, 45.0, 30.0, 0.0, 20.0, 0.0);
        assert!(r.is_short(Session::Early));
    }

    #[test]
    fn long_theta_gate_tightens_late() {
        let r = row(45.0, 20.0, 25.0, 28.0, 0.2, 19.0, 4.0);
        assert!(r.is_long(Session::Early));
        assert!(!r.is_long(Session::Late));
    }

    #[test]
    fn yesterday_counts_come_from_prior_checkpoint() {
        use crate::analytics::move_tracker::checkpoint_file_name;
        let dir = tempfile::tempdir().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        std::fs::write(
            dir.path().join(checkpoint_file_name(day.pred_opt().unwrap())),
            "symbol,long_move_val,long_move_val_track,fut_benchmark,fut_benchmark_track,long_moves,long_moves_track,days_theta,idv_updated_time,idv_updated_time_track\n\
             ABC,2.0,1.5,100.0,100.0,3.0,2.0,1.5,,\n",
        )
        .unwrap();
        let moves = yesterday_moves(dir.path(), day).unwrap();
        assert_eq!(moves.get("ABC"), Some(&3.0));
        assert!(yesterday_moves(dir.path(), day.pred_opt().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn closing_counts_win_over_day_checkpoint() {
        use crate::analytics::move_tracker::{checkpoint_file_name, close_file_name};
        let dir = tempfile::tempdir().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let prev = day.pred_opt().unwrap();
        let header = "symbol,long_move_val,long_move_val_track,fut_benchmark,fut_benchmark_track,long_moves,long_moves_track,days_theta,idv_updated_time,idv_updated_time_track\n";
        std::fs::write(
            dir.path().join(checkpoint_file_name(prev)),
            format!("{header}ABC,2.0,1.5,100.0,100.0,0.0,0.0,0.0,,\n"),
        )
        .unwrap();
        std::fs::write(
            dir.path().join(close_file_name(prev)),
            format!("{header}ABC,2.0,1.5,108.0,108.0,4.0,4.0,2.0,,\n"),
        )
        .unwrap();
        let moves = yesterday_moves(dir.path(), day).unwrap();
        assert_eq!(moves.get("ABC"), Some(&4.0));
    }
}
