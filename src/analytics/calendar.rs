use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use serde::Serialize;

use super::atm_iv::{self, AtmIvRow};
use super::{Analytic, AnalyticDeps, TickContext, index_by, is_index, round_to, scale};
use crate::config::ScanConfig;
use crate::error::{Result, ScreenerError};
use crate::expiry::ExpiryBuckets;
use crate::gateway::UpstreamGateway;
use crate::gateway::types::{AssetType, DeltaRange, InstrumentRow, TokenSetQuery};
use crate::store::{SnapshotStore, Table};

/// Raw legs of the last calendar fetch, shared with the ratio-spread scan.
pub const TOKEN_SET: &str = "calendar.token_set";

/// Widest delta window requested; the configured bands narrow it.
const FETCH_PUT_DELTA: (f64, f64) = (-0.6, -0.05);
const FETCH_CALL_DELTA: (f64, f64) = (0.05, 0.6);

// ── Rows ─────────────────────────────────────────────────────────────

/// One later-expiry leg matched to its closest current-expiry leg.
#[derive(Debug, Clone, PartialEq)]
struct Match {
    symbol: String,
    strike_price_next: f64,
    opt_type: AssetType,
    ltt: NaiveDateTime,
    next_delta: f64,
    next_iv: f64,
    sort_time: NaiveDateTime,
    strike_price_current: f64,
    current_opt_type: Option<AssetType>,
    current_delta: f64,
    current_iv: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarRow {
    pub symbol: String,
    pub strike_price_next: f64,
    pub opt_type: String,
    pub ltt: NaiveDateTime,
    pub next_delta: f64,
    pub iv_next: f64,
    pub sort_time: NaiveDateTime,
    pub strike_price_current: f64,
    pub current_opt_type: String,
    pub current_delta: f64,
    pub iv_current: f64,
    pub pct_change: Option<f64>,
    pub ivp: Option<f64>,
    pub diff: f64,
}

fn in_band(leg: &InstrumentRow, config: &ScanConfig) -> bool {
    match leg.asset_type {
        AssetType::CallOption => {
            leg.delta >= config.cal_call_lower_delta && leg.delta <= config.cal_call_upper_delta
        }
        AssetType::PutOption => {
            leg.delta >= config.cal_put_lower_delta && leg.delta <= config.cal_put_upper_delta
        }
        AssetType::Future => false,
    }
}

/// Current-expiry leg of `symbol` whose rounded delta is nearest `delta`.
/// Ties go to the first leg in input order.
fn closest<'a>(current: &'a [InstrumentRow], symbol: &str, delta: f64) -> Option<&'a InstrumentRow> {
    let mut best: Option<(&InstrumentRow, f64)> = None;
    for leg in current.iter().filter(|l| l.symbol == symbol) {
        let gap = (round_to(leg.delta, 2) - delta).abs();
        if best.is_none_or(|(_, g)| gap < g) {
            best = Some((leg, gap));
        }
    }
    best.map(|(leg, _)| leg)
}

/// New matches for one (current, later) expiry pair traded at or after
/// `since`, newest trade first.
fn match_pair(
    legs: &[InstrumentRow],
    current_expiry: NaiveDate,
    later_expiry: NaiveDate,
    since: NaiveDateTime,
    liquidity_limit: f64,
    now: NaiveDateTime,
) -> Vec<Match> {
    let current: Vec<InstrumentRow> = legs
        .iter()
        .filter(|l| l.expiry == current_expiry && l.liquidity <= liquidity_limit)
        .cloned()
        .collect();

    let mut later: Vec<(&InstrumentRow, NaiveDateTime)> = legs
        .iter()
        .filter(|l| l.expiry == later_expiry && !is_index(&l.symbol))
        .filter_map(|l| l.last_trade_time.map(|t| (l, t)))
        .filter(|(_, t)| *t >= since)
        .collect();
    later.sort_by(|a, b| b.1.cmp(&a.1));

    later
        .into_iter()
        .map(|(leg, ltt)| {
            let next_delta = round_to(leg.delta, 2);
            let near = closest(&current, &leg.symbol, next_delta);
            Match {
                symbol: leg.symbol.clone(),
                strike_price_next: leg.strike_price,
                opt_type: leg.asset_type,
                ltt,
                next_delta,
                next_iv: leg.last_iv,
                sort_time: now,
                strike_price_current: near.map_or(0.0, |l| l.strike_price),
                current_opt_type: near.map(|l| l.asset_type),
                current_delta: near.map_or(0.0, |l| round_to(l.delta, 2)),
                current_iv: near.map_or(0.0, |l| l.last_iv),
            }
        })
        .collect()
}

// ── Accumulated history per pair ─────────────────────────────────────

#[derive(Debug, Clone)]
struct PairHistory {
    last_trade_time: NaiveDateTime,
    rows: Vec<Match>,
}

impl PairHistory {
    fn new(today: NaiveDate) -> Self {
        Self {
            last_trade_time: today.and_time(NaiveTime::MIN),
            rows: Vec::new(),
        }
    }

    fn absorb(&mut self, fresh: Vec<Match>, limit: usize) {
        if let Some(latest) = fresh.iter().map(|m| m.ltt).max() {
            self.last_trade_time = latest;
        }
        let mut rows = fresh;
        rows.append(&mut self.rows);

        let mut seen = HashSet::new();
        rows.retain(|m| {
            seen.insert((
                m.symbol.clone(),
                m.strike_price_next.to_bits(),
                m.opt_type,
                m.ltt,
            ))
        });
        rows.sort_by(|a, b| {
            b.sort_time
                .cmp(&a.sort_time)
                .then(b.ltt.cmp(&a.ltt))
                .then(b.symbol.cmp(&a.symbol))
                .then(b.strike_price_next.total_cmp(&a.strike_price_next))
        });
        rows.truncate(limit);
        self.rows = rows;
    }
}

// ── Finish ───────────────────────────────────────────────────────────

/// Join root IVP and price change, scale IVs to percent, and split into
/// the four (IVP level × diff sign) quadrants.
pub struct Finished {
    pub all: Vec<CalendarRow>,
    pub low_pos: Vec<CalendarRow>,
    pub low_neg: Vec<CalendarRow>,
    pub high_pos: Vec<CalendarRow>,
    pub high_neg: Vec<CalendarRow>,
}

fn finish(history: &[Match], root: &[AtmIvRow], config: &ScanConfig) -> Finished {
    let root = index_by(root, |r| r.symbol.as_str());
    let all: Vec<CalendarRow> = history
        .iter()
        .filter(|m| !is_index(&m.symbol))
        .map(|m| {
            let quote = root.get(m.symbol.as_str());
            let iv_next = m.next_iv * 100.0;
            let iv_current = m.current_iv * 100.0;
            CalendarRow {
                symbol: m.symbol.clone(),
                strike_price_next: m.strike_price_next,
                opt_type: m.opt_type.short().to_string(),
                ltt: m.ltt,
                next_delta: m.next_delta,
                iv_next,
                sort_time: m.sort_time,
                strike_price_current: m.strike_price_current,
                current_opt_type: m
                    .current_opt_type
                    .map_or("NA", |t| t.short())
                    .to_string(),
                current_delta: m.current_delta,
                iv_current,
                pct_change: quote.map(|q| q.pct_change),
                ivp: quote.and_then(|q| scale(q.ivp, 100.0)),
                diff: iv_next - iv_current,
            }
        })
        .collect();

    let pick = |low: bool, positive: bool| -> Vec<CalendarRow> {
        all.iter()
            .filter(|r| match r.ivp {
                Some(ivp) if low => ivp <= config.cal_low_ivp_limit,
                Some(ivp) => ivp >= config.cal_high_ivp_limit,
                None => false,
            })
            .filter(|r| (r.diff >= 0.0) == positive)
            .cloned()
            .collect()
    };
    Finished {
        low_pos: pick(true, true),
        low_neg: pick(true, false),
        high_pos: pick(false, true),
        high_neg: pick(false, false),
        all,
    }
}

struct PairOutputs {
    source: &'static str,
    all: Table<CalendarRow>,
    low_pos: Table<CalendarRow>,
    low_neg: Table<CalendarRow>,
    high_pos: Table<CalendarRow>,
    high_neg: Table<CalendarRow>,
}

impl PairOutputs {
    fn new(store: &SnapshotStore, prefix: &str, source: &'static str) -> Self {
        Self {
            source,
            all: store.table(prefix),
            low_pos: store.table(&format!("{prefix}_low_pos")),
            low_neg: store.table(&format!("{prefix}_low_neg")),
            high_pos: store.table(&format!("{prefix}_high_pos")),
            high_neg: store.table(&format!("{prefix}_high_neg")),
        }
    }

    fn publish(&self, f: Finished) {
        self.all.publish(f.all);
        self.low_pos.publish(f.low_pos);
        self.low_neg.publish(f.low_neg);
        self.high_pos.publish(f.high_pos);
        self.high_neg.publish(f.high_neg);
    }
}

// ── Analytic ─────────────────────────────────────────────────────────

/// Calendar-spread scan over (near, next) and (next, far).
pub struct CalendarSpread {
    store: Arc<SnapshotStore>,
    gateway: Arc<dyn UpstreamGateway>,
    histories: Mutex<[PairHistory; 2]>,
    token_set: Table<InstrumentRow>,
    outputs: [PairOutputs; 2],
}

impl CalendarSpread {
    pub fn new(deps: &AnalyticDeps, today: NaiveDate) -> Self {
        let store = &deps.store;
        Self {
            store: Arc::clone(store),
            gateway: Arc::clone(&deps.gateway),
            histories: Mutex::new([PairHistory::new(today), PairHistory::new(today)]),
            token_set: store.table(TOKEN_SET),
            outputs: [
                PairOutputs::new(store, "calendar.near", atm_iv::NEAR),
                PairOutputs::new(store, "calendar.next", atm_iv::NEXT),
            ],
        }
    }

    pub fn query(buckets: &ExpiryBuckets) -> TokenSetQuery {
        TokenSetQuery::new(
            DeltaRange::new(FETCH_PUT_DELTA, FETCH_CALL_DELTA),
            buckets.dates().to_vec(),
        )
    }

    fn publish_finished(&self, histories: &[PairHistory; 2], config: &ScanConfig) {
        for (history, out) in histories.iter().zip(&self.outputs) {
            let root = self.store.read::<AtmIvRow>(out.source);
            out.publish(finish(&history.rows, &root, config));
        }
    }

    /// Re-split the accumulated history after an IVP threshold change.
    pub fn refilter(&self, config: &ScanConfig) {
        let histories = self.histories.lock();
        self.publish_finished(&histories, config);
    }
}

#[async_trait]
impl Analytic for CalendarSpread {
    fn name(&self) -> &'static str {
        "calendar"
    }

    async fn update(&self, ctx: &TickContext) -> Result<()> {
        let Some(legs) = self.gateway.fetch_token_set(&Self::query(&ctx.buckets)).await? else {
            return Err(ScreenerError::UpstreamUnavailable("calendar token set returned no data".into()));
        };
        let config = &ctx.config;
        let banded: Vec<InstrumentRow> = legs.iter().filter(|l| in_band(l, config)).cloned().collect();
        let liquidity = config.cal_liquidity_limit();
        let b = &ctx.buckets;

        {
            let mut histories = self.histories.lock();
            for (i, (current, later)) in [(b.near(), b.next()), (b.next(), b.far())].into_iter().enumerate() {
                let since = histories[i].last_trade_time;
                let fresh = match_pair(&banded, current, later, since, liquidity, ctx.now);
                tracing::debug!(pair = i, fresh = fresh.len(), "calendar legs matched");
                histories[i].absorb(fresh, config.cal_history_limit);
            }
            self.publish_finished(&histories, config);
        }
        self.token_set.publish(legs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveDateTime {
        d(3, 1).and_hms_opt(h, m, 0).unwrap()
    }

    fn leg(symbol: &str, expiry: NaiveDate, kind: AssetType, strike: f64, delta: f64, iv: f64, ltt: Option<NaiveDateTime>) -> InstrumentRow {
        InstrumentRow {
            symbol: symbol.into(),
            expiry,
            asset_type: kind,
            strike_price: strike,
            delta,
            bid: 1.0,
            ask: 1.2,
            ltp: 1.1,
            bid_iv: None,
            ask_iv: None,
            last_iv: iv,
            liquidity: 0.01,
            last_trade_time: ltt,
        }
    }

    fn root(symbol: &str, ivp: f64) -> AtmIvRow {
        AtmIvRow {
            symbol: symbol.into(),
            expiry: d(3, 28),
            atm_strike: None,
            option_type: None,
            delta: None,
            ltp: 100.0,
            atm_iv: 0.3,
            ivp: Some(ivp),
            iv_stats: None,
            pct_change: 1.0,
            z_score: None,
            hv: None,
            fair_price: None,
            fwd_iv: None,
            days_theta: None,
        }
    }

    #[test]
    fn later_leg_matches_closest_current_delta() {
        let legs = vec![
            leg("ABC", d(3, 28), AssetType::CallOption, 100.0, 0.404, 0.25, None),
            leg("ABC", d(3, 28), AssetType::CallOption, 105.0, 0.30, 0.24, None),
            leg("ABC", d(4, 25), AssetType::CallOption, 105.0, 0.39, 0.28, Some(t(10, 5))),
            leg("NIFTY", d(4, 25), AssetType::CallOption, 22000.0, 0.4, 0.15, Some(t(10, 5))),
            leg("OLD", d(4, 25), AssetType::CallOption, 50.0, 0.4, 0.3, Some(t(9, 0))),
        ];
        let matches = match_pair(&legs, d(3, 28), d(4, 25), t(9, 30), 999.0, t(10, 6));
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.strike_price_current, 100.0);
        assert_eq!(m.current_delta, 0.4);
    }

    #[test]
    fn unmatched_symbol_gets_placeholder() {
        let legs = vec![leg("DEF", d(4, 25), AssetType::PutOption, 90.0, -0.3, 0.3, Some(t(10, 0)))];
        let m = &match_pair(&legs, d(3, 28), d(4, 25), t(0, 0), 999.0, t(10, 1))[0];
        assert_eq!(m.strike_price_current, 0.0);
        assert_eq!(m.current_opt_type, None);

        let f = finish(std::slice::from_ref(m), &[], &ScanConfig::default());
        assert_eq!(f.all[0].current_opt_type, "NA");
        assert_eq!(f.all[0].opt_type, "PE");
        assert!(f.low_pos.is_empty() && f.high_pos.is_empty());
    }

    #[test]
    fn history_dedups_and_advances_watermark() {
        let legs = vec![
            leg("ABC", d(3, 28), AssetType::CallOption, 100.0, 0.4, 0.25, None),
            leg("ABC", d(4, 25), AssetType::CallOption, 105.0, 0.4, 0.28, Some(t(10, 5))),
        ];
        let mut history = PairHistory::new(d(3, 1));
        history.absorb(match_pair(&legs, d(3, 28), d(4, 25), history.last_trade_time, 999.0, t(10, 6)), 500);
        history.absorb(match_pair(&legs, d(3, 28), d(4, 25), history.last_trade_time, 999.0, t(10, 7)), 500);

        assert_eq!(history.rows.len(), 1);
        assert_eq!(history.last_trade_time, t(10, 5));
    }

    #[test]
    fn quadrants_follow_thresholds() {
        let legs = vec![
            leg("ABC", d(3, 28), AssetType::CallOption, 100.0, 0.4, 0.25, None),
            leg("ABC", d(4, 25), AssetType::CallOption, 105.0, 0.4, 0.28, Some(t(10, 5))),
        ];
        let history = match_pair(&legs, d(3, 28), d(4, 25), t(0, 0), 999.0, t(10, 6));
        let f = finish(&history, &[root("ABC", 0.1)], &ScanConfig::default());
        assert_eq!(f.low_pos.len(), 1);
        assert!((f.low_pos[0].diff - 3.0).abs() < 1e-9);
        assert!(f.low_neg.is_empty() && f.high_pos.is_empty() && f.high_neg.is_empty());
    }
}
