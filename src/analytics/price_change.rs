use std::sync::Arc;

use async_trait::async_trait;

use super::atm_iv::{self, AtmIvRow};
use super::move_tracker::{MISSING_DATA_FLOOR, MoveEvent};
use super::{Analytic, AnalyticDeps, TickContext, sort_asc_by, sort_desc_by};
use crate::error::Result;
use crate::store::{SnapshotStore, Table};

pub const MOVES: &str = "price_change.moves";

/// (gainers, losers). Rows carrying the missing-data sentinel are in neither.
pub fn split(root: &[AtmIvRow]) -> (Vec<AtmIvRow>, Vec<AtmIvRow>) {
    let mut up: Vec<AtmIvRow> = root.iter().filter(|r| r.pct_change >= 0.0).cloned().collect();
    let mut down: Vec<AtmIvRow> = root
        .iter()
        .filter(|r| r.pct_change < 0.0 && r.pct_change > MISSING_DATA_FLOOR)
        .cloned()
        .collect();
    sort_desc_by(&mut up, |r| Some(r.pct_change));
    sort_asc_by(&mut down, |r| Some(r.pct_change));
    (up, down)
}

/// Futures price change leaders per bucket.
pub struct PriceChange {
    store: Arc<SnapshotStore>,
    outputs: [(&'static str, Table<AtmIvRow>, Table<AtmIvRow>); 2],
    moves: Table<MoveEvent>,
}

impl PriceChange {
    pub fn new(deps: &AnalyticDeps) -> Self {
        let store = &deps.store;
        Self {
            store: Arc::clone(store),
            outputs: [
                (atm_iv::NEAR, store.table("price_change.near_up"), store.table("price_change.near_down")),
                (atm_iv::NEXT, store.table("price_change.next_up"), store.table("price_change.next_down")),
            ],
            moves: store.table(MOVES),
        }
    }
}

#[async_trait]
impl Analytic for PriceChange {
    fn name(&self) -> &'static str {
        "price_change"
    }

    async fn update(&self, _ctx: &TickContext) -> Result<()> {
        for (source, up, down) in &self.outputs {
            let root = self.store.read::<AtmIvRow>(source);
            let (gainers, losers) = split(&root);
            up.publish(gainers);
            down.publish(losers);
        }
        let moves = self.store.read::<MoveEvent>(atm_iv::MOVES);
        self.moves.publish(moves.as_ref().clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(symbol: &str, pct_change: f64) -> AtmIvRow {
        AtmIvRow {
            symbol: symbol.into(),
            expiry: NaiveDate::from_ymd_opt(2024, 3, 28).unwrap(),
            atm_strike: None,
            option_type: None,
            delta: None,
            ltp: 0.0,
            atm_iv: 0.2,
            ivp: None,
            iv_stats: None,
            pct_change,
            z_score: None,
            hv: None,
            fair_price: None,
            fwd_iv: None,
            days_theta: None,
        }
    }

    #[test]
    fn sentinel_is_excluded() {
        let (up, down) = split(&[row("A", 1.0), row("B", 0.0), row("C", -2.0), row("X", -999.0), row("D", -0.5)]);
        let up: Vec<_> = up.iter().map(|r| r.symbol.as_str()).collect();
        let down: Vec<_> = down.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(up, vec!["A", "B"]);
        assert_eq!(down, vec!["C", "D"]);
    }
}
