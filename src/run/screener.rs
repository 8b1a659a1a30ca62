use std::sync::Arc;
use std::time::Duration;

use crate::analytics::atm_iv::AtmIvEngine;
use crate::analytics::atr_scan::AtrScan;
use crate::analytics::calendar::CalendarSpread;
use crate::analytics::correlation::Correlation;
use crate::analytics::fwd_scan::FwdScan;
use crate::analytics::intraday_long_short::IntradayLongShort;
use crate::analytics::iv_surface::IvSurface;
use crate::analytics::long_short::LongShort;
use crate::analytics::metadata::Metadata;
use crate::analytics::price_change::PriceChange;
use crate::analytics::ratio_spread::RatioSpread;
use crate::analytics::skew::Skew;
use crate::analytics::skew_benchmark::SkewBenchmark;
use crate::analytics::vol::VolBenchmark;
use crate::analytics::{Analytic, AnalyticDeps, TickContext};
use crate::config::ConfigHandle;
use crate::engine::clock::Clock;
use crate::engine::{Coordinator, TickReport};
use crate::error::Result;
use crate::expiry::ExpiryBuckets;
use crate::gateway::UpstreamGateway;
use crate::store::SnapshotStore;

/// The wired analytic set plus the handles the admin API mutates.
pub struct Screener {
    pub store: Arc<SnapshotStore>,
    pub gateway: Arc<dyn UpstreamGateway>,
    pub config: ConfigHandle,
    pub buckets: ExpiryBuckets,
    pub vol: Arc<VolBenchmark>,
    pub skew_benchmark: Arc<SkewBenchmark>,
    pub calendar: Arc<CalendarSpread>,
    coordinator: Coordinator,
    clock: Arc<dyn Clock>,
}

impl Screener {
    /// Load reference data and construct every analytic. Missing required
    /// reference files fail here, before the first tick.
    pub fn build(deps: AnalyticDeps, config: ConfigHandle, buckets: ExpiryBuckets, clock: Arc<dyn Clock>) -> Result<Self> {
        let scan = config.snapshot();
        let today = clock.today();

        let root: Arc<dyn Analytic> = Arc::new(AtmIvEngine::new(&deps, &scan, today)?);
        let vol = Arc::new(VolBenchmark::new(&deps, scan.vol_tracker_perc)?);
        let skew_benchmark = Arc::new(SkewBenchmark::new(&deps)?);
        let calendar = Arc::new(CalendarSpread::new(&deps, today));

        let dependents: Vec<Arc<dyn Analytic>> = vec![
            vol.clone(),
            Arc::new(Correlation::new(&deps)?),
            Arc::new(Skew::new(&deps)),
            skew_benchmark.clone(),
            Arc::new(FwdScan::new(&deps)?),
            Arc::new(PriceChange::new(&deps)),
            calendar.clone(),
            Arc::new(RatioSpread::new(&deps)),
            Arc::new(LongShort::new(&deps)?),
            Arc::new(IntradayLongShort::new(&deps, today)?),
            Arc::new(AtrScan::new(&deps)?),
            Arc::new(IvSurface::new(&deps)?),
            Arc::new(Metadata::new(&deps)),
        ];
        let coordinator = Coordinator::new(root, dependents);
        tracing::info!(analytics = ?coordinator.names(), ?buckets, "screener wired");

        Ok(Self {
            store: deps.store,
            gateway: deps.gateway,
            config,
            buckets,
            vol,
            skew_benchmark,
            calendar,
            coordinator,
            clock,
        })
    }

    pub fn context(&self) -> TickContext {
        TickContext {
            now: self.clock.now(),
            buckets: self.buckets,
            config: self.config.snapshot(),
        }
    }

    pub async fn tick(&self, budget: Duration) -> TickReport {
        self.coordinator.tick(&self.context(), budget).await
    }
}
