use std::sync::Arc;

use crate::analytics::calendar::CalendarSpread;
use crate::analytics::skew_benchmark::SkewBenchmark;
use crate::analytics::vol::VolBenchmark;
use crate::config::ConfigHandle;
use crate::expiry::ExpiryBuckets;
use crate::gateway::UpstreamGateway;
use crate::gateway::auth::CredentialStore;
use crate::run::scheduler::IntervalHandle;
use crate::run::screener::Screener;
use crate::store::SnapshotStore;

/// Handles the HTTP layer reads from and mutates. Every field is either
/// immutable or internally synchronised, so no outer lock.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub store: Arc<SnapshotStore>,
    pub config: ConfigHandle,
    pub buckets: ExpiryBuckets,
    pub vol: Arc<VolBenchmark>,
    pub skew_benchmark: Arc<SkewBenchmark>,
    pub calendar: Arc<CalendarSpread>,
    pub gateway: Arc<dyn UpstreamGateway>,
    pub credentials: CredentialStore,
    pub interval: IntervalHandle,
}

impl AppState {
    pub fn new(screener: &Screener, credentials: CredentialStore, interval: IntervalHandle) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store: Arc::clone(&screener.store),
                config: screener.config.clone(),
                buckets: screener.buckets,
                vol: Arc::clone(&screener.vol),
                skew_benchmark: Arc::clone(&screener.skew_benchmark),
                calendar: Arc::clone(&screener.calendar),
                gateway: Arc::clone(&screener.gateway),
                credentials,
                interval,
            }),
        }
    }
}
