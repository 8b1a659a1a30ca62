pub mod clock;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::{JoinError, JoinSet};
use tokio::time::error::Elapsed;

use crate::analytics::{Analytic, TickContext};
use crate::error::{Result, ScreenerError};

/// Shortest per-analytic budget regardless of the tick interval.
pub const MIN_BUDGET: Duration = Duration::from_secs(1);

/// How one analytic's update ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    /// Upstream had nothing this tick; previous tables stay published.
    Skipped(String),
    Failed(String),
    TimedOut,
    Panicked(String),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub elapsed: Duration,
    /// Root first, then dependents in registration order.
    pub outcomes: Vec<(&'static str, Outcome)>,
}

impl TickReport {
    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|(n, _)| *n == name).map(|(_, o)| o)
    }

    pub fn failures(&self) -> impl Iterator<Item = &(&'static str, Outcome)> {
        self.outcomes.iter().filter(|(_, o)| !o.is_ok())
    }
}

type Settled = std::result::Result<std::result::Result<Result<()>, Elapsed>, JoinError>;

fn settle(name: &'static str, settled: Settled) -> Outcome {
    match settled {
        Ok(Ok(Ok(()))) => Outcome::Ok,
        Ok(Ok(Err(ScreenerError::UpstreamUnavailable(reason)))) => {
            tracing::warn!(analytic = name, %reason, "upstream unavailable, keeping previous tables");
            Outcome::Skipped(reason)
        }
        Ok(Ok(Err(e))) => {
            tracing::error!(analytic = name, error = %e, "update failed");
            Outcome::Failed(e.to_string())
        }
        Ok(Err(_)) => {
            tracing::warn!(analytic = name, "update timed out");
            Outcome::TimedOut
        }
        Err(e) if e.is_panic() => {
            tracing::error!(analytic = name, error = %e, "update panicked");
            Outcome::Panicked(e.to_string())
        }
        Err(e) => {
            tracing::error!(analytic = name, error = %e, "update cancelled");
            Outcome::Failed(e.to_string())
        }
    }
}

// ── Coordinator ──────────────────────────────────────────────────────

/// Runs one tick: the root analytic to completion, then every dependent
/// concurrently, each bounded by the tick budget.
///
/// A dependent's failure, timeout or panic is recorded and never touches
/// its siblings. Dependents always run, so after a failed root they
/// recompute from the previous root snapshot.
pub struct Coordinator {
    root: Arc<dyn Analytic>,
    dependents: Vec<Arc<dyn Analytic>>,
}

impl Coordinator {
    pub fn new(root: Arc<dyn Analytic>, dependents: Vec<Arc<dyn Analytic>>) -> Self {
        Self { root, dependents }
    }

    pub fn names(&self) -> Vec<&'static str> {
        std::iter::once(self.root.name())
            .chain(self.dependents.iter().map(|a| a.name()))
            .collect()
    }

    pub async fn tick(&self, ctx: &TickContext, budget: Duration) -> TickReport {
        let started = Instant::now();
        let budget = budget.max(MIN_BUDGET);
        let mut outcomes = Vec::with_capacity(1 + self.dependents.len());

        let root = Arc::clone(&self.root);
        let root_name = root.name();
        let root_ctx = ctx.clone();
        let settled = tokio::spawn(async move { tokio::time::timeout(budget, root.update(&root_ctx)).await }).await;
        outcomes.push((root_name, settle(root_name, settled)));

        let mut tasks = JoinSet::new();
        let mut slots = HashMap::with_capacity(self.dependents.len());
        for (i, analytic) in self.dependents.iter().enumerate() {
            let analytic = Arc::clone(analytic);
            let ctx = ctx.clone();
            let handle = tasks.spawn(async move { tokio::time::timeout(budget, analytic.update(&ctx)).await });
            slots.insert(handle.id(), i);
        }

        let mut settled: Vec<Option<Outcome>> = vec![None; self.dependents.len()];
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, Ok(result)),
                Err(e) => (e.id(), Err(e)),
            };
            if let Some(&i) = slots.get(&id) {
                settled[i] = Some(settle(self.dependents[i].name(), result));
            }
        }
        for (analytic, outcome) in self.dependents.iter().zip(settled) {
            outcomes.push((analytic.name(), outcome.unwrap_or(Outcome::Failed("task lost".into()))));
        }

        let report = TickReport {
            elapsed: started.elapsed(),
            outcomes,
        };
        let failed = report.failures().count();
        tracing::info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            analytics = report.outcomes.len(),
            failed,
            "tick complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::expiry::ExpiryBuckets;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        Upstream,
        Hang,
        Panic,
    }

    struct Scripted {
        name: &'static str,
        behaviour: Behaviour,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Analytic for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn update(&self, _ctx: &TickContext) -> Result<()> {
            match self.behaviour {
                Behaviour::Succeed => {}
                Behaviour::Fail => return Err(ScreenerError::computation(self.name, "boom")),
                Behaviour::Upstream => return Err(ScreenerError::UpstreamUnavailable("null".into())),
                Behaviour::Hang => tokio::time::sleep(Duration::from_secs(3600)).await,
                Behaviour::Panic => panic!("analytic panicked"),
            }
            self.log.lock().push(self.name);
            Ok(())
        }
    }

    fn ctx() -> TickContext {
        let d = |m| NaiveDate::from_ymd_opt(2024, m, 25).unwrap();
        TickContext {
            now: d(3).and_hms_opt(10, 0, 0).unwrap(),
            buckets: ExpiryBuckets::new(d(3), d(4), d(5)).unwrap(),
            config: Arc::new(ScanConfig::default()),
        }
    }

    fn scripted(name: &'static str, behaviour: Behaviour, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Analytic> {
        Arc::new(Scripted {
            name,
            behaviour,
            log: Arc::clone(log),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn failures_stay_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = Coordinator::new(
            scripted("root", Behaviour::Succeed, &log),
            vec![
                scripted("fails", Behaviour::Fail, &log),
                scripted("hangs", Behaviour::Hang, &log),
                scripted("panics", Behaviour::Panic, &log),
                scripted("skips", Behaviour::Upstream, &log),
                scripted("works", Behaviour::Succeed, &log),
            ],
        );

        let report = coordinator.tick(&ctx(), Duration::from_millis(200)).await;

        assert_eq!(report.outcome("root"), Some(&Outcome::Ok));
        assert!(matches!(report.outcome("fails"), Some(Outcome::Failed(_))));
        assert_eq!(report.outcome("hangs"), Some(&Outcome::TimedOut));
        assert!(matches!(report.outcome("panics"), Some(Outcome::Panicked(_))));
        assert!(matches!(report.outcome("skips"), Some(Outcome::Skipped(_))));
        assert_eq!(report.outcome("works"), Some(&Outcome::Ok));
        assert_eq!(report.failures().count(), 4);

        let names: Vec<_> = report.outcomes.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["root", "fails", "hangs", "panics", "skips", "works"]);
        assert_eq!(log.lock().first(), Some(&"root"));
    }

    #[tokio::test(start_paused = true)]
    async fn dependents_run_after_failed_root() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = Coordinator::new(
            scripted("root", Behaviour::Upstream, &log),
            vec![scripted("dep", Behaviour::Succeed, &log)],
        );
        let report = coordinator.tick(&ctx(), Duration::from_secs(1)).await;
        assert!(matches!(report.outcome("root"), Some(Outcome::Skipped(_))));
        assert_eq!(*log.lock(), vec!["dep"]);
    }
}
