pub mod config;
pub mod scheduler;
pub mod screener;

use std::ffi::OsStr;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::analytics::AnalyticDeps;
use crate::api;
use crate::api::state::AppState;
use crate::config::{ConfigHandle, setup_file_watcher};
use crate::engine::TickReport;
use crate::engine::clock::{Clock, SystemClock};
use crate::expiry::{self, ExpiryBuckets};
use crate::gateway::auth::CredentialStore;
use crate::gateway::{HttpGateway, UpstreamGateway};
use crate::store::SnapshotStore;

pub use config::{RunConfig, RuntimeConfig};
use scheduler::TickScheduler;
use screener::Screener;

/// Everything built before the first tick.
struct Boot {
    config: RuntimeConfig,
    credentials: CredentialStore,
    screener: Screener,
}

async fn boot(config: RuntimeConfig) -> Result<Boot> {
    let credentials = CredentialStore::new(&config.auth_dir);
    let gateway: Arc<dyn UpstreamGateway> = Arc::new(HttpGateway::new(
        &config.server_url,
        credentials.clone(),
        config.access_ttl,
        config.refresh_ttl,
    )?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let buckets = expiry::resolve(config.expiry_override.as_deref(), gateway.as_ref(), clock.today())
        .await
        .context("resolving expiry buckets")?;
    let scan = ConfigHandle::load(&config.scan_config_path()).context("loading scan config")?;

    let deps = AnalyticDeps {
        store: Arc::new(SnapshotStore::new()),
        gateway,
        assets: config.assets.clone(),
    };
    let screener = Screener::build(deps, scan, buckets, clock).context("loading reference data")?;

    Ok(Boot {
        config,
        credentials,
        screener,
    })
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("creating tokio runtime")
}

// ── serve ────────────────────────────────────────────────────────────

/// Entry point for the `serve` command: tick forever and expose the API.
pub fn serve(cli_config: &RunConfig) -> Result<()> {
    let config = RuntimeConfig::from_cli(cli_config)?;
    tracing::info!(
        server = %config.server_url,
        assets = %config.assets.local.display(),
        interval_ms = config.interval.as_millis() as u64,
        "starting screener"
    );
    runtime()?.block_on(serve_async(config))
}

async fn serve_async(config: RuntimeConfig) -> Result<()> {
    let Boot {
        config,
        credentials,
        screener,
    } = boot(config).await?;

    let (mut scheduler, interval_handle) = TickScheduler::new(config.interval);
    let state = AppState::new(&screener, credentials, interval_handle);

    let host = config.host.clone();
    let port = config.port;
    let mut server = tokio::spawn(async move { api::serve(state, &host, port).await });

    let config_path = config.scan_config_path();
    let config_filename = config_path.file_name().map(|f| f.to_os_string()).unwrap_or_default();
    let (_watcher, mut file_rx) = setup_file_watcher(&config_path)?;
    tracing::info!(path = %config_path.display(), "watching scan config");

    let shutdown = async {
        tokio::select! {
            joined = &mut server => match joined {
                Ok(result) => result.context("api server stopped"),
                Err(e) => Err(anyhow::anyhow!("api server task failed: {e}")),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                Ok(())
            }
        }
    };
    let result = drive(&screener, &mut scheduler, &mut file_rx, &config_filename, shutdown).await;
    server.abort();
    result
}

/// Tick until `shutdown` resolves, returning its result.
///
/// At most one tick is in flight; the scheduler is not polled until it
/// settles. Config-file events and shutdown are serviced meanwhile, and
/// shutdown drops the in-flight tick.
pub async fn drive<F>(
    screener: &Screener,
    scheduler: &mut TickScheduler,
    file_rx: &mut mpsc::Receiver<PathBuf>,
    config_filename: &OsStr,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::pin!(shutdown);
    let mut in_flight: Option<Pin<Box<dyn Future<Output = TickReport> + '_>>> = None;

    loop {
        tokio::select! {
            _ = scheduler.wait_for_next(), if in_flight.is_none() => {
                in_flight = Some(Box::pin(screener.tick(scheduler.period())));
            }
            report = async {
                match in_flight.as_mut() {
                    Some(tick) => tick.await,
                    None => std::future::pending().await,
                }
            }, if in_flight.is_some() => {
                in_flight = None;
                if report.elapsed > scheduler.period() {
                    tracing::warn!(
                        elapsed_ms = report.elapsed.as_millis() as u64,
                        period_ms = scheduler.period().as_millis() as u64,
                        "tick overran its interval"
                    );
                }
            }
            Some(changed_path) = file_rx.recv() => {
                let matches = changed_path
                    .file_name()
                    .map(|f| f == config_filename)
                    .unwrap_or(false);
                if !matches {
                    continue;
                }

                // Debounce: drain queued events and wait for writes to settle
                while file_rx.try_recv().is_ok() {}
                tokio::time::sleep(Duration::from_millis(100)).await;
                while file_rx.try_recv().is_ok() {}

                match screener.config.reload() {
                    Ok(true) => {
                        screener.calendar.refilter(&screener.config.snapshot());
                        tracing::info!("scan config reloaded");
                    }
                    Ok(false) => {}
                    Err(e) => tracing::error!(error = %e, "scan config reload failed, keeping previous"),
                }
            }
            result = &mut shutdown => return result,
        }
    }
}

// ── tick ─────────────────────────────────────────────────────────────

/// Entry point for the `tick` command: one full pass, then print row counts.
pub fn tick(cli_config: &RunConfig) -> Result<()> {
    let config = RuntimeConfig::from_cli(cli_config)?;
    runtime()?.block_on(async move {
        let interval = config.interval;
        let Boot { screener, .. } = boot(config).await?;
        let report = screener.tick(interval).await;

        println!("── Tick ({} ms) ──", report.elapsed.as_millis());
        for (name, outcome) in &report.outcomes {
            println!("  {name:<22} {outcome:?}");
        }
        println!();
        println!("── Tables ──");
        for (name, rows) in screener.store.row_counts() {
            println!("  {name:<36} {rows:>6}");
        }
        Ok(())
    })
}

// ── expiries ─────────────────────────────────────────────────────────

/// Entry point for the `expiries` command: resolve and print the buckets.
pub fn expiries(cli_config: &RunConfig) -> Result<()> {
    let config = RuntimeConfig::from_cli(cli_config)?;
    runtime()?.block_on(async move {
        let credentials = CredentialStore::new(&config.auth_dir);
        let gateway = HttpGateway::new(&config.server_url, credentials, config.access_ttl, config.refresh_ttl)?;
        let buckets: ExpiryBuckets =
            expiry::resolve(config.expiry_override.as_deref(), &gateway, SystemClock.today()).await?;
        for (bucket, date) in expiry::Bucket::ALL.iter().zip(buckets.dates()) {
            println!("{:<5} {}", bucket.as_str(), date);
        }
        Ok(())
    })
}
