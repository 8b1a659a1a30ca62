use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::NaiveTime;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, ScreenerError};

pub const SCAN_CONFIG_FILE: &str = "scan_config.json";

// ── Scan thresholds ──────────────────────────────────────────────────

/// Tunable thresholds shared by the analytics, stored as `scan_config.json`.
///
/// Keys keep the upper-case names operators already edit by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Multiplier on `full_move` for the secondary move tracker.
    #[serde(rename = "MOVE_TRACKER_VAL")]
    pub move_tracker_val: f64,
    /// Vol benchmark step, percent of forward vol.
    #[serde(rename = "VOL_TRACKER_PERC")]
    pub vol_tracker_perc: f64,
    /// Rows kept in the move and vol display histories.
    #[serde(rename = "DISPLAY_HISTORY_LIMIT")]
    pub display_history_limit: usize,

    #[serde(rename = "CAL_CALL_UPPER_DELTA")]
    pub cal_call_upper_delta: f64,
    #[serde(rename = "CAL_CALL_LOWER_DELTA")]
    pub cal_call_lower_delta: f64,
    #[serde(rename = "CAL_PUT_UPPER_DELTA")]
    pub cal_put_upper_delta: f64,
    #[serde(rename = "CAL_PUT_LOWER_DELTA")]
    pub cal_put_lower_delta: f64,
    /// 0 disables the current-leg liquidity filter, anything else caps it at 0.05.
    #[serde(rename = "CAL_LIQUIDITY_CHECK_CURRENT")]
    pub cal_liquidity_check_current: f64,
    #[serde(rename = "CAL_LOW_IVP_LIMIT")]
    pub cal_low_ivp_limit: f64,
    #[serde(rename = "CAL_HIGH_IVP_LIMIT")]
    pub cal_high_ivp_limit: f64,
    #[serde(rename = "CAL_HISTORY_LIMIT")]
    pub cal_history_limit: usize,

    #[serde(rename = "BCRS_CALL_STRIKE_1_DELTA_LOW")]
    pub bcrs_call_strike_1_delta_low: f64,
    #[serde(rename = "BCRS_CALL_STRIKE_1_DELTA_HIGH")]
    pub bcrs_call_strike_1_delta_high: f64,
    #[serde(rename = "BCRS_CALL_STRIKE_2_MIN_DELTA_DIFF")]
    pub bcrs_call_strike_2_min_delta_diff: f64,
    #[serde(rename = "BCRS_CALL_RATIO")]
    pub bcrs_call_ratio: f64,
    #[serde(rename = "BPRS_PUT_STRIKE_1_DELTA_LOW")]
    pub bprs_put_strike_1_delta_low: f64,
    #[serde(rename = "BPRS_PUT_STRIKE_1_DELTA_HIGH")]
    pub bprs_put_strike_1_delta_high: f64,
    #[serde(rename = "BPRS_PUT_STRIKE_2_MIN_DELTA_DIFF")]
    pub bprs_put_strike_2_min_delta_diff: f64,
    #[serde(rename = "BPRS_PUT_RATIO")]
    pub bprs_put_ratio: f64,
    /// Percent; 0 means no liquidity filter.
    #[serde(rename = "BCRS_LIQUIDITY_CHECK")]
    pub bcrs_liquidity_check: f64,
    /// `HH:MM:SS`, local time.
    #[serde(rename = "BCRS_CSV_SAVE_TIME")]
    pub bcrs_csv_save_time: String,

    #[serde(rename = "NO_OF_DAYS_TO_RESULT")]
    pub no_of_days_to_result: i64,
    /// `HH:MM`, switches the intraday long/short ladder.
    #[serde(rename = "INTRADAY_CUTOFF")]
    pub intraday_cutoff: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            move_tracker_val: 1.0,
            vol_tracker_perc: 10.0,
            display_history_limit: 500,
            cal_call_upper_delta: 0.5,
            cal_call_lower_delta: 0.1,
            cal_put_upper_delta: -0.1,
            cal_put_lower_delta: -0.5,
            cal_liquidity_check_current: 0.0,
            cal_low_ivp_limit: 20.0,
            cal_high_ivp_limit: 80.0,
            cal_history_limit: 500,
            bcrs_call_strike_1_delta_low: 0.45,
            bcrs_call_strike_1_delta_high: 0.55,
            bcrs_call_strike_2_min_delta_diff: 0.2,
            bcrs_call_ratio: 2.0,
            bprs_put_strike_1_delta_low: -0.55,
            bprs_put_strike_1_delta_high: -0.45,
            bprs_put_strike_2_min_delta_diff: 0.2,
            bprs_put_ratio: 2.0,
            bcrs_liquidity_check: 0.0,
            bcrs_csv_save_time: "15:25:00".to_string(),
            no_of_days_to_result: 7,
            intraday_cutoff: "10:30".to_string(),
        }
    }
}

impl ScanConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "scan config missing, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ScreenerError::io(path, e))?;
        let config: ScanConfig = serde_json::from_str(&contents)
            .map_err(|e| ScreenerError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| ScreenerError::io(path, e))
    }

    pub fn validate(&self) -> Result<()> {
        if self.cal_low_ivp_limit > self.cal_high_ivp_limit {
            return Err(ScreenerError::Config(format!(
                "CAL_LOW_IVP_LIMIT {} above CAL_HIGH_IVP_LIMIT {}",
                self.cal_low_ivp_limit, self.cal_high_ivp_limit
            )));
        }
        if self.vol_tracker_perc <= 0.0 {
            return Err(ScreenerError::Config("VOL_TRACKER_PERC must be positive".into()));
        }
        self.csv_save_time()?;
        self.intraday_cutoff_time()?;
        Ok(())
    }

    pub fn cal_liquidity_limit(&self) -> f64 {
        if self.cal_liquidity_check_current == 0.0 {
            999.0
        } else {
            0.05
        }
    }

    pub fn bcrs_liquidity_limit(&self) -> f64 {
        if self.bcrs_liquidity_check == 0.0 {
            999.0
        } else {
            self.bcrs_liquidity_check / 100.0
        }
    }

    pub fn csv_save_time(&self) -> Result<NaiveTime> {
        parse_time(&self.bcrs_csv_save_time, "BCRS_CSV_SAVE_TIME")
    }

    pub fn intraday_cutoff_time(&self) -> Result<NaiveTime> {
        parse_time(&self.intraday_cutoff, "INTRADAY_CUTOFF")
    }
}

fn parse_time(raw: &str, key: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|e| ScreenerError::Config(format!("{key} '{raw}': {e}")))
}

// ── Hot-swappable handle ─────────────────────────────────────────────

/// Shared, atomically replaceable scan config.
///
/// Analytics take a snapshot at tick start; admin calls and file reloads
/// swap in a whole new value.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwap<ScanConfig>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path: None,
        }
    }

    /// Load from `path` and remember it for persistence and reloads.
    pub fn load(path: &Path) -> Result<Self> {
        let config = ScanConfig::load(path)?;
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn snapshot(&self) -> Arc<ScanConfig> {
        self.current.load_full()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply `f` to a copy of the current config, validate, swap and persist.
    pub fn update(&self, f: impl FnOnce(&mut ScanConfig)) -> Result<Arc<ScanConfig>> {
        let mut next = (*self.snapshot()).clone();
        f(&mut next);
        next.validate()?;
        if let Some(path) = &self.path {
            next.save(path)?;
        }
        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        Ok(next)
    }

    /// Re-read the backing file. Returns `Ok(true)` if the value changed.
    pub fn reload(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let fresh = ScanConfig::load(path)?;
        if *self.snapshot() == fresh {
            return Ok(false);
        }
        self.current.store(Arc::new(fresh));
        Ok(true)
    }
}

// ── File watcher ─────────────────────────────────────────────────────

/// Watch the config file's directory and forward change events.
/// Watching the parent catches editors that save via rename.
pub fn setup_file_watcher(
    path: &Path,
) -> anyhow::Result<(RecommendedWatcher, mpsc::Receiver<PathBuf>)> {
    use anyhow::Context;

    let (tx, rx) = mpsc::channel::<PathBuf>(4);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    for path in event.paths {
                        let _ = tx.try_send(path);
                    }
                }
            }
        },
        notify::Config::default(),
    )
    .context("creating config watcher")?;

    let watch_dir = path.parent().unwrap_or(Path::new("."));
    watcher
        .watch(watch_dir, RecursiveMode::NonRecursive)
        .context("watching config directory")?;

    Ok((watcher, rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SCAN_CONFIG_FILE);
        std::fs::write(&path, r#"{ "CAL_LOW_IVP_LIMIT": 15, "MOVE_TRACKER_VAL": 0.5 }"#).unwrap();

        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.cal_low_ivp_limit, 15.0);
        assert_eq!(config.move_tracker_val, 0.5);
        assert_eq!(config.cal_high_ivp_limit, 80.0);
    }

    #[test]
    fn update_persists_and_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SCAN_CONFIG_FILE);
        let handle = ConfigHandle::load(&path).unwrap();
        let before = handle.snapshot();

        handle
            .update(|c| {
                c.cal_low_ivp_limit = 10.0;
                c.cal_high_ivp_limit = 90.0;
            })
            .unwrap();

        assert_eq!(before.cal_low_ivp_limit, 20.0);
        assert_eq!(handle.snapshot().cal_high_ivp_limit, 90.0);
        let on_disk = ScanConfig::load(&path).unwrap();
        assert_eq!(on_disk.cal_low_ivp_limit, 10.0);
    }

    #[test]
    fn invalid_update_is_rejected() {
        let handle = ConfigHandle::new(ScanConfig::default());
        let err = handle.update(|c| c.cal_low_ivp_limit = 95.0);
        assert!(err.is_err());
        assert_eq!(handle.snapshot().cal_low_ivp_limit, 20.0);
    }

    #[test]
    fn liquidity_limits() {
        let mut c = ScanConfig::default();
        assert_eq!(c.cal_liquidity_limit(), 999.0);
        c.cal_liquidity_check_current = 1.0;
        assert_eq!(c.cal_liquidity_limit(), 0.05);
        c.bcrs_liquidity_check = 5.0;
        assert_eq!(c.bcrs_liquidity_limit(), 0.05);
    }
}
