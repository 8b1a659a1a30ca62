use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::data::csv_types::IvStatsRow;
use crate::data::{load_csv, write_csv, write_csv_once};
use crate::error::{Result, ScreenerError};

/// Threshold used when the reference file has no value for a symbol.
/// Large enough that the tracker never fires.
pub const MISSING_THRESHOLD: f64 = 9_999_999.0;

/// `pct_change` at or below this marks a row with no usable price.
pub const MISSING_DATA_FLOOR: f64 = -800.0;

const CHECKPOINT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Suffix of the per-day file holding the latest counts.
const CLOSE_SUFFIX: &str = "_close";

// ── Tracker entry ────────────────────────────────────────────────────

/// Per-symbol state, also the checkpoint CSV row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub symbol: String,
    pub long_move_val: f64,
    pub long_move_val_track: f64,
    pub fut_benchmark: Option<f64>,
    pub fut_benchmark_track: Option<f64>,
    pub long_moves: f64,
    pub long_moves_track: f64,
    pub days_theta: f64,
    pub idv_updated_time: Option<NaiveDateTime>,
    pub idv_updated_time_track: Option<NaiveDateTime>,
}

/// Emitted when the secondary tracker fires on a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveEvent {
    pub symbol: String,
    pub ltp: f64,
    pub pct_change: f64,
    /// Benchmark before this move was applied.
    pub fut_benchmark_track: Option<f64>,
    pub long_moves_track: f64,
    /// Time of the previous move.
    pub idv_updated_time_track: Option<NaiveDateTime>,
    pub current_time: NaiveDateTime,
}

/// One near-bucket observation fed to the tracker.
#[derive(Debug, Clone, Copy)]
pub struct PriceTick<'a> {
    pub symbol: &'a str,
    pub ltp: f64,
    pub pct_change: f64,
}

/// Outcome of comparing a price against one benchmark/threshold pair.
fn step(benchmark: &mut Option<f64>, threshold: f64, ltp: f64) -> Option<f64> {
    let Some(current) = *benchmark else {
        // No seed close: adopt the first observed price without counting.
        *benchmark = Some(ltp);
        return None;
    };
    let distance = (ltp - current).abs();
    if distance > threshold {
        *benchmark = Some(ltp);
        Some((distance / threshold).round_ties_even())
    } else {
        None
    }
}

// ── Tracker ──────────────────────────────────────────────────────────

/// Counts how many threshold-sized moves each underlying made today.
///
/// Two independent trackers run side by side: the primary one uses
/// `long_move` as its step, the `_track` one uses `full_move` scaled by
/// `MOVE_TRACKER_VAL`.
#[derive(Debug, Clone, Default)]
pub struct MoveTracker {
    entries: IndexMap<String, TrackerEntry>,
    /// A counter changed since the last closing-count save.
    dirty: bool,
}

impl MoveTracker {
    /// Fresh state from `iv_stats.csv`: thresholds, yesterday's close as the
    /// benchmark, counters at zero.
    pub fn seed(stats: &[IvStatsRow], move_tracker_val: f64) -> Result<Self> {
        let mut entries = IndexMap::with_capacity(stats.len());
        for row in stats {
            let long_move_val = threshold(row.long_move, &row.symbol, "long_move")?;
            let long_move_val_track = threshold(
                row.full_move.map(|v| v * move_tracker_val),
                &row.symbol,
                "full_move",
            )?;
            entries.insert(
                row.symbol.clone(),
                TrackerEntry {
                    symbol: row.symbol.clone(),
                    long_move_val,
                    long_move_val_track,
                    fut_benchmark: row.fut_close,
                    fut_benchmark_track: row.fut_close,
                    long_moves: 0.0,
                    long_moves_track: 0.0,
                    days_theta: 0.0,
                    idv_updated_time: None,
                    idv_updated_time_track: None,
                },
            );
        }
        Ok(Self { entries, dirty: false })
    }

    /// Rebuild from checkpoint rows as written earlier today.
    pub fn restore(rows: Vec<TrackerEntry>) -> Result<Self> {
        let mut entries = IndexMap::with_capacity(rows.len());
        for row in rows {
            threshold(Some(row.long_move_val), &row.symbol, "long_move_val")?;
            threshold(Some(row.long_move_val_track), &row.symbol, "long_move_val_track")?;
            entries.insert(row.symbol.clone(), row);
        }
        Ok(Self { entries, dirty: false })
    }

    /// Startup state: today's checkpoint if present, else a fresh seed where
    /// symbols without a reference close inherit the newest prior-day
    /// benchmark, closing counts preferred.
    pub fn load(
        checkpoint_dir: &Path,
        stats: &[IvStatsRow],
        move_tracker_val: f64,
        today: NaiveDate,
    ) -> Result<Self> {
        let today_file = checkpoint_file_name(today);
        if checkpoint_dir.join(&today_file).exists() {
            let rows: Vec<TrackerEntry> = load_csv(checkpoint_dir, &today_file)?;
            tracing::info!(file = %today_file, symbols = rows.len(), "move tracker restored from checkpoint");
            return Self::restore(rows);
        }

        let mut tracker = Self::seed(stats, move_tracker_val)?;
        let prior = match newest_prior_close(checkpoint_dir, today)? {
            Some(found) => Some(found),
            None => newest_prior_checkpoint(checkpoint_dir, today)?,
        };
        if let Some((date, path)) = prior {
            let rows = read_checkpoint(&path)?;
            let mut inherited = 0usize;
            for prior in rows {
                if let Some(entry) = tracker.entries.get_mut(&prior.symbol) {
                    if entry.fut_benchmark.is_none() {
                        entry.fut_benchmark = prior.fut_benchmark;
                        entry.fut_benchmark_track = prior.fut_benchmark_track;
                        inherited += 1;
                    }
                }
            }
            tracing::debug!(%date, inherited, "benchmarks inherited from prior checkpoint");
        }
        tracing::info!(symbols = tracker.len(), "move tracker seeded from iv_stats");
        Ok(tracker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&TrackerEntry> {
        self.entries.get(symbol)
    }

    pub fn days_theta(&self, symbol: &str) -> Option<f64> {
        self.entries.get(symbol).map(|e| e.days_theta)
    }

    /// Apply one tick of near-bucket prices. Symbols the tracker does not
    /// know are ignored. Returns the secondary tracker's moves.
    pub fn observe<'a>(
        &mut self,
        ticks: impl IntoIterator<Item = PriceTick<'a>>,
        now: NaiveDateTime,
    ) -> Vec<MoveEvent> {
        let mut events = Vec::new();
        for tick in ticks {
            let Some(entry) = self.entries.get_mut(tick.symbol) else {
                continue;
            };
            if tick.pct_change <= MISSING_DATA_FLOOR {
                continue;
            }

            if let Some(moves) = step(&mut entry.fut_benchmark, entry.long_move_val, tick.ltp) {
                entry.long_moves += moves;
                entry.idv_updated_time = Some(now);
                self.dirty = true;
            }
            entry.days_theta = entry.long_moves / 2.0;

            let prior_benchmark = entry.fut_benchmark_track;
            if let Some(moves) = step(&mut entry.fut_benchmark_track, entry.long_move_val_track, tick.ltp) {
                entry.long_moves_track += moves;
                self.dirty = true;
                events.push(MoveEvent {
                    symbol: entry.symbol.clone(),
                    ltp: tick.ltp,
                    pct_change: tick.pct_change,
                    fut_benchmark_track: prior_benchmark,
                    long_moves_track: entry.long_moves_track,
                    idv_updated_time_track: entry.idv_updated_time_track,
                    current_time: now,
                });
                entry.idv_updated_time_track = Some(now);
            }
        }
        events
    }

    pub fn entries(&self) -> impl Iterator<Item = &TrackerEntry> {
        self.entries.values()
    }

    /// Write `YYYY-MM-DD.csv` unless today's file already exists.
    pub fn checkpoint(&self, dir: &Path, today: NaiveDate) -> Result<bool> {
        let rows: Vec<&TrackerEntry> = self.entries.values().collect();
        write_csv_once(&dir.join(checkpoint_file_name(today)), &rows)
    }

    /// Rewrite `YYYY-MM-DD_close.csv` when a counter moved since the last
    /// save, or when today's file is missing. The next session reads its
    /// `long_moves` as yesterday's counts.
    pub fn save_close(&mut self, dir: &Path, today: NaiveDate) -> Result<bool> {
        let path = dir.join(close_file_name(today));
        if !self.dirty && path.exists() {
            return Ok(false);
        }
        let rows: Vec<&TrackerEntry> = self.entries.values().collect();
        write_csv(&path, &rows)?;
        self.dirty = false;
        Ok(true)
    }
}

fn threshold(value: Option<f64>, symbol: &str, column: &str) -> Result<f64> {
    match value {
        None => Ok(MISSING_THRESHOLD),
        Some(v) if v > 0.0 => Ok(v),
        Some(v) => Err(ScreenerError::reference(
            "iv_stats.csv",
            format!("{symbol}: {column} must be positive, got {v}"),
        )),
    }
}

// ── Checkpoint files ─────────────────────────────────────────────────

pub fn checkpoint_file_name(date: NaiveDate) -> String {
    format!("{}.csv", date.format(CHECKPOINT_DATE_FORMAT))
}

pub fn close_file_name(date: NaiveDate) -> String {
    format!("{}{CLOSE_SUFFIX}.csv", date.format(CHECKPOINT_DATE_FORMAT))
}

/// Latest `YYYY-MM-DD.csv` in `dir` dated strictly before `today`.
pub fn newest_prior_checkpoint(dir: &Path, today: NaiveDate) -> Result<Option<(NaiveDate, PathBuf)>> {
    newest_prior(dir, today, "")
}

/// Latest `YYYY-MM-DD_close.csv` in `dir` dated strictly before `today`.
pub fn newest_prior_close(dir: &Path, today: NaiveDate) -> Result<Option<(NaiveDate, PathBuf)>> {
    newest_prior(dir, today, CLOSE_SUFFIX)
}

fn newest_prior(dir: &Path, today: NaiveDate, suffix: &str) -> Result<Option<(NaiveDate, PathBuf)>> {
    if !dir.exists() {
        return Ok(None);
    }
    let listing = std::fs::read_dir(dir).map_err(|e| ScreenerError::io(dir, e))?;
    let mut best: Option<(NaiveDate, PathBuf)> = None;
    for entry in listing.flatten() {
        let path = entry.path();
        let Some(stem) = path
            .extension()
            .filter(|ext| *ext == "csv")
            .and_then(|_| path.file_stem())
            .and_then(|s| s.to_str())
        else {
            continue;
        };
        let Some(stem) = stem.strip_suffix(suffix) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(stem, CHECKPOINT_DATE_FORMAT) else {
            continue;
        };
        if date < today && best.as_ref().is_none_or(|(d, _)| date > *d) {
            best = Some((date, path));
        }
    }
    Ok(best)
}

pub fn read_checkpoint(path: &Path) -> Result<Vec<TrackerEntry>> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ScreenerError::reference(path.display().to_string(), "bad checkpoint name"))?;
    load_csv(dir, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(symbol: &str, long_move: Option<f64>, full_move: Option<f64>, close: Option<f64>) -> IvStatsRow {
        IvStatsRow {
            symbol: symbol.into(),
            long_move,
            full_move,
            fut_close: close,
            avg_normal_iv: None,
            highest_normal_iv: None,
            lowest_normal_iv: None,
            bench_mark_iv: None,
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn tick(symbol: &str, ltp: f64, pct_change: f64) -> PriceTick<'_> {
        PriceTick {
            symbol,
            ltp,
            pct_change,
        }
    }

    #[test]
    fn move_counts_rounded_steps() {
        let mut tracker = MoveTracker::seed(&[stats("ABC", Some(4.0), Some(4.0), Some(100.0))], 1.0).unwrap();
        let events = tracker.observe([tick("ABC", 105.0, 1.2)], at(10, 0));

        let e = tracker.get("ABC").unwrap();
        assert_eq!(e.long_moves, 1.0);
        assert_eq!(e.fut_benchmark, Some(105.0));
        assert_eq!(e.days_theta, 0.5);
        assert_eq!(e.idv_updated_time, Some(at(10, 0)));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fut_benchmark_track, Some(100.0));
        assert_eq!(events[0].long_moves_track, 1.0);
    }

    #[test]
    fn equal_price_never_fires() {
        let mut tracker = MoveTracker::seed(&[stats("ABC", Some(4.0), Some(4.0), Some(100.0))], 1.0).unwrap();
        assert!(tracker.observe([tick("ABC", 100.0, 0.0)], at(10, 0)).is_empty());
        assert_eq!(tracker.get("ABC").unwrap().long_moves, 0.0);
    }

    #[test]
    fn missing_data_sentinel_is_ignored() {
        let mut tracker = MoveTracker::seed(&[stats("XYZ", Some(2.0), Some(2.0), Some(50.0))], 1.0).unwrap();
        tracker.observe([tick("XYZ", 80.0, -999.0)], at(10, 0));
        let e = tracker.get("XYZ").unwrap();
        assert_eq!(e.long_moves, 0.0);
        assert_eq!(e.fut_benchmark, Some(50.0));
    }

    #[test]
    fn missing_threshold_never_fires() {
        let mut tracker = MoveTracker::seed(&[stats("ABC", None, None, Some(100.0))], 1.0).unwrap();
        tracker.observe([tick("ABC", 10_000.0, 5.0)], at(10, 0));
        assert_eq!(tracker.get("ABC").unwrap().long_moves, 0.0);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = MoveTracker::seed(&[stats("ABC", Some(0.0), Some(1.0), Some(100.0))], 1.0).unwrap_err();
        assert!(matches!(err, ScreenerError::ReferenceData { .. }));
    }

    #[test]
    fn checkpoint_is_written_once_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let today = at(10, 0).date();
        let seed = [stats("ABC", Some(4.0), Some(4.0), Some(100.0))];
        let mut tracker = MoveTracker::seed(&seed, 1.0).unwrap();
        tracker.observe([tick("ABC", 109.0, 2.0)], at(10, 0));

        assert!(tracker.checkpoint(dir.path(), today).unwrap());
        tracker.observe([tick("ABC", 120.0, 3.0)], at(11, 0));
        assert!(!tracker.checkpoint(dir.path(), today).unwrap());

        let restored = MoveTracker::load(dir.path(), &seed, 1.0, today).unwrap();
        let e = restored.get("ABC").unwrap();
        assert_eq!(e.long_moves, 2.0);
        assert_eq!(e.fut_benchmark, Some(109.0));
    }

    #[test]
    fn newest_prior_checkpoint_skips_today_and_junk() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["2024-02-27.csv", "2024-02-29.csv", "2024-03-01.csv", "notes.csv"] {
            std::fs::write(dir.path().join(name), "symbol\n").unwrap();
        }
        let (date, _) = newest_prior_checkpoint(dir.path(), at(9, 0).date()).unwrap().unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn closing_counts_follow_later_moves() {
        let dir = tempfile::tempdir().unwrap();
        let today = at(9, 15).date();
        let mut tracker = MoveTracker::seed(&[stats("ABC", Some(4.0), Some(4.0), Some(100.0))], 1.0).unwrap();

        tracker.observe([tick("ABC", 100.0, 0.0)], at(9, 15));
        assert!(tracker.checkpoint(dir.path(), today).unwrap());
        assert!(tracker.save_close(dir.path(), today).unwrap());
        // Nothing moved since.
        tracker.observe([tick("ABC", 101.0, 1.0)], at(9, 16));
        assert!(!tracker.save_close(dir.path(), today).unwrap());

        for (minute, ltp) in [(17, 105.0), (18, 110.0), (19, 115.0), (20, 120.0)] {
            tracker.observe([tick("ABC", ltp, 1.0)], at(9, minute));
            tracker.checkpoint(dir.path(), today).unwrap();
            tracker.save_close(dir.path(), today).unwrap();
        }
        assert_eq!(tracker.get("ABC").unwrap().long_moves, 4.0);

        let tomorrow = today.succ_opt().unwrap();
        let (date, path) = newest_prior_close(dir.path(), tomorrow).unwrap().unwrap();
        assert_eq!(date, today);
        assert_eq!(read_checkpoint(&path).unwrap()[0].long_moves, 4.0);

        // The day checkpoint still holds the first tick's counts.
        let (_, first) = newest_prior_checkpoint(dir.path(), tomorrow).unwrap().unwrap();
        assert_eq!(read_checkpoint(&first).unwrap()[0].long_moves, 0.0);
    }
}
