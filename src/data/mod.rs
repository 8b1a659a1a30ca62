pub mod csv_types;

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, ScreenerError};

/// Where reference CSVs and checkpoints live.
///
/// `local` holds files this process writes (move-tracker checkpoints,
/// ratio-spread snapshots, skew benchmarks). `network` holds shared reference
/// files refreshed by an external job; it defaults to `local`.
#[derive(Debug, Clone)]
pub struct AssetDirs {
    pub local: PathBuf,
    pub network: PathBuf,
}

impl AssetDirs {
    pub fn new(local: impl Into<PathBuf>, network: Option<PathBuf>) -> Self {
        let local = local.into();
        let network = network.unwrap_or_else(|| local.clone());
        Self { local, network }
    }

    pub fn single(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, None)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.local.join("idv_cal")
    }

    pub fn ratio_spread_dir(&self) -> PathBuf {
        self.local.join("ratio_spread_data")
    }
}

/// Load CSV rows of type T from a file in `dir`. Missing files are an error.
pub fn load_csv<T: DeserializeOwned>(dir: &Path, filename: &str) -> Result<Vec<T>> {
    let path = dir.join(filename);
    if !path.exists() {
        return Err(ScreenerError::reference(filename, format!("not found in {}", dir.display())));
    }
    let mut rdr = csv::Reader::from_path(&path).map_err(|e| ScreenerError::csv(&path, e))?;
    rdr.deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|e| ScreenerError::csv(&path, e))
}

/// Like [`load_csv`] but a missing or unreadable file yields no rows.
/// For enrichment data that only ever left-joins.
pub fn load_csv_or_empty<T: DeserializeOwned>(dir: &Path, filename: &str) -> Vec<T> {
    match load_csv(dir, filename) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(file = filename, error = %e, "reference data unavailable, continuing without it");
            Vec::new()
        }
    }
}

/// Write rows with a header line, creating parent directories.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ScreenerError::io(parent, e))?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| ScreenerError::csv(path, e))?;
    for row in rows {
        wtr.serialize(row).map_err(|e| ScreenerError::csv(path, e))?;
    }
    wtr.flush().map_err(|e| ScreenerError::io(path, e))?;
    Ok(())
}

/// Write `rows` to `path` only if the file does not exist yet.
/// Returns whether a file was written.
///
/// The existence check and the write are separate steps; two processes
/// racing at the day boundary can both write.
pub fn write_csv_once<T: Serialize>(path: &Path, rows: &[T]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    write_csv(path, rows)?;
    Ok(true)
}
