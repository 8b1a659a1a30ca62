use std::path::PathBuf;

/// Errors raised by the screener core.
///
/// Upstream and per-analytic failures are recovered at the analytic boundary
/// (last-good snapshot is kept). Reference-data and config errors are fatal
/// when raised during startup.
#[derive(Debug, thiserror::Error)]
pub enum ScreenerError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("reference data {file}: {reason}")]
    ReferenceData { file: String, reason: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{analytic}: {reason}")]
    Computation { analytic: String, reason: String },

    #[error("config: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScreenerError {
    pub fn reference(file: impl Into<String>, reason: impl Into<String>) -> Self {
        ScreenerError::ReferenceData {
            file: file.into(),
            reason: reason.into(),
        }
    }

    pub fn computation(analytic: impl Into<String>, reason: impl Into<String>) -> Self {
        ScreenerError::Computation {
            analytic: analytic.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScreenerError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        ScreenerError::Csv {
            path: path.into(),
            source,
        }
    }

    /// Connect, timeout or body-read failure talking to the upstream.
    pub fn transport(what: &str, source: reqwest::Error) -> Self {
        ScreenerError::UpstreamUnavailable(format!("{what}: {source}"))
    }
}

pub type Result<T, E = ScreenerError> = std::result::Result<T, E>;
