pub mod auth;
pub mod http;
pub mod types;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use auth::Credentials;
use types::{AtmIvRecord, InstrumentRow, SkewRecord, TokenSetQuery};

pub use http::HttpGateway;

// ── Upstream gateway trait ───────────────────────────────────────────

/// Upstream trading-data API.
///
/// `Ok(None)` means the upstream answered with a null payload (outage); the
/// caller keeps its last snapshot. `Err` is a transport, status or decode
/// failure and is handled the same way by analytics.
#[async_trait]
pub trait UpstreamGateway: Send + Sync {
    /// Per-symbol, per-expiry ATM-IV blob.
    async fn fetch_atm_iv(&self) -> Result<Option<Vec<AtmIvRecord>>>;

    /// Per-symbol skew blob.
    async fn fetch_skew(&self) -> Result<Option<Vec<SkewRecord>>>;

    /// Option and future legs filtered by delta window and expiry.
    async fn fetch_token_set(&self, query: &TokenSetQuery) -> Result<Option<Vec<InstrumentRow>>>;

    /// Listed monthly expiries, if the upstream publishes them.
    async fn fetch_expiries(&self) -> Result<Option<Vec<NaiveDate>>> {
        Ok(None)
    }

    /// Check credentials against the login endpoint.
    async fn verify_credentials(&self, _creds: &Credentials) -> Result<()> {
        Ok(())
    }

    /// Forget cached tokens (credentials changed).
    async fn reset_auth(&self) {}
}
