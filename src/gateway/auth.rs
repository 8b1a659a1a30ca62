use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::types::{Envelope, LoginData, RefreshData};
use crate::error::{Result, ScreenerError};

pub const SECRET_FILE: &str = "secret.json";

// ── Credentials ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// `secret.json` in the auth storage directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(SECRET_FILE),
        }
    }

    pub fn load(&self) -> Result<Credentials> {
        let contents = std::fs::read_to_string(&self.path).map_err(|_| {
            ScreenerError::Auth(format!("credentials not found at {}", self.path.display()))
        })?;
        serde_json::from_str(&contents)
            .map_err(|e| ScreenerError::Auth(format!("malformed {}: {e}", self.path.display())))
    }

    pub fn load_optional(&self) -> Option<Credentials> {
        self.load().ok()
    }

    pub fn save(&self, creds: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScreenerError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(creds)?;
        std::fs::write(&self.path, json).map_err(|e| ScreenerError::io(&self.path, e))
    }
}

// ── Token cache ──────────────────────────────────────────────────────

struct Cached {
    value: String,
    fetched_at: Instant,
}

impl Cached {
    fn fresh(&self, ttl: Duration) -> Option<&str> {
        (self.fetched_at.elapsed() < ttl).then_some(self.value.as_str())
    }
}

#[derive(Default)]
struct TokenState {
    refresh: Option<Cached>,
    access: Option<Cached>,
}

/// Two-level bearer token cache.
///
/// Login yields a refresh token (long TTL); the refresh endpoint yields the
/// access token (short TTL). A failed refresh drops the cached login and
/// retries exactly once.
pub struct TokenCache {
    client: reqwest::Client,
    base_url: String,
    store: CredentialStore,
    access_ttl: Duration,
    refresh_ttl: Duration,
    state: Mutex<TokenState>,
}

impl TokenCache {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        store: CredentialStore,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            store,
            access_ttl,
            refresh_ttl,
            state: Mutex::new(TokenState::default()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub async fn access_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.access.as_ref().and_then(|c| c.fresh(self.access_ttl)) {
            return Ok(token.to_string());
        }

        let refresh = self.refresh_token(&mut state).await?;
        let access = match self.exchange(&refresh).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed, logging in again");
                state.refresh = None;
                let refresh = self.refresh_token(&mut state).await?;
                self.exchange(&refresh).await?
            }
        };

        state.access = Some(Cached {
            value: access.clone(),
            fetched_at: Instant::now(),
        });
        Ok(access)
    }

    /// Drop the cached access token after the upstream rejected it.
    pub async fn invalidate(&self) {
        self.state.lock().await.access = None;
    }

    /// Drop everything, e.g. after credentials were replaced.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.access = None;
        state.refresh = None;
    }

    /// Check `creds` against the upstream login endpoint without caching.
    pub async fn verify(&self, creds: &Credentials) -> Result<()> {
        self.login(creds).await.map(|_| ())
    }

    async fn refresh_token(&self, state: &mut TokenState) -> Result<String> {
        if let Some(token) = state.refresh.as_ref().and_then(|c| c.fresh(self.refresh_ttl)) {
            return Ok(token.to_string());
        }
        let creds = self.store.load()?;
        let token = self.login(&creds).await?;
        state.refresh = Some(Cached {
            value: token.clone(),
            fetched_at: Instant::now(),
        });
        Ok(token)
    }

    async fn login(&self, creds: &Credentials) -> Result<String> {
        let url = format!("{}/auth/login", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(creds)
            .send()
            .await
            .map_err(|e| ScreenerError::transport("login request", e))?;
        if !resp.status().is_success() {
            return Err(ScreenerError::Auth(format!("login rejected: {}", resp.status())));
        }
        let body: Envelope<LoginData> = resp
            .json()
            .await
            .map_err(|e| ScreenerError::Auth(format!("login response: {e}")))?;
        Ok(body.data.refresh_token)
    }

    async fn exchange(&self, refresh_token: &str) -> Result<String> {
        let url = format!("{}/auth/refresh", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| ScreenerError::transport("refresh request", e))?;
        if !resp.status().is_success() {
            return Err(ScreenerError::Auth(format!("refresh rejected: {}", resp.status())));
        }
        let body: Envelope<RefreshData> = resp
            .json()
            .await
            .map_err(|e| ScreenerError::Auth(format!("refresh response: {e}")))?;
        Ok(body.data.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(&dir.path().join("auth"));
        assert!(store.load_optional().is_none());
        assert!(matches!(store.load(), Err(ScreenerError::Auth(_))));

        let creds = Credentials {
            username: "ops".into(),
            password: "hunter2".into(),
        };
        store.save(&creds).unwrap();
        assert_eq!(store.load().unwrap(), creds);
    }

    #[test]
    fn cached_token_expires() {
        let cached = Cached {
            value: "t".into(),
            fetched_at: Instant::now(),
        };
        assert_eq!(cached.fresh(Duration::from_secs(60)), Some("t"));
        assert_eq!(cached.fresh(Duration::ZERO), None);
    }
}
