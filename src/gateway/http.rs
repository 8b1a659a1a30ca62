use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::UpstreamGateway;
use super::auth::{CredentialStore, Credentials, TokenCache};
use super::types::{
    AtmIvRecord, ExpiriesResponse, InstrumentRow, SkewRecord, TokenSetEntry, TokenSetQuery,
    flatten_token_set,
};
use crate::error::{Result, ScreenerError};

const ATM_IV_ENDPOINT: &str = "atm_iv";
const SKEW_ENDPOINT: &str = "skew";
const TOKEN_SET_ENDPOINT: &str = "filtered-token-set";
const EXPIRIES_ENDPOINT: &str = "expiries";

/// reqwest-backed gateway with bearer auth.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    tokens: TokenCache,
}

impl HttpGateway {
    pub fn new(
        base_url: &str,
        store: CredentialStore,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("iv-screener/0.1")
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let tokens = TokenCache::new(client.clone(), base_url.clone(), store, access_ttl, refresh_ttl);
        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Send with the current access token; on 401 drop the token and retry once.
    async fn send_authed<F>(&self, what: &str, build: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let token = self.tokens.access_token().await?;
        let resp = build(&self.client)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ScreenerError::transport(what, e))?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::warn!("upstream returned 401, refreshing token");
        self.tokens.invalidate().await;
        let token = self.tokens.access_token().await?;
        build(&self.client)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ScreenerError::transport(what, e))
    }

    async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<Option<T>> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScreenerError::UpstreamUnavailable(format!(
                "{what}: {status}: {body}"
            )));
        }
        let value: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_decode() {
                ScreenerError::Http(e)
            } else {
                ScreenerError::transport(what, e)
            }
        })?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}

#[async_trait]
impl UpstreamGateway for HttpGateway {
    async fn fetch_atm_iv(&self) -> Result<Option<Vec<AtmIvRecord>>> {
        let url = self.url(ATM_IV_ENDPOINT);
        let resp = self.send_authed(ATM_IV_ENDPOINT, |c| c.get(&url)).await?;
        Self::decode(resp, ATM_IV_ENDPOINT).await
    }

    async fn fetch_skew(&self) -> Result<Option<Vec<SkewRecord>>> {
        let url = self.url(SKEW_ENDPOINT);
        let resp = self.send_authed(SKEW_ENDPOINT, |c| c.get(&url)).await?;
        Self::decode(resp, SKEW_ENDPOINT).await
    }

    async fn fetch_token_set(&self, query: &TokenSetQuery) -> Result<Option<Vec<InstrumentRow>>> {
        let url = self.url(TOKEN_SET_ENDPOINT);
        let resp = self.send_authed(TOKEN_SET_ENDPOINT, |c| c.post(&url).json(query)).await?;
        let entries: Option<Vec<TokenSetEntry>> = Self::decode(resp, TOKEN_SET_ENDPOINT).await?;
        Ok(entries.map(|e| flatten_token_set(&e)))
    }

    async fn fetch_expiries(&self) -> Result<Option<Vec<NaiveDate>>> {
        let resp = self
            .client
            .get(self.url(EXPIRIES_ENDPOINT))
            .send()
            .await
            .map_err(|e| ScreenerError::transport(EXPIRIES_ENDPOINT, e))?;
        let body: Option<ExpiriesResponse> = Self::decode(resp, EXPIRIES_ENDPOINT).await?;
        Ok(body.and_then(|b| b.expiries))
    }

    async fn verify_credentials(&self, creds: &Credentials) -> Result<()> {
        self.tokens.verify(creds).await
    }

    async fn reset_auth(&self) {
        self.tokens.reset().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Gateway pointed at a local port nothing listens on.
    fn unreachable_gateway(dir: &std::path::Path) -> HttpGateway {
        let store = CredentialStore::new(dir);
        store
            .save(&Credentials {
                username: "ops".into(),
                password: "secret".into(),
            })
            .unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let ttl = Duration::from_secs(60);
        HttpGateway::new(&format!("http://127.0.0.1:{port}"), store, ttl, ttl).unwrap()
    }

    #[tokio::test]
    async fn refused_connection_is_upstream_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = unreachable_gateway(dir.path());

        let err = gateway.fetch_expiries().await.unwrap_err();
        assert!(matches!(err, ScreenerError::UpstreamUnavailable(_)), "{err}");

        // Token acquisition hits the same dead host.
        let err = gateway.fetch_atm_iv().await.unwrap_err();
        assert!(matches!(err, ScreenerError::UpstreamUnavailable(_)), "{err}");
    }
}
