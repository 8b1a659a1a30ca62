use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::config::SCAN_CONFIG_FILE;
use crate::data::AssetDirs;

const DEFAULT_INTERVAL_MS: u64 = 1000;
const DEFAULT_ACCESS_TTL_SECS: u64 = 1800;
const DEFAULT_REFRESH_TTL_SECS: u64 = 43200;

/// CLI-facing overrides. Anything left `None` falls back to the
/// environment, then to a default.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub server_url: Option<String>,
    pub asset_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub interval_ms: Option<u64>,
}

/// Process settings resolved from CLI flags and environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub server_url: String,
    pub assets: AssetDirs,
    pub auth_dir: PathBuf,
    pub expiry_override: Option<String>,
    pub interval: Duration,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub host: String,
    pub port: u16,
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(key)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("{key}='{raw}'")))
        .transpose()
}

fn default_auth_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("iv-screener")
}

impl RuntimeConfig {
    pub fn from_cli(cli: &RunConfig) -> Result<Self> {
        let server_url = cli
            .server_url
            .clone()
            .or_else(|| env("ATHENA_SERVER_URL"))
            .ok_or_else(|| anyhow::anyhow!("ATHENA_SERVER_URL env var not set. Set it to the upstream API base URL."))?;

        let local = cli
            .asset_dir
            .clone()
            .or_else(|| env("ASSET_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("assets"));
        let network = env("NETWORK_ASSET_DIR").map(PathBuf::from);

        let interval_ms = match cli.interval_ms {
            Some(ms) => ms,
            None => env_parse("ATM_UPDATE_INTERVAL")?.unwrap_or(DEFAULT_INTERVAL_MS),
        };
        if interval_ms == 0 {
            bail!("ATM_UPDATE_INTERVAL must be positive");
        }

        Ok(RuntimeConfig {
            server_url,
            assets: AssetDirs::new(local, network),
            auth_dir: env("AUTH_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_auth_dir),
            expiry_override: env("EXPIRY_DATES"),
            interval: Duration::from_millis(interval_ms),
            access_ttl: Duration::from_secs(env_parse("ATH_VALIDITY")?.unwrap_or(DEFAULT_ACCESS_TTL_SECS)),
            refresh_ttl: Duration::from_secs(env_parse("RT_VALIDITY")?.unwrap_or(DEFAULT_REFRESH_TTL_SECS)),
            host: cli
                .host
                .clone()
                .or_else(|| env("SERVER_HOST"))
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: match cli.port {
                Some(port) => port,
                None => env_parse("SERVER_PORT")?.unwrap_or(8000),
            },
        })
    }

    pub fn scan_config_path(&self) -> PathBuf {
        self.assets.local.join(SCAN_CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_win_over_defaults() {
        let cli = RunConfig {
            server_url: Some("http://upstream".into()),
            asset_dir: Some(PathBuf::from("/tmp/assets")),
            host: Some("127.0.0.1".into()),
            port: Some(9000),
            interval_ms: Some(2500),
        };
        let config = RuntimeConfig::from_cli(&cli).unwrap();
        assert_eq!(config.server_url, "http://upstream");
        assert_eq!(config.assets.local, PathBuf::from("/tmp/assets"));
        assert_eq!(config.interval, Duration::from_millis(2500));
        assert_eq!(config.port, 9000);
        assert_eq!(config.scan_config_path(), PathBuf::from("/tmp/assets").join(SCAN_CONFIG_FILE));
    }

    #[test]
    fn zero_interval_rejected() {
        let cli = RunConfig {
            server_url: Some("http://upstream".into()),
            interval_ms: Some(0),
            ..Default::default()
        };
        assert!(RuntimeConfig::from_cli(&cli).is_err());
    }
}
