use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use duet_gateway::SessionConfig;

/// Secrets that ship in sample `.env` files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "secret",
    "changeme",
    "change-me",
    "dev-secret-change-me",
    "your-secret-key",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Unset and empty
    /// values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("DUET_JWT_SECRET").context("DUET_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.to_ascii_lowercase().as_str()) {
            bail!("DUET_JWT_SECRET is a placeholder value, set a real secret");
        }

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            idle_timeout: secs(&get, "DUET_IDLE_TIMEOUT_SECS", defaults.idle_timeout)?,
            write_timeout: secs(&get, "DUET_WRITE_TIMEOUT_SECS", defaults.write_timeout)?,
            heartbeat_interval: secs(
                &get,
                "DUET_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            )?,
            require_token: parse_or(&get, "DUET_REQUIRE_TOKEN", defaults.require_token)?,
            ..defaults
        };

        Ok(Self {
            host: get("DUET_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "DUET_PORT", 3000)?,
            db_path: PathBuf::from(get("DUET_DB_PATH").unwrap_or_else(|| "duet.db".into())),
            jwt_secret,
            session,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration> {
    let secs: u64 = parse_or(get, key, default.as_secs())?;
    if secs == 0 {
        bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_secs(secs))
}
