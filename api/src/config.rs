use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
    ratelimit::{Action, RateLimitConfig},
    token::DEFAULT_LINK_TTL_SECS,
};

/// Deployment misconfiguration. Never caused by request input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("no rate-limit policy configured for action `{0}`")]
    UnknownAction(Action),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Sqlite,
    Memory,
}

impl FromStr for RateLimitBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub public_base_url: Url,
    pub session_public_key_path: PathBuf,
    pub link_secret: Option<String>,
    pub link_ttl_secs: i64,
    pub email_webhook_secret: Option<String>,
    pub rate_limit_backend: RateLimitBackend,
    pub rate_limits: RateLimitConfig,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let rate_limits = match secret("RATE_LIMITS") {
            Some(raw) => RateLimitConfig::default().with_overrides(&raw)?,
            None => RateLimitConfig::default(),
        };

        Ok(Self {
            database_url: load_or("DATABASE_URL", "sqlite://aurum.db")?,
            bind_addr: load_or("BIND_ADDR", "0.0.0.0:3000")?,
            public_base_url: load_or("PUBLIC_BASE_URL", "http://localhost:3000")?,
            session_public_key_path: load_or("SESSION_PUBLIC_KEY_PATH", "keys/session_public.pem")?,
            link_secret: secret("ONBOARDING_LINK_SECRET"),
            link_ttl_secs: positive(
                "ONBOARDING_LINK_TTL_SECS",
                load_or("ONBOARDING_LINK_TTL_SECS", &DEFAULT_LINK_TTL_SECS.to_string())?,
            )?,
            email_webhook_secret: secret("EMAIL_WEBHOOK_SECRET"),
            rate_limit_backend: load_or("RATE_LIMIT_BACKEND", "sqlite")?,
            rate_limits,
            request_timeout: Duration::from_secs(load_or("REQUEST_TIMEOUT_SECS", "30")?),
        })
    }
}

fn load_or<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        debug!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }
    })
}

fn positive(key: &'static str, value: i64) -> Result<i64, ConfigError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("must be positive, got {value}"),
        })
    }
}

/// Optional value; empty strings count as unset.
fn secret(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("SQLite".parse::<RateLimitBackend>(), Ok(RateLimitBackend::Sqlite));
        assert_eq!(" memory ".parse::<RateLimitBackend>(), Ok(RateLimitBackend::Memory));
        assert!("redis".parse::<RateLimitBackend>().is_err());
    }

    #[test]
    fn invalid_number_is_reported_with_its_key() {
        env::set_var("AURUM_TEST_TIMEOUT", "soon");
        let err = load_or::<u64>("AURUM_TEST_TIMEOUT", "30").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "AURUM_TEST_TIMEOUT", .. }));
        env::remove_var("AURUM_TEST_TIMEOUT");
    }

    #[test]
    fn link_ttl_must_be_positive() {
        assert_eq!(positive("ONBOARDING_LINK_TTL_SECS", 60).ok(), Some(60));
        for value in [0, -1] {
            assert!(matches!(
                positive("ONBOARDING_LINK_TTL_SECS", value),
                Err(ConfigError::Invalid { key: "ONBOARDING_LINK_TTL_SECS", .. })
            ));
        }
    }

    #[test]
    fn blank_secret_is_treated_as_missing() {
        env::set_var("AURUM_TEST_SECRET", "   ");
        assert_eq!(secret("AURUM_TEST_SECRET"), None);
        env::remove_var("AURUM_TEST_SECRET");
    }
}
