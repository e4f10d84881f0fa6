//! Configuration loaded from environment variables (spec §6, SPEC_FULL §C).
//!
//! Follows the teacher's `ticketing::config::Config` shape: nested structs
//! per subsystem, defaults applied where the spec documents one, validation
//! happening once at startup rather than scattered through the code.

use crate::error::AppError;
use std::env;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub stk: StkConfig,
    pub hosted: HostedConfig,
    pub messaging: MessagingConfig,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub server: ServerConfig,
}

/// Session/lock TTL and booking-quantity cap (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub max_quantity: i32,
}

/// Mobile STK push adapter credentials (spec §4.5, §6).
#[derive(Debug, Clone)]
pub struct StkConfig {
    pub base_url: Option<String>,
    pub publishable_key: Option<String>,
    pub secret_key: Option<String>,
    pub is_test: bool,
}

impl StkConfig {
    /// Fails with [`AppError::ConfigError`] if credentials are missing,
    /// matching spec §4.5's "fails with `ConfigError` if credentials missing".
    pub fn require_credentials(&self) -> Result<(&str, &str), AppError> {
        match (&self.publishable_key, &self.secret_key) {
            (Some(p), Some(s)) => Ok((p.as_str(), s.as_str())),
            _ => Err(AppError::ConfigError(
                "STK_PUBLISHABLE_KEY / STK_SECRET_KEY not set".to_string(),
            )),
        }
    }
}

/// Hosted-redirect payment provider credentials (spec §4.6, §6).
#[derive(Debug, Clone)]
pub struct HostedConfig {
    pub base_url: Option<String>,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub callback_url: Option<String>,
}

impl HostedConfig {
    pub fn require_credentials(&self) -> Result<(&str, &str, &str), AppError> {
        match (&self.base_url, &self.consumer_key, &self.consumer_secret) {
            (Some(b), Some(k), Some(s)) => Ok((b.as_str(), k.as_str(), s.as_str())),
            _ => Err(AppError::ConfigError(
                "HOSTED_BASE_URL / HOSTED_CONSUMER_KEY / HOSTED_CONSUMER_SECRET not set"
                    .to_string(),
            )),
        }
    }
}

/// Outbound messaging-platform credentials (spec §6).
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    pub verify_token: Option<String>,
    pub bot_phone: Option<String>,
}

/// Database configuration, following the teacher's `PostgresConfig` shape
/// but trimmed to the single write/read database this (non-event-sourced)
/// service uses.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Session-store / lock-registry backend configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// HTTP server bind configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_var(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env_var(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from the process environment (after `dotenvy`
    /// has had a chance to populate it). Unset keys fall back to the
    /// defaults documented in spec §6; nothing here panics.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            session: SessionConfig {
                ttl: Duration::from_secs(env_u64("SESSION_TTL", 600)),
                max_quantity: env_u64("MAX_QUANTITY", 5) as i32,
            },
            stk: StkConfig {
                base_url: env_var("STK_BASE_URL"),
                publishable_key: env_var("STK_PUBLISHABLE_KEY"),
                secret_key: env_var("STK_SECRET_KEY"),
                is_test: env_bool("STK_IS_TEST", true),
            },
            hosted: HostedConfig {
                base_url: env_var("HOSTED_BASE_URL"),
                consumer_key: env_var("HOSTED_CONSUMER_KEY"),
                consumer_secret: env_var("HOSTED_CONSUMER_SECRET"),
                callback_url: env_var("HOSTED_CALLBACK_URL"),
            },
            messaging: MessagingConfig {
                base_url: env_var("MESSAGING_BASE_URL"),
                access_token: env_var("MESSAGING_ACCESS_TOKEN"),
                phone_number_id: env_var("MESSAGING_PHONE_NUMBER_ID"),
                verify_token: env_var("MESSAGING_VERIFY_TOKEN"),
                bot_phone: env_var("BOT_PHONE_NUMBER"),
            },
            postgres: PostgresConfig {
                url: env_var("DATABASE_URL")
                    .unwrap_or_else(|| "postgres://localhost/concierge".to_string()),
                max_connections: env_u64("DATABASE_MAX_CONNECTIONS", 10) as u32,
            },
            redis: RedisConfig {
                url: env_var("REDIS_URL").unwrap_or_else(|| "redis://localhost".to_string()),
            },
            server: ServerConfig {
                host: env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: env_var("PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(8080),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stk_config_requires_both_keys() {
        let cfg = StkConfig {
            base_url: None,
            publishable_key: Some("pub".to_string()),
            secret_key: None,
            is_test: true,
        };
        assert!(cfg.require_credentials().is_err());
    }
}
