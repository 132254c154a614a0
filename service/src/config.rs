//! Environment-based service configuration.
//!
//! All settings come from environment variables with sensible local-dev
//! defaults; only the database URL has no default. Validation happens once
//! at load, so wiring code can assume a coherent configuration.

use std::time::Duration;
use thiserror::Error;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    /// An environment variable could not be parsed.
    #[error("Failed to parse {var}: {reason}")]
    ParseError {
        /// The offending variable name.
        var: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The loaded configuration is not coherent.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Runtime configuration for the logbridge service.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Comma-separated broker bootstrap addresses.
    pub brokers: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// HTTP listen address.
    pub bind_addr: String,
    /// Channel carrying log submissions.
    pub inbound_channel: String,
    /// Channel carrying acknowledgments.
    pub outbound_channel: String,
    /// Consumer group for the ingestion side.
    pub consumer_group: String,
    /// Inactivity window for pending submissions.
    pub pending_ttl: Duration,
    /// How often the correlation reaper sweeps.
    pub reaper_period: Duration,
}

impl ServiceConfig {
    /// Load configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `DATABASE_URL` is missing, a numeric
    /// variable does not parse, or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ServiceConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            brokers: lookup("LOGBRIDGE_BROKERS").unwrap_or_else(|| "localhost:9092".to_string()),
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| ConfigError::EnvVarNotSet("DATABASE_URL".to_string()))?,
            bind_addr: lookup("LOGBRIDGE_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            inbound_channel: lookup("LOGBRIDGE_LOGS_CHANNEL")
                .unwrap_or_else(|| "logs_queue".to_string()),
            outbound_channel: lookup("LOGBRIDGE_RESPONSES_CHANNEL")
                .unwrap_or_else(|| "responses_queue".to_string()),
            consumer_group: lookup("LOGBRIDGE_CONSUMER_GROUP")
                .unwrap_or_else(|| "logbridge-ingestion".to_string()),
            pending_ttl: Duration::from_secs(parse_secs(
                &lookup,
                "LOGBRIDGE_PENDING_TTL_SECS",
                60,
            )?),
            reaper_period: Duration::from_secs(parse_secs(
                &lookup,
                "LOGBRIDGE_REAPER_PERIOD_SECS",
                10,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.inbound_channel.is_empty() || self.outbound_channel.is_empty() {
            return Err(ConfigError::ValidationError(
                "channel names must not be empty".to_string(),
            ));
        }
        if self.inbound_channel == self.outbound_channel {
            return Err(ConfigError::ValidationError(
                "inbound and outbound channels must differ".to_string(),
            ));
        }
        if self.pending_ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "pending TTL must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_secs(
    lookup: impl Fn(&str) -> Option<String>,
    var: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| ConfigError::ParseError {
            var: var.to_string(),
            reason: format!("{e}"),
        }),
    }
}
