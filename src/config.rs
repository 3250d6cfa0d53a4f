// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the rate-limited GraphQL API.
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults (`#[serde(default = ...)]` below)
//! 2. an optional `rate-limit.{toml,yaml,json}` file in the working directory
//! 3. environment variables prefixed with `GRAPHQL_RATE_LIMIT_` (`.env` is
//!    loaded first), nested keys separated by `__`, e.g.
//!    `GRAPHQL_RATE_LIMIT_PORT=4000`, `GRAPHQL_RATE_LIMIT_RATE_LIMIT__DURATION=15`
//!
//! A plain `PORT` is still honoured, below every other source but the
//! built-in default.

use crate::error::{AppError, Result};
use crate::identity::DEFAULT_CREDENTIAL_HEADER;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of the environment variables read by [`Config::load`].
pub const ENV_PREFIX: &str = "GRAPHQL_RATE_LIMIT";

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Interface to bind (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// First port to try (default: 4000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Consecutive ports tried when the previous one is taken (default: 10)
    #[serde(default = "default_port_attempts")]
    pub port_attempts: u16,

    /// Header carrying the caller credential (default: authorization)
    #[serde(default = "default_credential_header")]
    pub credential_header: String,

    /// Comma-separated CORS origins (default: https://localhost)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: String,

    /// Serve introspection queries (default: true)
    #[serde(default = "default_true")]
    pub introspection: bool,

    /// Emit JSON log lines instead of human-readable ones (default: false)
    #[serde(default)]
    pub log_json: bool,

    /// Seconds between purges of expired rate limit records, 0 disables
    /// (default: 60)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Rate limiting policy
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Declared rate limit policy for the `Query` fields.
///
/// Raw integers are kept so that non-positive values reach schema assembly
/// and fail there as configuration errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed per field, per caller, per window (default: 1)
    #[serde(default = "default_limit")]
    pub limit: i64,

    /// Window length in seconds (default: 15)
    #[serde(default = "default_duration")]
    pub duration: i64,

    /// Optional SDL file with extra `@rateLimit` annotations
    #[serde(default)]
    pub rules_file: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_port_attempts() -> u16 {
    10
}

fn default_credential_header() -> String {
    DEFAULT_CREDENTIAL_HEADER.to_string()
}

fn default_allowed_origins() -> String {
    "https://localhost".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_limit() -> i64 {
    1
}

fn default_duration() -> i64 {
    15
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            port_attempts: default_port_attempts(),
            credential_header: default_credential_header(),
            allowed_origins: default_allowed_origins(),
            introspection: default_true(),
            log_json: false,
            cleanup_interval_secs: default_cleanup_interval(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            duration: default_duration(),
            rules_file: None,
        }
    }
}

impl Config {
    /// Load from `.env`, the optional config file and the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("rate-limit").required(false));
        Self::with_environment(builder, None, std::env::var("PORT").ok())
    }

    /// Layer the legacy `PORT` and the prefixed environment over `builder`.
    ///
    /// `env` replaces the process environment when given.
    fn with_environment(
        mut builder: config::ConfigBuilder<config::builder::DefaultState>,
        env: Option<config::Map<String, String>>,
        legacy_port: Option<String>,
    ) -> Result<Self> {
        if let Some(port) = legacy_port {
            builder = builder.set_default("port", port)?;
        }
        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );
        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.port_attempts == 0 {
            return Err(AppError::Configuration(
                "port_attempts must be at least 1".to_string(),
            ));
        }
        if http::HeaderName::from_bytes(self.credential_header.as_bytes()).is_err() {
            return Err(AppError::Configuration(format!(
                "credential_header {:?} is not a valid header name",
                self.credential_header
            )));
        }
        Ok(())
    }

    /// Parsed CORS origins; entries that are not valid header values are skipped.
    pub fn cors_origins(&self) -> Vec<http::HeaderValue> {
        self.allowed_origins
            .split(',')
            .filter_map(|o| o.trim().parse().ok())
            .collect()
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }
}
