// SPDX-License-Identifier: PMPL-1.0-or-later
//! Error types for the rate-limited GraphQL API

use async_graphql::ErrorExtensions;
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// A field was called too often by the same caller within its window.
    #[error("Too many requests, please try again in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    /// Invalid limit/duration values, unknown rule coordinates or bad settings.
    /// Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExtensions for AppError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| match self {
            AppError::RateLimited { retry_after_secs } => {
                e.set("code", "RATE_LIMITED");
                e.set("retryAfter", *retry_after_secs);
            }
            _ => e.set("code", "INTERNAL_SERVER_ERROR"),
        })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
