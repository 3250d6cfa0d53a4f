// SPDX-License-Identifier: PMPL-1.0-or-later

//! GraphQL Rate Limit
//!
//! A small GraphQL query API (`books`, `quote`) whose fields are protected by
//! per-caller, fixed-window rate limits declared with `@rateLimit`:
//!
//! - Caller identity from peer address plus optional credential header
//! - In-memory fixed-window counters keyed by identity and field
//! - Field-level `Too many requests` errors that leave sibling fields intact
//! - Configuration errors for invalid annotations, raised before serving

pub mod clock;
pub mod config;
pub mod directive;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod limiter;
pub mod models;
pub mod resolvers;
pub mod schema;

pub use config::Config;
pub use directive::{apply_rate_limiting, RateLimitDirective, RateLimitRules};
pub use error::AppError;
pub use identity::CallerIdentity;
pub use limiter::{FieldLimitSpec, Outcome, RateLimitKey, RateLimiter};
pub use schema::{build_schema, AppSchema};
