// SPDX-License-Identifier: PMPL-1.0-or-later
//! GraphQL schema assembly

use async_graphql::{EmptyMutation, EmptySubscription, Schema};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::directive::{apply_rate_limiting, RateLimitRules, RATE_LIMIT_DIRECTIVE_SDL};
use crate::error::{AppError, Result};
use crate::limiter::RateLimiter;
use crate::resolvers::QueryRoot;

/// Application GraphQL schema
pub type AppSchema = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

/// Annotation document for the application types.
pub fn rate_limit_sdl(config: &Config) -> String {
    format!(
        "{RATE_LIMIT_DIRECTIVE_SDL}\n\n\
         # Allow each field to be queried {limit} time(s) every {duration} seconds\n\
         type Query @rateLimit(limit: {limit}, duration: {duration}) {{\n  \
           books: [Book!]\n  \
           quote: String\n\
         }}\n",
        limit = config.rate_limit.limit,
        duration = config.rate_limit.duration,
    )
}

/// Rules from the declared policy, merged with the optional rules file.
pub fn load_rules(config: &Config) -> Result<RateLimitRules> {
    let mut rules = RateLimitRules::from_sdl(&rate_limit_sdl(config))?;

    if let Some(path) = &config.rate_limit.rules_file {
        let sdl = std::fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!("cannot read rate limit rules {path}: {e}"))
        })?;
        rules = rules.merge(RateLimitRules::from_sdl(&sdl)?);
        info!(path = %path, "Loaded rate limit rules file");
    }

    Ok(rules)
}

/// Build the schema with rate limiting applied.
///
/// Fails with a configuration error when a limit or duration is not positive
/// or a rule names a type or field the schema lacks.
pub fn build_schema(config: &Config, limiter: Arc<RateLimiter>) -> Result<AppSchema> {
    let rules = load_rules(config)?;

    // Coordinates are checked against the finished type system before the
    // interceptor is installed.
    let type_system = Schema::new(QueryRoot, EmptyMutation, EmptySubscription).sdl();
    rules.check_coordinates(&type_system)?;

    let mut builder = Schema::build(QueryRoot, EmptyMutation, EmptySubscription);
    if !config.introspection {
        builder = builder.disable_introspection();
    }

    Ok(apply_rate_limiting(builder, rules, limiter).finish())
}
