// SPDX-License-Identifier: PMPL-1.0-or-later

//! `@rateLimit` annotations and the field interceptor that enforces them.
//!
//! Annotations are plain data: they are read once, at schema assembly, into
//! [`RateLimitRules`] (field coordinate → [`FieldLimitSpec`]). The
//! [`RateLimitDirective`] extension then wraps field resolution and consults
//! the [`RateLimiter`] before running the resolver of any annotated field.
//!
//! A type-level annotation covers every field of the type; a field-level
//! annotation overrides it. Each field keeps its own counter either way.

use crate::error::{AppError, Result};
use crate::identity::CallerIdentity;
use crate::limiter::{FieldLimitSpec, Outcome, RateLimitKey, RateLimiter};
use async_graphql::extensions::{
    Extension, ExtensionContext, ExtensionFactory, NextResolve, ResolveInfo,
};
use async_graphql::parser::types::{ConstDirective, TypeKind, TypeSystemDefinition};
use async_graphql::{
    ErrorExtensions, ObjectType, PathSegment, QueryPathNode, QueryPathSegment, SchemaBuilder,
    ServerError, ServerResult, SubscriptionType, Value,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the annotation, without the `@`.
pub const RATE_LIMIT_DIRECTIVE: &str = "rateLimit";

/// Type declaration of the annotation, for SDL documents that use it.
pub const RATE_LIMIT_DIRECTIVE_SDL: &str =
    "directive @rateLimit(limit: Int! = 60, duration: Int! = 60) on OBJECT | FIELD_DEFINITION";

const DEFAULT_LIMIT: i64 = 60;
const DEFAULT_DURATION_SECS: i64 = 60;

/// `Type.field`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldCoordinate {
    pub type_name: String,
    pub field_name: String,
}

impl FieldCoordinate {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for FieldCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

/// Rate limit specs by type and field, fixed after schema assembly.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRules {
    types: HashMap<String, FieldLimitSpec>,
    fields: HashMap<FieldCoordinate, FieldLimitSpec>,
}

impl RateLimitRules {
    pub fn builder() -> RateLimitRulesBuilder {
        RateLimitRulesBuilder::default()
    }

    /// Collect every `@rateLimit` on object types and field definitions of
    /// an SDL document.
    pub fn from_sdl(sdl: &str) -> Result<Self> {
        let document = async_graphql::parser::parse_schema(sdl).map_err(|e| {
            AppError::Configuration(format!("invalid rate limit annotations: {e}"))
        })?;

        let mut builder = Self::builder();
        for definition in document.definitions {
            let TypeSystemDefinition::Type(ty) = definition else {
                continue;
            };
            let ty = ty.node;
            let type_name = ty.name.node.to_string();

            for directive in ty.directives.iter().map(|d| &d.node) {
                if directive.name.node.as_str() == RATE_LIMIT_DIRECTIVE {
                    let (limit, duration) = directive_args(directive, &type_name)?;
                    builder = builder.object(type_name.clone(), limit, duration);
                }
            }

            if let TypeKind::Object(object) = ty.kind {
                for field in object.fields.iter().map(|f| &f.node) {
                    let coordinate =
                        FieldCoordinate::new(type_name.clone(), field.name.node.to_string());
                    for directive in field.directives.iter().map(|d| &d.node) {
                        if directive.name.node.as_str() == RATE_LIMIT_DIRECTIVE {
                            let (limit, duration) =
                                directive_args(directive, &coordinate.to_string())?;
                            builder = builder.field(
                                coordinate.type_name.clone(),
                                coordinate.field_name.clone(),
                                limit,
                                duration,
                            );
                        }
                    }
                }
            }
        }

        builder.build()
    }

    /// Spec governing `type_name.field_name`, if any.
    pub fn spec_for(&self, type_name: &str, field_name: &str) -> Option<&FieldLimitSpec> {
        self.fields
            .get(&FieldCoordinate::new(type_name, field_name))
            .or_else(|| self.types.get(type_name))
    }

    /// Add `other`'s rules, replacing entries for the same type or field.
    pub fn merge(mut self, other: RateLimitRules) -> Self {
        self.types.extend(other.types);
        self.fields.extend(other.fields);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.fields.is_empty()
    }

    /// Fail if a rule names a type or field the schema does not have.
    pub fn check_coordinates(&self, schema_sdl: &str) -> Result<()> {
        let document = async_graphql::parser::parse_schema(schema_sdl)
            .map_err(|e| AppError::Configuration(format!("cannot read schema: {e}")))?;

        let mut known_types = HashSet::new();
        let mut known_fields = HashSet::new();
        for definition in document.definitions {
            if let TypeSystemDefinition::Type(ty) = definition {
                let type_name = ty.node.name.node.to_string();
                if let TypeKind::Object(object) = &ty.node.kind {
                    for field in &object.fields {
                        known_fields.insert(FieldCoordinate::new(
                            type_name.clone(),
                            field.node.name.node.to_string(),
                        ));
                    }
                }
                known_types.insert(type_name);
            }
        }

        if let Some(unknown) = self.types.keys().find(|t| !known_types.contains(*t)) {
            return Err(AppError::Configuration(format!(
                "@rateLimit on unknown type {unknown}"
            )));
        }
        if let Some(unknown) = self.fields.keys().find(|c| !known_fields.contains(*c)) {
            return Err(AppError::Configuration(format!(
                "@rateLimit on unknown field {unknown}"
            )));
        }
        Ok(())
    }
}

fn directive_args(directive: &ConstDirective, location: &str) -> Result<(i64, i64)> {
    let int_arg = |name: &str, default: i64| -> Result<i64> {
        match directive.get_argument(name).map(|v| &v.node) {
            None => Ok(default),
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                AppError::Configuration(format!("@rateLimit({name}) on {location} must be an integer"))
            }),
            Some(other) => Err(AppError::Configuration(format!(
                "@rateLimit({name}) on {location} must be an integer, got {other}"
            ))),
        }
    };

    Ok((
        int_arg("limit", DEFAULT_LIMIT)?,
        int_arg("duration", DEFAULT_DURATION_SECS)?,
    ))
}

/// Collects raw annotation values; [`build`](Self::build) validates them.
#[derive(Debug, Default)]
pub struct RateLimitRulesBuilder {
    types: Vec<(String, i64, i64)>,
    fields: Vec<(FieldCoordinate, i64, i64)>,
}

impl RateLimitRulesBuilder {
    /// Annotate every field of `type_name`.
    pub fn object(mut self, type_name: impl Into<String>, limit: i64, duration_secs: i64) -> Self {
        self.types.push((type_name.into(), limit, duration_secs));
        self
    }

    /// Annotate one field, overriding any type-level annotation.
    pub fn field(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        limit: i64,
        duration_secs: i64,
    ) -> Self {
        self.fields
            .push((FieldCoordinate::new(type_name, field_name), limit, duration_secs));
        self
    }

    pub fn build(self) -> Result<RateLimitRules> {
        let mut rules = RateLimitRules::default();

        for (type_name, limit, duration) in self.types {
            let spec = FieldLimitSpec::new(limit, duration)
                .map_err(|e| in_location(e, &type_name))?;
            rules.types.insert(type_name, spec);
        }
        for (coordinate, limit, duration) in self.fields {
            let spec = FieldLimitSpec::new(limit, duration)
                .map_err(|e| in_location(e, &coordinate.to_string()))?;
            rules.fields.insert(coordinate, spec);
        }

        Ok(rules)
    }
}

fn in_location(err: AppError, location: &str) -> AppError {
    match err {
        AppError::Configuration(msg) => AppError::Configuration(format!("{location}: {msg}")),
        other => other,
    }
}

/// Install the interceptor on a schema whose types and resolvers are final.
pub fn apply_rate_limiting<Q, M, S>(
    builder: SchemaBuilder<Q, M, S>,
    rules: RateLimitRules,
    limiter: Arc<RateLimiter>,
) -> SchemaBuilder<Q, M, S>
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    info!(
        types = rules.types.len(),
        fields = rules.fields.len(),
        "Applying @rateLimit rules"
    );
    builder.extension(RateLimitDirective::new(rules, limiter))
}

/// Extension factory wrapping annotated field resolvers with the rate limiter.
pub struct RateLimitDirective {
    rules: Arc<RateLimitRules>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitDirective {
    pub fn new(rules: RateLimitRules, limiter: Arc<RateLimiter>) -> Self {
        Self {
            rules: Arc::new(rules),
            limiter,
        }
    }
}

impl ExtensionFactory for RateLimitDirective {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(RateLimitExtension {
            rules: self.rules.clone(),
            limiter: self.limiter.clone(),
        })
    }
}

struct RateLimitExtension {
    rules: Arc<RateLimitRules>,
    limiter: Arc<RateLimiter>,
}

#[async_trait::async_trait]
impl Extension for RateLimitExtension {
    async fn resolve(
        &self,
        ctx: &ExtensionContext<'_>,
        info: ResolveInfo<'_>,
        next: NextResolve<'_>,
    ) -> ServerResult<Option<Value>> {
        if info.is_for_introspection || info.name.starts_with("__") {
            return next.run(ctx, info).await;
        }
        let Some(spec) = self.rules.spec_for(info.parent_type, info.name) else {
            return next.run(ctx, info).await;
        };

        // Requests without a transport identity all share the empty one.
        let fallback = CallerIdentity::default();
        let identity = ctx.data_opt::<CallerIdentity>().unwrap_or(&fallback);
        let key = RateLimitKey::new(&identity.identity_string(), info.parent_type, info.name);

        match self.limiter.consume(&key, 1, spec) {
            Outcome::Admitted { .. } => next.run(ctx, info).await,
            Outcome::Denied { retry_after_secs } => {
                debug!(
                    field = %FieldCoordinate::new(info.parent_type, info.name),
                    address = %identity.address,
                    retry_after_secs,
                    "Field rate limited"
                );
                let err = AppError::RateLimited { retry_after_secs }.extend();
                let mut server_err = ServerError::new(err.message, None);
                server_err.path = response_path(info.path_node);
                server_err.extensions = err.extensions;
                Err(server_err)
            }
        }
    }
}

/// Response path of a field, root first.
fn response_path(node: &QueryPathNode<'_>) -> Vec<PathSegment> {
    let mut path = Vec::new();
    let mut current = Some(node);
    while let Some(node) = current {
        path.push(match node.segment {
            QueryPathSegment::Name(name) => PathSegment::Field(name.to_string()),
            QueryPathSegment::Index(index) => PathSegment::Index(index),
        });
        current = node.parent;
    }
    path.reverse();
    path
}
