// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the GraphQL API.
//!
//! The caller identity is derived here, once per request, and handed to the
//! GraphQL executor as request data for the rate limit interceptor.

use crate::config::Config;
use crate::identity::CallerIdentity;
use crate::schema::AppSchema;
use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    extract::{ConnectInfo, FromRequestParts, State},
    http::{request::Parts, HeaderMap},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Shared application state.
pub struct AppState {
    pub schema: AppSchema,
    pub config: Config,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Peer address of the connection, when the server was started with connect
/// info. Never rejects.
#[derive(Debug, Clone, Copy)]
pub struct PeerAddr(pub Option<SocketAddr>);

impl<S> FromRequestParts<S> for PeerAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let peer = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|ConnectInfo(addr)| addr);
        Ok(Self(peer))
    }
}

/// GraphQL endpoint.
pub async fn graphql_handler(
    State(state): State<Arc<AppState>>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    req: GraphQLRequest,
) -> GraphQLResponse {
    let identity = CallerIdentity::from_request(peer, &headers, &state.config.credential_header);
    debug!(
        address = %identity.address,
        has_credential = identity.credential.is_some(),
        "Executing GraphQL request"
    );

    state
        .schema
        .execute(req.into_inner().data(identity))
        .await
        .into()
}

/// GraphiQL playground handler
pub async fn graphiql() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

/// Build the router with CORS restricted to the configured origins.
///
/// Serve with `into_make_service_with_connect_info::<SocketAddr>()` so callers
/// are told apart by address; without it every caller without a credential
/// shares the empty address.
pub fn router(state: Arc<AppState>) -> Router {
    let mut allow_headers = vec![http::header::CONTENT_TYPE, http::header::AUTHORIZATION];
    if let Ok(name) = http::HeaderName::from_bytes(state.config.credential_header.as_bytes()) {
        allow_headers.push(name);
    }
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(state.config.cors_origins()))
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(AllowHeaders::list(allow_headers));

    Router::new()
        .route("/graphql", post(graphql_handler))
        .route("/graphiql", get(graphiql))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
