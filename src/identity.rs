// SPDX-License-Identifier: PMPL-1.0-or-later

//! Caller identity derived from request metadata.
//!
//! Identity derivation never fails. A missing peer address becomes the empty
//! string and a missing, empty or non-UTF-8 credential header becomes `None`;
//! such callers simply share a less specific identity.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Header carrying the caller credential unless configured otherwise.
pub const DEFAULT_CREDENTIAL_HEADER: &str = "authorization";

/// Who is calling: peer address plus optional credential token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    pub address: String,
    pub credential: Option<String>,
}

impl CallerIdentity {
    pub fn new(address: impl Into<String>, credential: Option<String>) -> Self {
        Self {
            address: address.into(),
            credential,
        }
    }

    /// Build the identity for one request.
    ///
    /// Only the peer IP is used, not the ephemeral port.
    pub fn from_request(
        peer: Option<SocketAddr>,
        headers: &HeaderMap,
        credential_header: &str,
    ) -> Self {
        let address = peer.map(|addr| addr.ip().to_string()).unwrap_or_default();
        let credential = headers
            .get(credential_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);

        Self {
            address,
            credential,
        }
    }

    /// `address:credential`, with an absent credential rendered empty.
    pub fn identity_string(&self) -> String {
        format!(
            "{}:{}",
            self.address,
            self.credential.as_deref().unwrap_or_default()
        )
    }
}
