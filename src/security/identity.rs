//! Pseudo-identity for anonymous callers.
//!
//! A subject id is a partitioning key for conversations and rate limits,
//! derived from the client address and a handful of request headers. It is
//! not an authentication mechanism: two browsers behind one NAT with the same
//! headers share an id, and that is acceptable.

use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;

use crate::config::IdentityConfig;

const SUBJECT_ID_LEN: usize = 16;
const LOOPBACK: &str = "127.0.0.1";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Stable opaque identifier of the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("header '{0}' is not valid visible ASCII")]
    InvalidHeader(String),
}

/// The request attributes identity is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub remote_addr: Option<String>,
    pub forwarded_for: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub accept_encoding: Option<String>,
    pub accept: Option<String>,
}

impl RequestMeta {
    pub fn from_headers(
        headers: &HeaderMap,
        remote: Option<SocketAddr>,
    ) -> Result<Self, IdentityError> {
        let forwarded_for = match header_text(headers, X_FORWARDED_FOR)? {
            Some(value) => Some(value),
            None => header_text(headers, X_REAL_IP)?,
        };

        Ok(Self {
            remote_addr: remote.map(|addr| addr.ip().to_string()),
            forwarded_for,
            user_agent: header_text(headers, header::USER_AGENT.as_str())?,
            accept_language: header_text(headers, header::ACCEPT_LANGUAGE.as_str())?,
            accept_encoding: header_text(headers, header::ACCEPT_ENCODING.as_str())?,
            accept: header_text(headers, header::ACCEPT.as_str())?,
        })
    }

    fn has_fingerprint_inputs(&self) -> bool {
        [
            &self.user_agent,
            &self.accept_language,
            &self.accept_encoding,
            &self.accept,
        ]
        .iter()
        .any(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

fn header_text(headers: &HeaderMap, name: &str) -> Result<Option<String>, IdentityError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| IdentityError::InvalidHeader(name.to_string()))
        })
        .transpose()
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Derives [`SubjectId`]s from request metadata.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    trust_forwarded_headers: bool,
}

impl SessionIdentity {
    pub fn new(trust_forwarded_headers: bool) -> Self {
        Self {
            trust_forwarded_headers,
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(config.trust_forwarded_headers)
    }

    /// Best-effort client address. Forwarded headers are only honoured behind
    /// a trusted proxy; IPv4-mapped IPv6 addresses are unwrapped.
    pub fn client_address(&self, meta: &RequestMeta) -> String {
        let forwarded = if self.trust_forwarded_headers {
            meta.forwarded_for
                .as_deref()
                .and_then(|list| list.split(',').next())
                .map(str::trim)
                .filter(|addr| !addr.is_empty())
        } else {
            None
        };

        let addr = forwarded
            .or(meta.remote_addr.as_deref())
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .unwrap_or(LOOPBACK);
        addr.strip_prefix("::ffff:").unwrap_or(addr).to_string()
    }

    /// Hash over user-agent, accept-language, accept-encoding, address and
    /// accept, in that order. `None` when the request carries none of the
    /// headers.
    pub fn fingerprint(&self, meta: &RequestMeta) -> Option<String> {
        if !meta.has_fingerprint_inputs() {
            return None;
        }
        let address = self.client_address(meta);
        let parts = [
            meta.user_agent.as_deref().unwrap_or(""),
            meta.accept_language.as_deref().unwrap_or(""),
            meta.accept_encoding.as_deref().unwrap_or(""),
            address.as_str(),
            meta.accept.as_deref().unwrap_or(""),
        ];
        Some(sha256_hex(&parts.join("|")))
    }

    pub fn resolve(&self, meta: &RequestMeta) -> SubjectId {
        let address = self.client_address(meta);
        let fingerprint = self
            .fingerprint(meta)
            .unwrap_or_else(|| "unknown".to_string());
        let mut digest = sha256_hex(&format!("{address}_{fingerprint}"));
        digest.truncate(SUBJECT_ID_LEN);
        SubjectId(digest)
    }

    pub fn resolve_headers(
        &self,
        headers: &HeaderMap,
        remote: Option<SocketAddr>,
    ) -> Result<SubjectId, IdentityError> {
        let meta = RequestMeta::from_headers(headers, remote)?;
        Ok(self.resolve(&meta))
    }

    /// Like [`Self::resolve_headers`], but a request whose headers cannot be
    /// read still gets a one-off random id instead of failing.
    pub fn resolve_or_fallback(
        &self,
        headers: &HeaderMap,
        remote: Option<SocketAddr>,
    ) -> SubjectId {
        match self.resolve_headers(headers, remote) {
            Ok(subject) => subject,
            Err(e) => {
                tracing::warn!(error = %e, "Identity derivation failed, using a random subject");
                random_subject()
            }
        }
    }
}

/// Fresh random subject id for a single request.
pub fn random_subject() -> SubjectId {
    let bytes: [u8; 16] = rand::random();
    SubjectId(hex::encode(bytes))
}
