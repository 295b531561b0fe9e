use secrecy::{ExposeSecret, Secret};

use onegate_protocol::QUERY_ACCESS_TOKEN;

use crate::error::Rejection;

// ── Types ────────────────────────────────────────────────────────────────────

/// Credential requirement of a service.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    token: Option<Secret<String>>,
}

/// How a connection was let in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No token configured.
    Open,
    /// `Authorization: <scheme> <token>` header.
    Header,
    /// `?access_token=` query parameter.
    Query,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

/// Second space-delimited token of an authorization header value.
pub fn credential_from_header(value: &str) -> Option<&str> {
    value.split(' ').nth(1).filter(|t| !t.is_empty())
}

/// `access_token` from a raw query string, percent-decoded.
pub fn credential_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key != QUERY_ACCESS_TOKEN {
            return None;
        }
        urlencoding::decode(value).ok().map(|v| v.into_owned())
    })
}

// ── Auth logic ───────────────────────────────────────────────────────────────

impl AccessPolicy {
    /// Blank tokens leave the service open.
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token
                .filter(|t| !t.trim().is_empty())
                .map(|t| Secret::new(t.to_string())),
        }
    }

    pub fn open() -> Self {
        Self::default()
    }

    pub fn requires_token(&self) -> bool {
        self.token.is_some()
    }

    /// Check the credentials presented during the handshake.
    pub fn authorize(
        &self,
        authorization: Option<&str>,
        query: Option<&str>,
    ) -> Result<AuthMethod, Rejection> {
        let Some(expected) = self.token.as_ref().map(|t| t.expose_secret().as_str()) else {
            return Ok(AuthMethod::Open);
        };

        if let Some(header) = authorization {
            return match credential_from_header(header) {
                Some(given) if safe_equal(given, expected) => Ok(AuthMethod::Header),
                _ => Err(Rejection::CredentialMismatch),
            };
        }

        match query.and_then(credential_from_query) {
            Some(given) if safe_equal(&given, expected) => Ok(AuthMethod::Query),
            Some(_) => Err(Rejection::CredentialMismatch),
            None => Err(Rejection::MissingCredential),
        }
    }
}
