use std::fmt;

use {serde::Serialize, uuid::Uuid};

use onegate_protocol::roles;

/// Transport-level id, assigned when a socket is accepted.
pub type ConnectionId = Uuid;

/// Bot account id from the `X-Self-ID` header.
pub type SelfId = i64;

/// Identifies one running gateway service within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Category of client, from the `X-Client-Role` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[non_exhaustive]
pub enum ClientRole {
    /// Pushes events and accepts action calls on one socket.
    Universal,
}

impl ClientRole {
    /// Case-insensitive parse of the header value.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim()
            .eq_ignore_ascii_case(roles::UNIVERSAL)
            .then_some(Self::Universal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Universal => roles::UNIVERSAL,
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
