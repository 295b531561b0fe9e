use std::time::Duration;

use axum::http::StatusCode;

use crate::types::{ClientRole, ConnectionId, SelfId};

/// Failure of an outbound action call.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("action '{action}' timed out after {timeout:?}")]
    Timeout { action: String, timeout: Duration },

    #[error("action '{action}' cancelled: connection closed")]
    Cancelled { action: String },

    #[error("action '{action}' failed (retcode {retcode}): {message}")]
    Failed {
        action: String,
        retcode: i64,
        message: String,
    },

    #[error("no active connection for bot {0}")]
    NotConnected(SelfId),

    #[error("failed to encode action '{action}': {source}")]
    Encode {
        action: String,
        source: serde_json::Error,
    },

    #[error("unexpected response data for '{action}': {source}")]
    Decode {
        action: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("bot {self_id} is already connected (connection {existing})")]
    Duplicate {
        self_id: SelfId,
        existing: ConnectionId,
    },
}

/// Why a transport was turned away before becoming active.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("missing required header {0}")]
    MissingHeader(&'static str),

    #[error("invalid self id {0:?}")]
    InvalidSelfId(String),

    #[error("unknown client role {0:?}")]
    UnknownRole(String),

    #[error("path {path:?} is not the {role} endpoint")]
    PathMismatch { role: ClientRole, path: String },

    #[error("access token required")]
    MissingCredential,

    #[error("access token mismatch")]
    CredentialMismatch,
}

impl Rejection {
    /// HTTP status used when the rejection happens before the upgrade.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeader(_) | Self::InvalidSelfId(_) => StatusCode::BAD_REQUEST,
            Self::UnknownRole(_) | Self::PathMismatch { .. } => StatusCode::NOT_FOUND,
            Self::MissingCredential | Self::CredentialMismatch => StatusCode::UNAUTHORIZED,
        }
    }

    /// Routing rejections happen at the gate; the rest during authentication.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            Self::MissingHeader(_)
                | Self::InvalidSelfId(_)
                | Self::UnknownRole(_)
                | Self::PathMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_statuses() {
        let routing = [
            Rejection::MissingHeader("x-self-id"),
            Rejection::InvalidSelfId("x".into()),
            Rejection::UnknownRole("Api".into()),
            Rejection::PathMismatch {
                role: ClientRole::Universal,
                path: "/nope".into(),
            },
        ];
        assert!(routing.iter().all(Rejection::is_routing));
        assert_eq!(routing[0].status(), StatusCode::BAD_REQUEST);
        assert_eq!(routing[3].status(), StatusCode::NOT_FOUND);

        assert!(!Rejection::CredentialMismatch.is_routing());
        assert_eq!(
            Rejection::MissingCredential.status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
