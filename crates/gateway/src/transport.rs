//! Transport abstraction between the socket layer and the connection controller.
//!
//! The controller never touches a socket directly: it reads [`TransportEvent`]s
//! and writes [`OutboundFrame`]s. [`crate::ws::bridge`] wires these channels to
//! an axum WebSocket; tests use [`TransportChannel::pair`].

use std::net::SocketAddr;

use {
    axum::http::{HeaderMap, HeaderName, HeaderValue},
    tokio::sync::mpsc,
};

use crate::types::ConnectionId;

/// What is known about a transport before the upgrade.
#[derive(Debug, Clone)]
pub struct TransportMeta {
    pub conn_id: ConnectionId,
    pub peer: Option<SocketAddr>,
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
}

impl TransportMeta {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            conn_id: uuid::Uuid::new_v4(),
            peer: None,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header. Invalid values are skipped.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Header value as text; non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Something that happened on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame (binary frames are delivered as decoded UTF-8).
    Message(String),
    Closed { reason: Option<String> },
    Error(String),
}

/// A frame the controller wants written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Ping,
    Close { code: u16, reason: String },
}

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Server going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Policy violation: auth failures and duplicate identities.
pub const CLOSE_POLICY: u16 = 1008;

/// Controller side of a transport.
#[derive(Debug)]
pub struct TransportChannel {
    pub meta: TransportMeta,
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Socket side of a transport: feeds events in, drains frames out.
#[derive(Debug)]
pub struct RemoteEnd {
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub frames: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl TransportChannel {
    /// Connected in-memory pair.
    pub fn pair(meta: TransportMeta) -> (Self, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                meta,
                outbound: out_tx,
                inbound: in_rx,
            },
            RemoteEnd {
                events: in_tx,
                frames: out_rx,
            },
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn meta_headers() {
        let meta = TransportMeta::new("/ws")
            .with_header("x-self-id", "10001")
            .with_header("x-client-role", "bad\nvalue");
        assert_eq!(meta.header("X-Self-ID"), Some("10001"));
        assert_eq!(meta.header("x-client-role"), None);
    }

    #[tokio::test]
    async fn pair_is_connected() {
        let (mut channel, mut remote) = TransportChannel::pair(TransportMeta::new("/"));
        channel.outbound.send(OutboundFrame::Ping).unwrap();
        assert_eq!(remote.frames.recv().await, Some(OutboundFrame::Ping));

        remote
            .events
            .send(TransportEvent::Message("{}".into()))
            .unwrap();
        assert_eq!(
            channel.inbound.recv().await,
            Some(TransportEvent::Message("{}".into()))
        );
    }
}
