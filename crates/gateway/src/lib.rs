//! Gateway: reverse-WebSocket server for OneBot v11 bots.
//!
//! Lifecycle of a bot connection:
//! 1. Gate: `X-Self-ID` / `X-Client-Role` headers and role path checked (HTTP 400/404)
//! 2. Upgrade, then access-token authentication
//! 3. Registration under (service, self_id); duplicates refused
//! 4. Pump: responses resolve pending action calls, events go to the handler
//! 5. Teardown: unregister, `on_close`, fail pending calls, close frame
//!
//! Application logic plugs in through [`handler::EventHandler`] and calls
//! actions back through [`api::ApiHandle`].

pub mod api;
pub mod auth;
pub mod connection;
pub mod error;
pub mod handler;
pub mod registry;
pub mod server;
pub mod transport;
pub mod types;
pub mod ws;

pub use {
    api::ApiHandle,
    connection::{CloseReason, ConnectionController, ConnectionSettings, ConnectionState, Handshake},
    error::{ActionError, RegistryError, Rejection},
    handler::{EventContext, EventHandler, LoggingHandler},
    registry::{ConnectionInfo, ConnectionRegistry, ConnectionSummary},
    server::GatewayServer,
    types::{ClientRole, ConnectionId, SelfId, ServiceId},
};
