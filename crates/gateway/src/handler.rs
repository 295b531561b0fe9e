use {async_trait::async_trait, serde_json::Value, tracing::info};

use onegate_protocol::{is_heartbeat, post_type, post_types};

use crate::{
    api::ApiHandle,
    registry::ConnectionInfo,
    types::{ConnectionId, SelfId, ServiceId},
};

/// Where an event came from, plus a handle to answer on the same connection.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub conn_id: ConnectionId,
    pub service: ServiceId,
    pub self_id: SelfId,
    pub api: ApiHandle,
}

/// Application callbacks for one gateway service.
///
/// Each event runs on its own task. Errors and panics are logged by the
/// gateway and never close the connection.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, ctx: EventContext, event: Value) -> anyhow::Result<()>;

    async fn on_open(&self, _conn: &ConnectionInfo) {}

    async fn on_close(&self, _conn: &ConnectionInfo) {}
}

/// Logs every event; used by the CLI when no application is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn on_event(&self, ctx: EventContext, event: Value) -> anyhow::Result<()> {
        if is_heartbeat(&event) {
            return Ok(());
        }
        match post_type(&event) {
            Some(post_types::MESSAGE | post_types::MESSAGE_SENT) => {
                let message = onegate_message::from_value(&event["message"]);
                info!(
                    self_id = ctx.self_id,
                    message_type = event["message_type"].as_str().unwrap_or_default(),
                    user_id = event["user_id"].as_i64().unwrap_or_default(),
                    group_id = event["group_id"].as_i64(),
                    text = %onegate_message::plain_text(&message),
                    segments = message.len(),
                    "message"
                );
            },
            Some(kind) => {
                info!(self_id = ctx.self_id, post_type = kind, event = %event, "event");
            },
            None => {
                info!(self_id = ctx.self_id, event = %event, "event without post_type");
            },
        }
        Ok(())
    }

    async fn on_open(&self, conn: &ConnectionInfo) {
        info!(self_id = conn.self_id, peer = ?conn.peer, "bot online");
    }

    async fn on_close(&self, conn: &ConnectionInfo) {
        info!(self_id = conn.self_id, "bot offline");
    }
}
