//! OneBot v11 reverse-WebSocket wire protocol.
//!
//! Bots connect to the gateway and push events as single JSON objects. The
//! gateway calls actions on the bot with `{action, params, echo}` frames and the
//! bot answers with a response frame carrying the same `echo`.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

// ── Handshake ────────────────────────────────────────────────────────────────

/// Header carrying the bot account id.
pub const HEADER_SELF_ID: &str = "x-self-id";
/// Header carrying the connection role (`Universal`, ...).
pub const HEADER_CLIENT_ROLE: &str = "x-client-role";
/// Optional `"<scheme> <token>"` credential header.
pub const HEADER_AUTHORIZATION: &str = "authorization";
/// Query parameter accepted in place of the authorization header.
pub const QUERY_ACCESS_TOKEN: &str = "access_token";

pub mod roles {
    pub const UNIVERSAL: &str = "Universal";
}

// ── Defaults ─────────────────────────────────────────────────────────────────

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_UNIVERSAL_PATH: &str = "/onebot/v11/ws";
pub const DEFAULT_API_TIMEOUT_MS: u64 = 5_000;

// ── Event classification ─────────────────────────────────────────────────────

pub mod post_types {
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_SENT: &str = "message_sent";
    pub const NOTICE: &str = "notice";
    pub const REQUEST: &str = "request";
    pub const META_EVENT: &str = "meta_event";
}

/// `post_type` of an event object, if present.
pub fn post_type(event: &Value) -> Option<&str> {
    event.get("post_type").and_then(Value::as_str)
}

/// Whether the event is a `meta_event` heartbeat.
pub fn is_heartbeat(event: &Value) -> bool {
    post_type(event) == Some(post_types::META_EVENT)
        && event.get("meta_event_type").and_then(Value::as_str) == Some("heartbeat")
}

/// `self_id` reported inside an event body.
pub fn event_self_id(event: &Value) -> Option<i64> {
    let raw = event.get("self_id")?;
    raw.as_i64()
        .or_else(|| raw.as_str().and_then(|s| s.parse().ok()))
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// An action call sent from the gateway to a bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub params: Value,
    pub echo: String,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, params: Value, echo: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params,
            echo: echo.into(),
        }
    }
}

/// A bot's answer to an [`ActionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub retcode: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub echo: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wording: Option<String>,
}

impl ActionResponse {
    pub fn ok(echo: impl Into<String>, data: Value) -> Self {
        Self {
            status: "ok".into(),
            retcode: 0,
            data,
            echo: Value::String(echo.into()),
            msg: None,
            wording: None,
        }
    }

    pub fn failed(echo: impl Into<String>, retcode: i64, message: impl Into<String>) -> Self {
        Self {
            status: "failed".into(),
            retcode,
            data: Value::Null,
            echo: Value::String(echo.into()),
            msg: Some(message.into()),
            wording: None,
        }
    }

    /// `retcode` 1 is "async accepted" in OneBot v11 and counts as success.
    pub fn is_ok(&self) -> bool {
        self.status != "failed" && (self.retcode == 0 || self.retcode == 1)
    }

    pub fn echo_str(&self) -> Option<&str> {
        self.echo.as_str()
    }

    /// Human-readable failure text, preferring `wording` over `msg`.
    pub fn error_message(&self) -> String {
        self.wording
            .clone()
            .or_else(|| self.msg.clone())
            .unwrap_or_else(|| self.status.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a json object")]
    NotAnObject,
}

/// A frame received from a bot, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Response(ActionResponse),
    Event(Value),
}

impl InboundFrame {
    /// Parse one text frame. Objects with an `echo` and a `status` or `retcode`
    /// are action responses; every other object is an event.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(obj) = value.as_object() else {
            return Err(FrameError::NotAnObject);
        };
        let is_response = obj.contains_key("echo")
            && (obj.contains_key("retcode") || obj.contains_key("status"))
            && !obj.contains_key("post_type");
        if is_response {
            return Ok(Self::Response(serde_json::from_value(value)?));
        }
        Ok(Self::Event(value))
    }
}

// ── Action payloads ──────────────────────────────────────────────────────────

/// `data` of `send_private_msg` / `send_group_msg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

/// `data` of `get_login_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn parses_event_frame() {
        let frame = InboundFrame::parse(
            r#"{"post_type":"message","message_type":"private","self_id":10001,"message":"hi"}"#,
        )
        .unwrap();
        let InboundFrame::Event(event) = frame else {
            panic!("expected event");
        };
        assert_eq!(post_type(&event), Some("message"));
        assert_eq!(event_self_id(&event), Some(10001));
    }

    #[test]
    fn parses_response_frame() {
        let frame =
            InboundFrame::parse(r#"{"status":"ok","retcode":0,"data":{"message_id":7},"echo":"e1"}"#)
                .unwrap();
        let InboundFrame::Response(resp) = frame else {
            panic!("expected response");
        };
        assert!(resp.is_ok());
        assert_eq!(resp.echo_str(), Some("e1"));
        assert_eq!(resp.data, json!({"message_id": 7}));
    }

    #[test]
    fn event_with_echo_field_is_still_an_event() {
        let frame =
            InboundFrame::parse(r#"{"post_type":"notice","echo":"x","status":"ok"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Event(_)));
    }

    #[test]
    fn rejects_malformed_and_non_object_frames() {
        assert!(matches!(
            InboundFrame::parse("{not json"),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            InboundFrame::parse("[1,2,3]"),
            Err(FrameError::NotAnObject)
        ));
    }

    #[test]
    fn failed_response_reports_wording() {
        let mut resp = ActionResponse::failed("e", 100, "bad param");
        assert!(!resp.is_ok());
        assert_eq!(resp.error_message(), "bad param");
        resp.wording = Some("group not found".into());
        assert_eq!(resp.error_message(), "group not found");
    }

    #[test]
    fn heartbeat_detection() {
        let hb = json!({"post_type": "meta_event", "meta_event_type": "heartbeat"});
        let lifecycle = json!({"post_type": "meta_event", "meta_event_type": "lifecycle"});
        assert!(is_heartbeat(&hb));
        assert!(!is_heartbeat(&lifecycle));
    }

    #[test]
    fn action_request_wire_shape() {
        let req = ActionRequest::new("send_private_msg", json!({"user_id": 1}), "abc");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"action": "send_private_msg", "params": {"user_id": 1}, "echo": "abc"})
        );
    }
}
