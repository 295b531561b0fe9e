//! Outbound action calls and the per-connection pending-request table.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use {
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    tokio::sync::{Mutex, mpsc, oneshot},
    tracing::{debug, warn},
};

use onegate_message::Segment;
use onegate_protocol::{ActionRequest, ActionResponse, LoginInfo, SentMessage};

use crate::{error::ActionError, transport::OutboundFrame, types::SelfId};

#[derive(Default)]
struct PendingState {
    waiters: HashMap<String, oneshot::Sender<ActionResponse>>,
    closed: bool,
}

struct Inner {
    self_id: SelfId,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    timeout: Duration,
    pending: Mutex<PendingState>,
}

/// Handle for calling actions on one connected bot.
///
/// Clones share the same pending table. After [`ApiHandle::close`] every
/// outstanding and future call fails with [`ActionError::Cancelled`].
#[derive(Clone)]
pub struct ApiHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for ApiHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiHandle")
            .field("self_id", &self.inner.self_id)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl ApiHandle {
    pub fn new(
        self_id: SelfId,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                self_id,
                outbound,
                timeout,
                pending: Mutex::new(PendingState::default()),
            }),
        }
    }

    pub fn self_id(&self) -> SelfId {
        self.inner.self_id
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Send an action and wait for the matching response's `data`.
    pub async fn call(&self, action: &str, params: Value) -> Result<Value, ActionError> {
        let echo = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            if pending.closed {
                return Err(ActionError::Cancelled {
                    action: action.into(),
                });
            }
            pending.waiters.insert(echo.clone(), tx);
        }

        let request = ActionRequest::new(action, params, echo.as_str());
        let text = match serde_json::to_string(&request) {
            Ok(text) => text,
            Err(source) => {
                self.forget(&echo).await;
                return Err(ActionError::Encode {
                    action: action.into(),
                    source,
                });
            },
        };

        debug!(self_id = self.inner.self_id, action, echo = %echo, "calling action");
        if self.inner.outbound.send(OutboundFrame::Text(text)).is_err() {
            self.forget(&echo).await;
            return Err(ActionError::Cancelled {
                action: action.into(),
            });
        }

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(response)) if response.is_ok() => Ok(response.data),
            Ok(Ok(response)) => Err(ActionError::Failed {
                action: action.into(),
                retcode: response.retcode,
                message: response.error_message(),
            }),
            Ok(Err(_)) => Err(ActionError::Cancelled {
                action: action.into(),
            }),
            Err(_) => {
                self.forget(&echo).await;
                warn!(self_id = self.inner.self_id, action, echo = %echo, "action timed out");
                Err(ActionError::Timeout {
                    action: action.into(),
                    timeout: self.inner.timeout,
                })
            },
        }
    }

    /// [`ApiHandle::call`] with the response data deserialized into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        action: &str,
        params: Value,
    ) -> Result<T, ActionError> {
        let data = self.call(action, params).await?;
        serde_json::from_value(data).map_err(|source| ActionError::Decode {
            action: action.into(),
            source,
        })
    }

    /// Deliver a response to its waiter. Returns false when nothing was waiting
    /// on its echo.
    pub async fn resolve(&self, response: ActionResponse) -> bool {
        let Some(echo) = response.echo_str().map(str::to_owned) else {
            return false;
        };
        let waiter = self.inner.pending.lock().await.waiters.remove(&echo);
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Fail every pending call and refuse new ones. Returns how many waiters
    /// were dropped.
    pub async fn close(&self) -> usize {
        let mut pending = self.inner.pending.lock().await;
        pending.closed = true;
        let dropped = pending.waiters.len();
        pending.waiters.clear();
        dropped
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.pending.lock().await.closed
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.waiters.len()
    }

    async fn forget(&self, echo: &str) {
        self.inner.pending.lock().await.waiters.remove(echo);
    }

    // ── Typed actions ────────────────────────────────────────────────────────

    pub async fn send_private_msg(
        &self,
        user_id: i64,
        message: &[Segment],
    ) -> Result<SentMessage, ActionError> {
        self.call_as(
            "send_private_msg",
            json!({ "user_id": user_id, "message": onegate_message::to_value(message) }),
        )
        .await
    }

    pub async fn send_group_msg(
        &self,
        group_id: i64,
        message: &[Segment],
    ) -> Result<SentMessage, ActionError> {
        self.call_as(
            "send_group_msg",
            json!({ "group_id": group_id, "message": onegate_message::to_value(message) }),
        )
        .await
    }

    pub async fn delete_msg(&self, message_id: i64) -> Result<(), ActionError> {
        self.call("delete_msg", json!({ "message_id": message_id }))
            .await
            .map(|_| ())
    }

    pub async fn get_login_info(&self) -> Result<LoginInfo, ActionError> {
        self.call_as("get_login_info", json!({})).await
    }

    pub async fn get_status(&self) -> Result<Value, ActionError> {
        self.call("get_status", json!({})).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn handle(timeout_ms: u64) -> (ApiHandle, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ApiHandle::new(10001, tx, Duration::from_millis(timeout_ms)),
            rx,
        )
    }

    async fn next_request(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> ActionRequest {
        match rx.recv().await.unwrap() {
            OutboundFrame::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_resolves_with_response_data() {
        let (api, mut rx) = handle(1_000);
        let caller = {
            let api = api.clone();
            tokio::spawn(async move { api.call("get_status", json!({})).await })
        };

        let request = next_request(&mut rx).await;
        assert_eq!(request.action, "get_status");
        assert!(
            api.resolve(ActionResponse::ok(&request.echo, json!({"online": true})))
                .await
        );

        let data = caller.await.unwrap().unwrap();
        assert_eq!(data, json!({"online": true}));
        assert_eq!(api.pending_count().await, 0);
    }

    #[tokio::test]
    async fn unanswered_call_times_out() {
        let (api, _rx) = handle(20);
        let err = api.call("get_status", json!({})).await.unwrap_err();
        assert!(matches!(err, ActionError::Timeout { .. }));
        assert_eq!(api.pending_count().await, 0);
    }

    #[tokio::test]
    async fn close_cancels_pending_calls() {
        let (api, mut rx) = handle(5_000);
        let caller = {
            let api = api.clone();
            tokio::spawn(async move { api.call("get_status", json!({})).await })
        };
        let _ = next_request(&mut rx).await;

        assert!(!api.is_closed().await);
        assert_eq!(api.close().await, 1);
        assert!(api.is_closed().await);
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, ActionError::Cancelled { .. }));

        let err = api.call("get_status", json!({})).await.unwrap_err();
        assert!(matches!(err, ActionError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn failed_status_maps_to_error() {
        let (api, mut rx) = handle(1_000);
        let caller = {
            let api = api.clone();
            tokio::spawn(async move { api.delete_msg(7).await })
        };
        let request = next_request(&mut rx).await;
        assert_eq!(request.params, json!({"message_id": 7}));
        api.resolve(ActionResponse::failed(&request.echo, 100, "no such message"))
            .await;

        match caller.await.unwrap().unwrap_err() {
            ActionError::Failed {
                retcode, message, ..
            } => {
                assert_eq!(retcode, 100);
                assert_eq!(message, "no such message");
            },
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn typed_send_encodes_segments() {
        let (api, mut rx) = handle(1_000);
        let caller = {
            let api = api.clone();
            tokio::spawn(async move {
                api.send_group_msg(42, &[Segment::text("hi"), Segment::face(1)])
                    .await
            })
        };
        let request = next_request(&mut rx).await;
        assert_eq!(request.action, "send_group_msg");
        assert_eq!(request.params["group_id"], 42);
        assert_eq!(request.params["message"][0]["type"], "text");
        assert_eq!(request.params["message"][1]["data"]["id"], 1);
        api.resolve(ActionResponse::ok(&request.echo, json!({"message_id": 5})))
            .await;
        assert_eq!(caller.await.unwrap().unwrap().message_id, 5);
    }

    #[tokio::test]
    async fn unknown_echo_is_not_resolved() {
        let (api, _rx) = handle(1_000);
        assert!(!api.resolve(ActionResponse::ok("nobody", Value::Null)).await);
    }

    #[tokio::test]
    async fn dropped_transport_cancels() {
        let (api, rx) = handle(1_000);
        drop(rx);
        let err = api.get_login_info().await.unwrap_err();
        assert!(matches!(err, ActionError::Cancelled { .. }));
    }
}
