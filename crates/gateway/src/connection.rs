//! Per-connection lifecycle: authenticate, register, pump frames, tear down.
//!
//! ```text
//! Pending ─► Authenticating ─► Active ─► Closing ─► Closed
//!                 │               ▲
//!                 └── rejected ───┴──► Closed
//! ```

use std::{fmt, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use {
    futures::FutureExt,
    serde_json::Value,
    tokio::{sync::mpsc, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, trace, warn},
};

use {
    onegate_config::ServiceConfig,
    onegate_protocol::{InboundFrame, is_heartbeat},
};

use crate::{
    api::ApiHandle,
    auth::AccessPolicy,
    error::{RegistryError, Rejection},
    handler::{EventContext, EventHandler},
    registry::{ConnectionInfo, ConnectionRegistry},
    transport::{
        CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_POLICY, OutboundFrame, TransportChannel,
        TransportEvent,
    },
    types::{ClientRole, SelfId, ServiceId},
};

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Authenticating,
    Active,
    Closing,
    Closed,
}

/// Identity and credentials captured by the gate.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub self_id: SelfId,
    pub role: ClientRole,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    /// Raw query string.
    pub query: Option<String>,
}

/// Per-service knobs shared by all of its controllers.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub access: AccessPolicy,
    pub api_timeout: Duration,
    /// Close connections that send nothing for this long.
    pub heartbeat_timeout: Option<Duration>,
}

impl ConnectionSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            access: AccessPolicy::new(config.token()),
            api_timeout: config.api_timeout(),
            heartbeat_timeout: config.heartbeat_timeout(),
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Rejected(Rejection),
    Duplicate(RegistryError),
    Remote(Option<String>),
    TransportError(String),
    Shutdown,
    HeartbeatTimeout,
}

impl CloseReason {
    fn close_code(&self) -> u16 {
        match self {
            Self::Rejected(_) | Self::Duplicate(_) => CLOSE_POLICY,
            Self::Shutdown => CLOSE_GOING_AWAY,
            Self::Remote(_) | Self::TransportError(_) | Self::HeartbeatTimeout => CLOSE_NORMAL,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(r) => write!(f, "rejected: {r}"),
            Self::Duplicate(e) => write!(f, "{e}"),
            Self::Remote(Some(reason)) => write!(f, "closed by peer: {reason}"),
            Self::Remote(None) => f.write_str("closed by peer"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::Shutdown => f.write_str("server shutting down"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
        }
    }
}

enum Step {
    Frame(String),
    Stop(CloseReason),
}

// ── Controller ───────────────────────────────────────────────────────────────

/// Drives one transport session from accept to teardown.
pub struct ConnectionController {
    service: ServiceId,
    handshake: Handshake,
    transport: TransportChannel,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn EventHandler>,
    settings: Arc<ConnectionSettings>,
    shutdown: CancellationToken,
    state: ConnectionState,
}

impl ConnectionController {
    /// `shutdown` is usually a child of the server's token; cancelling it
    /// (directly or through [`ConnectionRegistry::remove_all`]) ends the pump.
    pub fn new(
        service: ServiceId,
        handshake: Handshake,
        transport: TransportChannel,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn EventHandler>,
        settings: Arc<ConnectionSettings>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            handshake,
            transport,
            registry,
            handler,
            settings,
            shutdown,
            state: ConnectionState::Pending,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!(
            conn_id = %self.transport.meta.conn_id,
            from = ?self.state,
            to = ?next,
            "connection state"
        );
        self.state = next;
    }

    /// Run the connection to completion.
    pub async fn run(mut self) -> CloseReason {
        let conn_id = self.transport.meta.conn_id;
        let self_id = self.handshake.self_id;

        self.transition(ConnectionState::Authenticating);
        if let Err(rejection) = self.settings.access.authorize(
            self.handshake.authorization.as_deref(),
            self.handshake.query.as_deref(),
        ) {
            warn!(
                conn_id = %conn_id,
                self_id,
                peer = ?self.transport.meta.peer,
                error = %rejection,
                "authentication failed"
            );
            return self.reject(CloseReason::Rejected(rejection));
        }

        let api = ApiHandle::new(
            self_id,
            self.transport.outbound.clone(),
            self.settings.api_timeout,
        );
        let mut info = ConnectionInfo::new(
            conn_id,
            self.service,
            self_id,
            self.handshake.role,
            api.clone(),
        );
        info.peer = self.transport.meta.peer;
        info.shutdown = self.shutdown.clone();

        let _ = self.transport.outbound.send(OutboundFrame::Ping);
        if let Err(e) = self.registry.register(info.clone()) {
            warn!(conn_id = %conn_id, self_id, error = %e, "duplicate bot connection refused");
            return self.reject(CloseReason::Duplicate(e));
        }

        self.transition(ConnectionState::Active);
        info!(conn_id = %conn_id, self_id, service = %self.service, "connection active");
        if AssertUnwindSafe(self.handler.on_open(&info))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(conn_id = %conn_id, self_id, "on_open handler panicked");
        }

        let ctx = EventContext {
            conn_id,
            service: self.service,
            self_id,
            api: api.clone(),
        };
        let queue = spawn_dispatcher(Arc::clone(&self.handler), ctx.clone());
        let reason = self.pump(&ctx, &queue).await;
        drop(queue);

        self.transition(ConnectionState::Closing);
        self.registry.remove(self.service, self_id, &conn_id);
        if AssertUnwindSafe(self.handler.on_close(&info))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(conn_id = %conn_id, self_id, "on_close handler panicked");
        }
        let cancelled = api.close().await;
        let _ = self.transport.outbound.send(OutboundFrame::Close {
            code: reason.close_code(),
            reason: reason.to_string(),
        });
        self.transition(ConnectionState::Closed);
        info!(
            conn_id = %conn_id,
            self_id,
            cancelled_calls = cancelled,
            reason = %reason,
            "connection closed"
        );
        reason
    }

    fn reject(mut self, reason: CloseReason) -> CloseReason {
        let _ = self.transport.outbound.send(OutboundFrame::Close {
            code: reason.close_code(),
            reason: reason.to_string(),
        });
        self.transition(ConnectionState::Closed);
        reason
    }

    async fn pump(&mut self, ctx: &EventContext, queue: &EventQueue) -> CloseReason {
        let mut last_seen = Instant::now();
        loop {
            let deadline = self.settings.heartbeat_timeout.map(|t| last_seen + t);
            let step = tokio::select! {
                _ = self.shutdown.cancelled() => Step::Stop(CloseReason::Shutdown),
                _ = sleep_until(deadline) => Step::Stop(CloseReason::HeartbeatTimeout),
                event = self.transport.inbound.recv() => match event {
                    Some(TransportEvent::Message(text)) => Step::Frame(text),
                    Some(TransportEvent::Closed { reason }) => Step::Stop(CloseReason::Remote(reason)),
                    Some(TransportEvent::Error(e)) => Step::Stop(CloseReason::TransportError(e)),
                    None => Step::Stop(CloseReason::Remote(None)),
                },
            };
            match step {
                Step::Frame(text) => {
                    last_seen = Instant::now();
                    handle_frame(ctx, queue, &text).await;
                },
                Step::Stop(reason) => return reason,
            }
        }
    }
}

// ── Inbound dispatch ─────────────────────────────────────────────────────────

type EventQueue = mpsc::UnboundedSender<Value>;

async fn handle_frame(ctx: &EventContext, queue: &EventQueue, text: &str) {
    match InboundFrame::parse(text) {
        Ok(InboundFrame::Response(response)) => {
            if ctx.api.resolve(response.clone()).await {
                return;
            }
            debug!(
                conn_id = %ctx.conn_id,
                echo = ?response.echo,
                "response matches no pending call, dispatching as event"
            );
            match serde_json::to_value(&response) {
                Ok(value) => {
                    let _ = queue.send(value);
                },
                Err(e) => warn!(conn_id = %ctx.conn_id, error = %e, "dropping response"),
            }
        },
        Ok(InboundFrame::Event(event)) => {
            if is_heartbeat(&event) {
                trace!(conn_id = %ctx.conn_id, "heartbeat");
            }
            let _ = queue.send(event);
        },
        Err(e) => {
            warn!(
                conn_id = %ctx.conn_id,
                self_id = ctx.self_id,
                error = %e,
                "dropping malformed frame"
            );
        },
    }
}

/// One task per connection delivers events to the handler in wire order.
/// The pump only enqueues, so a slow handler never stalls reads. The task
/// drains what is queued and exits once the pump drops the sender.
fn spawn_dispatcher(handler: Arc<dyn EventHandler>, ctx: EventContext) -> EventQueue {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match AssertUnwindSafe(handler.on_event(ctx.clone(), event))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    warn!(conn_id = %ctx.conn_id, self_id = ctx.self_id, error = %e, "event handler failed");
                },
                Err(_) => {
                    error!(conn_id = %ctx.conn_id, self_id = ctx.self_id, "event handler panicked");
                },
            }
        }
        trace!(conn_id = %ctx.conn_id, "dispatcher finished");
    });
    tx
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use {
        async_trait::async_trait,
        onegate_protocol::{ActionRequest, ActionResponse},
        serde_json::json,
        tokio::{sync::mpsc, task::JoinHandle},
    };

    use {
        super::*,
        crate::{
            error::ActionError,
            transport::{RemoteEnd, TransportMeta},
        },
    };

    #[derive(Default)]
    struct Recorder {
        events: Option<mpsc::UnboundedSender<Value>>,
        opened: AtomicUsize,
        closed: AtomicUsize,
        panic_on_open: bool,
        panic_on_close: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn on_event(&self, _ctx: EventContext, event: Value) -> anyhow::Result<()> {
            if event["panic"] == true {
                panic!("handler blew up");
            }
            if event["fail"] == true {
                anyhow::bail!("handler failed");
            }
            if let Some(tx) = &self.events {
                let _ = tx.send(event);
            }
            Ok(())
        }

        async fn on_open(&self, _conn: &ConnectionInfo) {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_open {
                panic!("on_open blew up");
            }
        }

        async fn on_close(&self, _conn: &ConnectionInfo) {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_close {
                panic!("on_close blew up");
            }
        }
    }

    struct Harness {
        service: ServiceId,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<Recorder>,
        events: mpsc::UnboundedReceiver<Value>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(Recorder::default())
        }

        fn with(recorder: Recorder) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                service: ServiceId::new(),
                registry: Arc::new(ConnectionRegistry::new()),
                handler: Arc::new(Recorder {
                    events: Some(tx),
                    ..recorder
                }),
                events: rx,
            }
        }

        fn spawn(
            &self,
            settings: ConnectionSettings,
            handshake: Handshake,
        ) -> (JoinHandle<CloseReason>, RemoteEnd, CancellationToken) {
            let (channel, remote) = TransportChannel::pair(TransportMeta::new("/onebot/v11/ws"));
            let shutdown = CancellationToken::new();
            let controller = ConnectionController::new(
                self.service,
                handshake,
                channel,
                Arc::clone(&self.registry),
                self.handler.clone(),
                Arc::new(settings),
                shutdown.clone(),
            );
            (tokio::spawn(controller.run()), remote, shutdown)
        }

        /// Wait until the controller has registered `self_id`.
        async fn active(&self, self_id: SelfId) -> ConnectionInfo {
            for _ in 0..200 {
                if let Some(info) = self.registry.find(self.service, self_id) {
                    return info;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("bot {self_id} never became active");
        }
    }

    fn open_settings() -> ConnectionSettings {
        ConnectionSettings {
            access: AccessPolicy::open(),
            api_timeout: Duration::from_secs(2),
            heartbeat_timeout: None,
        }
    }

    fn handshake(self_id: SelfId) -> Handshake {
        Handshake {
            self_id,
            role: ClientRole::Universal,
            authorization: None,
            query: None,
        }
    }

    fn send(remote: &RemoteEnd, value: Value) {
        remote
            .events
            .send(TransportEvent::Message(value.to_string()))
            .unwrap();
    }

    #[tokio::test]
    async fn events_reach_handler_and_close_cleans_up() {
        let mut h = Harness::new();
        let (task, mut remote, _shutdown) = h.spawn(open_settings(), handshake(10001));

        assert_eq!(remote.frames.recv().await, Some(OutboundFrame::Ping));
        let info = h.active(10001).await;
        assert_eq!(h.handler.opened.load(Ordering::SeqCst), 1);

        send(&remote, json!({"post_type": "message", "raw_message": "hi"}));
        let event = h.events.recv().await.unwrap();
        assert_eq!(event["raw_message"], "hi");

        remote
            .events
            .send(TransportEvent::Closed { reason: None })
            .unwrap();
        assert_eq!(task.await.unwrap(), CloseReason::Remote(None));
        assert!(!h.registry.exists(&info.conn_id));
        assert_eq!(h.handler.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_frames_keep_connection_open() {
        let mut h = Harness::new();
        let (task, remote, shutdown) = h.spawn(open_settings(), handshake(1));
        h.active(1).await;

        remote
            .events
            .send(TransportEvent::Message("{not json".into()))
            .unwrap();
        remote
            .events
            .send(TransportEvent::Message("[1, 2]".into()))
            .unwrap();
        send(&remote, json!({"post_type": "notice", "n": 1}));

        assert_eq!(h.events.recv().await.unwrap()["n"], 1);
        assert!(h.registry.find(h.service, 1).is_some());

        shutdown.cancel();
        assert_eq!(task.await.unwrap(), CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn handler_failures_do_not_stop_the_pump() {
        let mut h = Harness::new();
        let (_task, remote, _shutdown) = h.spawn(open_settings(), handshake(2));
        h.active(2).await;

        send(&remote, json!({"post_type": "notice", "panic": true}));
        send(&remote, json!({"post_type": "notice", "fail": true}));
        send(&remote, json!({"post_type": "notice", "ok": true}));

        assert_eq!(h.events.recv().await.unwrap()["ok"], true);
        assert!(h.registry.find(h.service, 2).is_some());
    }

    #[tokio::test]
    async fn bad_token_is_rejected_before_registration() {
        let h = Harness::new();
        let settings = ConnectionSettings {
            access: AccessPolicy::new(Some("s3cret")),
            ..open_settings()
        };
        let mut hs = handshake(3);
        hs.authorization = Some("Bearer nope".into());
        let (task, mut remote, _shutdown) = h.spawn(settings, hs);

        assert_eq!(
            task.await.unwrap(),
            CloseReason::Rejected(Rejection::CredentialMismatch)
        );
        assert!(matches!(
            remote.frames.recv().await,
            Some(OutboundFrame::Close {
                code: CLOSE_POLICY,
                ..
            })
        ));
        assert!(h.registry.is_empty());
        assert_eq!(h.handler.opened.load(Ordering::SeqCst), 0);
        assert_eq!(h.handler.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn query_token_is_accepted() {
        let h = Harness::new();
        let settings = ConnectionSettings {
            access: AccessPolicy::new(Some("s3cret")),
            ..open_settings()
        };
        let mut hs = handshake(4);
        hs.query = Some("access_token=s3cret".into());
        let (_task, _remote, _shutdown) = h.spawn(settings, hs);
        h.active(4).await;
    }

    #[tokio::test]
    async fn second_connection_for_same_bot_is_refused() {
        let h = Harness::new();
        let (_first, _remote1, _s1) = h.spawn(open_settings(), handshake(5));
        let first = h.active(5).await;

        let (second, _remote2, _s2) = h.spawn(open_settings(), handshake(5));
        match second.await.unwrap() {
            CloseReason::Duplicate(RegistryError::Duplicate { existing, .. }) => {
                assert_eq!(existing, first.conn_id);
            },
            other => panic!("unexpected close reason {other}"),
        }
        assert_eq!(h.registry.find(h.service, 5).unwrap().conn_id, first.conn_id);
        assert_eq!(h.handler.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconnect_after_close_succeeds() {
        let h = Harness::new();
        let (task, remote, _s) = h.spawn(open_settings(), handshake(6));
        h.active(6).await;
        remote
            .events
            .send(TransportEvent::Error("reset".into()))
            .unwrap();
        assert_eq!(
            task.await.unwrap(),
            CloseReason::TransportError("reset".into())
        );
        assert!(h.registry.find(h.service, 6).is_none());

        let (_task, _remote, _s) = h.spawn(open_settings(), handshake(6));
        h.active(6).await;
    }

    #[tokio::test]
    async fn action_call_round_trip() {
        let h = Harness::new();
        let (_task, mut remote, _s) = h.spawn(open_settings(), handshake(7));
        assert_eq!(remote.frames.recv().await, Some(OutboundFrame::Ping));
        let info = h.active(7).await;

        let caller = tokio::spawn(async move { info.api.get_login_info().await });
        let Some(OutboundFrame::Text(text)) = remote.frames.recv().await else {
            panic!("expected action frame");
        };
        let request: ActionRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(request.action, "get_login_info");

        let response = ActionResponse::ok(
            &request.echo,
            json!({"user_id": 7, "nickname": "bot"}),
        );
        remote
            .events
            .send(TransportEvent::Message(
                serde_json::to_string(&response).unwrap(),
            ))
            .unwrap();

        let login = caller.await.unwrap().unwrap();
        assert_eq!(login.user_id, 7);
        assert_eq!(login.nickname, "bot");
    }

    #[tokio::test]
    async fn remove_all_cancels_pending_calls() {
        let h = Harness::new();
        let (task, mut remote, _s) = h.spawn(open_settings(), handshake(8));
        assert_eq!(remote.frames.recv().await, Some(OutboundFrame::Ping));
        let info = h.active(8).await;

        let caller = tokio::spawn(async move { info.api.get_status().await });
        assert!(matches!(
            remote.frames.recv().await,
            Some(OutboundFrame::Text(_))
        ));

        assert_eq!(h.registry.remove_all(h.service), 1);
        assert_eq!(task.await.unwrap(), CloseReason::Shutdown);
        assert!(matches!(
            caller.await.unwrap(),
            Err(ActionError::Cancelled { .. })
        ));
        assert!(matches!(
            remote.frames.recv().await,
            Some(OutboundFrame::Close {
                code: CLOSE_GOING_AWAY,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn silent_connection_hits_heartbeat_timeout() {
        let h = Harness::new();
        let settings = ConnectionSettings {
            heartbeat_timeout: Some(Duration::from_millis(50)),
            ..open_settings()
        };
        let (task, _remote, _s) = h.spawn(settings, handshake(9));
        assert_eq!(task.await.unwrap(), CloseReason::HeartbeatTimeout);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn events_from_one_connection_arrive_in_wire_order() {
        const COUNT: u64 = 2_000;
        let mut h = Harness::new();
        let (_task, remote, _s) = h.spawn(open_settings(), handshake(20));
        h.active(20).await;

        for seq in 0..COUNT {
            send(&remote, json!({"post_type": "notice", "seq": seq}));
        }

        let mut received = Vec::with_capacity(COUNT as usize);
        for _ in 0..COUNT {
            let event = tokio::time::timeout(Duration::from_secs(10), h.events.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(event["seq"].as_u64().unwrap());
        }
        let inversions = received.windows(2).filter(|w| w[0] > w[1]).count();
        assert_eq!(inversions, 0);
        assert_eq!(received, (0..COUNT).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn panicking_on_open_keeps_connection_usable() {
        let mut h = Harness::with(Recorder {
            panic_on_open: true,
            ..Default::default()
        });
        let (task, remote, _s) = h.spawn(open_settings(), handshake(21));
        let info = h.active(21).await;

        send(&remote, json!({"post_type": "notice", "n": 1}));
        assert_eq!(h.events.recv().await.unwrap()["n"], 1);

        remote
            .events
            .send(TransportEvent::Closed { reason: None })
            .unwrap();
        assert_eq!(task.await.unwrap(), CloseReason::Remote(None));
        assert!(!h.registry.exists(&info.conn_id));
        assert_eq!(h.handler.closed.load(Ordering::SeqCst), 1);

        let (_again, _remote, _s) = h.spawn(open_settings(), handshake(21));
        h.active(21).await;
        assert_eq!(h.handler.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_on_close_still_tears_down() {
        let h = Harness::with(Recorder {
            panic_on_close: true,
            ..Default::default()
        });
        let (task, mut remote, _s) = h.spawn(open_settings(), handshake(22));
        assert_eq!(remote.frames.recv().await, Some(OutboundFrame::Ping));
        let info = h.active(22).await;

        let caller = tokio::spawn(async move { info.api.get_status().await });
        assert!(matches!(
            remote.frames.recv().await,
            Some(OutboundFrame::Text(_))
        ));

        remote
            .events
            .send(TransportEvent::Closed { reason: None })
            .unwrap();
        assert_eq!(task.await.unwrap(), CloseReason::Remote(None));
        assert!(h.registry.is_empty());
        assert!(matches!(
            caller.await.unwrap(),
            Err(ActionError::Cancelled { .. })
        ));
        assert!(matches!(
            remote.frames.recv().await,
            Some(OutboundFrame::Close {
                code: CLOSE_NORMAL,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn peer_close_cancels_pending_calls() {
        let h = Harness::new();
        let (task, mut remote, _s) = h.spawn(open_settings(), handshake(23));
        assert_eq!(remote.frames.recv().await, Some(OutboundFrame::Ping));
        let info = h.active(23).await;

        let api = info.api.clone();
        let caller = tokio::spawn(async move { api.get_login_info().await });
        assert!(matches!(
            remote.frames.recv().await,
            Some(OutboundFrame::Text(_))
        ));

        drop(remote.events);
        assert_eq!(task.await.unwrap(), CloseReason::Remote(None));
        assert!(matches!(
            caller.await.unwrap(),
            Err(ActionError::Cancelled { .. })
        ));
        assert!(info.api.is_closed().await);
        assert!(!h.registry.exists(&info.conn_id));
    }

    #[test]
    fn settings_from_config() {
        let config = ServiceConfig {
            heartbeat_timeout_ms: 1_500,
            ..Default::default()
        };
        let settings = ConnectionSettings::from_config(&config);
        assert!(!settings.access.requires_token());
        assert_eq!(settings.heartbeat_timeout, Some(Duration::from_millis(1_500)));
        assert_eq!(settings.api_timeout, config.api_timeout());
    }
}
