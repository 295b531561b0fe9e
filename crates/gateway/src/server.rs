use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{
            ConnectInfo, State, WebSocketUpgrade,
            ws::{WebSocket, rejection::WebSocketUpgradeRejection},
        },
        http::{HeaderMap, StatusCode, Uri},
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    serde_json::Value,
    tokio::{sync::Mutex, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tower_http::trace::TraceLayer,
    tracing::{debug, error, info, warn},
};

use {
    onegate_config::ServiceConfig,
    onegate_protocol::{HEADER_AUTHORIZATION, HEADER_CLIENT_ROLE, HEADER_SELF_ID},
};

use crate::{
    api::ApiHandle,
    connection::{ConnectionController, ConnectionSettings, Handshake},
    error::{ActionError, Rejection},
    handler::EventHandler,
    registry::{ConnectionInfo, ConnectionRegistry, ConnectionSummary},
    transport::TransportMeta,
    types::{ClientRole, SelfId, ServiceId},
    ws,
};

/// How long `stop()` waits for the listener task before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(5);

// ── Shared state ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Lifecycle {
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
    stopped: bool,
}

struct Shared {
    config: ServiceConfig,
    service: ServiceId,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn EventHandler>,
    settings: Arc<ConnectionSettings>,
    shutdown: CancellationToken,
    /// Serializes start, stop and connection acceptance.
    lifecycle: Mutex<Lifecycle>,
}

/// One listening endpoint for bot connections.
///
/// Several servers may share a [`ConnectionRegistry`]; each owns the
/// partition keyed by its [`ServiceId`].
#[derive(Clone)]
pub struct GatewayServer {
    inner: Arc<Shared>,
}

impl GatewayServer {
    pub fn new(
        config: ServiceConfig,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let settings = Arc::new(ConnectionSettings::from_config(&config));
        Self {
            inner: Arc::new(Shared {
                config,
                service: ServiceId::new(),
                registry,
                handler,
                settings,
                shutdown: CancellationToken::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.inner.service
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    /// Bound address once started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lifecycle.lock().await.local_addr
    }

    // ── Startup / shutdown ───────────────────────────────────────────────────

    /// Bind the listener and start serving. Calling it again on a running
    /// server returns the existing address.
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.stopped {
            anyhow::bail!("service {} has been stopped", self.inner.config.name);
        }
        if let (Some(addr), Some(_)) = (lifecycle.local_addr, &lifecycle.task) {
            return Ok(addr);
        }

        let bind = self.inner.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind {bind}: {e}"))?;
        let addr = listener.local_addr()?;

        let lines = [
            format!("onegate v{}", env!("CARGO_PKG_VERSION")),
            format!("service {} listening on {addr}", self.inner.config.name),
            format!(
                "universal endpoint ws://{addr}{}",
                self.inner.config.universal_path
            ),
            format!(
                "auth: {}",
                if self.inner.settings.access.requires_token() {
                    "access token"
                } else {
                    "open"
                }
            ),
        ];
        let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
        info!("┌{}┐", "─".repeat(width));
        for line in &lines {
            info!("│  {:<w$}│", line, w = width - 2);
        }
        info!("└{}┘", "─".repeat(width));

        let app = build_gateway_app(self.clone());
        let token = self.inner.shutdown.clone();
        let name = self.inner.config.name.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(token.cancelled_owned())
            .await;
            match served {
                Ok(()) => debug!(service = %name, "listener stopped"),
                Err(e) => error!(service = %name, error = %e, "listener failed"),
            }
        });

        lifecycle.local_addr = Some(addr);
        lifecycle.task = Some(task);
        Ok(addr)
    }

    /// Drop every connection of this service and shut the listener down.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        let task = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            if lifecycle.stopped {
                return;
            }
            lifecycle.stopped = true;
            let removed = self.inner.registry.remove_all(self.inner.service);
            self.inner.shutdown.cancel();
            info!(service = %self.inner.config.name, removed, "stopping service");
            lifecycle.task.take()
        };

        if let Some(mut task) = task
            && tokio::time::timeout(STOP_GRACE, &mut task).await.is_err()
        {
            warn!(service = %self.inner.config.name, "listener did not stop in time, aborting");
            task.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // ── Gate ─────────────────────────────────────────────────────────────────

    /// Validate identity headers and route by role before any upgrade.
    pub fn accept_gate(&self, meta: &TransportMeta) -> Result<Handshake, Rejection> {
        let raw_self_id = meta
            .header(HEADER_SELF_ID)
            .ok_or(Rejection::MissingHeader(HEADER_SELF_ID))?;
        let self_id: SelfId = raw_self_id
            .trim()
            .parse()
            .map_err(|_| Rejection::InvalidSelfId(raw_self_id.to_string()))?;

        let raw_role = meta
            .header(HEADER_CLIENT_ROLE)
            .ok_or(Rejection::MissingHeader(HEADER_CLIENT_ROLE))?;
        let role =
            ClientRole::parse(raw_role).ok_or_else(|| Rejection::UnknownRole(raw_role.to_string()))?;

        if !same_path(&meta.path, self.role_path(role)) {
            return Err(Rejection::PathMismatch {
                role,
                path: meta.path.clone(),
            });
        }

        Ok(Handshake {
            self_id,
            role,
            authorization: meta.header(HEADER_AUTHORIZATION).map(str::to_owned),
            query: meta.query.clone(),
        })
    }

    fn role_path(&self, role: ClientRole) -> &str {
        match role {
            ClientRole::Universal => &self.inner.config.universal_path,
        }
    }

    /// Hand an upgraded socket to a new controller and run it.
    async fn accept(&self, socket: WebSocket, meta: TransportMeta, handshake: Handshake) {
        let controller = {
            let lifecycle = self.inner.lifecycle.lock().await;
            if lifecycle.stopped {
                debug!(conn_id = %meta.conn_id, "dropping socket accepted during shutdown");
                return;
            }
            ConnectionController::new(
                self.inner.service,
                handshake,
                ws::bridge(socket, meta),
                Arc::clone(&self.inner.registry),
                Arc::clone(&self.inner.handler),
                Arc::clone(&self.inner.settings),
                self.inner.shutdown.child_token(),
            )
        };
        controller.run().await;
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    /// API handle of the bot registered under `self_id` on this service.
    pub fn api(&self, self_id: SelfId) -> Option<ApiHandle> {
        self.inner
            .registry
            .find(self.inner.service, self_id)
            .map(|c| c.api)
    }

    pub async fn call(
        &self,
        self_id: SelfId,
        action: &str,
        params: Value,
    ) -> Result<Value, ActionError> {
        let api = self.api(self_id).ok_or(ActionError::NotConnected(self_id))?;
        api.call(action, params).await
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner.registry.list(self.inner.service)
    }
}

/// Paths match ignoring surrounding slashes and ASCII case.
fn same_path(requested: &str, expected: &str) -> bool {
    requested
        .trim_matches('/')
        .eq_ignore_ascii_case(expected.trim_matches('/'))
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the service router (shared between `start()` and tests).
pub fn build_gateway_app(server: GatewayServer) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(ws_upgrade_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn health_handler(State(server): State<GatewayServer>) -> impl IntoResponse {
    Json(health_report(&server))
}

fn health_report(server: &GatewayServer) -> Value {
    let status = if server.is_stopped() {
        "stopping"
    } else {
        "ok"
    };
    let bots: Vec<ConnectionSummary> = server
        .connections()
        .iter()
        .map(ConnectionInfo::summary)
        .collect();
    serde_json::json!({
        "status": status,
        "service": server.inner.config.name,
        "version": env!("CARGO_PKG_VERSION"),
        "connections": bots.len(),
        "bots": bots,
    })
}

/// Refused handshakes get a bare status line and no body.
fn rejection_response(rejection: &Rejection) -> Response {
    rejection.status().into_response()
}

async fn ws_upgrade_handler(
    State(server): State<GatewayServer>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if server.is_stopped() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let mut meta = TransportMeta::new(uri.path()).with_peer(peer);
    meta.query = uri.query().map(str::to_owned);
    meta.headers = headers;

    let handshake = match server.accept_gate(&meta) {
        Ok(handshake) => handshake,
        Err(rejection) => {
            warn!(
                service = %server.inner.config.name,
                peer = %peer,
                path = %meta.path,
                error = %rejection,
                "connection rejected"
            );
            return rejection_response(&rejection);
        },
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(peer = %peer, error = %rejection, "not a websocket request");
            return rejection.into_response();
        },
    };

    debug!(
        conn_id = %meta.conn_id,
        self_id = handshake.self_id,
        peer = %peer,
        "upgrading connection"
    );
    upgrade.on_upgrade(move |socket| async move { server.accept(socket, meta, handshake).await })
}
