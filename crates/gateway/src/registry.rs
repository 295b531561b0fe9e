use std::{
    net::SocketAddr,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::{
    api::ApiHandle,
    error::RegistryError,
    types::{ClientRole, ConnectionId, SelfId, ServiceId},
};

// ── Connection info ──────────────────────────────────────────────────────────

/// An active bot connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub conn_id: ConnectionId,
    pub service: ServiceId,
    pub self_id: SelfId,
    pub role: ClientRole,
    pub api: ApiHandle,
    pub peer: Option<SocketAddr>,
    /// Unix millis.
    pub connected_at: u64,
    /// Cancelled to force the connection's controller into teardown.
    pub shutdown: CancellationToken,
}

impl ConnectionInfo {
    pub fn new(
        conn_id: ConnectionId,
        service: ServiceId,
        self_id: SelfId,
        role: ClientRole,
        api: ApiHandle,
    ) -> Self {
        Self {
            conn_id,
            service,
            self_id,
            role,
            api,
            peer: None,
            connected_at: now_ms(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            conn_id: self.conn_id.to_string(),
            self_id: self.self_id,
            role: self.role,
            peer: self.peer.map(|p| p.to_string()),
            connected_at: self.connected_at,
        }
    }
}

/// Serializable view for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub conn_id: String,
    pub self_id: SelfId,
    pub role: ClientRole,
    pub peer: Option<String>,
    pub connected_at: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Connections of every service in the process, indexed both by transport id
/// and by (service, bot identity).
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionInfo>,
    by_identity: DashMap<(ServiceId, SelfId), ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. The first registrant of an identity wins; later
    /// attempts are refused while it stays registered.
    pub fn register(&self, info: ConnectionInfo) -> Result<(), RegistryError> {
        match self.by_identity.entry((info.service, info.self_id)) {
            Entry::Occupied(existing) => Err(RegistryError::Duplicate {
                self_id: info.self_id,
                existing: *existing.get(),
            }),
            Entry::Vacant(slot) => {
                info!(
                    conn_id = %info.conn_id,
                    self_id = info.self_id,
                    service = %info.service,
                    role = %info.role,
                    "bot registered"
                );
                let conn_id = info.conn_id;
                // Inserted while the identity entry is held so lookups never see
                // an identity without its connection.
                self.connections.insert(conn_id, info);
                slot.insert(conn_id);
                Ok(())
            },
        }
    }

    pub fn lookup(&self, conn_id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(conn_id).map(|c| c.value().clone())
    }

    pub fn exists(&self, conn_id: &ConnectionId) -> bool {
        self.connections.contains_key(conn_id)
    }

    /// Connection currently registered for a bot identity.
    pub fn find(&self, service: ServiceId, self_id: SelfId) -> Option<ConnectionInfo> {
        let conn_id = *self.by_identity.get(&(service, self_id))?;
        self.lookup(&conn_id)
    }

    /// Remove a connection. The identity entry is only dropped while it still
    /// points at `conn_id`; absent connections are a no-op.
    pub fn remove(
        &self,
        service: ServiceId,
        self_id: SelfId,
        conn_id: &ConnectionId,
    ) -> Option<ConnectionInfo> {
        self.by_identity
            .remove_if(&(service, self_id), |_, id| id == conn_id);
        let removed = self.connections.remove(conn_id).map(|(_, info)| info);
        if removed.is_some() {
            debug!(conn_id = %conn_id, self_id, service = %service, "bot unregistered");
        }
        removed
    }

    /// Remove every connection of a service and signal each to shut down.
    pub fn remove_all(&self, service: ServiceId) -> usize {
        let ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| c.service == service)
            .map(|c| *c.key())
            .collect();
        let mut removed = 0;
        for conn_id in ids {
            if let Some((_, info)) = self.connections.remove(&conn_id) {
                self.by_identity
                    .remove_if(&(service, info.self_id), |_, id| *id == conn_id);
                info.close();
                removed += 1;
            }
        }
        if removed > 0 {
            info!(service = %service, removed, "removed all connections");
        }
        removed
    }

    pub fn list(&self, service: ServiceId) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .filter(|c| c.service == service)
            .map(|c| c.value().clone())
            .collect()
    }

    pub fn count(&self, service: ServiceId) -> usize {
        self.connections
            .iter()
            .filter(|c| c.service == service)
            .count()
    }

    /// Connections across all services.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
