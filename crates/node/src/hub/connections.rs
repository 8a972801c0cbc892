//! Transport side of the main gateway: which connection carries which
//! registered identity

use std::collections::HashMap;
use std::net::SocketAddr;

use gateway_core::protocol::GatewayMessage;
use gateway_core::{GatewayError, Result};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one accepted WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Write side of one connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    tx: mpsc::Sender<GatewayMessage>,
}

impl ConnectionHandle {
    pub fn new(remote_addr: SocketAddr, tx: mpsc::Sender<GatewayMessage>) -> Self {
        Self {
            id: ConnectionId::new(),
            remote_addr,
            tx,
        }
    }

    /// Hand a message to the connection's writer task
    pub async fn send(&self, message: GatewayMessage) -> Result<()> {
        self.tx.send(message).await.map_err(|_| {
            GatewayError::connection_lost(format!("connection {} is closed", self.id))
        })
    }
}

/// Identity <-> connection bindings, updated together so that a closed
/// connection can always be traced back to the identity it registered
#[derive(Debug, Default)]
pub struct ConnectionTable {
    by_gateway: HashMap<String, ConnectionHandle>,
    by_conn: HashMap<ConnectionId, String>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `gateway_id` to `handle`.
    ///
    /// Returns the identity this connection was previously bound to, if it
    /// was a different one. A connection that previously carried
    /// `gateway_id` loses its binding.
    pub fn bind(&mut self, gateway_id: &str, handle: ConnectionHandle) -> Option<String> {
        let conn_id = handle.id;

        if let Some(previous) = self.by_gateway.insert(gateway_id.to_string(), handle) {
            if previous.id != conn_id {
                self.by_conn.remove(&previous.id);
            }
        }

        let replaced = self.by_conn.insert(conn_id, gateway_id.to_string())?;
        if replaced == gateway_id {
            return None;
        }
        if self.by_gateway.get(&replaced).map(|h| h.id) == Some(conn_id) {
            self.by_gateway.remove(&replaced);
        }
        Some(replaced)
    }

    /// Drop the binding of a closed connection, returning its identity
    pub fn unbind(&mut self, conn_id: ConnectionId) -> Option<String> {
        let gateway_id = self.by_conn.remove(&conn_id)?;
        if self.by_gateway.get(&gateway_id).map(|h| h.id) == Some(conn_id) {
            self.by_gateway.remove(&gateway_id);
        }
        Some(gateway_id)
    }

    pub fn handle_for(&self, gateway_id: &str) -> Option<&ConnectionHandle> {
        self.by_gateway.get(gateway_id)
    }

    pub fn gateway_for(&self, conn_id: ConnectionId) -> Option<&str> {
        self.by_conn.get(&conn_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_gateway.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_gateway.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_gateway.clear();
        self.by_conn.clear();
    }
}
