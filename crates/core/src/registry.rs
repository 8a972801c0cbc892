//! Main-side registry of connected subordinate gateways
//!
//! The registry only knows protocol facts (identity, role, advertised
//! address, liveness, load). Transport handles are kept elsewhere, keyed by
//! the same identity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::protocol::{GatewayInfo, GatewayRole, GatewayStatus, LoadSample};

/// A registered subordinate gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedGateway {
    pub gateway_id: String,
    pub gateway_role: GatewayRole,
    pub host: String,
    pub port: u16,
    pub status: GatewayStatus,
    pub agent_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadSample>,
}

/// Filter for [`GatewayRegistry::list`]; empty matches everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayFilter {
    #[serde(default)]
    pub role: Option<GatewayRole>,
    #[serde(default)]
    pub status: Option<GatewayStatus>,
}

impl GatewayFilter {
    pub fn role(role: GatewayRole) -> Self {
        Self {
            role: Some(role),
            status: None,
        }
    }

    pub fn matches(&self, gateway: &ConnectedGateway) -> bool {
        self.role.map_or(true, |r| r == gateway.gateway_role)
            && self.status.map_or(true, |s| s == gateway.status)
    }
}

#[derive(Debug, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, ConnectedGateway>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `gateway_id`.
    ///
    /// Re-registration is a failover, not an error: the previous entry is
    /// dropped and the new one starts with fresh timestamps.
    pub fn register(
        &mut self,
        gateway_id: &str,
        gateway_role: GatewayRole,
        info: &GatewayInfo,
    ) -> ConnectedGateway {
        if self.gateways.contains_key(gateway_id) {
            warn!("Gateway {} already registered, replacing entry", gateway_id);
        }

        let now = Utc::now();
        let entry = ConnectedGateway {
            gateway_id: gateway_id.to_string(),
            gateway_role,
            host: info.host.clone(),
            port: info.port,
            status: GatewayStatus::Online,
            agent_count: info.agent_count,
            device_fingerprint: info.device_fingerprint.clone(),
            connected_at: now,
            last_heartbeat: now,
            load: None,
        };

        info!(
            "Registered gateway {} ({}) at {}:{}",
            gateway_id, gateway_role, info.host, info.port
        );
        self.gateways.insert(gateway_id.to_string(), entry.clone());
        entry
    }

    /// Record a heartbeat. Unknown identities are ignored, which covers a
    /// stray heartbeat racing a disconnect.
    pub fn record_heartbeat(
        &mut self,
        gateway_id: &str,
        status: GatewayStatus,
        load: LoadSample,
    ) -> bool {
        match self.gateways.get_mut(gateway_id) {
            Some(entry) => {
                entry.last_heartbeat = Utc::now();
                entry.status = status;
                entry.load = Some(load);
                debug!("Updated heartbeat for gateway {}", gateway_id);
                true
            }
            None => {
                debug!("Ignoring heartbeat from unknown gateway {}", gateway_id);
                false
            }
        }
    }

    pub fn remove(&mut self, gateway_id: &str) -> Option<ConnectedGateway> {
        let removed = self.gateways.remove(gateway_id);
        if removed.is_some() {
            info!("Gateway {} removed from registry", gateway_id);
        }
        removed
    }

    pub fn get(&self, gateway_id: &str) -> Option<&ConnectedGateway> {
        self.gateways.get(gateway_id)
    }

    pub fn contains(&self, gateway_id: &str) -> bool {
        self.gateways.contains_key(gateway_id)
    }

    /// Point-in-time copy of the matching entries, ordered by identity
    pub fn list(&self, filter: &GatewayFilter) -> Vec<ConnectedGateway> {
        let mut gateways: Vec<ConnectedGateway> = self
            .gateways
            .values()
            .filter(|g| filter.matches(g))
            .cloned()
            .collect();
        gateways.sort_by(|a, b| a.gateway_id.cmp(&b.gateway_id));
        gateways
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }

    pub fn clear(&mut self) {
        self.gateways.clear();
    }
}
