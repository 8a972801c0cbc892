//! Connection state of the local node

use std::sync::{Mutex, MutexGuard};

use gateway_core::protocol::{GatewayRole, GatewayStatus};
use gateway_core::{EventBus, GatewayEvent};
use serde::Serialize;
use tracing::info;

/// Point-in-time view of a running node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub gateway_id: String,
    pub role: GatewayRole,
    pub status: GatewayStatus,
    /// Always 0 on an auxiliary
    pub connected_gateways: usize,
    pub pending_tasks: usize,
}

/// Current [`GatewayStatus`] plus the `status:change` emission that goes
/// with every transition
#[derive(Debug)]
pub(crate) struct StatusCell {
    current: Mutex<GatewayStatus>,
    events: EventBus,
}

impl StatusCell {
    pub(crate) fn new(events: EventBus) -> Self {
        Self {
            current: Mutex::new(GatewayStatus::Offline),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GatewayStatus> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn get(&self) -> GatewayStatus {
        *self.lock()
    }

    /// Move to `next`, emitting `status:change` when the state actually changes
    pub(crate) fn set(&self, next: GatewayStatus) {
        let previous = std::mem::replace(&mut *self.lock(), next);
        if previous != next {
            info!("Status {} -> {}", previous, next);
            self.events.emit(GatewayEvent::StatusChange {
                from: previous,
                to: next,
            });
        }
    }
}
