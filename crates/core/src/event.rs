//! Events exposed to collaborators (dashboards, CLIs)
//!
//! Each event serializes as `{"event": "<name>", "payload": {...}}`, where the
//! names are the stable contract surface.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{GatewayError, GatewayErrorCode};
use crate::protocol::{
    GatewayInfo, GatewayMessage, GatewayRole, GatewayStatus, TaskOutcome, TaskResultBody,
};

const EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum GatewayEvent {
    #[serde(rename = "status:change")]
    StatusChange {
        from: GatewayStatus,
        to: GatewayStatus,
    },

    /// A subordinate registered with this main gateway
    #[serde(rename = "gateway:register", rename_all = "camelCase")]
    GatewayRegister {
        gateway_id: String,
        gateway_role: GatewayRole,
        info: GatewayInfo,
    },

    /// This auxiliary gateway was accepted by its main gateway
    #[serde(rename = "gateway:registered", rename_all = "camelCase")]
    GatewayRegistered { gateway_id: String },

    #[serde(rename = "gateway:disconnect", rename_all = "camelCase")]
    GatewayDisconnect { gateway_id: String },

    #[serde(rename = "task:dispatch")]
    TaskDispatch { message: GatewayMessage },

    #[serde(rename = "task:result", rename_all = "camelCase")]
    TaskResult {
        task_id: String,
        status: TaskOutcome,
        result: TaskResultBody,
    },

    /// Work for an external executor; the runtime never runs commands itself
    #[serde(rename = "task:received", rename_all = "camelCase")]
    TaskReceived {
        task_id: String,
        agent_id: String,
        command: String,
        params: Option<serde_json::Value>,
    },

    #[serde(rename = "task:ack")]
    TaskAck { message: GatewayMessage },

    #[serde(rename = "task:result:ack")]
    TaskResultAck { message: GatewayMessage },

    #[serde(rename = "error")]
    Error {
        code: GatewayErrorCode,
        message: String,
    },
}

impl GatewayEvent {
    pub fn error(err: &GatewayError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Contract name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusChange { .. } => "status:change",
            Self::GatewayRegister { .. } => "gateway:register",
            Self::GatewayRegistered { .. } => "gateway:registered",
            Self::GatewayDisconnect { .. } => "gateway:disconnect",
            Self::TaskDispatch { .. } => "task:dispatch",
            Self::TaskResult { .. } => "task:result",
            Self::TaskReceived { .. } => "task:received",
            Self::TaskAck { .. } => "task:ack",
            Self::TaskResultAck { .. } => "task:result:ack",
            Self::Error { .. } => "error",
        }
    }
}

/// Fan-out of [`GatewayEvent`]s to any number of subscribers.
///
/// Emitting never fails: with no subscriber the event is dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: GatewayEvent) {
        debug!("Emitting {}", event.name());
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_contract_name() {
        let event = GatewayEvent::GatewayDisconnect {
            gateway_id: "gw-a".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "gateway:disconnect");
        assert_eq!(json["payload"]["gatewayId"], "gw-a");
    }

    #[test]
    fn test_status_change_payload() {
        let event = GatewayEvent::StatusChange {
            from: GatewayStatus::Online,
            to: GatewayStatus::Offline,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "status:change");
        assert_eq!(json["payload"]["from"], "online");
        assert_eq!(json["payload"]["to"], "offline");
    }

    #[test]
    fn test_error_event_carries_code() {
        let err = GatewayError::gateway_not_found("gw-x");
        let event = GatewayEvent::error(&err);
        assert_eq!(event.name(), "error");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["code"], "GATEWAY_003");
    }

    #[test]
    fn test_emit_without_subscribers_does_not_fail() {
        let bus = EventBus::new();
        bus.emit(GatewayEvent::GatewayRegistered {
            gateway_id: "gw-a".to_string(),
        });
    }

    #[test]
    fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(GatewayEvent::GatewayRegistered {
            gateway_id: "gw-a".to_string(),
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name(), "gateway:registered");
    }
}
