//! Main gateway hub - registry, task tracking and routing for subordinate
//! gateways
//!
//! All routing state lives in one [`HubState`] behind a single lock, so a
//! registration updates the registry and the connection binding atomically.

use std::net::IpAddr;
use std::time::Duration;

use gateway_core::protocol::{
    message_type, tags, validate_heartbeat, validate_register, validate_task_result,
    GatewayMessage, GatewayRole, GatewayStatus, MessageBody, TaskAckStatus, TaskPayload,
    TaskType, ValidationReport,
};
use gateway_core::config::DEFAULT_HEARTBEAT_INTERVAL;
use gateway_core::{
    ConnectedGateway, EventBus, GatewayError, GatewayEvent, GatewayFilter, GatewayRegistry,
    Result, TaskRecord, TaskTracker,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::connections::{ConnectionHandle, ConnectionId, ConnectionTable};
use crate::status::RuntimeStatus;

/// A unit of work to route to a subordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_id: String,
    pub agent_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl TaskRequest {
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            command: command.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    fn payload(&self) -> TaskPayload {
        TaskPayload {
            agent_id: self.agent_id.clone(),
            command: self.command.clone(),
            params: self.params.clone(),
        }
    }
}

/// Per-recipient result of a broadcast
#[derive(Debug)]
pub struct DispatchOutcome {
    pub gateway_id: String,
    pub task_id: String,
    pub result: Result<()>,
}

/// What the connection loop should do after a frame was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    Close,
}

#[derive(Debug, Default)]
struct HubState {
    registry: GatewayRegistry,
    tracker: TaskTracker,
    connections: ConnectionTable,
}

pub struct MainHub {
    gateway_id: String,
    allowed_ips: Vec<String>,
    /// Advertised to subordinates in the registration ack
    heartbeat_interval: Duration,
    state: RwLock<HubState>,
    events: EventBus,
}

impl MainHub {
    pub fn new(gateway_id: impl Into<String>, allowed_ips: Vec<String>, events: EventBus) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            allowed_ips,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            state: RwLock::new(HubState::default()),
            events,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    /// Handle one text frame received on `conn`.
    ///
    /// Protocol errors never propagate: they are logged, reported as `error`
    /// events and the frame is dropped. Only an unauthorized registration
    /// asks the caller to close the connection.
    pub async fn handle_frame(&self, conn: &ConnectionHandle, text: &str) -> FrameOutcome {
        match self.process_frame(conn, text).await {
            Ok(()) => FrameOutcome::Continue,
            Err(err) => {
                warn!("Dropping frame from {}: {}", conn.remote_addr, err);
                let close = matches!(err, GatewayError::Unauthorized { .. });
                self.events.emit(GatewayEvent::error(&err));
                if close {
                    FrameOutcome::Close
                } else {
                    FrameOutcome::Continue
                }
            }
        }
    }

    async fn process_frame(&self, conn: &ConnectionHandle, text: &str) -> Result<()> {
        let value: Value = serde_json::from_str(text).map_err(|e| GatewayError::InvalidParams {
            errors: vec![format!("malformed JSON: {}", e)],
        })?;
        let kind = message_type(&value).unwrap_or_default().to_string();
        debug!("Received {} from {}", kind, conn.id);

        match kind.as_str() {
            tags::REGISTER => self.handle_register(conn, value).await,
            tags::HEARTBEAT => self.handle_heartbeat(conn, value).await,
            tags::TASK_RESULT => self.handle_task_result(conn, value).await,
            tags::TASK_ACK => self.handle_task_ack(value).await,
            _ => Err(GatewayError::InvalidMessageType { message_type: kind }),
        }
    }

    async fn handle_register(&self, conn: &ConnectionHandle, value: Value) -> Result<()> {
        let claimed_id = value
            .get("gatewayId")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        if !self.is_allowed(conn.remote_addr.ip()) {
            conn.send(GatewayMessage::register_rejected(
                &self.gateway_id,
                &claimed_id,
                "remote address is not in the allowlist",
            ))
            .await?;
            return Err(GatewayError::Unauthorized {
                addr: conn.remote_addr.ip().to_string(),
            });
        }

        let report = validate_register(&value);
        if !report.valid {
            let message = report.errors.join("; ");
            conn.send(GatewayMessage::register_rejected(
                &self.gateway_id,
                &claimed_id,
                message.clone(),
            ))
            .await?;
            return Err(GatewayError::registration_failed(message));
        }

        let message: GatewayMessage = serde_json::from_value(value)?;
        let MessageBody::Register {
            gateway_id,
            gateway_role,
            info,
        } = message.body
        else {
            return Err(GatewayError::InvalidMessageType {
                message_type: message.body.message_type().to_string(),
            });
        };

        let orphaned = {
            let mut state = self.state.write().await;
            state.registry.register(&gateway_id, gateway_role, &info);
            let orphaned = state.connections.bind(&gateway_id, conn.clone());
            if let Some(previous) = orphaned.as_deref() {
                state.registry.remove(previous);
            }
            orphaned
        };

        info!(
            "Gateway {} ({}) registered from {}",
            gateway_id, gateway_role, conn.remote_addr
        );
        if let Some(previous) = orphaned {
            self.events.emit(GatewayEvent::GatewayDisconnect {
                gateway_id: previous,
            });
        }
        self.events.emit(GatewayEvent::GatewayRegister {
            gateway_id: gateway_id.clone(),
            gateway_role,
            info,
        });

        conn.send(GatewayMessage::register_accepted(
            &self.gateway_id,
            &gateway_id,
            gateway_id.clone(),
            self.heartbeat_interval.as_secs().max(1),
        ))
        .await
    }

    async fn handle_heartbeat(&self, conn: &ConnectionHandle, value: Value) -> Result<()> {
        ensure_valid(validate_heartbeat(&value))?;
        let message: GatewayMessage = serde_json::from_value(value)?;
        let MessageBody::Heartbeat {
            gateway_id,
            status,
            load,
        } = message.body
        else {
            return Err(GatewayError::InvalidMessageType {
                message_type: message.body.message_type().to_string(),
            });
        };

        let pending = {
            let mut state = self.state.write().await;
            if let Some(bound) = state.connections.gateway_for(conn.id) {
                if bound != gateway_id {
                    warn!(
                        "Heartbeat for {} arrived on connection bound to {}",
                        gateway_id, bound
                    );
                }
            }
            state.registry.record_heartbeat(&gateway_id, status, load);
            state.tracker.pending_count()
        };

        conn.send(GatewayMessage::heartbeat_ack(
            &self.gateway_id,
            &gateway_id,
            pending,
        ))
        .await
    }

    async fn handle_task_result(&self, conn: &ConnectionHandle, value: Value) -> Result<()> {
        ensure_valid(validate_task_result(&value))?;
        let message: GatewayMessage = serde_json::from_value(value)?;
        let MessageBody::TaskResult {
            task_id,
            from_gateway,
            status,
            result,
            ..
        } = message.body
        else {
            return Err(GatewayError::InvalidMessageType {
                message_type: message.body.message_type().to_string(),
            });
        };

        info!(
            "Task {} finished on {}: {}",
            task_id,
            from_gateway,
            status.as_str()
        );
        self.state
            .write()
            .await
            .tracker
            .record_result(&task_id, status, result.clone());

        self.events.emit(GatewayEvent::TaskResult {
            task_id: task_id.clone(),
            status,
            result,
        });

        conn.send(GatewayMessage::task_result_ack(
            &self.gateway_id,
            &from_gateway,
            &task_id,
        ))
        .await
    }

    async fn handle_task_ack(&self, value: Value) -> Result<()> {
        let message: GatewayMessage =
            serde_json::from_value(value).map_err(|e| GatewayError::InvalidParams {
                errors: vec![e.to_string()],
            })?;
        let MessageBody::TaskAck {
            ref task_id,
            status,
            ..
        } = message.body
        else {
            return Err(GatewayError::InvalidMessageType {
                message_type: message.body.message_type().to_string(),
            });
        };

        let accepted = status == TaskAckStatus::Received;
        debug!("Task {} acknowledged (accepted={})", task_id, accepted);
        self.state.write().await.tracker.record_ack(task_id, accepted);
        self.events.emit(GatewayEvent::TaskAck { message });
        Ok(())
    }

    /// Forget whatever identity `conn_id` registered.
    ///
    /// Emits exactly one `gateway:disconnect` if the connection still owned a
    /// registered identity, and nothing otherwise.
    pub async fn connection_closed(&self, conn_id: ConnectionId) {
        let removed = {
            let mut state = self.state.write().await;
            match state.connections.unbind(conn_id) {
                Some(gateway_id) => state.registry.remove(&gateway_id).map(|_| gateway_id),
                None => None,
            }
        };

        if let Some(gateway_id) = removed {
            info!("Gateway {} disconnected", gateway_id);
            self.events
                .emit(GatewayEvent::GatewayDisconnect { gateway_id });
        }
    }

    /// Send a task to one registered gateway
    pub async fn dispatch_task(&self, to: &str, task: &TaskRequest) -> Result<()> {
        self.dispatch(to, &task.task_id, task, TaskType::CrossGateway)
            .await
    }

    /// Send a task to every registered auxiliary gateway.
    ///
    /// Each recipient gets its own task id (`{task_id}:{gateway_id}`). A
    /// failed recipient is logged and reported; it never stops the others.
    pub async fn broadcast_task(&self, task: &TaskRequest) -> Vec<DispatchOutcome> {
        let targets = self.list_gateways(&GatewayFilter::role(GatewayRole::Auxiliary)).await;
        info!(
            "Broadcasting task {} to {} auxiliary gateways",
            task.task_id,
            targets.len()
        );

        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            let task_id = format!("{}:{}", task.task_id, target.gateway_id);
            let result = self
                .dispatch(&target.gateway_id, &task_id, task, TaskType::Broadcast)
                .await;
            if let Err(e) = &result {
                warn!("Broadcast to {} failed: {}", target.gateway_id, e);
            }
            outcomes.push(DispatchOutcome {
                gateway_id: target.gateway_id,
                task_id,
                result,
            });
        }
        outcomes
    }

    async fn dispatch(
        &self,
        to: &str,
        task_id: &str,
        task: &TaskRequest,
        task_type: TaskType,
    ) -> Result<()> {
        let handle = {
            let mut state = self.state.write().await;
            let handle = match (state.registry.contains(to), state.connections.handle_for(to)) {
                (true, Some(handle)) => handle.clone(),
                _ => return Err(GatewayError::gateway_not_found(to)),
            };
            state.tracker.record_dispatch(task_id, &self.gateway_id, to)?;
            handle
        };

        let message =
            GatewayMessage::task_dispatch(task_id, &self.gateway_id, to, task_type, task.payload());

        if let Err(e) = handle.send(message.clone()).await {
            self.state.write().await.tracker.forget(task_id);
            return Err(GatewayError::dispatch_failed(task_id, e.to_string()));
        }

        info!("Task {} dispatched to {}", task_id, to);
        self.events.emit(GatewayEvent::TaskDispatch { message });
        Ok(())
    }

    pub async fn list_gateways(&self, filter: &GatewayFilter) -> Vec<ConnectedGateway> {
        self.state.read().await.registry.list(filter)
    }

    pub async fn task(&self, task_id: &str) -> Option<TaskRecord> {
        self.state.read().await.tracker.get(task_id).cloned()
    }

    pub async fn gateway_count(&self) -> usize {
        self.state.read().await.registry.len()
    }

    pub async fn pending_task_count(&self) -> usize {
        self.state.read().await.tracker.pending_count()
    }

    pub async fn status_snapshot(&self, status: GatewayStatus) -> RuntimeStatus {
        let state = self.state.read().await;
        RuntimeStatus {
            gateway_id: self.gateway_id.clone(),
            role: GatewayRole::Main,
            status,
            connected_gateways: state.registry.len(),
            pending_tasks: state.tracker.pending_count(),
        }
    }

    /// Drop all routing state, used when the node stops
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.registry.clear();
        state.tracker.clear();
        state.connections.clear();
    }

    fn is_allowed(&self, ip: IpAddr) -> bool {
        if self.allowed_ips.is_empty() {
            return true;
        }
        let ip = ip.to_canonical();
        self.allowed_ips.iter().any(|entry| match entry.parse::<IpAddr>() {
            Ok(allowed) => allowed.to_canonical() == ip,
            Err(_) => entry == &ip.to_string(),
        })
    }
}

fn ensure_valid(report: ValidationReport) -> Result<()> {
    if report.valid {
        Ok(())
    } else {
        Err(GatewayError::InvalidParams {
            errors: report.errors,
        })
    }
}
