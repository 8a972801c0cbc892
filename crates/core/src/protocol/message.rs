//! Wire types for gateway-to-gateway communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Role a gateway plays in the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayRole {
    Main,
    Auxiliary,
    /// Reserved third tier; accepted on the wire, never run.
    Branch,
}

impl GatewayRole {
    pub const ALL: [GatewayRole; 3] = [Self::Main, Self::Auxiliary, Self::Branch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Auxiliary => "auxiliary",
            Self::Branch => "branch",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.as_str() == raw)
    }
}

impl std::fmt::Display for GatewayRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state of a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Online,
    Offline,
    Connecting,
    Error,
}

impl GatewayStatus {
    pub const ALL: [GatewayStatus; 4] = [Self::Online, Self::Offline, Self::Connecting, Self::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Connecting => "connecting",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }
}

impl std::fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a subordinate advertises about itself when registering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub host: String,
    pub port: u16,
    pub agent_count: u32,
    pub status: GatewayStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
}

/// Load sample reported with each heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSample {
    pub cpu: f64,
    pub memory: f64,
    pub active_tasks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatAckStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    CrossGateway,
    Broadcast,
}

/// Work carried by a dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub agent_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAckStatus {
    Received,
    Error,
}

/// Outcome reported by the gateway that ran a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Success,
    Failed,
    Timeout,
}

impl TaskOutcome {
    pub const ALL: [TaskOutcome; 3] = [Self::Success, Self::Failed, Self::Timeout];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Result body of a finished task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `null` reads as an empty list, the same as a missing field
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultAckStatus {
    Received,
}

/// Fields shared by every message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
}

/// Type-specific part of a message, discriminated by the `type` tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageBody {
    #[serde(rename = "gateway.register", rename_all = "camelCase")]
    Register {
        gateway_id: String,
        gateway_role: GatewayRole,
        info: GatewayInfo,
    },
    #[serde(rename = "gateway.register.ack", rename_all = "camelCase")]
    RegisterAck {
        status: RegisterStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assigned_id: Option<String>,
        /// Seconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heartbeat_interval: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "gateway.heartbeat", rename_all = "camelCase")]
    Heartbeat {
        gateway_id: String,
        status: GatewayStatus,
        load: LoadSample,
    },
    #[serde(rename = "gateway.heartbeat.ack", rename_all = "camelCase")]
    HeartbeatAck {
        status: HeartbeatAckStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pending_tasks: Option<usize>,
    },
    #[serde(rename = "gateway.task.dispatch", rename_all = "camelCase")]
    TaskDispatch {
        task_id: String,
        from_gateway: String,
        to_gateway: String,
        task_type: TaskType,
        payload: TaskPayload,
    },
    #[serde(rename = "gateway.task.ack", rename_all = "camelCase")]
    TaskAck {
        task_id: String,
        status: TaskAckStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        estimated_duration: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "gateway.task.result", rename_all = "camelCase")]
    TaskResult {
        task_id: String,
        from_gateway: String,
        to_gateway: String,
        status: TaskOutcome,
        result: TaskResultBody,
    },
    #[serde(rename = "gateway.task.result.ack", rename_all = "camelCase")]
    TaskResultAck {
        task_id: String,
        status: ResultAckStatus,
    },
}

impl MessageBody {
    /// Wire tag of this variant
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Register { .. } => tags::REGISTER,
            Self::RegisterAck { .. } => tags::REGISTER_ACK,
            Self::Heartbeat { .. } => tags::HEARTBEAT,
            Self::HeartbeatAck { .. } => tags::HEARTBEAT_ACK,
            Self::TaskDispatch { .. } => tags::TASK_DISPATCH,
            Self::TaskAck { .. } => tags::TASK_ACK,
            Self::TaskResult { .. } => tags::TASK_RESULT,
            Self::TaskResultAck { .. } => tags::TASK_RESULT_ACK,
        }
    }
}

/// A complete message as it travels over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl GatewayMessage {
    pub fn message_type(&self) -> &'static str {
        self.body.message_type()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Wire tags, one per message variant
pub mod tags {
    pub const REGISTER: &str = "gateway.register";
    pub const REGISTER_ACK: &str = "gateway.register.ack";
    pub const HEARTBEAT: &str = "gateway.heartbeat";
    pub const HEARTBEAT_ACK: &str = "gateway.heartbeat.ack";
    pub const TASK_DISPATCH: &str = "gateway.task.dispatch";
    pub const TASK_ACK: &str = "gateway.task.ack";
    pub const TASK_RESULT: &str = "gateway.task.result";
    pub const TASK_RESULT_ACK: &str = "gateway.task.result.ack";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_message_serialization() {
        let msg = GatewayMessage {
            envelope: Envelope {
                from: "gw-aux-1".to_string(),
                to: "main".to_string(),
                timestamp: Utc::now(),
            },
            body: MessageBody::Register {
                gateway_id: "gw-aux-1".to_string(),
                gateway_role: GatewayRole::Auxiliary,
                info: GatewayInfo {
                    host: "10.0.0.7".to_string(),
                    port: 18789,
                    agent_count: 4,
                    status: GatewayStatus::Online,
                    device_fingerprint: None,
                },
            },
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"gateway.register\""));
        assert!(json.contains("\"gatewayId\":\"gw-aux-1\""));
        assert!(json.contains("\"gatewayRole\":\"auxiliary\""));
        assert!(json.contains("\"agentCount\":4"));
        assert!(!json.contains("deviceFingerprint"));
    }

    #[test]
    fn test_heartbeat_deserialization() {
        let json = r#"{
            "type": "gateway.heartbeat",
            "from": "gw-aux-1",
            "to": "main",
            "timestamp": "2026-02-26T10:00:00.000Z",
            "gatewayId": "gw-aux-1",
            "status": "online",
            "load": { "cpu": 12, "memory": 40.5, "activeTasks": 2 }
        }"#;

        let msg = GatewayMessage::from_json(json).unwrap();
        assert_eq!(msg.envelope.from, "gw-aux-1");
        match msg.body {
            MessageBody::Heartbeat { gateway_id, load, .. } => {
                assert_eq!(gateway_id, "gw-aux-1");
                assert_eq!(load.cpu, 12.0);
                assert_eq!(load.active_tasks, 2);
            }
            other => panic!("Expected Heartbeat message, got {:?}", other),
        }
    }

    #[test]
    fn test_result_body_reads_null_artifacts_as_empty() {
        let body: TaskResultBody =
            serde_json::from_str(r#"{"output": "done", "artifacts": null}"#).unwrap();
        assert!(body.artifacts.is_empty());
        assert_eq!(body.output.as_deref(), Some("done"));

        let body: TaskResultBody =
            serde_json::from_str(r#"{"artifacts": ["report.md"]}"#).unwrap();
        assert_eq!(body.artifacts, vec!["report.md".to_string()]);
    }

    #[test]
    fn test_task_type_uses_kebab_case() {
        let json = serde_json::to_string(&TaskType::CrossGateway).unwrap();
        assert_eq!(json, "\"cross-gateway\"");
    }

    #[test]
    fn test_role_and_status_parse() {
        assert_eq!(GatewayRole::parse("branch"), Some(GatewayRole::Branch));
        assert_eq!(GatewayRole::parse("leaf"), None);
        assert_eq!(GatewayStatus::parse("connecting"), Some(GatewayStatus::Connecting));
    }
}
