//! Error types for the gateway overlay

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::GatewayRole;

/// Wire-level error codes carried by `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayErrorCode {
    #[serde(rename = "GATEWAY_001")]
    Unauthorized,
    #[serde(rename = "GATEWAY_002")]
    RegisterFailed,
    #[serde(rename = "GATEWAY_003")]
    GatewayNotFound,
    #[serde(rename = "GATEWAY_004")]
    TaskDispatchFailed,
    #[serde(rename = "GATEWAY_005")]
    HeartbeatTimeout,
    #[serde(rename = "GATEWAY_006")]
    ConnectionLost,
    #[serde(rename = "GATEWAY_007")]
    InvalidMessageType,
    #[serde(rename = "GATEWAY_008")]
    InvalidParams,
}

impl GatewayErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "GATEWAY_001",
            Self::RegisterFailed => "GATEWAY_002",
            Self::GatewayNotFound => "GATEWAY_003",
            Self::TaskDispatchFailed => "GATEWAY_004",
            Self::HeartbeatTimeout => "GATEWAY_005",
            Self::ConnectionLost => "GATEWAY_006",
            Self::InvalidMessageType => "GATEWAY_007",
            Self::InvalidParams => "GATEWAY_008",
        }
    }
}

impl std::fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the gateway runtime and its registries
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Remote address is not on the allowlist
    #[error("Remote address {addr} is not allowed to register")]
    Unauthorized { addr: String },

    #[error("Registration failed: {message}")]
    RegistrationFailed { message: String },

    #[error("Gateway not found: {gateway_id}")]
    GatewayNotFound { gateway_id: String },

    #[error("Failed to dispatch task {task_id}: {message}")]
    TaskDispatchFailed { task_id: String, message: String },

    /// Reserved: nothing sweeps for missed heartbeats yet.
    #[error("Heartbeat timed out for gateway {gateway_id}")]
    HeartbeatTimeout { gateway_id: String },

    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    #[error("Invalid message type: {message_type}")]
    InvalidMessageType { message_type: String },

    #[error("Invalid params: {}", errors.join("; "))]
    InvalidParams { errors: Vec<String> },

    #[error("Task already tracked: {task_id}")]
    DuplicateTask { task_id: String },

    #[error("Operation {operation} is not available for role {role}")]
    WrongRole {
        role: GatewayRole,
        operation: &'static str,
    },

    #[error("Role {0} is not supported by this runtime")]
    UnsupportedRole(GatewayRole),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn registration_failed(message: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            message: message.into(),
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    pub fn gateway_not_found(gateway_id: impl Into<String>) -> Self {
        Self::GatewayNotFound {
            gateway_id: gateway_id.into(),
        }
    }

    pub fn dispatch_failed(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskDispatchFailed {
            task_id: task_id.into(),
            message: message.into(),
        }
    }

    /// Map the error onto the wire code reported in `error` events
    pub fn code(&self) -> GatewayErrorCode {
        match self {
            Self::Unauthorized { .. } => GatewayErrorCode::Unauthorized,
            Self::RegistrationFailed { .. } => GatewayErrorCode::RegisterFailed,
            Self::GatewayNotFound { .. } => GatewayErrorCode::GatewayNotFound,
            Self::TaskDispatchFailed { .. } | Self::DuplicateTask { .. } => {
                GatewayErrorCode::TaskDispatchFailed
            }
            Self::HeartbeatTimeout { .. } => GatewayErrorCode::HeartbeatTimeout,
            Self::ConnectionLost { .. } | Self::Io(_) => GatewayErrorCode::ConnectionLost,
            Self::InvalidMessageType { .. } => GatewayErrorCode::InvalidMessageType,
            Self::InvalidParams { .. }
            | Self::Serialization(_)
            | Self::WrongRole { .. }
            | Self::UnsupportedRole(_)
            | Self::Config(_) => GatewayErrorCode::InvalidParams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_serialize_as_wire_codes() {
        let json = serde_json::to_string(&GatewayErrorCode::GatewayNotFound).unwrap();
        assert_eq!(json, "\"GATEWAY_003\"");
        assert_eq!(GatewayErrorCode::InvalidParams.to_string(), "GATEWAY_008");
    }

    #[test]
    fn test_invalid_params_lists_every_error() {
        let err = GatewayError::InvalidParams {
            errors: vec!["missing taskId".to_string(), "missing payload".to_string()],
        };
        assert_eq!(err.to_string(), "Invalid params: missing taskId; missing payload");
        assert_eq!(err.code(), GatewayErrorCode::InvalidParams);
    }

    #[test]
    fn test_duplicate_task_reports_dispatch_failure_code() {
        let err = GatewayError::DuplicateTask {
            task_id: "t-1".to_string(),
        };
        assert_eq!(err.code(), GatewayErrorCode::TaskDispatchFailed);
    }
}
