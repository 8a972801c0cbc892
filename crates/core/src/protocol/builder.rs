//! Message constructors
//!
//! Each constructor stamps the current time and assembles a well-formed
//! message. None of them perform I/O.

use chrono::Utc;

use super::message::*;

/// Recipient used by subordinates before the main gateway's id is known
pub const MAIN_RECIPIENT: &str = "main";

impl GatewayMessage {
    /// Wrap a body in a freshly stamped envelope
    pub fn new(from: impl Into<String>, to: impl Into<String>, body: MessageBody) -> Self {
        Self {
            envelope: Envelope {
                from: from.into(),
                to: to.into(),
                timestamp: Utc::now(),
            },
            body,
        }
    }

    /// Registration request (subordinate -> main)
    pub fn register(gateway_id: &str, gateway_role: GatewayRole, info: GatewayInfo) -> Self {
        Self::new(
            gateway_id,
            MAIN_RECIPIENT,
            MessageBody::Register {
                gateway_id: gateway_id.to_string(),
                gateway_role,
                info,
            },
        )
    }

    /// Successful registration acknowledgement (main -> subordinate)
    pub fn register_accepted(
        from: &str,
        to: &str,
        assigned_id: impl Into<String>,
        heartbeat_interval_secs: u64,
    ) -> Self {
        Self::new(
            from,
            to,
            MessageBody::RegisterAck {
                status: RegisterStatus::Success,
                assigned_id: Some(assigned_id.into()),
                heartbeat_interval: Some(heartbeat_interval_secs),
                message: Some("registered".to_string()),
            },
        )
    }

    /// Rejected registration acknowledgement (main -> subordinate)
    pub fn register_rejected(from: &str, to: &str, message: impl Into<String>) -> Self {
        Self::new(
            from,
            to,
            MessageBody::RegisterAck {
                status: RegisterStatus::Error,
                assigned_id: None,
                heartbeat_interval: None,
                message: Some(message.into()),
            },
        )
    }

    /// Heartbeat (subordinate -> main)
    pub fn heartbeat(gateway_id: &str, to: &str, load: LoadSample) -> Self {
        Self::new(
            gateway_id,
            to,
            MessageBody::Heartbeat {
                gateway_id: gateway_id.to_string(),
                status: GatewayStatus::Online,
                load,
            },
        )
    }

    pub fn heartbeat_ack(from: &str, to: &str, pending_tasks: usize) -> Self {
        Self::new(
            from,
            to,
            MessageBody::HeartbeatAck {
                status: HeartbeatAckStatus::Ok,
                pending_tasks: Some(pending_tasks),
            },
        )
    }

    /// Task dispatch (main -> subordinate)
    pub fn task_dispatch(
        task_id: &str,
        from_gateway: &str,
        to_gateway: &str,
        task_type: TaskType,
        payload: TaskPayload,
    ) -> Self {
        Self::new(
            from_gateway,
            to_gateway,
            MessageBody::TaskDispatch {
                task_id: task_id.to_string(),
                from_gateway: from_gateway.to_string(),
                to_gateway: to_gateway.to_string(),
                task_type,
                payload,
            },
        )
    }

    /// Dispatch acknowledgement (subordinate -> main)
    pub fn task_ack(
        from: &str,
        to: &str,
        task_id: &str,
        status: TaskAckStatus,
        message: Option<String>,
    ) -> Self {
        Self::new(
            from,
            to,
            MessageBody::TaskAck {
                task_id: task_id.to_string(),
                status,
                estimated_duration: None,
                message,
            },
        )
    }

    /// Task result report (subordinate -> main)
    pub fn task_result(
        task_id: &str,
        from_gateway: &str,
        to_gateway: &str,
        status: TaskOutcome,
        result: TaskResultBody,
    ) -> Self {
        Self::new(
            from_gateway,
            to_gateway,
            MessageBody::TaskResult {
                task_id: task_id.to_string(),
                from_gateway: from_gateway.to_string(),
                to_gateway: to_gateway.to_string(),
                status,
                result,
            },
        )
    }

    pub fn task_result_ack(from: &str, to: &str, task_id: &str) -> Self {
        Self::new(
            from,
            to,
            MessageBody::TaskResultAck {
                task_id: task_id.to_string(),
                status: ResultAckStatus::Received,
            },
        )
    }
}
