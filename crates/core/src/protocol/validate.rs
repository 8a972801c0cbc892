//! Structural validators for inbound requests
//!
//! Validators work on untyped JSON so that every violation can be reported,
//! not only the first one serde would stop at. A message that passes its
//! validator deserializes into [`GatewayMessage`](super::GatewayMessage).

use serde::Serialize;
use serde_json::Value;

use super::message::{tags, GatewayRole, GatewayStatus, TaskOutcome};

/// Outcome of validating one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Read the `type` tag of an untyped message
pub fn message_type(message: &Value) -> Option<&str> {
    message.get("type").and_then(Value::as_str)
}

/// Validate a `gateway.register` request
pub fn validate_register(message: &Value) -> ValidationReport {
    let mut check = Checker::new(message, tags::REGISTER);

    check.non_empty_string(message, "gatewayId");
    check.one_of(message, "gatewayRole", &GatewayRole::ALL.map(|r| r.as_str()));

    if let Some(info) = check.object(message, "info") {
        check.non_empty_string(info, "info.host");
        check.port(info, "info.port");
        check.unsigned(info, "info.agentCount", u32::MAX as u64);
        check.one_of(info, "info.status", &GatewayStatus::ALL.map(|s| s.as_str()));
        check.optional_string(info, "info.deviceFingerprint");
    }

    check.finish()
}

/// Validate a `gateway.heartbeat` request
pub fn validate_heartbeat(message: &Value) -> ValidationReport {
    let mut check = Checker::new(message, tags::HEARTBEAT);

    check.non_empty_string(message, "gatewayId");
    check.one_of(message, "status", &GatewayStatus::ALL.map(|s| s.as_str()));

    if let Some(load) = check.object(message, "load") {
        check.number(load, "load.cpu");
        check.number(load, "load.memory");
        check.unsigned(load, "load.activeTasks", u32::MAX as u64);
    }

    check.finish()
}

/// Validate a `gateway.task.dispatch` request
pub fn validate_task_dispatch(message: &Value) -> ValidationReport {
    let mut check = Checker::new(message, tags::TASK_DISPATCH);

    check.non_empty_string(message, "taskId");
    check.non_empty_string(message, "fromGateway");
    check.non_empty_string(message, "toGateway");
    check.one_of(message, "taskType", &["cross-gateway", "broadcast"]);

    if let Some(payload) = check.object(message, "payload") {
        check.non_empty_string(payload, "payload.agentId");
        check.non_empty_string(payload, "payload.command");
    }

    check.finish()
}

/// Validate a `gateway.task.result` report
pub fn validate_task_result(message: &Value) -> ValidationReport {
    let mut check = Checker::new(message, tags::TASK_RESULT);

    check.non_empty_string(message, "taskId");
    check.non_empty_string(message, "fromGateway");
    check.non_empty_string(message, "toGateway");
    check.one_of(message, "status", &TaskOutcome::ALL.map(|o| o.as_str()));

    if let Some(result) = check.object(message, "result") {
        check.optional_string(result, "result.output");
        check.optional_unsigned(result, "result.duration");
        check.optional_string(result, "result.error");
        check.optional_string_array(result, "result.artifacts");
    }

    check.finish()
}

/// Accumulates violations for one message
struct Checker {
    errors: Vec<String>,
}

impl Checker {
    fn new(message: &Value, expected_type: &str) -> Self {
        let mut check = Self { errors: Vec::new() };

        if !message.is_object() {
            check.errors.push("message must be a JSON object".to_string());
        }
        match message_type(message) {
            Some(actual) if actual == expected_type => {}
            Some(actual) => check
                .errors
                .push(format!("type must be {} (got {})", expected_type, actual)),
            None => check.errors.push(format!("type must be {}", expected_type)),
        }

        check.non_empty_string(message, "from");
        check.non_empty_string(message, "to");
        check.timestamp(message, "timestamp");
        check
    }

    fn finish(self) -> ValidationReport {
        ValidationReport::from_errors(self.errors)
    }

    fn field<'v>(parent: &'v Value, path: &str) -> Option<&'v Value> {
        let key = path.rsplit('.').next().unwrap_or(path);
        parent.get(key).filter(|v| !v.is_null())
    }

    fn object<'v>(&mut self, parent: &'v Value, path: &str) -> Option<&'v Value> {
        match Self::field(parent, path) {
            Some(v) if v.is_object() => Some(v),
            Some(_) => {
                self.errors.push(format!("{} must be an object", path));
                None
            }
            None => {
                self.errors.push(format!("missing {}", path));
                None
            }
        }
    }

    fn non_empty_string(&mut self, parent: &Value, path: &str) {
        match Self::field(parent, path) {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(Value::String(_)) => self.errors.push(format!("{} must not be empty", path)),
            Some(_) => self.errors.push(format!("{} must be a string", path)),
            None => self.errors.push(format!("missing {}", path)),
        }
    }

    fn optional_string(&mut self, parent: &Value, path: &str) {
        if let Some(v) = Self::field(parent, path) {
            if !v.is_string() {
                self.errors.push(format!("{} must be a string", path));
            }
        }
    }

    fn optional_string_array(&mut self, parent: &Value, path: &str) {
        if let Some(v) = Self::field(parent, path) {
            let ok = v
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false);
            if !ok {
                self.errors.push(format!("{} must be an array of strings", path));
            }
        }
    }

    fn one_of(&mut self, parent: &Value, path: &str, allowed: &[&str]) {
        match Self::field(parent, path).and_then(Value::as_str) {
            Some(s) if allowed.contains(&s) => {}
            _ => self
                .errors
                .push(format!("{} must be one of {}", path, allowed.join(", "))),
        }
    }

    fn number(&mut self, parent: &Value, path: &str) {
        match Self::field(parent, path) {
            Some(v) if v.is_number() => {}
            Some(_) => self.errors.push(format!("{} must be a number", path)),
            None => self.errors.push(format!("missing {}", path)),
        }
    }

    fn unsigned(&mut self, parent: &Value, path: &str, max: u64) {
        match Self::field(parent, path) {
            Some(v) => match v.as_u64() {
                Some(n) if n <= max => {}
                _ => self
                    .errors
                    .push(format!("{} must be a non-negative integer", path)),
            },
            None => self.errors.push(format!("missing {}", path)),
        }
    }

    fn optional_unsigned(&mut self, parent: &Value, path: &str) {
        if let Some(v) = Self::field(parent, path) {
            if v.as_u64().is_none() {
                self.errors
                    .push(format!("{} must be a non-negative integer", path));
            }
        }
    }

    fn port(&mut self, parent: &Value, path: &str) {
        match Self::field(parent, path) {
            Some(v) => match v.as_u64() {
                Some(n) if (1..=u16::MAX as u64).contains(&n) => {}
                _ => self
                    .errors
                    .push(format!("{} must be an integer between 1 and 65535", path)),
            },
            None => self.errors.push(format!("missing {}", path)),
        }
    }

    fn timestamp(&mut self, parent: &Value, path: &str) {
        match Self::field(parent, path) {
            Some(Value::String(s)) => {
                if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                    self.errors
                        .push(format!("{} must be an ISO-8601 timestamp", path));
                }
            }
            Some(_) => self
                .errors
                .push(format!("{} must be an ISO-8601 timestamp", path)),
            None => self.errors.push(format!("missing {}", path)),
        }
    }
}
