//! Main-side task lifecycle tracking
//!
//! Records are created on dispatch and updated when the subordinate
//! acknowledges or reports a result. Nothing here retries, times out or
//! reaps tasks: a dispatch that never gets a result stays `dispatched`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::protocol::{TaskOutcome, TaskResultBody};
use crate::Result;

/// Lifecycle state of a tracked task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Dispatched,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: String,
    pub from_gateway: String,
    pub to_gateway: String,
    pub status: TaskState,
    pub dispatched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Status exactly as reported, including `timeout`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TaskOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResultBody>,
}

#[derive(Debug, Default)]
pub struct TaskTracker {
    tasks: HashMap<String, TaskRecord>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a dispatched task. Task ids are unique for the
    /// tracker's lifetime; reusing one fails with `DuplicateTask`.
    pub fn record_dispatch(&mut self, task_id: &str, from: &str, to: &str) -> Result<&TaskRecord> {
        if self.tasks.contains_key(task_id) {
            return Err(GatewayError::DuplicateTask {
                task_id: task_id.to_string(),
            });
        }

        let record = TaskRecord {
            task_id: task_id.to_string(),
            from_gateway: from.to_string(),
            to_gateway: to.to_string(),
            status: TaskState::Dispatched,
            dispatched_at: Utc::now(),
            completed_at: None,
            outcome: None,
            result: None,
        };
        debug!("Tracking task {} ({} -> {})", task_id, from, to);
        Ok(&*self.tasks.entry(task_id.to_string()).or_insert(record))
    }

    /// Apply a dispatch acknowledgement. `accepted` moves a dispatched task
    /// to running; a refusal fails it.
    pub fn record_ack(&mut self, task_id: &str, accepted: bool) -> Option<&TaskRecord> {
        let record = self.tasks.get_mut(task_id)?;
        if record.status != TaskState::Dispatched {
            debug!(
                "Ignoring ack for task {} in state {:?}",
                task_id, record.status
            );
            return Some(&*record);
        }

        if accepted {
            record.status = TaskState::Running;
        } else {
            record.status = TaskState::Failed;
            record.completed_at = Some(Utc::now());
        }
        Some(&*record)
    }

    /// Apply a result report. Unknown ids are ignored and the first result
    /// for a task wins.
    pub fn record_result(
        &mut self,
        task_id: &str,
        outcome: TaskOutcome,
        result: TaskResultBody,
    ) -> Option<&TaskRecord> {
        let Some(record) = self.tasks.get_mut(task_id) else {
            warn!("Result for unknown task {}", task_id);
            return None;
        };

        if record.status.is_terminal() && record.outcome.is_some() {
            warn!("Task {} already finished, ignoring duplicate result", task_id);
            return Some(&*record);
        }

        record.status = if outcome.is_success() {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        record.outcome = Some(outcome);
        record.completed_at = Some(Utc::now());
        record.result = Some(result);
        Some(&*record)
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    /// Drop a record, used when the transport refused the dispatch
    pub fn forget(&mut self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.remove(task_id)
    }

    /// Tasks that have not reached a terminal state
    pub fn pending_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}
