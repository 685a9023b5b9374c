//! Task data model — the unit of deferred work.
//!
//! A [`TaskCommand`] is an immutable description of an operation
//! (router + command + args); a [`Task`] is the client-visible record
//! tracking one command's lifecycle through the queue.

pub mod queue;

use serde::{Deserialize, Serialize};

pub use queue::TaskQueue;

/// Lifecycle status of a task.
///
/// Transitions only move forward: `pending → active → terminal`.
/// `canceled` is reserved for external cancellation and is never set by
/// the queue's own processing pass.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

/// An immutable description of a deferred operation.
///
/// `router` names the handler set (e.g. "filesystem"), `command` the
/// operation within it. `args` are operation-specific and validated by
/// the handler, not here.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TaskCommand {
    pub router: String,
    pub command: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl TaskCommand {
    pub fn new(
        router: &str,
        command: &str,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            router: router.to_string(),
            command: command.to_string(),
            args,
        }
    }

    /// `"router:command"` label used in logs and failure messages.
    pub fn route(&self) -> String {
        format!("{}:{}", self.router, self.command)
    }
}

/// Client-visible view of a queued task.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<TaskCommand>,
}
