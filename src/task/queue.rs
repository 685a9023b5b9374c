//! Task queue — lazy, caller-driven state machine over all live tasks.
//!
//! There is no background scheduler: every client-visible access
//! (submit, get, list) first runs one processing pass, so tasks advance
//! as fast as clients poll and no faster.
//!
//! The whole pass runs under one async mutex. Two concurrent callers
//! can never interleave a transition or prune a task the other is
//! about to dispatch.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Task, TaskCommand, TaskStatus};
use crate::dispatch::Dispatcher;
use crate::models::{Resource, User};

/// One queued task with the bookkeeping the wire model omits.
struct TaskEntry {
    id: String,
    user: User,
    resource: Resource,
    command: TaskCommand,
    status: TaskStatus,
    result: Option<String>,
    /// Reset when the task becomes active, so both the pending→active
    /// and active→dispatch thresholds measure from the last transition.
    started_at: Instant,
}

impl TaskEntry {
    fn to_wire(&self) -> Task {
        Task {
            id: self.id.clone(),
            status: self.status,
            result: self.result.clone(),
            command: Some(self.command.clone()),
        }
    }
}

struct QueueState {
    tasks: Vec<TaskEntry>,
    /// Monotone counter; never reused even after pruning.
    next_id: u64,
}

/// Process-wide collection of live tasks, insertion order preserved.
///
/// Not persistent: a restart drops all tasks. This is an explicit
/// non-goal of the subsystem, not an oversight.
pub struct TaskQueue {
    dispatcher: Dispatcher,
    /// Minimum age before pending→active and before active→dispatch.
    poll_delay: Duration,
    /// How long terminal tasks stay visible before garbage collection.
    retention: Duration,
    state: Mutex<QueueState>,
}

impl TaskQueue {
    pub fn new(dispatcher: Dispatcher, poll_delay: Duration, retention: Duration) -> Self {
        Self {
            dispatcher,
            poll_delay,
            retention,
            state: Mutex::new(QueueState {
                tasks: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Appends a new pending task and returns its id.
    ///
    /// Always succeeds; the caller gets the handle back immediately and
    /// is never blocked on the (potentially slow) operation itself.
    pub async fn submit(&self, user: &User, resource: &Resource, command: TaskCommand) -> String {
        let mut state = self.state.lock().await;
        self.process(&mut state).await;

        let id = format!("task_{}", state.next_id);
        state.next_id += 1;
        info!("Task {id} submitted by {}: {}", user.id, command.route());
        state.tasks.push(TaskEntry {
            id: id.clone(),
            user: user.clone(),
            resource: resource.clone(),
            command,
            status: TaskStatus::Pending,
            result: None,
            started_at: Instant::now(),
        });
        id
    }

    /// Looks up one task by id, visible only to its owner.
    ///
    /// An id owned by somebody else is indistinguishable from an absent
    /// one — existence must not leak across owners.
    pub async fn get(&self, user: &User, task_id: &str) -> Option<Task> {
        let mut state = self.state.lock().await;
        self.process(&mut state).await;
        state
            .tasks
            .iter()
            .find(|t| t.user.id == user.id && t.id == task_id)
            .map(TaskEntry::to_wire)
    }

    /// Lists the caller's tasks in insertion order.
    pub async fn list(&self, user: &User) -> Vec<Task> {
        let mut state = self.state.lock().await;
        self.process(&mut state).await;
        state
            .tasks
            .iter()
            .filter(|t| t.user.id == user.id)
            .map(TaskEntry::to_wire)
            .collect()
    }

    /// One processing pass over all tasks, in stable insertion order.
    ///
    /// Each task moves at most one step per pass: expired terminal
    /// tasks are dropped, pending tasks past the delay threshold become
    /// active (timestamp reset), active tasks past the threshold are
    /// dispatched and recorded terminal. Re-running the pass before any
    /// threshold elapses changes nothing.
    async fn process(&self, state: &mut QueueState) {
        let now = Instant::now();
        let mut kept = Vec::with_capacity(state.tasks.len());
        for mut task in state.tasks.drain(..) {
            let age = now.duration_since(task.started_at);
            if task.status.is_terminal() && age > self.retention {
                debug!("Pruning expired task {}", task.id);
                continue;
            }
            if task.status == TaskStatus::Pending && age > self.poll_delay {
                debug!("Task {} pending -> active", task.id);
                task.status = TaskStatus::Active;
                task.started_at = now;
            } else if task.status == TaskStatus::Active && age > self.poll_delay {
                let (result, status) = self
                    .dispatcher
                    .dispatch(&task.resource, &task.user, &task.command)
                    .await;
                info!(
                    "Task {} finished: {:?} ({})",
                    task.id,
                    status,
                    task.command.route()
                );
                task.result = Some(result);
                task.status = status;
            }
            kept.push(task);
        }
        state.tasks = kept;
    }
}
