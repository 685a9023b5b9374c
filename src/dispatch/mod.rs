//! Command dispatcher — resolves a [`TaskCommand`] to a typed handler.
//!
//! The dispatcher is a failure-absorbing boundary: whatever goes wrong
//! below it (unknown route, bad arguments, handler error) comes back as
//! a `failed` task status with a readable message, never as an error
//! the queue's processing pass would have to survive.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{Resource, User};
use crate::task::{TaskCommand, TaskStatus};

/// Execution context passed to every operation.
pub struct OperationContext<'a> {
    /// Resource the task targets.
    pub resource: &'a Resource,
    /// User the task runs on behalf of.
    pub user: &'a User,
}

/// A single named operation within a router.
///
/// Implementations deserialize their own arguments (a shape mismatch is
/// an ordinary `Err`, which the dispatcher turns into a failed task)
/// and return the task result string.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Operation name, unique within its router (e.g. "mkdir").
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        ctx: &OperationContext<'_>,
        args: serde_json::Map<String, Value>,
    ) -> anyhow::Result<String>;
}

/// A handler set for one subsystem, keyed by operation name.
pub struct Router {
    name: &'static str,
    operations: HashMap<&'static str, Box<dyn Operation>>,
}

impl Router {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            operations: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers an operation. Re-registering a name replaces the
    /// previous handler (and logs, since that is almost always a bug).
    pub fn register(&mut self, operation: Box<dyn Operation>) {
        let name = operation.name();
        if self.operations.insert(name, operation).is_some() {
            warn!("Operation {}:{name} registered twice", self.name);
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Init-time registry mapping `(router, command)` to typed handlers.
#[derive(Default)]
pub struct Dispatcher {
    routers: HashMap<&'static str, Router>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, router: Router) {
        debug!(
            "Registered router {} ({} operations)",
            router.name(),
            router.len()
        );
        self.routers.insert(router.name(), router);
    }

    /// Invokes the handler for `command`.
    ///
    /// Never fails past this boundary. An unresolved route and a
    /// handler-internal error both come back as `Failed`, but with
    /// deliberately distinct message texts so operators can tell them
    /// apart.
    pub async fn dispatch(
        &self,
        resource: &Resource,
        user: &User,
        command: &TaskCommand,
    ) -> (String, TaskStatus) {
        let operation = self
            .routers
            .get(command.router.as_str())
            .and_then(|r| r.operations.get(command.command.as_str()));

        let Some(operation) = operation else {
            warn!("No handler for {}", command.route());
            return (
                format!(
                    "Task was cancelled due to unknown router/command: {}",
                    command.route()
                ),
                TaskStatus::Failed,
            );
        };

        let ctx = OperationContext { resource, user };
        match operation.execute(&ctx, command.args.clone()).await {
            Ok(result) => {
                debug!("{} completed ({} bytes)", command.route(), result.len());
                (result, TaskStatus::Completed)
            }
            Err(e) => {
                warn!("{} failed: {e}", command.route());
                (format!("Error: {e}"), TaskStatus::Failed)
            }
        }
    }
}

/// Deserializes the whole argument map into a typed parameter struct.
pub fn args_into<T: DeserializeOwned>(
    args: serde_json::Map<String, Value>,
) -> anyhow::Result<T> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| anyhow::anyhow!("invalid arguments: {e}"))
}

/// Extracts and deserializes the nested `request_model` argument used
/// by operations that take a structured request body.
pub fn request_model<T: DeserializeOwned>(
    args: &serde_json::Map<String, Value>,
) -> anyhow::Result<T> {
    let value = args
        .get("request_model")
        .ok_or_else(|| anyhow::anyhow!("missing `request_model` argument"))?;
    serde_json::from_value(value.clone())
        .map_err(|e| anyhow::anyhow!("invalid `request_model`: {e}"))
}
