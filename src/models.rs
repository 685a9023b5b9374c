use serde::{Deserialize, Serialize};

/// The user a task is executed on behalf of.
///
/// Account bookkeeping (projects, allocations) lives in the facility's
/// account service; the task subsystem only needs a stable identity to
/// enforce per-owner task visibility.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
}

impl User {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

/// The facility resource a task targets (a storage system, a cluster...).
///
/// Status and capability tracking belong to the facility's status
/// service; handlers only use the resource as a label.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Resource {
    pub id: String,
    pub name: String,
}

impl Resource {
    pub fn new(name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
        }
    }
}
