use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot of a workload as seen by the trigger engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub triggers: Vec<Trigger>,
    pub containers: Vec<Container>,
}

/// An image-change trigger. Its position in [`Workload::triggers`] is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(default = "default_automatic")]
    pub automatic: bool,
    pub from: TagReference,
    #[serde(default)]
    pub container_names: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_triggered_image: String,
}

/// Identity of an upstream image tag, `name` is of the form `stream:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagReference {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub image: String,
}

fn default_automatic() -> bool {
    true
}

impl Trigger {
    pub fn has_fired(&self) -> bool {
        !self.last_triggered_image.is_empty()
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for TagReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
