//! Routing descriptors derived from a producer's identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a producer's events are routed.
///
/// Producers inside a group share the group's ordered delivery channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSourceInfo {
    group_id: Option<String>,
    source_id: String,
}

impl EventSourceInfo {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            group_id: None,
            source_id: source_id.into(),
        }
    }

    /// Source for a component's own status events: `<uid>/main`.
    pub fn main(uid: &str) -> Self {
        Self::new(format!("{uid}/main"))
    }

    /// Source for one data output of a component: `<uid>/outputs/<name>`.
    pub fn output(uid: &str, name: &str) -> Self {
        Self::new(format!("{uid}/outputs/{name}"))
    }

    /// Source for one control input of a component: `<uid>/control/<name>`.
    pub fn control(uid: &str, name: &str) -> Self {
        Self::new(format!("{uid}/control/{name}"))
    }

    #[must_use]
    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl fmt::Display for EventSourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group_id {
            Some(group) => write!(f, "{group}:{}", self.source_id),
            None => f.write_str(&self.source_id),
        }
    }
}
