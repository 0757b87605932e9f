//! Stock events published by sensor hub components.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{Event, EventHeader};

/// A batch of observation records produced by a component output.
#[derive(Debug, Clone)]
pub struct DataEvent {
    header: EventHeader,
    output_name: String,
    records: Vec<Value>,
}

impl DataEvent {
    pub fn new(header: EventHeader, output_name: impl Into<String>, records: Vec<Value>) -> Self {
        Self {
            header,
            output_name: output_name.into(),
            records,
        }
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }
}

impl Event for DataEvent {
    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// Lifecycle state of a hub component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Registered,
    Enabled,
    Disabled,
    Unregistered,
}

/// A component changed lifecycle state.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    header: EventHeader,
    component_uid: String,
    status: ComponentStatus,
}

impl StatusEvent {
    pub fn new(header: EventHeader, component_uid: impl Into<String>, status: ComponentStatus) -> Self {
        Self {
            header,
            component_uid: component_uid.into(),
            status,
        }
    }

    pub fn component_uid(&self) -> &str {
        &self.component_uid
    }

    pub fn status(&self) -> ComponentStatus {
        self.status
    }
}

impl Event for StatusEvent {
    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// A command received or executed by a control input.
#[derive(Debug, Clone)]
pub struct CommandEvent {
    header: EventHeader,
    control_name: String,
    command_id: u64,
    params: Value,
}

impl CommandEvent {
    pub fn new(
        header: EventHeader,
        control_name: impl Into<String>,
        command_id: u64,
        params: Value,
    ) -> Self {
        Self {
            header,
            control_name: control_name.into(),
            command_id,
            params,
        }
    }

    pub fn control_name(&self) -> &str {
        &self.control_name
    }

    pub fn command_id(&self) -> u64 {
        self.command_id
    }

    pub fn params(&self) -> &Value {
        &self.params
    }
}

impl Event for CommandEvent {
    fn header(&self) -> &EventHeader {
        &self.header
    }
}
