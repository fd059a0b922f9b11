//! Execution engine requests, plans and state snapshots
//!
//! The engine itself is external; Stackwright only submits rendered templates
//! and reads back the planned resources or the realized state.

use std::collections::BTreeMap;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::host::EngineClient;

/// A rendered template submitted for plan or apply
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRequest {
    /// Canonical JSON template
    pub content: String,
    /// Identifier the engine stores the content and state under
    pub content_id: String,
    /// Trace id of the originating host request
    pub trace_id: String,
}

/// A resource the engine would create or change
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannedResource {
    /// Resource type, e.g. `example_instance`
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource name within the template
    pub name: String,
    /// Attributes known at plan time
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Result of a plan request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanOutput {
    /// Planned resources in engine order
    #[serde(default)]
    pub resources: Vec<PlannedResource>,
}

/// A realized resource
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateResource {
    /// Resource type, e.g. `example_instance`
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource name within the template
    pub name: String,
    /// Flattened primary attributes (`id`, `public_ip`, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// State snapshot returned by an apply
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    /// Root module outputs
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Realized resources
    #[serde(default)]
    pub resources: Vec<StateResource>,
}

impl EngineState {
    /// Find a resource by type and name
    pub fn resource(&self, resource_type: &str, name: &str) -> Option<&StateResource> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Read a root output as a string
    ///
    /// Accepts both a bare value and the `{"value": ...}` output envelope.
    pub fn output(&self, name: &str) -> Option<String> {
        let raw = self.outputs.get(name)?;
        let value = raw.get("value").unwrap_or(raw);
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// A connected engine client that is closed when dropped
///
/// Every exit path of a phase, including `?` on errors, releases the client.
pub struct EngineConnection {
    client: Box<dyn EngineClient>,
}

impl EngineConnection {
    /// Wrap a freshly connected client
    pub fn new(client: Box<dyn EngineClient>) -> Self {
        Self { client }
    }
}

impl Deref for EngineConnection {
    type Target = dyn EngineClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl Drop for EngineConnection {
    fn drop(&mut self) {
        debug!("closing engine connection");
        self.client.close();
    }
}
