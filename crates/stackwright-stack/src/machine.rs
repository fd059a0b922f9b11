//! Machine records and states

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackwright_common::{Error, Result, EXAMPLE_PROVIDER};

use crate::provider::example::Meta;

/// Lifecycle state of a machine as shown to users
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineState {
    /// Planned but never built
    #[default]
    NotInitialized,
    /// Being built
    Building,
    /// Booting
    Starting,
    /// Up and reachable
    Running,
    /// Shutting down
    Stopping,
    /// Built but not reachable
    Stopped,
    /// Being destroyed
    Terminating,
    /// Destroyed
    Terminated,
    /// No information
    Unknown,
}

impl MachineState {
    /// String form stored in machine records
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::NotInitialized => "NotInitialized",
            MachineState::Building => "Building",
            MachineState::Starting => "Starting",
            MachineState::Running => "Running",
            MachineState::Stopping => "Stopping",
            MachineState::Stopped => "Stopped",
            MachineState::Terminating => "Terminating",
            MachineState::Terminated => "Terminated",
            MachineState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A machine derived from a plan or a state snapshot
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDescriptor {
    /// Provider name
    pub provider: String,
    /// Resource name in the stack template
    pub label: String,
    /// Region attribute, empty when unknown
    pub region: String,
    /// Query string that finds the machine's agent
    pub query_string: String,
    /// Current state
    pub state: MachineState,
    /// Why the machine is in that state
    pub state_reason: String,
    /// All resource attributes
    pub attributes: BTreeMap<String, String>,
}

/// A machine the host expects a stack to contain
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineRef {
    /// Database object id
    pub object_id: String,
    /// Resource name in the stack template
    pub label: String,
    /// Provider name
    pub provider: String,
}

/// Provider specific machine metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metadata {
    /// Metadata of `example` machines
    Example(Meta),
}

impl Metadata {
    /// Decode raw metadata of a machine built by `provider`
    pub fn decode(provider: &str, raw: serde_json::Value) -> Result<Self> {
        match provider {
            EXAMPLE_PROVIDER => serde_json::from_value(raw)
                .map(Metadata::Example)
                .map_err(|e| Error::serialization_for_kind("machine metadata", e.to_string())),
            other => Err(Error::validation_for(
                "machine metadata",
                format!("unsupported provider {:?}", other),
            )),
        }
    }

    /// Validate the metadata
    pub fn validate(&self) -> Result<()> {
        match self {
            Metadata::Example(meta) => meta.valid(),
        }
    }

    /// The `example` metadata, if this is one
    pub fn as_example(&self) -> Option<&Meta> {
        match self {
            Metadata::Example(meta) => Some(meta),
        }
    }
}

/// Fields written to a machine record on reconciliation
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineUpdate {
    /// Identifier of the credential the machine was built with
    pub credential: String,
    /// Provider name
    pub provider: String,
    /// Query string that finds the machine's agent
    pub query_string: String,
    /// Public address
    pub ip_address: String,
    /// When the record was reconciled
    pub modified_at: DateTime<Utc>,
    /// State string, see [`MachineState::as_str`]
    pub state: String,
    /// Why the machine is in that state
    pub reason: String,
    /// Provider specific metadata
    pub meta: Metadata,
}

/// Live status reported by a machine handle
#[derive(Clone, Debug, PartialEq)]
pub struct MachineInfo {
    /// Current state
    pub state: MachineState,
    /// Free form reason, empty when not applicable
    pub reason: String,
}
