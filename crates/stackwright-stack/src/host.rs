//! Host contract
//!
//! Everything Stackwright needs from the embedding host is expressed as a
//! trait so that lifecycle code can be exercised with mocks or in-memory
//! implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use stackwright_common::Error;

use crate::engine::{EngineRequest, EngineState, PlanOutput};
use crate::machine::MachineUpdate;
use crate::userdata::CloudInitConfig;

/// Credential payload as held by the credential store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Credential identifier
    pub identifier: String,
    /// Provider the credential belongs to (`example`, `custom`, ...)
    pub provider: String,
    /// Raw payload
    pub data: serde_json::Value,
}

/// Stack template record owned by the host database
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackTemplateRecord {
    /// Template id
    pub id: String,
    /// JSON form of the declarative template
    pub template: String,
    /// Identifiers of the credentials the template uses
    #[serde(default)]
    pub credentials: Vec<String>,
}

/// Machine record owned by the host database
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineRecord {
    /// Database object id
    pub object_id: String,
    /// Resource name in the stack template
    pub label: String,
    /// Provider name
    pub provider: String,
    /// Identifier of the credential the machine was built with
    pub credential: String,
    /// Provider specific metadata
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Per-user secret storage
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the payloads for `identifiers`
    ///
    /// Identifiers that are unknown to the store are simply absent from the
    /// result.
    async fn fetch(
        &self,
        username: &str,
        identifiers: &[String],
    ) -> Result<Vec<StoredCredential>, Error>;

    /// Write payloads keyed by credential identifier
    async fn put(
        &self,
        username: &str,
        data: BTreeMap<String, serde_json::Value>,
    ) -> Result<(), Error>;
}

/// Host database access
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Database: Send + Sync {
    /// Load a stack template by id
    async fn stack_template(&self, id: &str) -> Result<Option<StackTemplateRecord>, Error>;

    /// Set the verification flag of a credential
    async fn set_verified(&self, identifier: &str, verified: bool) -> Result<(), Error>;

    /// Load a machine record by object id
    async fn machine(&self, id: &str) -> Result<Option<MachineRecord>, Error>;

    /// Persist the reconciled fields of a machine
    async fn update_machine(&self, object_id: &str, update: &MachineUpdate) -> Result<(), Error>;
}

/// Factory for engine connections
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EngineConnector: Send + Sync {
    /// Open a new client
    async fn connect(&self) -> Result<Box<dyn EngineClient>, Error>;
}

/// A connected execution engine client
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Compute a plan without side effects
    async fn plan(&self, request: &EngineRequest) -> Result<PlanOutput, Error>;

    /// Apply the template and return the resulting state
    async fn apply(&self, request: &EngineRequest) -> Result<EngineState, Error>;

    /// Release the client
    fn close(&self);
}

/// Generates the provisioning payload an instance runs on first boot
#[cfg_attr(test, automock)]
pub trait UserdataGenerator: Send + Sync {
    /// Render the payload for one instance
    fn generate(&self, config: &CloudInitConfig) -> Result<String, Error>;
}

/// Issues the key an agent uses to connect back to the host
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyCreator: Send + Sync {
    /// Create a key for `agent_id` owned by `username`
    async fn create(&self, username: &str, agent_id: &str) -> Result<String, Error>;
}

/// Single reachability attempt against an agent
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AgentDialer: Send + Sync {
    /// Try to reach the agent once
    async fn dial(&self, agent_id: &str) -> Result<(), Error>;
}
