//! Session: host collaborators shared by every stack of a user
//!
//! Also holds the per-run values threaded between lifecycle phases.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use stackwright_common::template::TemplateEngine;
use stackwright_common::error::UNKNOWN_CONTEXT;
use stackwright_common::{Error, MultiError, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bootstrap::BootstrapLocks;
use crate::config::StackConfig;
use crate::credential::ResolvedCredential;
use crate::dial::{AgentIds, Klients, WaitOutcome};
use crate::engine::{EngineConnection, EngineState};
use crate::host::{
    AgentDialer, CredentialStore, Database, EngineConnector, KeyCreator, UserdataGenerator,
};
use crate::machine::{MachineRef, MachineUpdate};
use crate::template::StackTemplate;
use crate::types::{AuthenticateResponse, PlanResponse, StackRequest};
use crate::userdata::CloudInitGenerator;

/// Host collaborators for one user
pub struct Session {
    /// User the session acts for
    pub username: String,
    /// Runtime configuration
    pub config: StackConfig,
    /// Credential store
    pub credentials: Arc<dyn CredentialStore>,
    /// Host database
    pub database: Arc<dyn Database>,
    /// Execution engine
    pub engine: Arc<dyn EngineConnector>,
    /// Provisioning payload generator
    pub userdata: Arc<dyn UserdataGenerator>,
    /// Connection key issuer
    pub keys: Arc<dyn KeyCreator>,
    /// Reachability dialer
    pub dialer: Arc<dyn AgentDialer>,
    /// Per-credential bootstrap locks, shared across sessions of a process
    pub bootstrap_locks: Arc<BootstrapLocks>,
    /// Template engine for bootstrap templates and resource fields
    pub templates: Arc<TemplateEngine>,
}

impl Session {
    /// Create a builder for a session acting for `username`
    pub fn builder(username: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(username.into())
    }

    /// Resolve `identifiers` through the credential store
    ///
    /// Every identifier must resolve; results keep the order of `identifiers`.
    pub async fn resolve_credentials(
        &self,
        identifiers: &[String],
    ) -> Result<Vec<ResolvedCredential>> {
        let stored = self.credentials.fetch(&self.username, identifiers).await?;
        let mut by_id: BTreeMap<String, _> = stored
            .into_iter()
            .map(|s| (s.identifier.clone(), s))
            .collect();

        identifiers
            .iter()
            .map(|id| {
                let stored = by_id.remove(id).ok_or_else(|| {
                    Error::missing_credential(
                        UNKNOWN_CONTEXT,
                        format!("credential {:?} not found", id),
                    )
                })?;
                ResolvedCredential::from_stored(stored)
            })
            .collect()
    }

    /// Open a scoped engine connection
    pub async fn connect_engine(&self) -> Result<EngineConnection> {
        debug!(user = %self.username, "connecting to engine");
        let client = self.engine.connect().await?;
        Ok(EngineConnection::new(client))
    }
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    username: String,
    config: StackConfig,
    credentials: Option<Arc<dyn CredentialStore>>,
    database: Option<Arc<dyn Database>>,
    engine: Option<Arc<dyn EngineConnector>>,
    userdata: Option<Arc<dyn UserdataGenerator>>,
    keys: Option<Arc<dyn KeyCreator>>,
    dialer: Option<Arc<dyn AgentDialer>>,
    bootstrap_locks: Option<Arc<BootstrapLocks>>,
}

impl SessionBuilder {
    fn new(username: String) -> Self {
        Self {
            username,
            config: StackConfig::default(),
            credentials: None,
            database: None,
            engine: None,
            userdata: None,
            keys: None,
            dialer: None,
            bootstrap_locks: None,
        }
    }

    /// Override the configuration
    pub fn config(mut self, config: StackConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the credential store
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Set the host database
    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    /// Set the engine connector
    pub fn engine(mut self, engine: Arc<dyn EngineConnector>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Override the payload generator (defaults to [`CloudInitGenerator`])
    pub fn userdata(mut self, userdata: Arc<dyn UserdataGenerator>) -> Self {
        self.userdata = Some(userdata);
        self
    }

    /// Set the connection key issuer
    pub fn key_creator(mut self, keys: Arc<dyn KeyCreator>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Set the reachability dialer
    pub fn dialer(mut self, dialer: Arc<dyn AgentDialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Share bootstrap locks with other sessions
    pub fn bootstrap_locks(mut self, locks: Arc<BootstrapLocks>) -> Self {
        self.bootstrap_locks = Some(locks);
        self
    }

    /// Build the session
    ///
    /// Fails when a required collaborator was not set.
    pub fn build(self) -> Result<Session> {
        fn required<T: ?Sized>(value: Option<Arc<T>>, name: &str) -> Result<Arc<T>> {
            value.ok_or_else(|| {
                Error::internal_with_context("session", format!("{} is not configured", name))
            })
        }

        if self.username.is_empty() {
            return Err(Error::validation_for_field("session", "username", "is empty"));
        }

        Ok(Session {
            credentials: required(self.credentials, "credential store")?,
            database: required(self.database, "database")?,
            engine: required(self.engine, "engine connector")?,
            keys: required(self.keys, "key creator")?,
            dialer: required(self.dialer, "agent dialer")?,
            userdata: self
                .userdata
                .unwrap_or_else(|| Arc::new(CloudInitGenerator::default())),
            bootstrap_locks: self.bootstrap_locks.unwrap_or_default(),
            templates: Arc::new(TemplateEngine::new()),
            username: self.username,
            config: self.config,
        })
    }
}

/// Content identifier of a user's stack state
pub fn stack_content_id(username: &str, template_id: &str) -> String {
    format!("{}-{}", username, template_id)
}

/// Everything one apply needs, fixed before the first phase runs
#[derive(Clone, Debug)]
pub struct ApplyRun {
    request: StackRequest,
    template_id: String,
    credentials: Vec<ResolvedCredential>,
    template: StackTemplate,
    content_id: String,
    machines: BTreeMap<String, MachineRef>,
}

impl ApplyRun {
    /// Assemble a run from already resolved parts
    pub fn new(
        request: StackRequest,
        template_id: impl Into<String>,
        credentials: Vec<ResolvedCredential>,
        template: StackTemplate,
        machines: impl IntoIterator<Item = MachineRef>,
    ) -> Self {
        let template_id = template_id.into();
        Self {
            content_id: stack_content_id(&request.username, &template_id),
            request,
            template_id,
            credentials,
            template,
            machines: machines
                .into_iter()
                .map(|m| (m.label.clone(), m))
                .collect(),
        }
    }

    /// Originating request
    pub fn request(&self) -> &StackRequest {
        &self.request
    }

    /// Stack template id
    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    /// Credentials resolved for the template
    pub fn credentials(&self) -> &[ResolvedCredential] {
        &self.credentials
    }

    /// Template with variables filled
    pub fn template(&self) -> &StackTemplate {
        &self.template
    }

    /// Engine content identifier, `{username}-{templateId}`
    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// Machines the host expects, keyed by label
    pub fn machines(&self) -> &BTreeMap<String, MachineRef> {
        &self.machines
    }
}

/// Output of `build_resources`
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResources {
    /// Template with generated provisioning data
    pub template: StackTemplate,
    /// Canonical JSON of `template`
    pub content: String,
    /// Generated agent identifier per instance
    pub ids: AgentIds,
}

/// Reconciliation result of one expected machine
#[derive(Debug)]
pub enum MachineOutcome {
    /// Record written
    Updated(MachineUpdate),
    /// Machine belongs to another provider
    Skipped {
        /// Provider of the machine
        provider: String,
    },
    /// Machine could not be reconciled
    Failed(Error),
}

/// Per-machine outcome of `update_resources`
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Outcome per machine label
    pub outcomes: BTreeMap<String, MachineOutcome>,
    /// Failures not tied to an expected machine
    pub problems: Vec<Error>,
}

impl ReconcileReport {
    /// Record the outcome of one machine
    pub fn record(&mut self, label: impl Into<String>, outcome: MachineOutcome) {
        self.outcomes.insert(label.into(), outcome);
    }

    /// Record a failure not tied to an expected machine
    pub fn push_problem(&mut self, err: Error) {
        self.problems.push(err);
    }

    /// Labels whose record was written
    pub fn updated(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|(label, outcome)| match outcome {
            MachineOutcome::Updated(_) => Some(label.as_str()),
            _ => None,
        })
    }

    /// Labels that failed
    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|(label, outcome)| match outcome {
            MachineOutcome::Failed(_) => Some(label.as_str()),
            _ => None,
        })
    }

    /// `Ok(())` when nothing failed, otherwise every failure as one aggregate
    pub fn into_result(self) -> Result<()> {
        let failures = self.outcomes.into_values().filter_map(|outcome| match outcome {
            MachineOutcome::Failed(err) => Some(err),
            _ => None,
        });
        failures
            .chain(self.problems)
            .collect::<MultiError>()
            .into_result()
    }
}

/// The lifecycle a provider implements
#[async_trait]
pub trait Stack: Send + Sync {
    /// Verify the request's credentials
    async fn authenticate(&self, request: &StackRequest) -> Result<AuthenticateResponse>;

    /// Provision the shared resources of a credential
    async fn bootstrap(&self, request: &StackRequest) -> Result<bool>;

    /// Compute the machines a template would build
    async fn plan(&self, request: &StackRequest) -> Result<PlanResponse>;

    /// Inject provisioning data into the run's template
    async fn build_resources(&self, run: &ApplyRun) -> Result<BuiltResources>;

    /// Wait for every built instance to become reachable
    async fn wait_resources(&self, built: &BuiltResources, cancel: &CancellationToken)
        -> WaitOutcome;

    /// Persist the realized state into machine records
    async fn update_resources(
        &self,
        run: &ApplyRun,
        state: &EngineState,
        klients: &Klients,
    ) -> ReconcileReport;
}
