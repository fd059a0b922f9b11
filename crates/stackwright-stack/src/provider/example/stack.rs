//! Stack lifecycle of the `example` provider
//!
//! Phases run in order for one apply: `build_resources` prepares the
//! template, the engine applies it, `wait_resources` dials the new agents and
//! `update_resources` writes the realized state back. `authenticate`,
//! `bootstrap` and `plan` are independent requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use stackwright_common::{Error, Result, CUSTOM_PROVIDER, EXAMPLE_PROVIDER};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::cred::{Cred, Meta};
use super::RESOURCE_TYPE;
use crate::bootstrap::{bootstrap_content_id, render_bootstrap_template};
use crate::credential::ResolvedCredential;
use crate::dial::{dial_agents, AgentIds, Klients, WaitOutcome};
use crate::engine::{EngineRequest, EngineState};
use crate::host::StackTemplateRecord;
use crate::machine::{MachineRef, MachineUpdate, Metadata};
use crate::plan::Planner;
use crate::session::{
    stack_content_id, ApplyRun, BuiltResources, MachineOutcome, ReconcileReport, Session, Stack,
};
use crate::template::StackTemplate;
use crate::types::{
    AuthenticateRequest, AuthenticateResponse, AuthenticateResult, BootstrapRequest,
    PlanRequest, PlanResponse, StackRequest,
};
use crate::userdata::CloudInitConfig;

/// Variables filled from `custom` credentials
pub const USER_INPUT_PREFIX: &str = "userInput_";

/// Variables filled from the `example` credential
pub const EXAMPLE_VARIABLE_PREFIX: &str = "example_";

/// Instance attribute referencing the bootstrap output
pub const BOOTSTRAP_ATTRIBUTE: &str = "bootstrapID";

/// Instance attribute carrying the provisioning payload
pub const USER_DATA_ATTRIBUTE: &str = "example_data";

/// Lifecycle controller for `example` stacks
pub struct ExampleStack {
    session: Arc<Session>,
    planner: Planner,
}

impl ExampleStack {
    /// Controller bound to `session`
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            planner: Planner::new(EXAMPLE_PROVIDER, RESOURCE_TYPE),
        }
    }

    /// Resolve a stack template and its credentials into an apply run
    pub async fn prepare_apply(
        &self,
        request: StackRequest,
        template_id: &str,
        machines: Vec<MachineRef>,
    ) -> Result<ApplyRun> {
        let record = self.stack_template(template_id).await?;
        let credentials = self.session.resolve_credentials(&record.credentials).await?;
        let mut template = StackTemplate::parse(&record.template)?;
        fill_template_variables(&mut template, &credentials)?;

        Ok(ApplyRun::new(
            request,
            template_id,
            credentials,
            template,
            machines,
        ))
    }

    async fn stack_template(&self, id: &str) -> Result<StackTemplateRecord> {
        self.session
            .database
            .stack_template(id)
            .await?
            .ok_or_else(|| {
                Error::validation_for_field(
                    "stack template",
                    "stackTemplateId",
                    format!("stack template {:?} not found", id),
                )
            })
    }
}

/// The single `example` credential among `credentials`
fn example_credential(credentials: &[ResolvedCredential]) -> Result<(&str, &Cred)> {
    let mut found = credentials.iter().filter_map(|c| {
        c.payload
            .as_example()
            .map(|cred| (c.identifier.as_str(), cred))
    });

    let first = found.next().ok_or_else(|| {
        Error::missing_credential(EXAMPLE_PROVIDER, "no example credential provided")
    })?;
    if found.next().is_some() {
        return Err(Error::validation_for_field(
            "credentials",
            "identifiers",
            "more than one example credential provided",
        ));
    }
    Ok(first)
}

/// Fill `userInput_*` then `example_*` variables
fn fill_template_variables(
    template: &mut StackTemplate,
    credentials: &[ResolvedCredential],
) -> Result<()> {
    let user_inputs: BTreeMap<String, String> = credentials
        .iter()
        .filter(|c| c.provider == CUSTOM_PROVIDER)
        .filter_map(|c| c.payload.as_custom())
        .flat_map(|values| values.clone())
        .collect();
    template.fill_variables(USER_INPUT_PREFIX, &user_inputs)?;

    let example_values = credentials
        .iter()
        .find_map(|c| c.payload.as_example())
        .map(|cred| {
            BTreeMap::from([
                ("access_key".to_string(), cred.access_key.clone()),
                ("secret_key".to_string(), cred.secret_key.clone()),
                ("bootstrap_id".to_string(), cred.bootstrap_id.clone()),
            ])
        })
        .unwrap_or_default();
    template.fill_variables(EXAMPLE_VARIABLE_PREFIX, &example_values)
}

fn has_bootstrap_reference(block: &Map<String, Value>) -> bool {
    block
        .get(BOOTSTRAP_ATTRIBUTE)
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty())
}

#[async_trait]
impl Stack for ExampleStack {
    #[instrument(skip(self, request), fields(user = %request.username, trace_id = %request.trace_id))]
    async fn authenticate(&self, request: &StackRequest) -> Result<AuthenticateResponse> {
        let args: AuthenticateRequest = request.decode_args("authenticate request")?;
        let credentials = self.session.resolve_credentials(&args.identifiers).await?;

        // Earlier verifications stay written when a later credential fails.
        let mut response = AuthenticateResponse::new();
        for cred in &credentials {
            cred.payload.validate()?;
            self.session
                .database
                .set_verified(&cred.identifier, true)
                .await?;
            debug!(identifier = %cred.identifier, "credential verified");
            response.insert(
                cred.identifier.clone(),
                AuthenticateResult {
                    verified: true,
                    message: None,
                },
            );
        }

        info!(count = response.len(), "credentials authenticated");
        Ok(response)
    }

    #[instrument(skip(self, request), fields(user = %request.username, trace_id = %request.trace_id))]
    async fn bootstrap(&self, request: &StackRequest) -> Result<bool> {
        let args: BootstrapRequest = request.decode_args("bootstrap request")?;
        let credentials = self.session.resolve_credentials(&args.identifiers).await?;
        let (identifier, cred) = example_credential(&credentials)?;
        cred.valid()?;

        let _guard = self.session.bootstrap_locks.lock(identifier).await;

        let content = render_bootstrap_template(
            &self.session.templates,
            &self.session.config.bootstrap_template,
            EXAMPLE_PROVIDER,
            &args.group_name,
            identifier,
            cred,
        )?;
        let content_id = bootstrap_content_id(EXAMPLE_PROVIDER, &args.group_name, identifier);
        info!(%content_id, "applying bootstrap template");

        let state = {
            let engine = self.session.connect_engine().await?;
            engine
                .apply(&EngineRequest {
                    content,
                    content_id,
                    trace_id: request.trace_id.clone(),
                })
                .await?
        };

        let mut cred = cred.clone();
        cred.decode_bootstrap_outputs(&state)?;

        let data = BTreeMap::from([(identifier.to_string(), serde_json::to_value(&cred)?)]);
        self.session
            .credentials
            .put(&self.session.username, data)
            .await?;

        info!(identifier, bootstrap_id = %cred.bootstrap_id, "bootstrap complete");
        Ok(true)
    }

    #[instrument(skip(self, request), fields(user = %request.username, trace_id = %request.trace_id))]
    async fn plan(&self, request: &StackRequest) -> Result<PlanResponse> {
        let args: PlanRequest = request.decode_args("plan request")?;
        let record = self.stack_template(&args.stack_template_id).await?;
        let credentials = self.session.resolve_credentials(&record.credentials).await?;

        let engine = self.session.connect_engine().await?;
        let content_id = stack_content_id(&request.username, &args.stack_template_id);

        let mut template = StackTemplate::parse(&record.template)?;
        fill_template_variables(&mut template, &credentials)?;
        let content = template.to_json()?;

        debug!(%content_id, "requesting plan");
        let plan = engine
            .plan(&EngineRequest {
                content,
                content_id,
                trace_id: request.trace_id.clone(),
            })
            .await?;

        let machines = self.planner.machines_from_plan(&plan);
        info!(machines = machines.len(), "plan computed");
        Ok(PlanResponse { machines })
    }

    #[instrument(skip(self, run), fields(content_id = %run.content_id()))]
    async fn build_resources(&self, run: &ApplyRun) -> Result<BuiltResources> {
        let (_, cred) = example_credential(run.credentials())?;
        let full_type = self.planner.full_type();
        let engine = &self.session.templates;

        let mut template = run.template().clone();
        let mut blocks: BTreeMap<String, Map<String, Value>> =
            template.decode_resources(&full_type)?;
        let mut ids = AgentIds::new();

        for (name, block) in blocks.iter_mut() {
            if !has_bootstrap_reference(block) {
                if !cred.is_bootstrapped() {
                    return Err(Error::missing_credential(
                        EXAMPLE_PROVIDER,
                        format!("credential is not bootstrapped, required by {:?}", name),
                    ));
                }
                block.insert(
                    BOOTSTRAP_ATTRIBUTE.to_string(),
                    Value::String(cred.bootstrap_id.clone()),
                );
            }

            let agent_id = Uuid::new_v4().to_string();
            let agent_key = self
                .session
                .keys
                .create(&self.session.username, &agent_id)
                .await?;

            // Embedded as written: `${var.*}` references resolve in the payload
            // pass below, and unresolvable ones fail here first.
            let user_data = match block.get(USER_DATA_ATTRIBUTE) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(raw)) => {
                    template.interpolate(engine, raw)?;
                    raw.clone()
                }
                Some(_) => {
                    return Err(Error::validation_for_field(
                        format!("{}.{}", full_type, name),
                        USER_DATA_ATTRIBUTE,
                        "must be a string",
                    ))
                }
            };

            let payload = self.session.userdata.generate(&CloudInitConfig {
                username: self.session.username.clone(),
                groups: self.session.config.admin_groups.clone(),
                hostname: self.session.username.clone(),
                agent_id: agent_id.clone(),
                agent_key,
                user_data,
            })?;
            let payload = template.interpolate(engine, &payload)?;
            block.insert(USER_DATA_ATTRIBUTE.to_string(), Value::String(payload));

            debug!(instance = %name, %agent_id, "instance prepared");
            ids.insert(name.clone(), agent_id);
        }

        template.set_resources(&full_type, &blocks)?;
        let content = template.to_json()?;

        info!(instances = ids.len(), "resources built");
        Ok(BuiltResources {
            template,
            content,
            ids,
        })
    }

    #[instrument(skip(self, built, cancel), fields(instances = built.ids.len()))]
    async fn wait_resources(
        &self,
        built: &BuiltResources,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        dial_agents(
            self.session.dialer.as_ref(),
            &built.ids,
            &self.session.config.dial,
            cancel,
        )
        .await
    }

    #[instrument(skip(self, run, state, klients), fields(content_id = %run.content_id()))]
    async fn update_resources(
        &self,
        run: &ApplyRun,
        state: &EngineState,
        klients: &Klients,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mapped = self.planner.machines_from_state(state, klients);

        // Problems naming a machine become that machine's outcome when it is expected
        let mut unusable: BTreeMap<String, Error> = BTreeMap::new();
        for problem in mapped.problems {
            warn!(error = %problem, "unusable state resource");
            match problem.machine().map(str::to_string) {
                Some(label) if !unusable.contains_key(&label) => {
                    unusable.insert(label, problem);
                }
                _ => report.push_problem(problem),
            }
        }

        let credential = run
            .credentials()
            .iter()
            .find(|c| c.payload.as_example().is_some())
            .map(|c| c.identifier.clone())
            .unwrap_or_default();

        for (label, expected) in run.machines() {
            if expected.provider != EXAMPLE_PROVIDER {
                if let Some(problem) = unusable.remove(label) {
                    report.push_problem(problem);
                }
                report.record(
                    label.clone(),
                    MachineOutcome::Skipped {
                        provider: expected.provider.clone(),
                    },
                );
                continue;
            }

            if let Some(problem) = unusable.remove(label) {
                report.record(label.clone(), MachineOutcome::Failed(problem));
                continue;
            }

            let Some(machine) = mapped.machines.get(label) else {
                warn!(%label, "machine missing from engine state");
                report.record(
                    label.clone(),
                    MachineOutcome::Failed(Error::reconciliation(
                        label.clone(),
                        format!("machine {:?} does not exist in engine state", label),
                    )),
                );
                continue;
            };

            let update = MachineUpdate {
                credential: credential.clone(),
                provider: EXAMPLE_PROVIDER.to_string(),
                query_string: machine.query_string.clone(),
                ip_address: machine
                    .attributes
                    .get("public_ip")
                    .cloned()
                    .unwrap_or_default(),
                modified_at: Utc::now(),
                state: machine.state.to_string(),
                reason: machine.state_reason.clone(),
                meta: Metadata::Example(Meta {
                    always_on: false,
                    example_id: machine
                        .attributes
                        .get("example_id")
                        .cloned()
                        .unwrap_or_default(),
                }),
            };

            match self
                .session
                .database
                .update_machine(&expected.object_id, &update)
                .await
            {
                Ok(()) => {
                    debug!(%label, state = %update.state, "machine updated");
                    report.record(label.clone(), MachineOutcome::Updated(update));
                }
                Err(err) => {
                    warn!(%label, error = %err, "failed to update machine");
                    report.record(label.clone(), MachineOutcome::Failed(err));
                }
            }
        }

        for problem in unusable.into_values() {
            report.push_problem(problem);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{
        EngineClient, MockAgentDialer, MockCredentialStore, MockDatabase, MockEngineClient,
        MockEngineConnector, MockKeyCreator, MockUserdataGenerator, StoredCredential,
    };
    use serde_json::json;

    struct Mocks {
        store: MockCredentialStore,
        database: MockDatabase,
        engine: MockEngineConnector,
        keys: MockKeyCreator,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                store: MockCredentialStore::new(),
                database: MockDatabase::new(),
                engine: MockEngineConnector::new(),
                keys: MockKeyCreator::new(),
            }
        }

        fn stack(self) -> ExampleStack {
            let session = Session::builder("alice")
                .credential_store(Arc::new(self.store))
                .database(Arc::new(self.database))
                .engine(Arc::new(self.engine))
                .key_creator(Arc::new(self.keys))
                .dialer(Arc::new(MockAgentDialer::new()))
                .build()
                .expect("session should build");
            ExampleStack::new(Arc::new(session))
        }
    }

    fn example(identifier: &str, secret: &str, bootstrap_id: &str) -> StoredCredential {
        StoredCredential {
            identifier: identifier.into(),
            provider: "example".into(),
            data: json!({"accessKey": "AKID", "secretKey": secret, "bootstrapID": bootstrap_id}),
        }
    }

    fn request(method: &str, args: Value) -> StackRequest {
        StackRequest {
            method: method.into(),
            username: "alice".into(),
            group_name: "g1".into(),
            trace_id: "trace-1".into(),
            args,
        }
    }

    fn resolved(stored: StoredCredential) -> ResolvedCredential {
        ResolvedCredential::from_stored(stored).unwrap()
    }

    #[test]
    fn test_example_credential_selection() {
        let custom = resolved(StoredCredential {
            identifier: "inputs".into(),
            provider: "custom".into(),
            data: json!({"region": "eu"}),
        });
        let one = resolved(example("cred-1", "s", ""));
        let two = resolved(example("cred-2", "s", ""));

        assert_eq!(
            example_credential(&[custom.clone(), one.clone()]).unwrap().0,
            "cred-1"
        );
        assert!(matches!(
            example_credential(&[custom]),
            Err(Error::MissingCredential { .. })
        ));
        assert!(matches!(
            example_credential(&[one, two]),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_fill_template_variables_from_credentials() {
        let mut template = StackTemplate::parse(
            &json!({
                "variable": {
                    "userInput_region": {},
                    "example_access_key": {},
                    "example_bootstrap_id": {}
                }
            })
            .to_string(),
        )
        .unwrap();
        let credentials = vec![
            resolved(StoredCredential {
                identifier: "inputs".into(),
                provider: "custom".into(),
                data: json!({"region": "eu-west-1"}),
            }),
            resolved(example("cred-1", "s", "vpc-1")),
        ];

        fill_template_variables(&mut template, &credentials).unwrap();
        let vars = template.variables();
        assert_eq!(vars["userInput_region"], "eu-west-1");
        assert_eq!(vars["example_access_key"], "AKID");
        assert_eq!(vars["example_bootstrap_id"], "vpc-1");
    }

    #[tokio::test]
    async fn test_authenticate_rejects_malformed_request_before_lookup() {
        let mut mocks = Mocks::new();
        mocks.store.expect_fetch().never();
        mocks.database.expect_set_verified().never();

        let err = mocks
            .stack()
            .authenticate(&request("authenticate", json!({"groupName": "", "identifiers": ["c"]})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn test_authenticate_keeps_earlier_verifications() {
        let mut mocks = Mocks::new();
        mocks.store.expect_fetch().returning(|_, _| {
            Ok(vec![example("cred-1", "s", ""), example("cred-2", "", "")])
        });
        mocks
            .database
            .expect_set_verified()
            .withf(|id, verified| id == "cred-1" && *verified)
            .times(1)
            .returning(|_, _| Ok(()));

        let err = mocks
            .stack()
            .authenticate(&request(
                "authenticate",
                json!({"groupName": "g1", "identifiers": ["cred-1", "cred-2"]}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_bootstrap_engine_failure_leaves_store_untouched() {
        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_fetch()
            .returning(|_, _| Ok(vec![example("cred-1", "s", "")]));
        mocks.store.expect_put().never();
        mocks.engine.expect_connect().times(1).returning(|| {
            let mut client = MockEngineClient::new();
            client
                .expect_apply()
                .returning(|_| Err(Error::engine("apply", "quota exceeded")));
            client.expect_close().times(1).return_const(());
            Ok(Box::new(client) as Box<dyn EngineClient>)
        });

        let err = mocks
            .stack()
            .bootstrap(&request(
                "bootstrap",
                json!({"groupName": "g1", "identifiers": ["cred-1"]}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "engine error [apply]: quota exceeded");
    }

    #[tokio::test]
    async fn test_plan_unknown_template_is_validation_error() {
        let mut mocks = Mocks::new();
        mocks
            .database
            .expect_stack_template()
            .returning(|_| Ok(None));
        mocks.engine.expect_connect().never();

        let err = mocks
            .stack()
            .plan(&request(
                "plan",
                json!({"stackTemplateId": "tpl-9", "groupName": "g1"}),
            ))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stack template"));
        assert!(err.to_string().contains("tpl-9"));
    }

    #[tokio::test]
    async fn test_build_resources_requires_bootstrap_output() {
        let mut mocks = Mocks::new();
        mocks.keys.expect_create().never();
        let stack = mocks.stack();

        let run = ApplyRun::new(
            request("apply", Value::Null),
            "tpl-1",
            vec![resolved(example("cred-1", "s", ""))],
            StackTemplate::parse(
                &json!({"resource": {"example_instance": {"web-1": {}}}}).to_string(),
            )
            .unwrap(),
            Vec::new(),
        );

        let err = stack.build_resources(&run).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_build_resources_rejects_non_string_user_data() {
        let mut mocks = Mocks::new();
        mocks
            .keys
            .expect_create()
            .returning(|_, _| Ok("key".to_string()));
        let stack = mocks.stack();

        let run = ApplyRun::new(
            request("apply", Value::Null),
            "tpl-1",
            vec![resolved(example("cred-1", "s", "vpc-1"))],
            StackTemplate::parse(
                &json!({"resource": {"example_instance": {"web-1": {"example_data": 42}}}})
                    .to_string(),
            )
            .unwrap(),
            Vec::new(),
        );

        let err = stack.build_resources(&run).await.unwrap_err();
        match err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some(USER_DATA_ATTRIBUTE))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_build_resources_resolves_variables_in_generated_payload() {
        let mut keys = MockKeyCreator::new();
        keys.expect_create().returning(|_, _| Ok("key".to_string()));
        let mut userdata = MockUserdataGenerator::new();
        userdata
            .expect_generate()
            .withf(|cfg| cfg.user_data == "echo ${var.userInput_region} ${example_bootstrap.main.id}")
            .times(1)
            .returning(|cfg| Ok(format!("#cloud-config\n{}\nregion: ${{var.userInput_region}}", cfg.user_data)));

        let session = Session::builder("alice")
            .credential_store(Arc::new(MockCredentialStore::new()))
            .database(Arc::new(MockDatabase::new()))
            .engine(Arc::new(MockEngineConnector::new()))
            .key_creator(Arc::new(keys))
            .dialer(Arc::new(MockAgentDialer::new()))
            .userdata(Arc::new(userdata))
            .build()
            .unwrap();
        let stack = ExampleStack::new(Arc::new(session));

        let run = ApplyRun::new(
            request("apply", Value::Null),
            "tpl-1",
            vec![resolved(example("cred-1", "s", "vpc-1"))],
            StackTemplate::parse(
                &json!({
                    "variable": {"userInput_region": {"default": "eu-west-1"}},
                    "resource": {"example_instance": {"web-1": {
                        "example_data": "echo ${var.userInput_region} ${example_bootstrap.main.id}"
                    }}}
                })
                .to_string(),
            )
            .unwrap(),
            Vec::new(),
        );

        let built = stack.build_resources(&run).await.unwrap();
        let blocks: BTreeMap<String, Map<String, Value>> =
            built.template.decode_resources("example_instance").unwrap();
        assert_eq!(
            blocks["web-1"][USER_DATA_ATTRIBUTE],
            "#cloud-config\necho eu-west-1 ${example_bootstrap.main.id}\nregion: eu-west-1"
        );
    }

    #[tokio::test]
    async fn test_build_resources_rejects_undefined_script_variable() {
        let mut mocks = Mocks::new();
        mocks
            .keys
            .expect_create()
            .returning(|_, _| Ok("key".to_string()));
        let stack = mocks.stack();

        let run = ApplyRun::new(
            request("apply", Value::Null),
            "tpl-1",
            vec![resolved(example("cred-1", "s", "vpc-1"))],
            StackTemplate::parse(
                &json!({"resource": {"example_instance": {"web-1": {
                    "example_data": "echo ${var.userInput_missing}"
                }}}})
                .to_string(),
            )
            .unwrap(),
            Vec::new(),
        );

        let err = stack.build_resources(&run).await.unwrap_err();
        assert!(err.to_string().contains("var.userInput_missing"));
    }
}
