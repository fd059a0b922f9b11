//! The `example` provider
//!
//! A template for real providers: it declares `example_instance` resources,
//! bootstraps shared resources per credential and hands every instance a
//! cloud-init payload that registers its agent.

mod cred;
mod machine;
mod stack;

use std::sync::Arc;

use async_trait::async_trait;
use stackwright_common::{Error, Result, EXAMPLE_PROVIDER};
use tracing::debug;

pub use cred::{Cred, Meta, BOOTSTRAP_OUTPUT};
pub use machine::ExampleMachine;
pub use stack::{
    ExampleStack, BOOTSTRAP_ATTRIBUTE, EXAMPLE_VARIABLE_PREFIX, USER_DATA_ATTRIBUTE,
    USER_INPUT_PREFIX,
};

use crate::credential::Credential;
use crate::machine::Metadata;
use crate::provider::{Machine, Provider};
use crate::session::{Session, Stack};

/// Resource type of `example` machines
pub const RESOURCE_TYPE: &str = "instance";

/// Provider registration for `example`
#[derive(Clone, Copy, Debug, Default)]
pub struct ExampleProvider;

#[async_trait]
impl Provider for ExampleProvider {
    fn name(&self) -> &str {
        EXAMPLE_PROVIDER
    }

    fn resource_type(&self) -> &str {
        RESOURCE_TYPE
    }

    fn new_credential(&self) -> Credential {
        Credential::Example(Cred::default())
    }

    fn stack(&self, session: Arc<Session>) -> Box<dyn Stack> {
        Box::new(ExampleStack::new(session))
    }

    async fn machine(&self, session: Arc<Session>, id: &str) -> Result<Box<dyn Machine>> {
        let record = session.database.machine(id).await?.ok_or_else(|| {
            Error::validation_for_field("machine", "id", format!("machine {:?} not found", id))
        })?;

        if record.provider != EXAMPLE_PROVIDER {
            return Err(Error::validation_for(
                "machine",
                format!(
                    "machine {:?} belongs to provider {:?}",
                    record.label, record.provider
                ),
            ));
        }

        let meta = match Metadata::decode(&record.provider, record.meta)? {
            Metadata::Example(meta) => meta,
        };
        meta.valid()?;

        let credentials = session
            .resolve_credentials(std::slice::from_ref(&record.credential))
            .await?;
        let cred = credentials
            .into_iter()
            .find_map(|c| match c.payload {
                Credential::Example(cred) => Some(cred),
                _ => None,
            })
            .ok_or_else(|| {
                Error::missing_credential(
                    EXAMPLE_PROVIDER,
                    format!("credential {:?} is not an example credential", record.credential),
                )
            })?;
        cred.valid()?;

        debug!(label = %record.label, "machine handle created");
        Ok(Box::new(ExampleMachine::new(record.label, cred, meta)))
    }
}
