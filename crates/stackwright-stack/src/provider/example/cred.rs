//! Credential and instance metadata of the `example` provider

use std::fmt;

use serde::{Deserialize, Serialize};
use stackwright_common::{Error, Result, EXAMPLE_PROVIDER};

use crate::engine::EngineState;

/// Name of the bootstrap output carrying the shared resource id
pub const BOOTSTRAP_OUTPUT: &str = "bootstrapID";

/// Alternate spelling accepted for [`BOOTSTRAP_OUTPUT`]
const BOOTSTRAP_OUTPUT_ALIAS: &str = "bootstrap_id";

/// Secret material for the `example` provider
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cred {
    /// Access key
    #[serde(default)]
    pub access_key: String,
    /// Secret key
    #[serde(default)]
    pub secret_key: String,
    /// Output of the bootstrap apply, empty until bootstrapped
    #[serde(
        rename = "bootstrapID",
        alias = "bootstrap_id",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub bootstrap_id: String,
}

impl fmt::Debug for Cred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cred")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("bootstrap_id", &self.bootstrap_id)
            .finish()
    }
}

impl Cred {
    /// Fails when either key is empty
    pub fn valid(&self) -> Result<()> {
        if self.access_key.is_empty() {
            return Err(Error::missing_credential(
                EXAMPLE_PROVIDER,
                "access key is empty",
            ));
        }
        if self.secret_key.is_empty() {
            return Err(Error::missing_credential(
                EXAMPLE_PROVIDER,
                "secret key is empty",
            ));
        }
        Ok(())
    }

    /// Whether bootstrap has already populated this credential
    pub fn is_bootstrapped(&self) -> bool {
        !self.bootstrap_id.is_empty()
    }

    /// Copy the bootstrap output from an applied state into the credential
    pub fn decode_bootstrap_outputs(&mut self, state: &EngineState) -> Result<()> {
        let output = state
            .output(BOOTSTRAP_OUTPUT)
            .or_else(|| state.output(BOOTSTRAP_OUTPUT_ALIAS))
            .unwrap_or_default();

        if output.is_empty() {
            return Err(Error::engine(
                "bootstrap",
                format!("bootstrap output {:?} is empty", BOOTSTRAP_OUTPUT),
            ));
        }

        self.bootstrap_id = output;
        Ok(())
    }
}

/// Metadata stored on machine records built by the `example` provider
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Keep the instance running when idle
    #[serde(rename = "alwaysOn", default)]
    pub always_on: bool,
    /// Provider side instance id
    #[serde(rename = "exampleID", default)]
    pub example_id: String,
}

impl Meta {
    /// Fails when the provider side id is missing
    pub fn valid(&self) -> Result<()> {
        if self.example_id.is_empty() {
            return Err(Error::validation_for_field(
                "machine metadata",
                "exampleID",
                "is empty",
            ));
        }
        Ok(())
    }
}
