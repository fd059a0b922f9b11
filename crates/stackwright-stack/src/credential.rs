//! Credential variants
//!
//! The set of credential kinds is closed: the `example` provider, user
//! supplied template inputs, and payloads of providers this build does not
//! know about, which are passed through untouched.

use std::collections::BTreeMap;

use serde_json::Value;
use stackwright_common::{Error, Result, CUSTOM_PROVIDER, EXAMPLE_PROVIDER};

use crate::host::StoredCredential;
use crate::provider::example::Cred;

/// A decoded credential payload
#[derive(Clone, Debug, PartialEq)]
pub enum Credential {
    /// Keys of the `example` provider
    Example(Cred),
    /// User supplied template inputs (`userInput_*` variables)
    Custom(BTreeMap<String, String>),
    /// Payload of a provider this build does not decode
    Opaque {
        /// Provider name
        provider: String,
        /// Raw payload
        data: Value,
    },
}

impl Credential {
    /// Decode a raw payload for `provider`
    pub fn decode(provider: &str, data: Value) -> Result<Self> {
        match provider {
            EXAMPLE_PROVIDER => serde_json::from_value(data)
                .map(Credential::Example)
                .map_err(|e| Error::serialization_for_kind("example credential", e.to_string())),
            CUSTOM_PROVIDER => decode_custom(data).map(Credential::Custom),
            other => Ok(Credential::Opaque {
                provider: other.to_string(),
                data,
            }),
        }
    }

    /// Provider the credential belongs to
    pub fn provider_name(&self) -> &str {
        match self {
            Credential::Example(_) => EXAMPLE_PROVIDER,
            Credential::Custom(_) => CUSTOM_PROVIDER,
            Credential::Opaque { provider, .. } => provider,
        }
    }

    /// Validate the payload
    ///
    /// Only `example` credentials carry invariants of their own.
    pub fn validate(&self) -> Result<()> {
        match self {
            Credential::Example(cred) => cred.valid(),
            Credential::Custom(_) | Credential::Opaque { .. } => Ok(()),
        }
    }

    /// The `example` credential, if this is one
    pub fn as_example(&self) -> Option<&Cred> {
        match self {
            Credential::Example(cred) => Some(cred),
            _ => None,
        }
    }

    /// The custom template inputs, if this is a custom credential
    pub fn as_custom(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Credential::Custom(values) => Some(values),
            _ => None,
        }
    }

    /// Encode back into the store representation
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Credential::Example(cred) => Ok(serde_json::to_value(cred)?),
            Credential::Custom(values) => Ok(serde_json::to_value(values)?),
            Credential::Opaque { data, .. } => Ok(data.clone()),
        }
    }
}

/// Custom inputs are string maps; scalars are stringified.
fn decode_custom(data: Value) -> Result<BTreeMap<String, String>> {
    let Value::Object(map) = data else {
        return Err(Error::serialization_for_kind(
            "custom credential",
            "expected a JSON object",
        ));
    };

    Ok(map
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            Value::Null => None,
            other => Some((k, other.to_string())),
        })
        .collect())
}

/// A credential resolved from the store for the current request
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedCredential {
    /// Credential identifier
    pub identifier: String,
    /// Provider name as recorded by the store
    pub provider: String,
    /// Decoded payload
    pub payload: Credential,
}

impl ResolvedCredential {
    /// Decode a stored credential
    pub fn from_stored(stored: StoredCredential) -> Result<Self> {
        let payload = Credential::decode(&stored.provider, stored.data)?;
        Ok(Self {
            identifier: stored.identifier,
            provider: stored.provider,
            payload,
        })
    }
}
