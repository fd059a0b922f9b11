//! Stack requests and responses

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stackwright_common::{Error, Result};

use crate::machine::MachineDescriptor;

/// A lifecycle request received from the host
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackRequest {
    /// Method name (`authenticate`, `bootstrap`, `plan`, `apply`)
    pub method: String,
    /// Requesting user
    pub username: String,
    /// Group the request is made in
    pub group_name: String,
    /// Trace id propagated to the engine
    pub trace_id: String,
    /// Method arguments
    #[serde(default)]
    pub args: serde_json::Value,
}

impl StackRequest {
    /// Decode and validate the method arguments
    pub fn decode_args<T: DeserializeOwned + Validate>(&self, context: &str) -> Result<T> {
        let args: T = serde_json::from_value(self.args.clone())
            .map_err(|e| Error::validation_for(context, format!("malformed arguments: {}", e)))?;
        args.validate()?;
        Ok(args)
    }
}

/// Request arguments with invariants checked before any side effect
pub trait Validate {
    /// Fail on a malformed request
    fn validate(&self) -> Result<()>;
}

fn require_group(context: &str, group_name: &str) -> Result<()> {
    if group_name.is_empty() {
        return Err(Error::validation_for_field(context, "groupName", "is empty"));
    }
    Ok(())
}

fn require_identifiers(context: &str, identifiers: &[String]) -> Result<()> {
    if identifiers.is_empty() {
        return Err(Error::validation_for_field(
            context,
            "identifiers",
            "at least one identifier is required",
        ));
    }
    if identifiers.iter().any(String::is_empty) {
        return Err(Error::validation_for_field(
            context,
            "identifiers",
            "identifier is empty",
        ));
    }
    Ok(())
}

/// Arguments of `authenticate`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    /// Group the credentials are used in
    pub group_name: String,
    /// Credentials to verify
    #[serde(default)]
    pub identifiers: Vec<String>,
}

impl Validate for AuthenticateRequest {
    fn validate(&self) -> Result<()> {
        require_group("authenticate request", &self.group_name)?;
        require_identifiers("authenticate request", &self.identifiers)
    }
}

/// Verification result of one credential
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthenticateResult {
    /// The credential was accepted
    pub verified: bool,
    /// Failure message, when not verified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of `authenticate` keyed by credential identifier
pub type AuthenticateResponse = BTreeMap<String, AuthenticateResult>;

/// Arguments of `bootstrap`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapRequest {
    /// Group the shared resources belong to
    pub group_name: String,
    /// Credentials to bootstrap
    #[serde(default)]
    pub identifiers: Vec<String>,
}

impl Validate for BootstrapRequest {
    fn validate(&self) -> Result<()> {
        require_group("bootstrap request", &self.group_name)?;
        require_identifiers("bootstrap request", &self.identifiers)
    }
}

/// Arguments of `plan`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    /// Stack template to plan
    pub stack_template_id: String,
    /// Group the plan runs in
    pub group_name: String,
}

impl Validate for PlanRequest {
    fn validate(&self) -> Result<()> {
        if self.stack_template_id.is_empty() {
            return Err(Error::validation_for_field(
                "plan request",
                "stackTemplateId",
                "is empty",
            ));
        }
        require_group("plan request", &self.group_name)
    }
}

/// Result of `plan`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanResponse {
    /// Machines the template would build
    pub machines: Vec<MachineDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn request(args: serde_json::Value) -> StackRequest {
        StackRequest {
            method: "bootstrap".into(),
            username: "alice".into(),
            group_name: "g1".into(),
            trace_id: "t-1".into(),
            args,
        }
    }

    #[rstest]
    #[case::valid(json!({"groupName": "g1", "identifiers": ["cred-1"]}), true)]
    #[case::empty_group(json!({"groupName": "", "identifiers": ["cred-1"]}), false)]
    #[case::no_identifiers(json!({"groupName": "g1", "identifiers": []}), false)]
    #[case::missing_identifiers(json!({"groupName": "g1"}), false)]
    #[case::blank_identifier(json!({"groupName": "g1", "identifiers": [""]}), false)]
    #[case::wrong_shape(json!({"groupName": 5}), false)]
    fn test_bootstrap_args(#[case] args: serde_json::Value, #[case] ok: bool) {
        let result = request(args).decode_args::<BootstrapRequest>("bootstrap request");
        assert_eq!(result.is_ok(), ok);
        if let Err(err) = result {
            assert!(matches!(err, Error::Validation { .. }));
        }
    }

    #[rstest]
    #[case::valid(json!({"stackTemplateId": "tpl-1", "groupName": "g1"}), true)]
    #[case::no_template(json!({"stackTemplateId": "", "groupName": "g1"}), false)]
    #[case::no_group(json!({"stackTemplateId": "tpl-1", "groupName": ""}), false)]
    fn test_plan_args(#[case] args: serde_json::Value, #[case] ok: bool) {
        assert_eq!(
            request(args)
                .decode_args::<PlanRequest>("plan request")
                .is_ok(),
            ok
        );
    }

    #[test]
    fn test_authenticate_result_shape() {
        let value = serde_json::to_value(AuthenticateResult {
            verified: true,
            message: None,
        })
        .unwrap();
        assert_eq!(value, json!({"verified": true}));
    }
}
