//! Provisioning payloads
//!
//! Each instance boots with a cloud-config document that creates the owning
//! user, drops the agent identity on disk and runs the user's own script. The
//! script is embedded as a literal block so placeholders in it stay visible to
//! later interpolation and to the execution engine.

use serde::{Deserialize, Serialize};
use stackwright_common::template::{TemplateContext, TemplateEngine};
use stackwright_common::{Error, Result};

use crate::host::UserdataGenerator;

const CLOUD_INIT_TEMPLATE: &str = include_str!("../templates/cloud-init.yaml");

/// Inputs of one instance's provisioning payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitConfig {
    /// User created on the instance
    pub username: String,
    /// Groups the user joins
    pub groups: Vec<String>,
    /// Instance hostname
    pub hostname: String,
    /// Generated agent identifier
    pub agent_id: String,
    /// Key the agent connects back with
    pub agent_key: String,
    /// User supplied script, may be empty
    pub user_data: String,
}

/// Renders [`CloudInitConfig`] into a `#cloud-config` document
pub struct CloudInitGenerator {
    engine: TemplateEngine,
}

impl Default for CloudInitGenerator {
    fn default() -> Self {
        Self {
            engine: TemplateEngine::new(),
        }
    }
}

impl UserdataGenerator for CloudInitGenerator {
    fn generate(&self, config: &CloudInitConfig) -> Result<String> {
        if config.username.is_empty() {
            return Err(Error::validation_for_field(
                "cloud-init",
                "username",
                "is empty",
            ));
        }

        let ctx = TemplateContext::builder()
            .value("user", "name", config.username.as_str())
            .value("user", "hostname", config.hostname.as_str())
            .value("user", "groups", config.groups.join(","))
            .value("user", "data", config.user_data.as_str())
            .value("agent", "id", config.agent_id.as_str())
            .value("agent", "key", config.agent_key.as_str())
            .build();

        Ok(self.engine.render(CLOUD_INIT_TEMPLATE, &ctx)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(user_data: &str) -> CloudInitConfig {
        CloudInitConfig {
            username: "alice".into(),
            groups: vec!["sudo".into()],
            hostname: "alice".into(),
            agent_id: "agent-1".into(),
            agent_key: "key-1".into(),
            user_data: user_data.into(),
        }
    }

    #[test]
    fn test_generates_identity_and_user() {
        let payload = CloudInitGenerator::default()
            .generate(&config(""))
            .unwrap();

        assert!(payload.starts_with("#cloud-config"));
        assert!(payload.contains("hostname: alice"));
        assert!(payload.contains("groups: sudo"));
        assert!(payload.contains(r#"{"id": "agent-1", "key": "key-1"}"#));
        assert!(!payload.contains("runcmd"));
    }

    #[test]
    fn test_embeds_user_script_verbatim() {
        let script = "#!/bin/bash\necho ${var.userInput_region}\necho ${example_bootstrap.main.id}";
        let payload = CloudInitGenerator::default()
            .generate(&config(script))
            .unwrap();

        assert!(payload.contains("      #!/bin/bash\n      echo ${var.userInput_region}\n"));
        assert!(payload.contains("echo ${example_bootstrap.main.id}"));
        assert!(payload.contains("runcmd"));
    }

    #[test]
    fn test_requires_username() {
        let mut cfg = config("");
        cfg.username.clear();
        assert!(CloudInitGenerator::default().generate(&cfg).is_err());
    }
}
