//! Machine handle of the `example` provider
//!
//! The template provider has no backend to talk to, so power operations
//! succeed without side effects and the machine always reports `Running`.

use async_trait::async_trait;
use stackwright_common::Result;
use tracing::info;

use super::cred::{Cred, Meta};
use crate::machine::{MachineInfo, MachineState};
use crate::provider::Machine;

/// A built `example` instance
#[derive(Clone, Debug)]
pub struct ExampleMachine {
    label: String,
    cred: Cred,
    meta: Meta,
}

impl ExampleMachine {
    /// Handle for a validated credential and metadata pair
    pub fn new(label: impl Into<String>, cred: Cred, meta: Meta) -> Self {
        Self {
            label: label.into(),
            cred,
            meta,
        }
    }

    /// Credential the machine is managed with
    pub fn cred(&self) -> &Cred {
        &self.cred
    }

    /// Stored metadata
    pub fn meta(&self) -> &Meta {
        &self.meta
    }
}

#[async_trait]
impl Machine for ExampleMachine {
    fn label(&self) -> &str {
        &self.label
    }

    async fn start(&self) -> Result<()> {
        info!(label = %self.label, example_id = %self.meta.example_id, "start requested");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!(label = %self.label, example_id = %self.meta.example_id, "stop requested");
        Ok(())
    }

    async fn info(&self) -> Result<MachineInfo> {
        Ok(MachineInfo {
            state: MachineState::Running,
            reason: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ExampleMachine {
        ExampleMachine::new(
            "web-1",
            Cred {
                access_key: "a".into(),
                secret_key: "s".into(),
                bootstrap_id: "b".into(),
            },
            Meta {
                always_on: true,
                example_id: "ex-1".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_power_operations_are_noops() {
        let m = machine();
        assert!(m.start().await.is_ok());
        assert!(m.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_info_reports_running() {
        let info = machine().info().await.unwrap();
        assert_eq!(info.state, MachineState::Running);
        assert_eq!(machine().label(), "web-1");
        assert!(machine().meta().always_on);
    }
}
