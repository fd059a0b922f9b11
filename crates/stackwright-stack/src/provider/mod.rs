//! Provider plugins
//!
//! A provider contributes a stack lifecycle and machine handles for one
//! infrastructure backend. Providers are registered explicitly in a
//! [`ProviderRegistry`](crate::registry::ProviderRegistry).

pub mod example;

use std::sync::Arc;

use async_trait::async_trait;
use stackwright_common::Result;

use crate::credential::Credential;
use crate::machine::MachineInfo;
use crate::session::{Session, Stack};

/// An infrastructure backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, the prefix of its resource types
    fn name(&self) -> &str;

    /// Resource type of its machines, without provider prefix
    fn resource_type(&self) -> &str;

    /// Empty credential of this provider, used as a schema
    fn new_credential(&self) -> Credential;

    /// Stack lifecycle bound to `session`
    fn stack(&self, session: Arc<Session>) -> Box<dyn Stack>;

    /// Handle to an existing machine
    async fn machine(&self, session: Arc<Session>, id: &str) -> Result<Box<dyn Machine>>;
}

/// Handle to one built machine
#[async_trait]
pub trait Machine: Send + Sync {
    /// Resource name in the stack template
    fn label(&self) -> &str;

    /// Power the machine on
    async fn start(&self) -> Result<()>;

    /// Power the machine off
    async fn stop(&self) -> Result<()>;

    /// Current state
    async fn info(&self) -> Result<MachineInfo>;
}
