//! Stack lifecycle and provider plugins for Stackwright
//!
//! A provider plugs into a host that authenticates credentials, bootstraps
//! shared resources, plans and applies declarative stack templates, then
//! reconciles the realized state into machine records. The host supplies its
//! collaborators through the traits in [`host`].
//!
//! Related crates:
//! - `stackwright-common`: errors, retry, telemetry and templating

pub mod apply;
pub mod bootstrap;
pub mod config;
pub mod credential;
pub mod dial;
pub mod engine;
pub mod host;
pub mod machine;
pub mod plan;
pub mod provider;
pub mod registry;
pub mod session;
pub mod template;
pub mod types;
pub mod userdata;

pub use apply::apply_stack;
pub use config::{DialConfig, StackConfig};
pub use credential::{Credential, ResolvedCredential};
pub use machine::{MachineDescriptor, MachineState, MachineUpdate, Metadata};
pub use provider::example::{Cred, ExampleProvider, ExampleStack, Meta};
pub use provider::{Machine, Provider};
pub use registry::ProviderRegistry;
pub use session::{ApplyRun, BuiltResources, ReconcileReport, Session, SessionBuilder, Stack};

// Re-export common error types
pub use stackwright_common::{Error, MultiError, Result};
