//! Bootstrap helpers
//!
//! Bootstrapping provisions the shared resources every stack of a credential
//! builds on. It runs at most once at a time per credential.

use std::sync::Arc;

use dashmap::DashMap;
use stackwright_common::template::{TemplateContext, TemplateEngine};
use stackwright_common::Result;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::provider::example::Cred;

/// Per-credential bootstrap serialization
///
/// Entries exist only while a bootstrap holds or waits for them.
#[derive(Debug, Default)]
pub struct BootstrapLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BootstrapLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive bootstrap access to `identifier`
    pub async fn lock(&self, identifier: &str) -> BootstrapGuard<'_> {
        let lock = self
            .locks
            .entry(identifier.to_string())
            .or_default()
            .clone();
        BootstrapGuard {
            locks: self,
            identifier: identifier.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of credentials currently locked or awaited
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no bootstrap is in flight
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive bootstrap access to one credential
///
/// Dropping the last guard of a credential removes its table entry.
#[derive(Debug)]
pub struct BootstrapGuard<'a> {
    locks: &'a BootstrapLocks,
    identifier: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for BootstrapGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone; a count of one means only the table is left.
        self.locks
            .locks
            .remove_if(&self.identifier, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Content identifier of a credential's bootstrap state
pub fn bootstrap_content_id(provider: &str, group: &str, identifier: &str) -> String {
    format!("{}-{}-{}", provider, group, identifier)
}

/// Render the bootstrap template for one credential
pub fn render_bootstrap_template(
    engine: &TemplateEngine,
    template: &str,
    provider: &str,
    group: &str,
    identifier: &str,
    cred: &Cred,
) -> Result<String> {
    let ctx = TemplateContext::builder()
        .value("provider", "name", provider)
        .value("stack", "group", group)
        .value("credential", "identifier", identifier)
        .value("credential", "access_key", cred.access_key.as_str())
        .value("credential", "secret_key", cred.secret_key.as_str())
        .build();

    Ok(engine.render(template, &ctx)?)
}
