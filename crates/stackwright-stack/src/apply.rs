//! Apply driver
//!
//! Runs the apply phases in order for hosts that do not sequence them
//! themselves.

use stackwright_common::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::engine::EngineRequest;
use crate::session::{ApplyRun, ReconcileReport, Session, Stack};

/// Build, apply, wait for and reconcile one run
///
/// Fails early when building or applying fails. Unreachable instances do not
/// stop reconciliation; they are reported in the returned report.
#[instrument(skip_all, fields(content_id = %run.content_id(), trace_id = %run.request().trace_id))]
pub async fn apply_stack(
    stack: &dyn Stack,
    session: &Session,
    run: &ApplyRun,
    cancel: &CancellationToken,
) -> Result<ReconcileReport> {
    let built = stack.build_resources(run).await?;

    let state = {
        let engine = session.connect_engine().await?;
        engine
            .apply(&EngineRequest {
                content: built.content.clone(),
                content_id: run.content_id().to_string(),
                trace_id: run.request().trace_id.clone(),
            })
            .await?
    };
    info!(resources = state.resources.len(), "template applied");

    let outcome = stack.wait_resources(&built, cancel).await;
    let mut report = stack.update_resources(run, &state, &outcome.klients).await;
    if let Some(err) = outcome.error {
        warn!(error = %err, "some instances are unreachable");
        report.push_problem(err);
    }

    Ok(report)
}
