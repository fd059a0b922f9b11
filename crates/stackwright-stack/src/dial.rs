//! Waiting for provisioned agents
//!
//! Every instance is dialed concurrently. Each instance retries with backoff
//! until it answers, its attempts run out, or the wait is cancelled.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use stackwright_common::retry::{retry_with_backoff, RetryConfig};
use stackwright_common::{Error, MultiError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DialConfig;
use crate::host::AgentDialer;

/// Instance name to generated agent identifier
pub type AgentIds = BTreeMap<String, String>;

/// Instance name to dial result
pub type Klients = BTreeMap<String, DialState>;

/// Reason recorded for instances whose wait was cancelled
pub const DIAL_CANCELLED: &str = "dial cancelled";

/// Outcome of dialing one agent
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DialState {
    /// The agent answered
    Connected {
        /// Agent identifier
        agent_id: String,
    },
    /// The agent never answered
    Failed {
        /// Agent identifier
        agent_id: String,
        /// Last failure
        reason: String,
    },
}

impl DialState {
    /// Agent identifier that was dialed
    pub fn agent_id(&self) -> &str {
        match self {
            DialState::Connected { agent_id } | DialState::Failed { agent_id, .. } => agent_id,
        }
    }

    /// Whether the agent answered
    pub fn is_connected(&self) -> bool {
        matches!(self, DialState::Connected { .. })
    }
}

/// Query string that locates an agent by id
///
/// Agent queries are slash separated with the id in the last position; the
/// leading fields (username, environment, name, version, region, hostname)
/// are left empty.
pub fn agent_query_string(agent_id: &str) -> String {
    format!("///////{}", agent_id)
}

/// Result of waiting for every agent of a build
#[derive(Debug)]
pub struct WaitOutcome {
    /// Dial state of every instance
    pub klients: Klients,
    /// Aggregate naming every unreachable instance
    pub error: Option<Error>,
}

impl WaitOutcome {
    /// The dial states, or the aggregate error when any instance is unreachable
    pub fn into_result(self) -> Result<Klients> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.klients),
        }
    }
}

/// Dial every agent in `ids` concurrently
pub async fn dial_agents(
    dialer: &dyn AgentDialer,
    ids: &AgentIds,
    config: &DialConfig,
    cancel: &CancellationToken,
) -> WaitOutcome {
    let retry = config.retry_config();

    let futures = ids.iter().map(|(label, agent_id)| {
        let retry = &retry;
        async move {
            let result = dial_one(dialer, label, agent_id, config.timeout, retry, cancel).await;
            (label, agent_id, result)
        }
    });
    let results = join_all(futures).await;

    let mut klients = Klients::new();
    let mut errors = MultiError::new();
    for (label, agent_id, result) in results {
        let state = match result {
            Ok(()) => DialState::Connected {
                agent_id: agent_id.clone(),
            },
            Err(err) => {
                let state = DialState::Failed {
                    agent_id: agent_id.clone(),
                    reason: failure_reason(&err),
                };
                errors.push(err);
                state
            }
        };
        klients.insert(label.clone(), state);
    }

    info!(
        total = ids.len(),
        unreachable = errors.len(),
        "finished waiting for agents"
    );

    WaitOutcome {
        klients,
        error: errors.into_result().err(),
    }
}

async fn dial_one(
    dialer: &dyn AgentDialer,
    label: &str,
    agent_id: &str,
    timeout: Duration,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let attempts = retry_with_backoff(retry, "dial agent", Error::is_retryable, |attempt| async move {
        debug!(label, agent_id, attempt, "dialing agent");
        match tokio::time::timeout(timeout, dialer.dial(agent_id)).await {
            Ok(result) => result,
            Err(_) => Err(Error::dial(
                label,
                format!("attempt timed out after {}ms", timeout.as_millis()),
            )),
        }
    });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!(label, agent_id, "dial cancelled");
            Err(Error::dial(label, DIAL_CANCELLED))
        }
        result = attempts => result.map_err(|err| match err {
            Error::Dial { .. } => err,
            other => Error::dial(label, other.to_string()),
        }),
    }
}

fn failure_reason(err: &Error) -> String {
    match err {
        Error::Dial { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockAgentDialer;

    fn fast() -> DialConfig {
        DialConfig {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            timeout: Duration::from_millis(50),
        }
    }

    fn ids(pairs: &[(&str, &str)]) -> AgentIds {
        pairs
            .iter()
            .map(|(label, id)| (label.to_string(), id.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_all_agents_reachable() {
        let mut dialer = MockAgentDialer::new();
        dialer.expect_dial().times(2).returning(|_| Ok(()));

        let outcome = dial_agents(
            &dialer,
            &ids(&[("web-1", "a-1"), ("web-2", "a-2")]),
            &fast(),
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.error.is_none());
        assert!(outcome.klients.values().all(DialState::is_connected));
        assert_eq!(outcome.klients["web-2"].agent_id(), "a-2");
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_named_in_aggregate() {
        let mut dialer = MockAgentDialer::new();
        dialer.expect_dial().returning(|id| {
            if id == "a-2" {
                Err(Error::dial("web-2", "connection refused"))
            } else {
                Ok(())
            }
        });

        let outcome = dial_agents(
            &dialer,
            &ids(&[("web-1", "a-1"), ("web-2", "a-2")]),
            &fast(),
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.klients["web-1"].is_connected());
        assert_eq!(
            outcome.klients["web-2"],
            DialState::Failed {
                agent_id: "a-2".into(),
                reason: "connection refused".into()
            }
        );

        let err = outcome.into_result().unwrap_err();
        assert!(err.is_multiple());
        assert!(err.to_string().contains("web-2"));
        assert!(!err.to_string().contains("web-1"));
    }

    #[tokio::test]
    async fn test_retries_until_agent_answers() {
        let mut dialer = MockAgentDialer::new();
        let mut seq = mockall::Sequence::new();
        dialer
            .expect_dial()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::dial("web-1", "booting")));
        dialer
            .expect_dial()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let outcome = dial_agents(
            &dialer,
            &ids(&[("web-1", "a-1")]),
            &fast(),
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_non_retryable_failure_stops_immediately() {
        let mut dialer = MockAgentDialer::new();
        dialer
            .expect_dial()
            .times(1)
            .returning(|_| Err(Error::validation("unknown agent")));

        let outcome = dial_agents(
            &dialer,
            &ids(&[("web-1", "a-1")]),
            &fast(),
            &CancellationToken::new(),
        )
        .await;

        let err = outcome.error.expect("agent should be unreachable");
        assert!(err.to_string().contains("unknown agent"));
    }

    #[tokio::test]
    async fn test_cancelled_wait_reports_every_instance() {
        let mut dialer = MockAgentDialer::new();
        dialer.expect_dial().never();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = dial_agents(
            &dialer,
            &ids(&[("web-1", "a-1"), ("web-2", "a-2")]),
            &fast(),
            &cancel,
        )
        .await;

        for state in outcome.klients.values() {
            assert!(matches!(state, DialState::Failed { reason, .. } if reason == DIAL_CANCELLED));
        }
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_empty_ids_is_ok() {
        let dialer = MockAgentDialer::new();
        let outcome = dial_agents(
            &dialer,
            &AgentIds::new(),
            &fast(),
            &CancellationToken::new(),
        )
        .await;
        assert!(outcome.into_result().unwrap().is_empty());
    }

    #[test]
    fn test_agent_query_string() {
        assert_eq!(agent_query_string("abc"), "///////abc");
    }
}
