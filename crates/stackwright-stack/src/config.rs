//! Runtime configuration for stack operations

use std::time::Duration;

use serde::Deserialize;
use stackwright_common::retry::{duration_millis, RetryConfig};
use tracing::warn;

/// Bootstrap template shipped with the crate
pub const DEFAULT_BOOTSTRAP_TEMPLATE: &str = include_str!("../templates/bootstrap.json");

/// Configuration shared by every stack of a session
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StackConfig {
    /// Groups the provisioned user is added to
    pub admin_groups: Vec<String>,
    /// How long to wait for provisioned agents
    pub dial: DialConfig,
    /// Template applied once per credential by `bootstrap`
    pub bootstrap_template: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            admin_groups: vec!["sudo".to_string()],
            dial: DialConfig::default(),
            bootstrap_template: DEFAULT_BOOTSTRAP_TEMPLATE.to_string(),
        }
    }
}

impl StackConfig {
    /// Defaults overridden by `STACKWRIGHT_*` environment variables
    pub fn from_env() -> Self {
        Self {
            dial: DialConfig::from_env(),
            ..Self::default()
        }
    }
}

/// Reachability wait policy
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DialConfig {
    /// Attempts per instance before it is reported unreachable
    pub attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Upper bound between attempts
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Bound on a single dial attempt
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            attempts: 30,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
            timeout: Duration::from_secs(30),
        }
    }
}

impl DialConfig {
    fn from_env() -> Self {
        let mut config = Self::default();
        match env_parse::<u32>("STACKWRIGHT_DIAL_ATTEMPTS") {
            Some(0) => warn!(
                key = "STACKWRIGHT_DIAL_ATTEMPTS",
                "dial attempts must be at least 1, keeping default"
            ),
            Some(attempts) => config.attempts = attempts,
            None => {}
        }
        if let Some(secs) = env_parse::<u64>("STACKWRIGHT_DIAL_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(secs);
        }
        config
    }

    /// Backoff policy applied to each instance
    ///
    /// Always bounded: zero attempts dial once.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.attempts.max(1),
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            ..RetryConfig::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StackConfig::default();
        assert_eq!(config.admin_groups, vec!["sudo".to_string()]);
        assert!(config.bootstrap_template.contains("bootstrapID"));
        assert_eq!(config.dial.retry_config().max_attempts, 30);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: StackConfig = serde_json::from_str(
            r#"{"adminGroups": ["wheel"], "dial": {"attempts": 2, "timeout": 500}}"#,
        )
        .unwrap();
        assert_eq!(config.admin_groups, vec!["wheel".to_string()]);
        assert_eq!(config.dial.attempts, 2);
        assert_eq!(config.dial.timeout, Duration::from_millis(500));
        assert_eq!(config.dial.max_delay, DialConfig::default().max_delay);
    }

    #[test]
    fn test_zero_attempts_still_bounded() {
        let config: StackConfig = serde_json::from_str(r#"{"dial": {"attempts": 0}}"#).unwrap();
        assert_eq!(config.dial.retry_config().max_attempts, 1);
    }

    #[test]
    fn test_env_rejects_zero_attempts() {
        std::env::set_var("STACKWRIGHT_DIAL_ATTEMPTS", "0");
        let config = DialConfig::from_env();
        std::env::remove_var("STACKWRIGHT_DIAL_ATTEMPTS");
        assert_eq!(config.attempts, DialConfig::default().attempts);
    }

    #[test]
    fn test_env_parse_ignores_garbage() {
        assert_eq!(env_parse::<u32>("STACKWRIGHT_TEST_UNSET_VARIABLE"), None);
    }
}
