//! Common types for Stackwright: errors, retry, telemetry and templating

#![deny(missing_docs)]

pub mod error;
pub mod retry;
pub mod telemetry;
pub mod template;

pub use error::{Error, MultiError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the template provider shipped with Stackwright
pub const EXAMPLE_PROVIDER: &str = "example";

/// Provider name of user-supplied template inputs
pub const CUSTOM_PROVIDER: &str = "custom";
