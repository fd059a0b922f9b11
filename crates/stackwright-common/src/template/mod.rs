//! `${...}` templating for Stackwright
//!
//! Stack templates reference variables as `${var.NAME}`; bootstrap templates and
//! provisioning payloads additionally read scoped values such as
//! `${provider.name}` or `${agent.id}`. Rendering is backed by minijinja with a
//! custom syntax configuration.
//!
//! - `{% if %}...{% endif %}` and `{% for %}...{% endfor %}` blocks
//! - Filters: `${value | default("fallback")}`, `${value | base64_encode}`
//! - `$${...}` passes through untouched for the execution engine

mod context;
mod engine;
mod error;
mod filters;

pub use context::{TemplateContext, TemplateContextBuilder, VAR_SCOPE};
pub use engine::TemplateEngine;
pub use error::TemplateError;
