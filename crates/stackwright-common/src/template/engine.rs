//! Template engine with `${...}` placeholder syntax
//!
//! Uses minijinja with custom syntax configuration:
//! - Variable delimiters: `${...}`
//! - Block delimiters: `{%...%}`
//! - Comment delimiters: `{#...#}`
//! - Escape: `$${...}` for a literal `${...}` in the output
//!
//! Two entry points:
//! - [`TemplateEngine::render`] renders a whole template (bootstrap template,
//!   provisioning payloads). Every placeholder must resolve and `$${` becomes
//!   `${` in the result.
//! - [`TemplateEngine::interpolate`] resolves only `${var.NAME}` placeholders
//!   inside a resource field and leaves every other `${...}` expression (resource
//!   references, functions) and every `$${` escape for the execution engine.

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, UndefinedBehavior};

use super::context::{TemplateContext, VAR_SCOPE};
use super::error::TemplateError;
use super::filters;

/// Placeholder for escaped `$${` during rendering
const ESCAPED_PLACEHOLDER: &str = "\x00__STACKWRIGHT_ESCAPED_DOLLAR_BRACE__\x00";

/// Template engine for `${...}` placeholder resolution
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new template engine
    ///
    /// # Panics
    ///
    /// Panics if minijinja rejects the hardcoded delimiters, which indicates an
    /// incompatible minijinja version.
    pub fn new() -> Self {
        let syntax = SyntaxConfig::builder()
            .variable_delimiters("${", "}")
            .block_delimiters("{%", "%}")
            .comment_delimiters("{#", "#}")
            .build()
            .expect("template syntax configuration is hardcoded and valid");

        let mut env = Environment::new();
        env.set_syntax(syntax);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        filters::register(&mut env);

        Self { env }
    }

    /// Render a template string with the given context
    ///
    /// `$${...}` renders as a literal `${...}`.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` if the syntax is invalid, a referenced value is
    /// undefined, or a filter fails.
    pub fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let preprocessed = template.replace("$${", ESCAPED_PLACEHOLDER);
        let normalized = normalize_template_identifiers(&preprocessed);

        let rendered = self
            .env
            .render_str(&normalized, ctx.to_value())
            .map_err(TemplateError::from)?;

        Ok(rendered.replace(ESCAPED_PLACEHOLDER, "${"))
    }

    /// Resolve `${var.NAME}` placeholders in `text`
    ///
    /// Filters are allowed (`${var.size | default("small")}`). Any other
    /// `${...}` expression and any `$${...}` escape is copied unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Undefined`] for a variable with no value and
    /// [`TemplateError::Unterminated`] for a `${` without closing brace.
    pub fn interpolate(&self, text: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let root = ctx.to_value();
        let mut result = String::with_capacity(text.len());
        let mut remaining = text;

        while let Some(start) = remaining.find("${") {
            let escaped = start > 0 && remaining.as_bytes()[start - 1] == b'$';
            result.push_str(&remaining[..start]);
            remaining = &remaining[start..];

            let end = remaining.find('}').ok_or_else(|| {
                TemplateError::Unterminated(remaining.chars().take(32).collect())
            })?;
            let placeholder = &remaining[..=end];
            let expression = placeholder[2..placeholder.len() - 1].trim();
            remaining = &remaining[end + 1..];

            if escaped || !is_var_expression(expression) {
                result.push_str(placeholder);
                continue;
            }

            let normalized = normalize_expression_hyphens(expression);
            let compiled = self.env.compile_expression(&normalized)?;
            let value = compiled
                .eval(root.clone())
                .map_err(|_| TemplateError::undefined(expression))?;
            if value.is_undefined() {
                return Err(TemplateError::undefined(expression));
            }
            result.push_str(&value.to_string());
        }

        result.push_str(remaining);
        Ok(result)
    }

    /// Check if a string contains any template syntax
    pub fn has_template_syntax(s: &str) -> bool {
        s.contains("${") || s.contains("{%") || s.contains("{#")
    }
}

fn is_var_expression(expression: &str) -> bool {
    expression
        .strip_prefix(VAR_SCOPE)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Normalize hyphens in identifier positions within `${...}` expressions.
fn normalize_template_identifiers(template: &str) -> String {
    let mut result = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some(start) = remaining.find("${") {
        result.push_str(&remaining[..start + 2]);
        remaining = &remaining[start + 2..];

        match remaining.find('}') {
            Some(end) => {
                result.push_str(&normalize_expression_hyphens(&remaining[..end]));
                result.push('}');
                remaining = &remaining[end + 1..];
            }
            None => {
                result.push_str(remaining);
                remaining = "";
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Hyphens between identifier characters become underscores; quoted strings
/// are left alone.
fn normalize_expression_hyphens(expr: &str) -> String {
    let mut result = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' if quote.is_none() => {
                quote = Some(ch);
                result.push(ch);
            }
            c if quote == Some(c) => {
                quote = None;
                result.push(c);
            }
            '-' if quote.is_none() => {
                let prev_is_ident = result
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_');
                let next_is_ident = chars
                    .peek()
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_');
                result.push(if prev_is_ident && next_is_ident { '_' } else { '-' });
            }
            _ => result.push(ch),
        }
    }

    result
}
