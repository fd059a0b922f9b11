//! Template context
//!
//! Values are grouped into named scopes so that a placeholder reads as
//! `${scope.key}`:
//! - `${var.NAME}` - stack template variables
//! - `${provider.name}`, `${stack.group}`, `${credential.identifier}` - bootstrap
//! - `${user.name}`, `${agent.id}`, `${agent.key}` - provisioning payloads

use std::collections::BTreeMap;

use minijinja::Value;

/// Scope holding stack template variables
pub const VAR_SCOPE: &str = "var";

/// Values available for placeholder resolution
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    scopes: BTreeMap<String, BTreeMap<String, Value>>,
}

impl TemplateContext {
    /// Create a new builder for TemplateContext
    pub fn builder() -> TemplateContextBuilder {
        TemplateContextBuilder::default()
    }

    /// Context exposing only `${var.*}` from a variable map
    pub fn from_vars<'a, I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        vars.into_iter()
            .fold(Self::builder(), |b, (k, v)| b.var(k.as_str(), v.as_str()))
            .build()
    }

    /// Look up a value by scope and key
    pub fn get(&self, scope: &str, key: &str) -> Option<&Value> {
        self.scopes.get(scope).and_then(|s| s.get(key))
    }

    /// Convert to minijinja Value for rendering
    ///
    /// Keys are normalized (hyphens to underscores) so that `${var.my-name}`
    /// is not read as a subtraction.
    pub fn to_value(&self) -> Value {
        let scopes: BTreeMap<String, Value> = self
            .scopes
            .iter()
            .map(|(scope, values)| {
                let normalized: BTreeMap<String, Value> = values
                    .iter()
                    .map(|(k, v)| (normalize_key(k), v.clone()))
                    .collect();
                (scope.clone(), Value::from_iter(normalized))
            })
            .collect();
        Value::from_iter(scopes)
    }
}

pub(crate) fn normalize_key(key: &str) -> String {
    key.replace('-', "_")
}

/// Builder for TemplateContext
#[derive(Debug, Default)]
pub struct TemplateContextBuilder {
    scopes: BTreeMap<String, BTreeMap<String, Value>>,
}

impl TemplateContextBuilder {
    /// Set a value in an arbitrary scope
    pub fn value(
        mut self,
        scope: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.scopes
            .entry(scope.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Set a stack template variable (`${var.KEY}`)
    pub fn var(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.value(VAR_SCOPE, key, value.into())
    }

    /// Build the TemplateContext
    pub fn build(self) -> TemplateContext {
        TemplateContext {
            scopes: self.scopes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_groups_values_by_scope() {
        let ctx = TemplateContext::builder()
            .value("provider", "name", "example")
            .value("stack", "group", "team-a")
            .var("region", "eu-west-1")
            .build();

        assert_eq!(
            ctx.get("provider", "name").map(|v| v.to_string()),
            Some("example".to_string())
        );
        assert_eq!(
            ctx.get(VAR_SCOPE, "region").map(|v| v.to_string()),
            Some("eu-west-1".to_string())
        );
        assert!(ctx.get("stack", "missing").is_none());
    }

    #[test]
    fn test_from_vars() {
        let mut vars = BTreeMap::new();
        vars.insert("userInput_size".to_string(), "small".to_string());
        let ctx = TemplateContext::from_vars(&vars);

        assert_eq!(
            ctx.get(VAR_SCOPE, "userInput_size").map(|v| v.to_string()),
            Some("small".to_string())
        );
    }

    #[test]
    fn test_to_value_normalizes_hyphens() {
        let ctx = TemplateContext::builder().var("my-name", "x").build();
        let value = ctx.to_value();
        let var = value.get_attr("var").expect("var scope");
        assert_eq!(
            var.get_attr("my_name").expect("normalized key").to_string(),
            "x"
        );
    }
}
