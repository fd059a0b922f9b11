//! JSON stack templates
//!
//! The declarative template is handled in its JSON form:
//!
//! ```json
//! {
//!   "variable": { "userInput_region": { "default": "" } },
//!   "resource": { "example_instance": { "web-1": { "example_data": "..." } } }
//! }
//! ```
//!
//! Variables are filled by namespace prefix (`userInput_`, `example_`) and
//! `${var.NAME}` references inside resource fields are resolved against the
//! variables' defaults. Everything else is kept as-is for the execution engine.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use stackwright_common::template::{TemplateContext, TemplateEngine};
use stackwright_common::{Error, Result};

const VARIABLE_KEY: &str = "variable";
const RESOURCE_KEY: &str = "resource";
const DEFAULT_KEY: &str = "default";

/// A parsed stack template
#[derive(Clone, Debug, PartialEq)]
pub struct StackTemplate {
    root: Map<String, Value>,
}

impl StackTemplate {
    /// Parse the JSON form of a template
    pub fn parse(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| Error::serialization_for_kind("stack template", e.to_string()))?;
        match value {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(Error::validation_for(
                "stack template",
                "template must be a JSON object",
            )),
        }
    }

    /// Declared variables and their current defaults
    pub fn variables(&self) -> BTreeMap<String, String> {
        let Some(Value::Object(vars)) = self.root.get(VARIABLE_KEY) else {
            return BTreeMap::new();
        };
        vars.iter()
            .map(|(name, decl)| {
                let value = match decl.get(DEFAULT_KEY) {
                    Some(Value::String(s)) => s.clone(),
                    None | Some(Value::Null) => String::new(),
                    Some(other) => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Set the default of every declared variable named `{prefix}{key}`
    ///
    /// `values` is keyed by the part after the prefix. A declared variable
    /// with no value fails the call; values without a declaration are ignored.
    pub fn fill_variables(&mut self, prefix: &str, values: &BTreeMap<String, String>) -> Result<()> {
        let Some(Value::Object(vars)) = self.root.get_mut(VARIABLE_KEY) else {
            return Ok(());
        };

        for (name, decl) in vars.iter_mut() {
            let Some(key) = name.strip_prefix(prefix) else {
                continue;
            };
            let value = values.get(key).ok_or_else(|| {
                Error::validation_for_field(
                    "stack template",
                    name.clone(),
                    "no value provided for variable",
                )
            })?;
            match decl {
                Value::Object(fields) => {
                    fields.insert(DEFAULT_KEY.to_string(), Value::String(value.clone()));
                }
                other => {
                    let mut fields = Map::new();
                    fields.insert(DEFAULT_KEY.to_string(), Value::String(value.clone()));
                    *other = Value::Object(fields);
                }
            }
        }
        Ok(())
    }

    /// Decode every block of `resource_type` keyed by resource name
    pub fn decode_resources<T: DeserializeOwned>(
        &self,
        resource_type: &str,
    ) -> Result<BTreeMap<String, T>> {
        let Some(blocks) = self
            .root
            .get(RESOURCE_KEY)
            .and_then(|r| r.get(resource_type))
        else {
            return Ok(BTreeMap::new());
        };

        let Value::Object(blocks) = blocks else {
            return Err(Error::validation_for(
                "stack template",
                format!("resource {:?} must be an object", resource_type),
            ));
        };

        blocks
            .iter()
            .map(|(name, block)| {
                serde_json::from_value(block.clone())
                    .map(|decoded| (name.clone(), decoded))
                    .map_err(|e| {
                        Error::serialization_for_kind(
                            format!("{}.{}", resource_type, name),
                            e.to_string(),
                        )
                    })
            })
            .collect()
    }

    /// Replace every block of `resource_type`
    pub fn set_resources<T: Serialize>(
        &mut self,
        resource_type: &str,
        blocks: &BTreeMap<String, T>,
    ) -> Result<()> {
        let encoded = blocks
            .iter()
            .map(|(name, block)| Ok((name.clone(), serde_json::to_value(block)?)))
            .collect::<Result<Map<String, Value>>>()?;

        let resources = self
            .root
            .entry(RESOURCE_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        match resources {
            Value::Object(resources) => {
                resources.insert(resource_type.to_string(), Value::Object(encoded));
                Ok(())
            }
            _ => Err(Error::validation_for(
                "stack template",
                "\"resource\" must be an object",
            )),
        }
    }

    /// Resolve `${var.NAME}` references in `text` against the variables
    pub fn interpolate(&self, engine: &TemplateEngine, text: &str) -> Result<String> {
        if !TemplateEngine::has_template_syntax(text) {
            return Ok(text.to_string());
        }
        let ctx = TemplateContext::from_vars(&self.variables());
        Ok(engine.interpolate(text, &ctx)?)
    }

    /// Canonical JSON form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.root)?)
    }
}
