//! Filters available in every Stackwright template

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Environment, Error, ErrorKind, Value};

/// Register every filter on `env`
pub(super) fn register(env: &mut Environment<'static>) {
    env.add_filter("default", or_default);
    env.add_filter("base64_encode", base64_encode);
    env.add_filter("base64_decode", base64_decode);
    env.add_filter("required", required);
    env.add_filter("tojson", to_json);
}

/// `${var.region | default("us-east-1")}`; empty strings are kept
fn or_default(value: Value, fallback: Value) -> Value {
    if value.is_undefined() || value.is_none() {
        fallback
    } else {
        value
    }
}

/// `${user.data | base64_encode}`, used to embed user scripts in cloud-init
fn base64_encode(value: &str) -> String {
    STANDARD.encode(value)
}

fn base64_decode(value: &str) -> Result<String, Error> {
    let bytes = STANDARD
        .decode(value)
        .map_err(|e| invalid(format!("not base64: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| invalid(format!("decoded bytes are not UTF-8: {}", e)))
}

/// `${agent.key | required}` fails the render instead of emitting an empty field
fn required(value: Value) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        return Err(Error::new(
            ErrorKind::UndefinedError,
            "value marked required has no value",
        ));
    }
    Ok(value)
}

/// `${credential.secret_key | tojson}` emits a quoted, escaped JSON literal
fn to_json(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value).map_err(|e| invalid(format!("not representable as JSON: {}", e)))
}

fn invalid(msg: String) -> Error {
    Error::new(ErrorKind::InvalidOperation, msg)
}
