//! Slot interpolation for display text and request bodies.
//!
//! Two template grammars coexist: `{slot}` for display contexts, where every
//! value becomes a string, and `{{slot}}` for JSON request bodies, where the
//! substitution must preserve the slot's JSON type (`"amount": {{amount}}`
//! with `amount = 42` yields the number `42`, not `"42"`).

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::EngineError;
use crate::slots::Slots;

static RE_REQUEST_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("request token pattern"));

static RE_DISPLAY_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_.]+)\}").expect("display token pattern"));

/// Display form of a slot value: strings verbatim, everything else as
/// compact JSON.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Replace every `{key}` whose key exists in `slots` with the display form
/// of the value. Unresolved keys are left verbatim, braces included.
///
/// A single pass over the template: tokens appearing inside substituted
/// values are never re-expanded, so the output is independent of the slot
/// map's iteration order.
pub fn interpolate(template: &str, slots: &Slots) -> String {
    RE_DISPLAY_TOKEN
        .replace_all(template, |caps: &Captures| match slots.get(&caps[1]) {
            Some(value) => display_string(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Type-preserving interpolation for JSON request bodies.
///
/// Substitution runs in two phases: first every `{{key}}` token is replaced
/// textually (string slots inline as escaped string content so they compose
/// inside larger literals like `"Bearer {{token}}"`, non-string slots inline
/// as raw JSON), then the result is parsed and re-serialized so malformed
/// output is rejected as a configuration error rather than sent on the wire.
pub fn interpolate_request(template: &str, slots: &Slots) -> Result<String, EngineError> {
    let substituted = RE_REQUEST_TOKEN.replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        match slots.get(key) {
            // Unresolved tokens stay verbatim; the parse below rejects them.
            None => caps[0].to_string(),
            Some(Value::String(text)) => escape_json_fragment(text),
            Some(other) => other.to_string(),
        }
    });

    let value: Value = serde_json::from_str(&substituted).map_err(|err| {
        EngineError::Config(format!(
            "request body is not valid JSON after interpolation: {err}"
        ))
    })?;
    Ok(value.to_string())
}

/// Dot-separated path lookup (`data.user.name`, array segments by index).
/// Returns `None` on any missing segment.
pub fn get_nested_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// JSON string escaping without the surrounding quotes, so fragments can be
/// spliced into an existing string literal.
fn escape_json_fragment(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            control if (control as u32) < 0x20 => {
                escaped.push_str(&format!("\\u{:04x}", control as u32));
            }
            other => escaped.push(other),
        }
    }
    escaped
}
