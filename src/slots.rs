//! Conversation variables: a flat, dynamically typed key/value map.

use std::collections::HashMap;

use serde_json::Value;

use crate::interpolate::interpolate;

/// Flat mapping of conversation-variable names to opaque JSON values.
pub type Slots = HashMap<String, Value>;

/// Holder for the slot map with replace-on-write semantics: `set` swaps the
/// whole map, so callers merging must spread the prior snapshot themselves.
/// `merge` is the read-modify-write helper async completions use so late
/// writes never clobber slots assigned in the meantime.
#[derive(Debug, Clone, Default)]
pub struct SlotStore {
    values: Slots,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> &Slots {
        &self.values
    }

    pub fn snapshot(&self) -> Slots {
        self.values.clone()
    }

    /// Full replacement, not a merge.
    pub fn set(&mut self, new_slots: Slots) {
        self.values = new_slots;
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn merge(&mut self, updates: Slots) {
        self.values.extend(updates);
    }

    pub fn assign(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Typed coercion for setSlot assignments, applied after display
/// interpolation of the raw value. Priority: JSON object/array literal,
/// boolean literal, number, plain string.
pub fn coerce_slot_literal(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
            return parsed;
        }
    }
    if trimmed == "true" {
        return Value::Bool(true);
    }
    if trimmed == "false" {
        return Value::Bool(false);
    }
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Value::Number(integer.into());
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(raw.to_string())
}

/// Interpolate then coerce, the full setSlot assignment pipeline.
pub fn coerce_assignment(raw_value: &str, slots: &Slots) -> Value {
    coerce_slot_literal(&interpolate(raw_value, slots))
}
