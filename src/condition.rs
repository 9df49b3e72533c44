//! Predicate evaluation for branch conditions.
//!
//! Compares a slot value against a string literal with the loose coercion
//! rules the scenario editor exposes: boolean literals short-circuit to
//! equality checks, ordering operators require both sides to parse as
//! numbers, and `contains` works on the display form of the slot value.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::interpolate::display_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "!contains")]
    NotContains,
}

impl Default for ConditionOperator {
    fn default() -> Self {
        ConditionOperator::Eq
    }
}

/// Evaluate `slot_value <operator> literal`.
///
/// An absent (or JSON null) slot value never satisfies a positive check and
/// always satisfies `!contains`.
pub fn evaluate(slot_value: Option<&Value>, operator: ConditionOperator, literal: &str) -> bool {
    let slot_value = slot_value.filter(|value| !value.is_null());

    let lowered = literal.trim().to_ascii_lowercase();
    if lowered == "true" || lowered == "false" {
        let expected = lowered == "true";
        let actual = slot_value.map(as_bool).unwrap_or(false);
        return match operator {
            ConditionOperator::Eq => actual == expected,
            ConditionOperator::Ne => actual != expected,
            // Ordering and containment are meaningless against booleans.
            _ => false,
        };
    }

    match operator {
        ConditionOperator::Gt | ConditionOperator::Lt | ConditionOperator::Ge | ConditionOperator::Le => {
            let lhs = slot_value.and_then(as_number);
            let rhs = literal.trim().parse::<f64>().ok();
            match (lhs, rhs) {
                (Some(lhs), Some(rhs)) => match operator {
                    ConditionOperator::Gt => lhs > rhs,
                    ConditionOperator::Lt => lhs < rhs,
                    ConditionOperator::Ge => lhs >= rhs,
                    ConditionOperator::Le => lhs <= rhs,
                    _ => false,
                },
                _ => false,
            }
        }
        ConditionOperator::Eq | ConditionOperator::Ne => {
            let equal = match slot_value {
                Some(value) => loose_eq(value, literal),
                None => false,
            };
            if operator == ConditionOperator::Eq {
                equal
            } else {
                !equal
            }
        }
        ConditionOperator::Contains | ConditionOperator::NotContains => {
            let found = slot_value
                .map(|value| display_string(value).contains(literal))
                .unwrap_or(false);
            if operator == ConditionOperator::Contains {
                found
            } else {
                !found
            }
        }
    }
}

/// Loose equality: numeric comparison when both sides parse as numbers,
/// display-string comparison otherwise.
fn loose_eq(value: &Value, literal: &str) -> bool {
    if let (Some(lhs), Ok(rhs)) = (as_number(value), literal.trim().parse::<f64>()) {
        return lhs == rhs;
    }
    display_string(value) == literal
}

fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}
