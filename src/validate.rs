//! Form element validation: email/phone/custom regex rules for inputs,
//! day-granular range checks for dates, option membership for choice
//! elements. The first failing element blocks submission with a
//! field-specific message.

use std::collections::HashMap;

use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::graph::{FormElement, FormElementKind, InputValidation};
use crate::interpolate::interpolate;
use crate::slots::Slots;

static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));
static RE_PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{6,14}[0-9]$").expect("phone pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("{field} must be a valid email address")]
    Email { field: String },

    #[error("{field} must be a valid phone number")]
    Phone { field: String },

    #[error("{field} does not match the required format")]
    Pattern { field: String },

    /// Configuration error: the authored pattern itself is broken.
    #[error("invalid validation pattern for {field}: {message}")]
    InvalidPattern { field: String, message: String },

    #[error("{field} must be a date in YYYY-MM-DD format")]
    Date { field: String },

    #[error("{field} must be on or after {bound}")]
    DateAfter { field: String, bound: NaiveDate },

    #[error("{field} must be on or before {bound}")]
    DateBefore { field: String, bound: NaiveDate },

    #[error("{field} must be one of the listed options")]
    Option { field: String },
}

/// Validate every element in order against the submitted values; the first
/// failure wins. Missing submissions are treated as empty strings.
pub fn validate_form(
    elements: &[FormElement],
    form_data: &HashMap<String, String>,
) -> Result<(), FormError> {
    for element in elements {
        let submitted = form_data
            .get(&element.slot)
            .map(String::as_str)
            .unwrap_or("");
        validate_element(element, submitted)?;
    }
    Ok(())
}

fn validate_element(element: &FormElement, submitted: &str) -> Result<(), FormError> {
    let field = field_name(element);
    match element.kind {
        FormElementKind::Input => match &element.validation {
            None => Ok(()),
            Some(InputValidation::Email) => {
                if RE_EMAIL.is_match(submitted) {
                    Ok(())
                } else {
                    Err(FormError::Email { field })
                }
            }
            Some(InputValidation::Phone) => {
                if RE_PHONE.is_match(submitted) {
                    Ok(())
                } else {
                    Err(FormError::Phone { field })
                }
            }
            Some(InputValidation::Custom { pattern }) => {
                let regex = Regex::new(pattern).map_err(|err| FormError::InvalidPattern {
                    field: field.clone(),
                    message: err.to_string(),
                })?;
                if regex.is_match(submitted) {
                    Ok(())
                } else {
                    Err(FormError::Pattern { field })
                }
            }
        },
        FormElementKind::Date => validate_date(element, submitted, field),
        FormElementKind::Checkbox | FormElementKind::Dropbox => {
            if element.options.is_empty() || submitted.is_empty() {
                return Ok(());
            }
            // Checkbox submissions may carry several comma-separated picks.
            let all_known = submitted
                .split(',')
                .map(str::trim)
                .all(|picked| element.options.iter().any(|option| option == picked));
            if all_known {
                Ok(())
            } else {
                Err(FormError::Option { field })
            }
        }
        FormElementKind::Grid => Ok(()),
    }
}

fn validate_date(element: &FormElement, submitted: &str, field: String) -> Result<(), FormError> {
    let date = NaiveDate::parse_from_str(submitted.trim(), "%Y-%m-%d")
        .map_err(|_| FormError::Date { field: field.clone() })?;

    if let Some(range) = &element.range {
        if let Some(after) = range.after.as_deref().and_then(parse_bound) {
            // Inclusive day boundary.
            if date < after {
                return Err(FormError::DateAfter { field, bound: after });
            }
        }
        if let Some(before) = range.before.as_deref().and_then(parse_bound) {
            if date > before {
                return Err(FormError::DateBefore { field, bound: before });
            }
        }
    }
    Ok(())
}

fn parse_bound(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("today") {
        return Some(Local::now().date_naive());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

fn field_name(element: &FormElement) -> String {
    if element.label.is_empty() {
        element.slot.clone()
    } else {
        element.label.clone()
    }
}

/// Pre-populate slots from element defaults, interpolated against the
/// current slot state, before the form first renders.
pub fn default_slot_updates(elements: &[FormElement], slots: &Slots) -> Slots {
    let mut updates = Slots::new();
    for element in elements {
        if element.slot.is_empty() {
            continue;
        }
        if let Some(default) = &element.default_value {
            if !default.is_empty() {
                updates.insert(
                    element.slot.clone(),
                    Value::String(interpolate(default, slots)),
                );
            }
        }
    }
    updates
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{Duration, Local};
    use serde_json::json;

    use super::{default_slot_updates, validate_form, FormError};
    use crate::graph::{DateRange, FormElement, FormElementKind, InputValidation};
    use crate::slots::Slots;

    fn input(slot: &str, validation: Option<InputValidation>) -> FormElement {
        FormElement {
            kind: FormElementKind::Input,
            label: String::new(),
            slot: slot.to_string(),
            default_value: None,
            options: Vec::new(),
            validation,
            range: None,
        }
    }

    fn submitted(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn email_rule() {
        let elements = vec![input("mail", Some(InputValidation::Email))];
        assert!(validate_form(&elements, &submitted(&[("mail", "a@b.co")])).is_ok());
        assert_eq!(
            validate_form(&elements, &submitted(&[("mail", "not-an-email")])),
            Err(FormError::Email { field: "mail".to_string() })
        );
    }

    #[test]
    fn phone_rule() {
        let elements = vec![input("tel", Some(InputValidation::Phone))];
        assert!(validate_form(&elements, &submitted(&[("tel", "+82 10-1234-5678")])).is_ok());
        assert!(validate_form(&elements, &submitted(&[("tel", "nope")])).is_err());
    }

    #[test]
    fn custom_pattern_rule() {
        let elements = vec![input(
            "code",
            Some(InputValidation::Custom { pattern: "^[A-Z]{3}-[0-9]{2}$".to_string() }),
        )];
        assert!(validate_form(&elements, &submitted(&[("code", "ABC-12")])).is_ok());
        assert!(validate_form(&elements, &submitted(&[("code", "abc-12")])).is_err());
    }

    #[test]
    fn broken_pattern_is_a_configuration_error() {
        let elements = vec![input(
            "code",
            Some(InputValidation::Custom { pattern: "([".to_string() }),
        )];
        assert!(matches!(
            validate_form(&elements, &submitted(&[("code", "x")])),
            Err(FormError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn first_failing_element_wins() {
        let elements = vec![
            input("mail", Some(InputValidation::Email)),
            input("tel", Some(InputValidation::Phone)),
        ];
        assert_eq!(
            validate_form(&elements, &submitted(&[("mail", "bad"), ("tel", "bad")])),
            Err(FormError::Email { field: "mail".to_string() })
        );
    }

    #[test]
    fn date_range_today_is_inclusive() {
        let today = Local::now().date_naive();
        let element = FormElement {
            kind: FormElementKind::Date,
            label: "when".to_string(),
            slot: "when".to_string(),
            default_value: None,
            options: Vec::new(),
            validation: None,
            range: Some(DateRange {
                after: Some("today".to_string()),
                before: None,
            }),
        };
        let elements = vec![element];

        let today_str = today.format("%Y-%m-%d").to_string();
        assert!(validate_form(&elements, &submitted(&[("when", today_str.as_str())])).is_ok());

        let yesterday = (today - Duration::days(1)).format("%Y-%m-%d").to_string();
        assert_eq!(
            validate_form(&elements, &submitted(&[("when", yesterday.as_str())])),
            Err(FormError::DateAfter { field: "when".to_string(), bound: today })
        );
    }

    #[test]
    fn dropbox_membership() {
        let element = FormElement {
            kind: FormElementKind::Dropbox,
            label: String::new(),
            slot: "size".to_string(),
            default_value: None,
            options: vec!["S".to_string(), "M".to_string()],
            validation: None,
            range: None,
        };
        assert!(validate_form(&[element.clone()], &submitted(&[("size", "M")])).is_ok());
        assert!(validate_form(&[element], &submitted(&[("size", "XL")])).is_err());
    }

    #[test]
    fn defaults_interpolate_against_slots() {
        let mut element = input("city", None);
        element.default_value = Some("{home}".to_string());
        let mut slots = Slots::new();
        slots.insert("home".to_string(), json!("Seoul"));

        let updates = default_slot_updates(&[element], &slots);
        assert_eq!(updates.get("city"), Some(&json!("Seoul")));
    }
}
