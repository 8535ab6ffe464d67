//! Manifest-driven input validation
//!
//! Validates user supplied values against the input fields declared by a
//! manifest. Both the panel (before signing a job) and the agent (before
//! executing one) run the same checks. Validation never short-circuits: every
//! failing check on every field produces one [`FieldError`], so a caller sees
//! the complete error set from a single call.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::manifest::{InputField, InputType, InputValidation};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern is valid")
});

const BOOLEAN_LITERALS: &[&str] = &["true", "false", "1", "0", "yes", "no"];

/// One failed check on one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &InputField, message: String) -> Self {
        Self {
            field: field.name.clone(),
            message,
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Validate `inputs` against the declared `fields`
///
/// Returns every error in declaration order.
pub fn validate_inputs(
    fields: &[InputField],
    inputs: &BTreeMap<String, String>,
) -> Result<(), Vec<FieldError>> {
    let errors: Vec<FieldError> = fields
        .iter()
        .filter(|field| is_visible(field, inputs))
        .flat_map(|field| validate_field(field, inputs.get(&field.name).map(String::as_str)))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Whether every `visible_if` condition of `field` holds
pub fn is_visible(field: &InputField, inputs: &BTreeMap<String, String>) -> bool {
    match field.visible_if {
        Some(ref conditions) => conditions
            .iter()
            .all(|(name, expected)| inputs.get(name) == Some(expected)),
        None => true,
    }
}

/// Validate one visible field
///
/// An absent or empty value is "not supplied": it fails only when the field
/// is required, and no further checks run on it.
pub fn validate_field(field: &InputField, value: Option<&str>) -> Vec<FieldError> {
    let value = match value {
        Some(v) if !v.is_empty() => v,
        _ => {
            if field.required {
                return vec![FieldError::new(field, format!("{} is required", field.label))];
            }
            return Vec::new();
        }
    };

    let mut errors = Vec::new();

    if let Some(message) = check_type(field, value) {
        errors.push(FieldError::new(field, message));
    }

    if let Some(ref rules) = field.validation {
        errors.extend(
            check_rules(&field.label, rules, value)
                .into_iter()
                .map(|message| FieldError::new(field, message)),
        );
    }

    errors
}

fn check_type(field: &InputField, value: &str) -> Option<String> {
    let label = &field.label;
    match field.field_type {
        InputType::Integer => match value.trim().parse::<i64>() {
            Ok(_) => None,
            Err(_) => Some(format!("{} must be an integer", label)),
        },
        InputType::Port => match value.trim().parse::<i64>() {
            Ok(port) if (1..=65535).contains(&port) => None,
            Ok(_) => Some(format!("{} must be between 1 and 65535", label)),
            Err(_) => Some(format!("{} must be a valid port number", label)),
        },
        InputType::Email => {
            if EMAIL_RE.is_match(value) {
                None
            } else {
                Some(format!("{} must be a valid email", label))
            }
        }
        InputType::Boolean => {
            if BOOLEAN_LITERALS.contains(&value.to_lowercase().as_str()) {
                None
            } else {
                Some(format!("{} must be true or false", label))
            }
        }
        InputType::String | InputType::Password | InputType::Select => None,
    }
}

fn check_rules(label: &str, rules: &InputValidation, value: &str) -> Vec<String> {
    let mut errors = Vec::new();

    // Anchored at the start only: a prefix match is enough
    match rules.pattern_regex() {
        Some(Ok(re)) if re.is_match(value) => {}
        Some(Ok(_)) => errors.push(format!("{} format is invalid", label)),
        Some(Err(_)) => errors.push(format!("{} has an invalid validation pattern", label)),
        None => {}
    }

    let length = value.chars().count();
    if let Some(min) = rules.min_length {
        if length < min {
            errors.push(format!("{} must be at least {} characters", label, min));
        }
    }
    if let Some(max) = rules.max_length {
        if length > max {
            errors.push(format!("{} must be at most {} characters", label, max));
        }
    }

    // Non-numeric values skip numeric bounds; the type check reports them
    if let Ok(number) = value.trim().parse::<f64>() {
        if let Some(min) = rules.min_value {
            if number < min {
                errors.push(format!("{} must be at least {}", label, min));
            }
        }
        if let Some(max) = rules.max_value {
            if number > max {
                errors.push(format!("{} must be at most {}", label, max));
            }
        }
    }

    if let Some(ref allowed) = rules.allowed_values {
        if !allowed.iter().any(|a| a == value) {
            errors.push(format!("{} must be one of: {}", label, allowed.join(", ")));
        }
    }

    errors
}
