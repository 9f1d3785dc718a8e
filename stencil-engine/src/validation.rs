//! Input validation for user-supplied variable keys and identifiers

use crate::error::SelectionError;
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a variable key
pub const MAX_VARIABLE_KEY_LENGTH: usize = 128;

static VARIABLE_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").unwrap()
});

/// JSON number grammar; anything else is not a number for substitution purposes
static NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?$").unwrap()
});

/// Variable key validation
pub fn validate_variable_key(key: &str) -> Result<(), SelectionError> {
    if key.is_empty() {
        return Err(SelectionError::InvalidVariableKey(
            "variable key cannot be empty".to_string(),
        ));
    }

    if key.len() > MAX_VARIABLE_KEY_LENGTH {
        return Err(SelectionError::InvalidVariableKey(format!(
            "{} (max {} characters)",
            key, MAX_VARIABLE_KEY_LENGTH
        )));
    }

    if !VARIABLE_KEY_REGEX.is_match(key) {
        return Err(SelectionError::InvalidVariableKey(key.to_string()));
    }

    Ok(())
}

/// Whether `text` is a number literal that survives JSON/YAML parsing unchanged
pub fn is_number_literal(text: &str) -> bool {
    NUMBER_REGEX.is_match(text)
}
