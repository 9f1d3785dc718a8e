//! Variable bindings collected per namespace

use serde::{Deserialize, Serialize};

/// Value bound to a template variable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum VariableValue {
    Number(serde_json::Number),
    Text(String),
}

impl std::fmt::Display for VariableValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for VariableValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for VariableValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

/// Declared type of a variable, controlling how quoted placeholders render
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    /// Infer from the value: numbers render bare, everything else quoted
    #[default]
    Auto,
    /// Always render quoted
    String,
    /// Render bare whenever the value is numeric
    Number,
}

/// `{key, value}` assignment scoped to one namespace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableBinding {
    pub key: String,
    #[serde(default)]
    pub value: Option<VariableValue>,
    #[serde(default, rename = "type")]
    pub var_type: VariableType,
}

impl VariableBinding {
    pub fn new(key: impl Into<String>, value: impl Into<VariableValue>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            var_type: VariableType::Auto,
        }
    }

    /// Binding with no value; substitutes as an empty value
    pub fn unset(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            var_type: VariableType::Auto,
        }
    }

    pub fn with_type(mut self, var_type: VariableType) -> Self {
        self.var_type = var_type;
        self
    }

    /// Raw string form of the value; empty when unset
    pub fn raw_value(&self) -> String {
        self.value.as_ref().map(|v| v.to_string()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        match &self.value {
            None => true,
            Some(VariableValue::Text(s)) => s.is_empty(),
            Some(VariableValue::Number(_)) => false,
        }
    }
}
