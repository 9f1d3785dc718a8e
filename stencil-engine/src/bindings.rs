//! Per-namespace variable bindings
//!
//! Bindings are created the first time a namespace enters the preview flow
//! and live until the template set version changes.

use crate::error::SelectionError;
use crate::validation::validate_variable_key;
use std::collections::{BTreeMap, HashMap};
use stencil_common::{NamespaceId, VariableBinding, VariableType, VariableValue};

#[derive(Debug, Clone, Default)]
pub struct BindingStore {
    by_namespace: HashMap<NamespaceId, Vec<VariableBinding>>,
}

impl BindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.by_namespace.contains_key(namespace)
    }

    /// Seed a namespace with its defaults.
    ///
    /// No-op when the namespace already has bindings, so edits survive a
    /// preview refresh. Later duplicates of a key replace earlier ones.
    /// Returns whether the defaults were applied.
    pub fn initialize(&mut self, namespace: &str, defaults: Vec<VariableBinding>) -> bool {
        if self.contains(namespace) {
            return false;
        }

        let mut bindings: Vec<VariableBinding> = Vec::with_capacity(defaults.len());
        for binding in defaults {
            if validate_variable_key(&binding.key).is_err() {
                tracing::warn!(
                    namespace = %namespace,
                    key = %binding.key,
                    "Dropping default variable with invalid key"
                );
                continue;
            }
            match bindings.iter_mut().find(|b| b.key == binding.key) {
                Some(existing) => *existing = binding,
                None => bindings.push(binding),
            }
        }

        self.by_namespace.insert(namespace.to_string(), bindings);
        true
    }

    /// Insert or replace the value of `key`
    pub fn set(
        &mut self,
        namespace: &str,
        key: &str,
        value: Option<VariableValue>,
    ) -> Result<(), SelectionError> {
        validate_variable_key(key)?;

        let bindings = self.by_namespace.entry(namespace.to_string()).or_default();
        match bindings.iter_mut().find(|b| b.key == key) {
            Some(binding) => binding.value = value,
            None => bindings.push(VariableBinding {
                key: key.to_string(),
                value,
                var_type: VariableType::Auto,
            }),
        }

        Ok(())
    }

    /// Change the declared type of an existing key
    pub fn set_type(&mut self, namespace: &str, key: &str, var_type: VariableType) -> bool {
        let binding = self
            .by_namespace
            .get_mut(namespace)
            .and_then(|bindings| bindings.iter_mut().find(|b| b.key == key));

        match binding {
            Some(binding) => {
                binding.var_type = var_type;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, namespace: &str, key: &str) -> Option<VariableBinding> {
        let bindings = self.by_namespace.get_mut(namespace)?;
        let index = bindings.iter().position(|b| b.key == key)?;
        Some(bindings.remove(index))
    }

    pub fn bindings(&self, namespace: &str) -> &[VariableBinding] {
        self.by_namespace
            .get(namespace)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Key to raw value map as sent to the platform; unset values become ""
    pub fn variable_map(&self, namespace: &str) -> BTreeMap<String, String> {
        self.bindings(namespace)
            .iter()
            .map(|b| (b.key.clone(), b.raw_value()))
            .collect()
    }

    pub fn forget_namespace(&mut self, namespace: &str) {
        self.by_namespace.remove(namespace);
    }

    pub fn clear(&mut self) {
        self.by_namespace.clear();
    }
}
