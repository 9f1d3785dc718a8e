//! Placeholder substitution over serialized manifests
//!
//! Two placeholder forms are recognised per bound key:
//!
//! - `{{key}}` is replaced by the raw value.
//! - `"{{key}}}"` (quoted, three closing braces) is replaced type-aware: an
//!   empty value becomes `""`, a number becomes a bare literal, anything else
//!   stays a quoted string.
//!
//! All placeholders are matched by one alternation and replaced in a single
//! pass, so a value that itself looks like a placeholder is never expanded
//! again. Substitution always starts from `original_content`.

use crate::config::SubstitutionConfig;
use crate::error::Result;
use crate::validation::is_number_literal;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use stencil_common::{PreviewManifest, VariableBinding, VariableType, VariableValue};

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_.-]*)\}\}").unwrap()
});

/// `{{key}}`
pub fn placeholder(key: &str) -> String {
    format!("{{{{{}}}}}", key)
}

/// `"{{key}}}"`
pub fn quoted_placeholder(key: &str) -> String {
    format!("\"{{{{{}}}}}}}\"", key)
}

/// Replacement table compiled for one binding set
#[derive(Debug, Clone)]
pub struct Substitution {
    pattern: Option<Regex>,
    replacements: HashMap<String, String>,
}

impl Substitution {
    pub fn compile(bindings: &[VariableBinding], config: &SubstitutionConfig) -> Result<Self> {
        let mut replacements = HashMap::with_capacity(bindings.len() * 2);
        for binding in bindings {
            if config.legacy_quoted_placeholders {
                replacements.insert(
                    quoted_placeholder(&binding.key),
                    quoted_replacement(binding, config.infer_numbers),
                );
            }
            replacements.insert(placeholder(&binding.key), binding.raw_value());
        }

        if replacements.is_empty() {
            return Ok(Self {
                pattern: None,
                replacements,
            });
        }

        // Longest literal first so the quoted form wins over the bare form it contains
        let mut literals: Vec<&String> = replacements.keys().collect();
        literals.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let alternation = literals
            .iter()
            .map(|literal| regex::escape(literal))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            pattern: Some(Regex::new(&alternation)?),
            replacements,
        })
    }

    pub fn apply(&self, original: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return original.to_string();
        };

        pattern
            .replace_all(original, |caps: &Captures| {
                self.replacements
                    .get(&caps[0])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Recompute `content` of every manifest from its `original_content`
    pub fn render(&self, manifests: &mut [PreviewManifest]) {
        for manifest in manifests.iter_mut() {
            manifest.content = self.apply(&manifest.original_content);
        }
    }
}

/// Substitute `bindings` into `original`
pub fn substitute(
    original: &str,
    bindings: &[VariableBinding],
    config: &SubstitutionConfig,
) -> Result<String> {
    Ok(Substitution::compile(bindings, config)?.apply(original))
}

/// Re-render a manifest list against the given bindings
pub fn render_manifests(
    manifests: &mut [PreviewManifest],
    bindings: &[VariableBinding],
    config: &SubstitutionConfig,
) -> Result<()> {
    Substitution::compile(bindings, config)?.render(manifests);
    Ok(())
}

/// Keys still present as `{{key}}` after substitution
pub fn unresolved_placeholders(content: &str) -> Vec<String> {
    PLACEHOLDER_REGEX
        .captures_iter(content)
        .map(|caps| caps[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Parse rendered content; JSON parses too since it is a YAML subset
pub fn parse_manifest(content: &str) -> Result<serde_yaml::Value> {
    Ok(serde_yaml::from_str(content)?)
}

fn quoted_replacement(binding: &VariableBinding, infer_numbers: bool) -> String {
    if binding.is_empty() {
        return "\"\"".to_string();
    }

    let raw = binding.raw_value();
    if renders_bare(binding, &raw, infer_numbers) {
        raw
    } else {
        format!("\"{}\"", escape_quoted(&raw))
    }
}

fn renders_bare(binding: &VariableBinding, raw: &str, infer_numbers: bool) -> bool {
    let is_number = matches!(binding.value, Some(VariableValue::Number(_)));
    match binding.var_type {
        VariableType::String => false,
        // Declared numbers still have to be valid number literals to go out bare
        VariableType::Number => is_number || is_number_literal(raw),
        VariableType::Auto => is_number || (infer_numbers && is_number_literal(raw)),
    }
}

fn escape_quoted(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}
