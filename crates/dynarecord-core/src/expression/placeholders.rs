//! Placeholder allocation for expression attribute names and values.

use std::collections::HashMap;

use dynarecord_model::AttributeValue;

use super::ExpressionError;
use crate::codec;
use crate::value::Value;

/// Name and value binding tables shared by every clause of one request.
///
/// A field always maps to the same `#name` placeholder. Value placeholders
/// are unique per binding; a token that is already taken gets a `_<n>`
/// suffix, so `:a0` from a set on `a` can never clash with a field named
/// `a0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionAttributes {
    /// `#placeholder` -> attribute name.
    pub names: HashMap<String, String>,
    /// `:placeholder` -> bound value.
    pub values: HashMap<String, AttributeValue>,
}

impl ExpressionAttributes {
    /// Create empty binding tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder for an attribute name, reusing an existing binding.
    pub fn name(&mut self, field: &str) -> Result<String, ExpressionError> {
        if field.is_empty() {
            return Err(ExpressionError::EmptyFieldName);
        }
        if let Some((placeholder, _)) = self.names.iter().find(|(_, f)| f.as_str() == field) {
            return Ok(placeholder.clone());
        }
        let placeholder = unique_token('#', &token(field), |t| self.names.contains_key(t));
        self.names.insert(placeholder.clone(), field.to_owned());
        Ok(placeholder)
    }

    /// Bind a value under a fresh placeholder derived from `hint`.
    pub fn value(&mut self, hint: &str, value: &Value) -> Result<String, ExpressionError> {
        let encoded = codec::encode(value)?;
        let placeholder = unique_token(':', &token(hint), |t| self.values.contains_key(t));
        self.values.insert(placeholder.clone(), encoded);
        Ok(placeholder)
    }

    /// Bind an already encoded value under an explicit placeholder.
    ///
    /// `placeholder` may be given with or without its leading `:`.
    pub fn bind_raw(&mut self, placeholder: &str, value: AttributeValue) -> String {
        let placeholder = if placeholder.starts_with(':') {
            placeholder.to_owned()
        } else {
            format!(":{placeholder}")
        };
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Drop every name and value placeholder that none of `expressions`
    /// mentions. The store rejects requests carrying unused bindings.
    pub fn retain_referenced(&mut self, expressions: &[&str]) {
        self.names
            .retain(|placeholder, _| is_referenced(placeholder, expressions));
        self.values
            .retain(|placeholder, _| is_referenced(placeholder, expressions));
    }

    /// `true` when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.values.is_empty()
    }
}

/// Whether `placeholder` appears as a whole token, so `:t` does not match
/// inside `:tenantId`.
fn is_referenced(placeholder: &str, expressions: &[&str]) -> bool {
    expressions.iter().any(|expr| {
        expr.match_indices(placeholder).any(|(at, _)| {
            !expr[at + placeholder.len()..]
                .starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
        })
    })
}

/// Reduce a field name to characters valid in a placeholder token.
fn token(field: &str) -> String {
    let t: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if t.is_empty() { "v".to_owned() } else { t }
}

fn unique_token(prefix: char, base: &str, taken: impl Fn(&str) -> bool) -> String {
    let candidate = format!("{prefix}{base}");
    if !taken(&candidate) {
        return candidate;
    }
    (1..)
        .map(|n| format!("{prefix}{base}_{n}"))
        .find(|c| !taken(c))
        .unwrap_or(candidate)
}
