//! Expression building for queries, scans and conditional writes.
//!
//! Callers describe what they want as ordered [`Filters`]; the builder turns
//! them into DynamoDB expression strings plus the placeholder tables those
//! strings reference:
//!
//! 1. **Key condition**: the first filter (in input order) that is a scalar
//!    equality on a declared index's partition key selects that index.
//! 2. **Filter**: every other filter becomes an `=` or `IN` clause, joined
//!    with `AND`, or a structured `ScanFilter` condition.
//! 3. **Update**: dirty fields become `SET` clauses, unset fields `REMOVE`.

mod builder;
mod placeholders;

use crate::codec::CodecError;
use crate::value::Value;

pub use builder::{
    ATTRIBUTE_EXISTS_ID, ATTRIBUTE_NOT_EXISTS_ID, KeySelection, QueryPlan, build_filter,
    build_scan_filter, build_update, select_key_condition,
};
pub use placeholders::ExpressionAttributes;

/// DynamoDB accepts at most this many operands in one `IN` list.
pub const MAX_IN_OPERANDS: usize = 100;

/// Errors raised while building expressions from caller input.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    /// An attribute name was empty.
    #[error("attribute names in expressions cannot be empty")]
    EmptyFieldName,

    /// A membership filter had no candidate values.
    #[error("filter on '{field}' has an empty value set")]
    EmptyValueSet {
        /// The filtered field.
        field: String,
    },

    /// A membership filter exceeded the `IN` operand limit.
    #[error("filter on '{field}' has {count} values, at most {MAX_IN_OPERANDS} are allowed")]
    TooManyValues {
        /// The filtered field.
        field: String,
        /// Number of values supplied.
        count: usize,
    },

    /// The filters had no scalar value for the requested index's key.
    #[error("index '{index}' requires an equality filter on '{field}'")]
    MissingKeyCondition {
        /// The requested index.
        index: String,
        /// Its partition key.
        field: String,
    },

    /// An update had neither `SET` nor `REMOVE` clauses.
    #[error("update expression has no clauses")]
    EmptyUpdate,

    /// A filter value could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The value side of one filter: equality or set membership.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// `field = value`.
    Eq(Value),
    /// `field IN (values...)`.
    In(Vec<Value>),
}

impl FilterValue {
    /// `true` for equality filters, the only kind an index key accepts.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Eq(_))
    }
}

impl From<Value> for FilterValue {
    /// Lists become membership filters, everything else equality.
    fn from(v: Value) -> Self {
        match v {
            Value::List(items) => Self::In(items),
            scalar => Self::Eq(scalar),
        }
    }
}

/// Ordered field filters. Order decides which field becomes the key
/// condition, so it is preserved exactly as given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Vec<(String, FilterValue)>);

impl Filters {
    /// Create an empty filter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, FilterValue::Eq(value.into()));
        self
    }

    /// Add a membership filter.
    #[must_use]
    pub fn any_of<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.push(
            field,
            FilterValue::In(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Add or replace a filter. A replaced filter keeps its position.
    pub fn push(&mut self, field: impl Into<String>, value: FilterValue) {
        let field = field.into();
        if let Some(slot) = self.0.iter_mut().find(|(f, _)| *f == field) {
            slot.1 = value;
        } else {
            self.0.push((field, value));
        }
    }

    /// The filter on `field`, if any.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FilterValue> {
        self.0.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    /// Iterate filters in input order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.0.iter().map(|(f, v)| (f.as_str(), v))
    }

    /// Number of filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when there are no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filters = Self::new();
        for (k, v) in iter {
            filters.push(k, FilterValue::from(v.into()));
        }
        filters
    }
}
