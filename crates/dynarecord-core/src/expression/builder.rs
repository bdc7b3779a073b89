//! Key-condition selection, filter generation and update rendering.

use std::collections::HashMap;

use dynarecord_model::types::{ComparisonOperator, Condition};

use super::{ExpressionAttributes, ExpressionError, FilterValue, Filters, MAX_IN_OPERANDS};
use crate::codec;
use crate::descriptor::IndexDescriptor;
use crate::value::Value;

/// Create-only precondition on the `id` partition key.
pub const ATTRIBUTE_NOT_EXISTS_ID: &str = "attribute_not_exists(id)";

/// Update-only precondition on the `id` partition key.
pub const ATTRIBUTE_EXISTS_ID: &str = "attribute_exists(id)";

/// The filter chosen to drive an index query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeySelection<'a> {
    /// The index whose partition key matched.
    pub index: &'a IndexDescriptor,
    /// The filter field consumed as the key condition.
    pub field: &'a str,
    /// The equality value.
    pub value: &'a Value,
}

impl KeySelection<'_> {
    /// Render `#field = :field` and bind its placeholders.
    pub fn render(&self, attrs: &mut ExpressionAttributes) -> Result<String, ExpressionError> {
        let name = attrs.name(self.field)?;
        let value = attrs.value(self.field, self.value)?;
        Ok(format!("{name} = {value}"))
    }
}

/// Pick the key condition for a query.
///
/// Walks the filters in input order and returns the first scalar filter whose
/// field is the partition key of a declared index. Membership filters are
/// never eligible. At most one field is selected because a query accepts a
/// single partition-key equality; `None` means the caller must scan.
#[must_use]
pub fn select_key_condition<'a>(
    filters: &'a Filters,
    indexes: &'a [IndexDescriptor],
) -> Option<KeySelection<'a>> {
    filters.iter().find_map(|(field, value)| {
        let FilterValue::Eq(value) = value else {
            return None;
        };
        indexes
            .iter()
            .find(|index| index.partition_key == field)
            .map(|index| KeySelection {
                index,
                field,
                value,
            })
    })
}

/// Render a filter expression for every field except `key_field`.
///
/// Scalars become `#f = :f`, sets become `#f IN (:f0, :f1, ...)`, and the
/// clauses are joined with `AND`. Returns `None` when no clause remains.
pub fn build_filter(
    filters: &Filters,
    key_field: Option<&str>,
    attrs: &mut ExpressionAttributes,
) -> Result<Option<String>, ExpressionError> {
    let mut clauses = Vec::with_capacity(filters.len());
    for (field, value) in filters.iter() {
        if key_field == Some(field) {
            continue;
        }
        let name = attrs.name(field)?;
        let clause = match value {
            FilterValue::Eq(v) => format!("{name} = {}", attrs.value(field, v)?),
            FilterValue::In(values) => {
                check_value_set(field, values)?;
                let placeholders = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| attrs.value(&format!("{field}{i}"), v))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{name} IN ({})", placeholders.join(", "))
            }
        };
        clauses.push(clause);
    }
    Ok((!clauses.is_empty()).then(|| clauses.join(" AND ")))
}

/// Render a structured `ScanFilter`: one `EQ` or `IN` condition per field,
/// skipping `key_field`.
pub fn build_scan_filter(
    filters: &Filters,
    key_field: Option<&str>,
) -> Result<HashMap<String, Condition>, ExpressionError> {
    let mut conditions = HashMap::with_capacity(filters.len());
    for (field, value) in filters.iter() {
        if key_field == Some(field) {
            continue;
        }
        if field.is_empty() {
            return Err(ExpressionError::EmptyFieldName);
        }
        let condition = match value {
            FilterValue::Eq(v) => Condition {
                comparison_operator: ComparisonOperator::Eq,
                attribute_value_list: vec![codec::encode(v)?],
            },
            FilterValue::In(values) => {
                check_value_set(field, values)?;
                Condition {
                    comparison_operator: ComparisonOperator::In,
                    attribute_value_list: values
                        .iter()
                        .map(codec::encode)
                        .collect::<Result<_, _>>()?,
                }
            }
        };
        conditions.insert(field.to_owned(), condition);
    }
    Ok(conditions)
}

/// Render `SET #a = :a, ... REMOVE #b, ...` for an item update.
pub fn build_update(
    set: &[(&str, &Value)],
    remove: &[&str],
    attrs: &mut ExpressionAttributes,
) -> Result<String, ExpressionError> {
    let mut sections = Vec::with_capacity(2);
    if !set.is_empty() {
        let clauses = set
            .iter()
            .map(|(field, value)| {
                let name = attrs.name(field)?;
                let placeholder = attrs.value(field, value)?;
                Ok(format!("{name} = {placeholder}"))
            })
            .collect::<Result<Vec<_>, ExpressionError>>()?;
        sections.push(format!("SET {}", clauses.join(", ")));
    }
    if !remove.is_empty() {
        let names = remove
            .iter()
            .map(|field| attrs.name(field))
            .collect::<Result<Vec<_>, _>>()?;
        sections.push(format!("REMOVE {}", names.join(", ")));
    }
    if sections.is_empty() {
        return Err(ExpressionError::EmptyUpdate);
    }
    Ok(sections.join(" "))
}

fn check_value_set(field: &str, values: &[Value]) -> Result<(), ExpressionError> {
    if values.is_empty() {
        return Err(ExpressionError::EmptyValueSet {
            field: field.to_owned(),
        });
    }
    if values.len() > MAX_IN_OPERANDS {
        return Err(ExpressionError::TooManyValues {
            field: field.to_owned(),
            count: values.len(),
        });
    }
    Ok(())
}

/// Everything needed to issue a query (or scan) for a filter set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    /// Selected index; `None` means the request must be a scan.
    pub index_name: Option<String>,
    /// Rendered key condition.
    pub key_condition: Option<String>,
    /// Rendered filter expression.
    pub filter: Option<String>,
    /// Placeholder tables referenced by both expressions.
    pub attributes: ExpressionAttributes,
}

impl QueryPlan {
    /// Plan against the declared indexes, falling back to a scan plan when no
    /// filter matches an index key.
    pub fn build(filters: &Filters, indexes: &[IndexDescriptor]) -> Result<Self, ExpressionError> {
        let selection = select_key_condition(filters, indexes);
        Self::from_selection(filters, selection)
    }

    /// Plan against one named index. The filters must hold a scalar value
    /// for that index's partition key.
    pub fn for_index(filters: &Filters, index: &IndexDescriptor) -> Result<Self, ExpressionError> {
        let selection = select_key_condition(filters, std::slice::from_ref(index)).ok_or_else(
            || ExpressionError::MissingKeyCondition {
                index: index.name.clone(),
                field: index.partition_key.clone(),
            },
        )?;
        Self::from_selection(filters, Some(selection))
    }

    fn from_selection(
        filters: &Filters,
        selection: Option<KeySelection<'_>>,
    ) -> Result<Self, ExpressionError> {
        let mut attributes = ExpressionAttributes::new();
        let key_condition = selection
            .as_ref()
            .map(|s| s.render(&mut attributes))
            .transpose()?;
        let filter = build_filter(filters, selection.as_ref().map(|s| s.field), &mut attributes)?;
        Ok(Self {
            index_name: selection.map(|s| s.index.name.clone()),
            key_condition,
            filter,
            attributes,
        })
    }

    /// `true` when the plan selected an index.
    #[must_use]
    pub fn is_query(&self) -> bool {
        self.index_name.is_some()
    }
}
