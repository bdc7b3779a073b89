//! Per-entity entry point: lookups, record construction and paginated reads.

use std::collections::HashMap;
use std::sync::Arc;

use dynarecord_model::input::{GetItemInput, QueryInput, ScanInput};
use dynarecord_model::{AttributeValue, DynamoDBError, Item};
use serde::Serialize;
use tracing::debug;

use crate::codec;
use crate::context::RecordContext;
use crate::descriptor::EntityDescriptor;
use crate::error::{RecordError, Result};
use crate::expression::{
    ExpressionAttributes, ExpressionError, FilterValue, Filters, QueryPlan, build_filter,
    build_scan_filter,
};
use crate::record::{ID, Record, attributes_from_entity};
use crate::store::StoreClient;
use crate::value::Value;

/// Which index a [`Repository::query`] targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IndexTarget {
    /// `<field><index_suffix>`.
    #[default]
    Conventional,
    /// An explicitly named index.
    Named(String),
    /// The base table.
    Table,
}

/// Options for [`Repository::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Index to query.
    pub index: IndexTarget,
    /// Replaces the generated `#field = :field` key condition. It may use
    /// those placeholders or its own `:placeholder` bindings from
    /// `filter_values`; unused bindings are not sent.
    pub key_condition_expression: Option<String>,
    /// Fields to filter on; each needs a binding in `filter_values`.
    pub filters: Vec<String>,
    /// Filter bindings keyed by field name or `:placeholder`.
    pub filter_values: HashMap<String, Value>,
    /// Replaces the generated filter expression.
    pub filter_expression: Option<String>,
    /// Ascending order when `true`; defaults to the configured order.
    pub scan_index_forward: Option<bool>,
    /// Maximum number of records returned.
    pub limit: Option<usize>,
}

impl QueryOptions {
    /// Query a named index instead of `<field><suffix>`.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = IndexTarget::Named(name.into());
        self
    }

    /// Query the base table.
    #[must_use]
    pub fn on_table(mut self) -> Self {
        self.index = IndexTarget::Table;
        self
    }

    /// Use a hand-written key condition.
    #[must_use]
    pub fn key_condition(mut self, expression: impl Into<String>) -> Self {
        self.key_condition_expression = Some(expression.into());
        self
    }

    /// Filter on `field` with a value bound under the field name.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        self.filter_values.insert(field.clone(), value.into());
        self.filters.push(field);
        self
    }

    /// Bind a value for a filter field or a `:placeholder`.
    #[must_use]
    pub fn bind(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_values.insert(key.into(), value.into());
        self
    }

    /// Use a hand-written filter expression.
    #[must_use]
    pub fn filter_expression(mut self, expression: impl Into<String>) -> Self {
        self.filter_expression = Some(expression.into());
        self
    }

    /// Set the result order.
    #[must_use]
    pub fn scan_index_forward(mut self, forward: bool) -> Self {
        self.scan_index_forward = Some(forward);
        self
    }

    /// Cap the number of records returned.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Options for [`Repository::find`] and [`Repository::find_by_index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Maximum number of records returned.
    pub limit: Option<usize>,
    /// Ascending order when `true`; defaults to the configured order.
    pub scan_index_forward: Option<bool>,
    /// Scans send a structured `ScanFilter` instead of a filter expression.
    pub structured: bool,
}

/// A query or scan replayed page by page.
enum PagedRequest {
    Query(QueryInput),
    Scan(ScanInput),
}

impl PagedRequest {
    fn set_page(&mut self, start: Item, limit: Option<i32>) {
        match self {
            Self::Query(q) => {
                q.exclusive_start_key = start;
                q.limit = limit;
            }
            Self::Scan(s) => {
                s.exclusive_start_key = start;
                s.limit = limit;
            }
        }
    }

    async fn fetch(&self, client: &dyn StoreClient) -> Result<(Vec<Item>, Item), DynamoDBError> {
        match self {
            Self::Query(q) => client
                .query(q.clone())
                .await
                .map(|page| (page.items, page.last_evaluated_key)),
            Self::Scan(s) => client
                .scan(s.clone())
                .await
                .map(|page| (page.items, page.last_evaluated_key)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::Scan(_) => "scan",
        }
    }
}

/// Entry point for one registered entity.
#[derive(Debug, Clone)]
pub struct Repository {
    context: Arc<RecordContext>,
    entity: Arc<EntityDescriptor>,
    table_name: String,
}

impl Repository {
    pub(crate) fn new(context: Arc<RecordContext>, entity: Arc<EntityDescriptor>) -> Self {
        let table_name = context.config().table_name(&entity.table_name);
        Self {
            context,
            entity,
            table_name,
        }
    }

    /// The shared engine context.
    #[must_use]
    pub fn context(&self) -> &Arc<RecordContext> {
        &self.context
    }

    /// The entity descriptor.
    #[must_use]
    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    /// The physical table name, prefix included.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// A new, empty record.
    #[must_use]
    pub fn new_record(&self) -> Record {
        Record::new(self.clone())
    }

    /// A new record with its id set.
    #[must_use]
    pub fn new_record_with_id(&self, id: impl Into<String>) -> Record {
        let mut record = self.new_record();
        record.set_new_id(id.into());
        record
    }

    /// A new record populated from a serializable entity; its `id` field
    /// becomes the key.
    pub fn from_entity<T: Serialize>(&self, entity: &T) -> Result<Record> {
        let mut record = self.new_record();
        for (field, value) in attributes_from_entity(entity)? {
            record.set(field, value)?;
        }
        Ok(record)
    }

    /// Strongly consistent lookup by id. A missing item is `Ok(None)`.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Record>> {
        let output = self
            .context
            .client()
            .get_item(GetItemInput {
                table_name: self.table_name.clone(),
                key: Item::from([(ID.to_owned(), AttributeValue::s(id))]),
                consistent_read: Some(self.context.config().consistent_read),
            })
            .await?;
        debug!(table = %self.table_name, %id, found = output.item.is_some(), "get by id");
        output
            .item
            .filter(|item| !item.is_empty())
            .map(|item| self.load(&item))
            .transpose()
    }

    /// Query the `<field><suffix>` index (or the index chosen in `options`)
    /// for items whose `field` equals `value`, following continuation keys
    /// until exhausted or `options.limit` records were collected.
    pub async fn query(
        &self,
        field: &str,
        value: impl Into<Value>,
        options: QueryOptions,
    ) -> Result<Vec<Record>> {
        let value = value.into();
        match &value {
            Value::String(_) | Value::Number(_) | Value::Binary(_) if !value.is_empty() => {}
            _ => {
                return Err(RecordError::MalformedRequest(format!(
                    "query on '{field}' requires a non-empty string, number or binary value"
                )));
            }
        }
        let index_name = match options.index {
            IndexTarget::Conventional => {
                Some(format!("{field}{}", self.context.config().index_suffix))
            }
            IndexTarget::Named(name) => Some(name),
            IndexTarget::Table => None,
        };

        // Explicit `:placeholder` bindings go in first so generated
        // placeholders steer around them.
        let mut attrs = ExpressionAttributes::new();
        let custom_filter = options.filter_expression.is_some();
        for (key, value) in &options.filter_values {
            if custom_filter || key.starts_with(':') {
                attrs.bind_raw(key, codec::encode(value)?);
            }
        }

        let key_condition = match options.key_condition_expression {
            Some(expression) => {
                attrs.name(field)?;
                attrs.value(field, &value)?;
                expression
            }
            None => {
                let key_name = attrs.name(field)?;
                let key_value = attrs.value(field, &value)?;
                format!("{key_name} = {key_value}")
            }
        };

        let filter_expression = match options.filter_expression {
            Some(expression) => {
                for field in &options.filters {
                    attrs.name(field)?;
                }
                Some(expression)
            }
            None => {
                let mut filters = Filters::new();
                for field in &options.filters {
                    let value = options
                        .filter_values
                        .get(field)
                        .or_else(|| options.filter_values.get(&format!(":{field}")))
                        .ok_or_else(|| {
                            RecordError::MalformedRequest(format!(
                                "filter field '{field}' has no bound value"
                            ))
                        })?;
                    filters.push(field.clone(), FilterValue::from(value.clone()));
                }
                build_filter(&filters, None, &mut attrs)?
            }
        };

        let mut referenced = vec![key_condition.as_str()];
        referenced.extend(filter_expression.as_deref());
        attrs.retain_referenced(&referenced);

        let request = PagedRequest::Query(QueryInput {
            table_name: self.table_name.clone(),
            index_name,
            key_condition_expression: Some(key_condition),
            filter_expression,
            expression_attribute_names: attrs.names,
            expression_attribute_values: attrs.values,
            scan_index_forward: Some(
                options
                    .scan_index_forward
                    .unwrap_or(self.context.config().scan_index_forward),
            ),
            ..Default::default()
        });
        self.collect_pages(request, options.limit).await
    }

    /// Find records matching every filter.
    ///
    /// The first filter (in input order) that is an equality on a declared
    /// index's partition key drives a query on that index; without one the
    /// table is scanned.
    pub async fn find(&self, filters: &Filters, options: FindOptions) -> Result<Vec<Record>> {
        let plan = QueryPlan::build(filters, &self.entity.indexes)?;
        self.run_plan(plan, filters, options).await
    }

    /// Find records through a named index. The filters must hold an equality
    /// on that index's partition key.
    pub async fn find_by_index(
        &self,
        index_name: &str,
        filters: &Filters,
        options: FindOptions,
    ) -> Result<Vec<Record>> {
        let index = self
            .entity
            .index(index_name)
            .ok_or_else(|| RecordError::UnknownIndex {
                entity: self.entity.name.clone(),
                index: index_name.to_owned(),
            })?;
        let plan = QueryPlan::for_index(filters, index).map_err(|e| match e {
            ExpressionError::MissingKeyCondition { .. } => {
                RecordError::MalformedRequest(e.to_string())
            }
            other => other.into(),
        })?;
        self.run_plan(plan, filters, options).await
    }

    async fn run_plan(
        &self,
        plan: QueryPlan,
        filters: &Filters,
        options: FindOptions,
    ) -> Result<Vec<Record>> {
        let request = if plan.is_query() {
            PagedRequest::Query(QueryInput {
                table_name: self.table_name.clone(),
                index_name: plan.index_name,
                key_condition_expression: plan.key_condition,
                filter_expression: plan.filter,
                expression_attribute_names: plan.attributes.names,
                expression_attribute_values: plan.attributes.values,
                scan_index_forward: Some(
                    options
                        .scan_index_forward
                        .unwrap_or(self.context.config().scan_index_forward),
                ),
                ..Default::default()
            })
        } else if options.structured {
            PagedRequest::Scan(ScanInput {
                table_name: self.table_name.clone(),
                scan_filter: build_scan_filter(filters, None)?,
                ..Default::default()
            })
        } else {
            PagedRequest::Scan(ScanInput {
                table_name: self.table_name.clone(),
                filter_expression: plan.filter,
                expression_attribute_names: plan.attributes.names,
                expression_attribute_values: plan.attributes.values,
                ..Default::default()
            })
        };
        self.collect_pages(request, options.limit).await
    }

    /// Follow continuation keys sequentially, materialising every page.
    async fn collect_pages(
        &self,
        mut request: PagedRequest,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        let page_size = self.context.config().page_size;
        let mut records = Vec::new();
        let mut start = Item::new();
        let mut pages = 0_usize;
        loop {
            let remaining = limit.map(|l| l - records.len());
            request.set_page(std::mem::take(&mut start), page_limit(remaining, page_size));
            let (items, next) = request.fetch(self.context.client().as_ref()).await?;
            pages += 1;
            debug!(
                table = %self.table_name,
                kind = request.kind(),
                page = pages,
                items = items.len(),
                more = !next.is_empty(),
                "fetched page"
            );
            for item in &items {
                records.push(self.load(item)?);
            }
            if let Some(limit) = limit.filter(|l| records.len() >= *l) {
                records.truncate(limit);
                break;
            }
            if next.is_empty() {
                break;
            }
            start = next;
        }
        Ok(records)
    }

    fn load(&self, item: &Item) -> Result<Record> {
        Record::from_item(self.clone(), item)
    }
}

/// Per-page `Limit`: the tighter of the records still wanted and the
/// configured page size.
fn page_limit(remaining: Option<usize>, page_size: Option<i32>) -> Option<i32> {
    let remaining = remaining.map(|r| i32::try_from(r).unwrap_or(i32::MAX));
    match (remaining, page_size) {
        (Some(r), Some(p)) => Some(r.min(p)),
        (r, p) => r.or(p),
    }
}
