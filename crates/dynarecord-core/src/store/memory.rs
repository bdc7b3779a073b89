//! In-process store client.
//!
//! Tables are keyed by the `id` string attribute and hold their items in a
//! `BTreeMap`, so scans run in id order. Declared indexes are evaluated on
//! the fly: a query collects the items carrying the index's partition key,
//! orders them by `(sort key, id)` and pages through that ordering.
//!
//! ```text
//! DashMap<TableName, Arc<MemoryTable>>
//!                     └── RwLock<BTreeMap<Id, Item>>
//! ```
//!
//! Writes are serialised by a store-wide lock so that a transaction checks
//! every condition and applies every write without interleaving.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use dynarecord_model::input::{
    DeleteItemInput, GetItemInput, PutItemInput, QueryInput, ScanInput, TransactWriteItemsInput,
    UpdateItemInput,
};
use dynarecord_model::output::{
    DeleteItemOutput, GetItemOutput, PutItemOutput, QueryOutput, ScanOutput,
    TransactWriteItemsOutput, UpdateItemOutput,
};
use dynarecord_model::types::{CancellationReason, ReturnValue, TransactWriteItem};
use dynarecord_model::{AttributeValue, DynamoDBError, DynamoDBOperation, Item};

use super::eval::{
    EvalError, Predicate, UpdatePlan, compare_key_values, matches_scan_filter, parse_condition,
    parse_update,
};
use super::{MAX_TRANSACT_ITEMS, StoreClient};
use crate::config::RecordConfig;
use crate::descriptor::{EntityDescriptor, IndexDescriptor};

/// Primary-key attribute of every table.
const PARTITION_KEY: &str = "id";

/// Convert an expression error into a DynamoDB validation error.
///
/// Takes `e` by value because this is used as a closure argument to `.map_err()`.
#[allow(clippy::needless_pass_by_value)]
fn eval_error_to_dynamodb(e: EvalError) -> DynamoDBError {
    DynamoDBError::validation(e.to_string())
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MemoryTable {
    name: String,
    indexes: Vec<IndexDescriptor>,
    items: RwLock<BTreeMap<String, Item>>,
}

impl MemoryTable {
    fn index(&self, name: &str) -> Result<&IndexDescriptor, DynamoDBError> {
        self.indexes.iter().find(|i| i.name == name).ok_or_else(|| {
            DynamoDBError::validation(format!(
                "The table does not have the specified index: {name}"
            ))
        })
    }
}

/// An in-memory [`StoreClient`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: DashMap<String, Arc<MemoryTable>>,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    /// Create a store with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the given secondary indexes. An existing table of
    /// the same name is left untouched.
    pub fn create_table(&self, name: impl Into<String>, indexes: Vec<IndexDescriptor>) {
        let name = name.into();
        self.tables.entry(name.clone()).or_insert_with(|| {
            debug!(table = %name, indexes = indexes.len(), "created table");
            Arc::new(MemoryTable {
                name,
                indexes,
                items: RwLock::new(BTreeMap::new()),
            })
        });
    }

    /// Create the table backing an entity, honouring the table prefix.
    pub fn create_entity_table(&self, entity: &EntityDescriptor, config: &RecordConfig) {
        self.create_table(config.table_name(&entity.table_name), entity.indexes.clone());
    }

    /// Number of items stored in `table` (zero for unknown tables).
    #[must_use]
    pub fn item_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.items.read().len())
    }

    /// Raw stored item, bypassing the request path.
    #[must_use]
    pub fn raw_item(&self, table: &str, id: &str) -> Option<Item> {
        self.tables
            .get(table)
            .and_then(|t| t.items.read().get(id).cloned())
    }

    fn require_table(&self, name: &str) -> Result<Arc<MemoryTable>, DynamoDBError> {
        self.tables
            .get(name)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| {
                DynamoDBError::resource_not_found(format!(
                    "Requested resource not found: Table: {name} not found"
                ))
            })
    }

    // -- Writes ------------------------------------------------------------

    fn plan_put(&self, input: PutItemInput) -> Result<PlannedWrite, DynamoDBError> {
        let table = self.require_table(&input.table_name)?;
        let id = key_id(&input.item)?;
        let condition = parse_optional_condition(
            input.condition_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        Ok(PlannedWrite {
            table,
            id,
            condition,
            action: WriteAction::Put(input.item),
        })
    }

    fn plan_update(&self, input: UpdateItemInput) -> Result<PlannedWrite, DynamoDBError> {
        let table = self.require_table(&input.table_name)?;
        let id = key_id(&input.key)?;
        let plan = input
            .update_expression
            .as_deref()
            .map(|expr| {
                parse_update(
                    expr,
                    &input.expression_attribute_names,
                    &input.expression_attribute_values,
                )
            })
            .transpose()
            .map_err(eval_error_to_dynamodb)?
            .unwrap_or_default();
        if plan.touches(PARTITION_KEY) {
            return Err(DynamoDBError::validation(
                "Cannot update attribute id. This attribute is part of the key",
            ));
        }
        let condition = parse_optional_condition(
            input.condition_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        Ok(PlannedWrite {
            table,
            id,
            condition,
            action: WriteAction::Update(input.key, plan),
        })
    }

    fn plan_delete(&self, input: DeleteItemInput) -> Result<PlannedWrite, DynamoDBError> {
        let table = self.require_table(&input.table_name)?;
        let id = key_id(&input.key)?;
        let condition = parse_optional_condition(
            input.condition_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        Ok(PlannedWrite {
            table,
            id,
            condition,
            action: WriteAction::Delete,
        })
    }

    fn plan_transact_item(&self, item: TransactWriteItem) -> Result<PlannedWrite, DynamoDBError> {
        match item {
            TransactWriteItem::Put(p) => self.plan_put(PutItemInput {
                table_name: p.table_name,
                item: p.item,
                condition_expression: p.condition_expression,
                expression_attribute_names: p.expression_attribute_names,
                expression_attribute_values: p.expression_attribute_values,
                return_values: None,
            }),
            TransactWriteItem::Update(u) => self.plan_update(UpdateItemInput {
                table_name: u.table_name,
                key: u.key,
                update_expression: Some(u.update_expression),
                condition_expression: u.condition_expression,
                expression_attribute_names: u.expression_attribute_names,
                expression_attribute_values: u.expression_attribute_values,
                return_values: None,
            }),
            TransactWriteItem::Delete(d) => self.plan_delete(DeleteItemInput {
                table_name: d.table_name,
                key: d.key,
                condition_expression: d.condition_expression,
                expression_attribute_names: d.expression_attribute_names,
                expression_attribute_values: d.expression_attribute_values,
                return_values: None,
            }),
        }
    }

    /// Check and apply one write under the store lock.
    fn execute_single(
        &self,
        operation: DynamoDBOperation,
        write: PlannedWrite,
    ) -> Result<(Option<Item>, Option<Item>), DynamoDBError> {
        let _guard = self.write_lock.lock();
        if !write.condition_holds() {
            debug!(table = %write.table.name, id = %write.id, %operation, "condition check failed");
            return Err(DynamoDBError::conditional_check_failed(
                "The conditional request failed",
            ));
        }
        let result = write.apply();
        debug!(table = %write.table.name, id = %write.id, %operation, "applied write");
        Ok(result)
    }

    // -- Reads -------------------------------------------------------------

    fn read_page(
        table: &MemoryTable,
        request: PageRequest<'_>,
    ) -> Result<(Vec<Item>, i32, Item), DynamoDBError> {
        let limit = match request.limit {
            None => usize::MAX,
            Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
            Some(_) => {
                return Err(DynamoDBError::validation(
                    "1 validation error detected: Value at 'limit' failed to satisfy constraint: \
                     Member must have value greater than or equal to 1",
                ));
            }
        };

        let mut candidates: Vec<Item> = table
            .items
            .read()
            .values()
            .filter(|item| request.partition_key.is_none_or(|pk| item.contains_key(pk)))
            .filter(|item| request.key_condition.is_none_or(|k| k.matches(item)))
            .cloned()
            .collect();
        if let Some(sort_key) = request.sort_key {
            candidates.sort_by(|a, b| {
                compare_key_values(a.get(sort_key), b.get(sort_key))
                    .then_with(|| compare_key_values(a.get(PARTITION_KEY), b.get(PARTITION_KEY)))
            });
        }
        if !request.forward {
            candidates.reverse();
        }

        let start = if request.exclusive_start_key.is_empty() {
            0
        } else {
            let start_id = key_id(request.exclusive_start_key)?;
            candidates
                .iter()
                .position(|item| item.get(PARTITION_KEY).and_then(AttributeValue::as_s) == Some(start_id.as_str()))
                .map(|p| p + 1)
                .ok_or_else(|| DynamoDBError::validation("The provided starting key is invalid"))?
        };

        let evaluated: Vec<Item> = candidates.into_iter().skip(start).take(limit).collect();
        let last_evaluated_key = if evaluated.len() == limit {
            evaluated
                .last()
                .map(|last| key_of(last, request.partition_key, request.sort_key))
                .unwrap_or_default()
        } else {
            Item::new()
        };
        let scanned = i32::try_from(evaluated.len()).unwrap_or(i32::MAX);
        let items = evaluated
            .into_iter()
            .filter(|item| request.filter.matches(item))
            .collect();
        Ok((items, scanned, last_evaluated_key))
    }
}

/// How a page of a query or scan is selected and filtered.
struct PageRequest<'a> {
    partition_key: Option<&'a str>,
    sort_key: Option<&'a str>,
    key_condition: Option<&'a Predicate>,
    filter: PageFilter<'a>,
    forward: bool,
    limit: Option<i32>,
    exclusive_start_key: &'a Item,
}

enum PageFilter<'a> {
    None,
    Expression(Predicate),
    Structured(&'a HashMap<String, dynarecord_model::types::Condition>),
}

impl PageFilter<'_> {
    fn matches(&self, item: &Item) -> bool {
        match self {
            Self::None => true,
            Self::Expression(p) => p.matches(item),
            Self::Structured(f) => matches_scan_filter(item, f),
        }
    }
}

// ---------------------------------------------------------------------------
// Planned writes
// ---------------------------------------------------------------------------

enum WriteAction {
    Put(Item),
    Update(Item, UpdatePlan),
    Delete,
}

struct PlannedWrite {
    table: Arc<MemoryTable>,
    id: String,
    condition: Option<Predicate>,
    action: WriteAction,
}

impl PlannedWrite {
    fn condition_holds(&self) -> bool {
        let Some(condition) = &self.condition else {
            return true;
        };
        let items = self.table.items.read();
        match items.get(&self.id) {
            Some(existing) => condition.matches(existing),
            None => condition.matches(&Item::new()),
        }
    }

    /// Apply the write, returning the old and new item.
    fn apply(&self) -> (Option<Item>, Option<Item>) {
        let mut items = self.table.items.write();
        match &self.action {
            WriteAction::Put(item) => {
                let old = items.insert(self.id.clone(), item.clone());
                (old, Some(item.clone()))
            }
            WriteAction::Update(key, plan) => {
                let old = items.get(&self.id).cloned();
                let mut new = old.clone().unwrap_or_else(|| key.clone());
                plan.apply(&mut new);
                items.insert(self.id.clone(), new.clone());
                (old, Some(new))
            }
            WriteAction::Delete => (items.remove(&self.id), None),
        }
    }
}

fn parse_optional_condition(
    expr: Option<&str>,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<Option<Predicate>, DynamoDBError> {
    expr.map(|e| parse_condition(e, names, values))
        .transpose()
        .map_err(eval_error_to_dynamodb)
}

fn key_id(key: &Item) -> Result<String, DynamoDBError> {
    key.get(PARTITION_KEY)
        .and_then(AttributeValue::as_s)
        .map(str::to_owned)
        .ok_or_else(|| {
            DynamoDBError::validation("The provided key element does not match the schema")
        })
}

/// The continuation key of an item: its `id` plus any index key attributes.
fn key_of(item: &Item, partition_key: Option<&str>, sort_key: Option<&str>) -> Item {
    [Some(PARTITION_KEY), partition_key, sort_key]
        .into_iter()
        .flatten()
        .filter_map(|attr| item.get(attr).map(|v| (attr.to_owned(), v.clone())))
        .collect()
}

fn returned(values: Option<ReturnValue>, old: Option<Item>, new: Option<Item>) -> Item {
    match values.unwrap_or_default() {
        ReturnValue::None => Item::new(),
        ReturnValue::AllOld | ReturnValue::UpdatedOld => old.unwrap_or_default(),
        ReturnValue::AllNew | ReturnValue::UpdatedNew => new.unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// StoreClient
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl StoreClient for MemoryStore {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, DynamoDBError> {
        let table = self.require_table(&input.table_name)?;
        let id = key_id(&input.key)?;
        let item = table.items.read().get(&id).cloned();
        debug!(table = %table.name, %id, found = item.is_some(), "get item");
        Ok(GetItemOutput { item })
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, DynamoDBError> {
        let return_values = input.return_values;
        let write = self.plan_put(input)?;
        let (old, new) = self.execute_single(DynamoDBOperation::PutItem, write)?;
        Ok(PutItemOutput {
            attributes: returned(return_values, old, new),
        })
    }

    async fn update_item(
        &self,
        input: UpdateItemInput,
    ) -> Result<UpdateItemOutput, DynamoDBError> {
        let return_values = input.return_values;
        let write = self.plan_update(input)?;
        let (old, new) = self.execute_single(DynamoDBOperation::UpdateItem, write)?;
        Ok(UpdateItemOutput {
            attributes: returned(return_values, old, new),
        })
    }

    async fn delete_item(
        &self,
        input: DeleteItemInput,
    ) -> Result<DeleteItemOutput, DynamoDBError> {
        let return_values = input.return_values;
        let write = self.plan_delete(input)?;
        let (old, new) = self.execute_single(DynamoDBOperation::DeleteItem, write)?;
        Ok(DeleteItemOutput {
            attributes: returned(return_values, old, new),
        })
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, DynamoDBError> {
        let table = self.require_table(&input.table_name)?;
        let (partition_key, sort_key) = match input.index_name.as_deref() {
            Some(name) => {
                let index = table.index(name)?;
                (index.partition_key.as_str(), index.sort_key.as_deref())
            }
            None => (PARTITION_KEY, None),
        };
        let key_expr = input.key_condition_expression.as_deref().ok_or_else(|| {
            DynamoDBError::validation("Either the KeyConditions or KeyConditionExpression parameter must be specified in the request.")
        })?;
        let key_condition = parse_condition(
            key_expr,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )
        .map_err(eval_error_to_dynamodb)?;
        if !key_condition.has_equality_on(partition_key) {
            return Err(DynamoDBError::validation(format!(
                "Query condition missed key schema element: {partition_key}"
            )));
        }
        let filter = match parse_optional_condition(
            input.filter_expression.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )? {
            Some(p) => PageFilter::Expression(p),
            None => PageFilter::None,
        };

        let (items, scanned_count, last_evaluated_key) = MemoryStore::read_page(
            &table,
            PageRequest {
                partition_key: Some(partition_key),
                sort_key: sort_key.or(Some(PARTITION_KEY)),
                key_condition: Some(&key_condition),
                filter,
                forward: input.scan_index_forward.unwrap_or(true),
                limit: input.limit,
                exclusive_start_key: &input.exclusive_start_key,
            },
        )?;
        let count = i32::try_from(items.len()).unwrap_or(i32::MAX);
        debug!(
            table = %table.name,
            index = ?input.index_name,
            count,
            scanned_count,
            more = !last_evaluated_key.is_empty(),
            "query page"
        );
        Ok(QueryOutput {
            items,
            count,
            scanned_count,
            last_evaluated_key,
        })
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, DynamoDBError> {
        let table = self.require_table(&input.table_name)?;
        if input.filter_expression.is_some() && !input.scan_filter.is_empty() {
            return Err(DynamoDBError::validation(
                "Can not use both expression and non-expression parameters in the same request: \
                 Non-expression parameters: {ScanFilter} Expression parameters: {FilterExpression}",
            ));
        }
        let partition_key = input
            .index_name
            .as_deref()
            .map(|name| table.index(name).map(|i| i.partition_key.as_str()))
            .transpose()?;
        let filter = if input.scan_filter.is_empty() {
            match parse_optional_condition(
                input.filter_expression.as_deref(),
                &input.expression_attribute_names,
                &input.expression_attribute_values,
            )? {
                Some(p) => PageFilter::Expression(p),
                None => PageFilter::None,
            }
        } else {
            PageFilter::Structured(&input.scan_filter)
        };

        let (items, scanned_count, last_evaluated_key) = MemoryStore::read_page(
            &table,
            PageRequest {
                partition_key,
                sort_key: None,
                key_condition: None,
                filter,
                forward: true,
                limit: input.limit,
                exclusive_start_key: &input.exclusive_start_key,
            },
        )?;
        let count = i32::try_from(items.len()).unwrap_or(i32::MAX);
        debug!(table = %table.name, count, scanned_count, "scan page");
        Ok(ScanOutput {
            items,
            count,
            scanned_count,
            last_evaluated_key,
        })
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, DynamoDBError> {
        let count = input.transact_items.len();
        if count == 0 || count > MAX_TRANSACT_ITEMS {
            return Err(DynamoDBError::validation(format!(
                "Member must have length less than or equal to {MAX_TRANSACT_ITEMS} \
                 and greater than or equal to 1, got {count}"
            )));
        }

        let writes = input
            .transact_items
            .into_iter()
            .map(|item| self.plan_transact_item(item))
            .collect::<Result<Vec<_>, _>>()?;
        let mut targets: Vec<(&str, &str)> = writes
            .iter()
            .map(|w| (w.table.name.as_str(), w.id.as_str()))
            .collect();
        targets.sort_unstable();
        if targets.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(DynamoDBError::validation(
                "Transaction request cannot include multiple operations on one item",
            ));
        }

        let _guard = self.write_lock.lock();
        let reasons: Vec<CancellationReason> = writes
            .iter()
            .map(|w| {
                if w.condition_holds() {
                    CancellationReason::default()
                } else {
                    CancellationReason {
                        code: Some("ConditionalCheckFailed".to_owned()),
                        message: Some("The conditional request failed".to_owned()),
                    }
                }
            })
            .collect();
        if reasons.iter().any(|r| r.code.is_some()) {
            debug!(count, "transaction cancelled");
            return Err(DynamoDBError::transaction_canceled(reasons));
        }
        for write in &writes {
            write.apply();
        }
        debug!(count, operation = %DynamoDBOperation::TransactWriteItems, "applied transaction");
        Ok(TransactWriteItemsOutput {})
    }
}
