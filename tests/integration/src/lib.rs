//! Integration tests for the dynarecord record engine.
//!
//! Every test drives the public API end to end against one of two stores:
//! the in-process [`MemoryStore`], or a [`ScriptedStore`] that replays canned
//! pages and records each request body so the exact wire traffic can be
//! asserted.
//!
//! ```text
//! cargo test -p dynarecord-integration
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Once};

use parking_lot::Mutex;

use dynarecord_core::{
    EntityDescriptor, IndexDescriptor, MemoryStore, RecordConfig, RecordContext, Repository,
    StoreClient,
};
use dynarecord_model::input::{
    DeleteItemInput, GetItemInput, PutItemInput, QueryInput, ScanInput, TransactWriteItemsInput,
    UpdateItemInput,
};
use dynarecord_model::output::{
    DeleteItemOutput, GetItemOutput, PutItemOutput, QueryOutput, ScanOutput,
    TransactWriteItemsOutput, UpdateItemOutput,
};
use dynarecord_model::{AttributeValue, DynamoDBError, DynamoDBOperation, Item};

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// The `user` entity used throughout: table `users`, indexes on `tenantId`
/// (sorted by `created`) and `email`.
#[must_use]
pub fn user_entity() -> EntityDescriptor {
    EntityDescriptor::new("user", "users")
        .with_index(IndexDescriptor::new("tenantId-idx", "tenantId").with_sort_key("created"))
        .with_index(IndexDescriptor::new("email-idx", "email"))
}

/// Generate a unique table prefix so concurrent tests never share tables.
#[must_use]
pub fn test_table_prefix(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("{prefix}-{id}-")
}

/// A context over a fresh [`MemoryStore`] with the `user` entity registered
/// and its table created.
#[must_use]
pub fn memory_context() -> (Arc<MemoryStore>, Arc<RecordContext>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let config = RecordConfig {
        table_prefix: test_table_prefix("mem"),
        ..RecordConfig::default()
    };
    let ctx = RecordContext::with_config(store.clone(), config);
    let entity = user_entity();
    store.create_entity_table(&entity, ctx.config());
    ctx.register(entity);
    (store, ctx)
}

/// A context over a fresh [`ScriptedStore`] with the `user` entity
/// registered.
#[must_use]
pub fn scripted_context(config: RecordConfig) -> (Arc<ScriptedStore>, Arc<RecordContext>) {
    init_tracing();
    let store = Arc::new(ScriptedStore::default());
    let ctx = RecordContext::with_config(store.clone(), config);
    ctx.register(user_entity());
    (store, ctx)
}

/// A raw `users` item.
#[must_use]
pub fn user_item(id: &str, tenant: &str) -> Item {
    Item::from([
        ("id".to_owned(), AttributeValue::s(id)),
        ("tenantId".to_owned(), AttributeValue::s(tenant)),
        ("created".to_owned(), AttributeValue::n(1_700_000_000)),
        ("modified".to_owned(), AttributeValue::n(1_700_000_000)),
    ])
}

/// Create one `user` per `(id, tenantId, status)` row.
pub async fn seed_users(repo: &Repository, rows: &[(&str, &str, &str)]) -> anyhow::Result<()> {
    for (id, tenant, status) in rows {
        let mut record = repo.new_record_with_id(*id);
        record.set("tenantId", *tenant)?.set("status", *status)?;
        record.save().await?;
    }
    tracing::debug!(count = rows.len(), table = %repo.table_name(), "seeded users");
    Ok(())
}

/// One request seen by a [`ScriptedStore`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Which operation was called.
    pub operation: DynamoDBOperation,
    /// The request as it would travel on the wire.
    pub body: serde_json::Value,
}

/// A store client that answers from a script and records every request.
///
/// Reads pop canned responses (an empty page or no item once the script is
/// exhausted); writes succeed unless a failure was queued with
/// [`fail_next`](Self::fail_next).
#[derive(Debug, Default)]
pub struct ScriptedStore {
    pages: Mutex<VecDeque<(Vec<Item>, Item)>>,
    items: Mutex<VecDeque<Option<Item>>>,
    failures: Mutex<VecDeque<DynamoDBError>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedStore {
    /// Queue one query/scan page. A page with `more` set carries the last
    /// item's id as its continuation key.
    pub fn push_page(&self, items: Vec<Item>, more: bool) {
        let next = if more {
            items
                .last()
                .and_then(|item| item.get("id"))
                .map(|id| Item::from([("id".to_owned(), id.clone())]))
                .unwrap_or_default()
        } else {
            Item::new()
        };
        self.pages.lock().push_back((items, next));
    }

    /// Queue the answer to the next `GetItem`.
    pub fn push_item(&self, item: Option<Item>) {
        self.items.lock().push_back(item);
    }

    /// Make the next request fail with `error`.
    pub fn fail_next(&self, error: DynamoDBError) {
        self.failures.lock().push_back(error);
    }

    /// Every request seen so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// The bodies of every request of one kind.
    #[must_use]
    pub fn requests_of(&self, operation: DynamoDBOperation) -> Vec<serde_json::Value> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.operation == operation)
            .map(|r| r.body.clone())
            .collect()
    }

    /// How many write requests were issued.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.operation.is_write())
            .count()
    }

    fn record(
        &self,
        operation: DynamoDBOperation,
        body: &impl serde::Serialize,
    ) -> Result<(), DynamoDBError> {
        let body = serde_json::to_value(body)
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
        tracing::debug!(%operation, "scripted request");
        self.requests
            .lock()
            .push(RecordedRequest { operation, body });
        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_page(&self) -> (Vec<Item>, Item) {
        self.pages.lock().pop_front().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl StoreClient for ScriptedStore {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, DynamoDBError> {
        self.record(DynamoDBOperation::GetItem, &input)?;
        let item = self.items.lock().pop_front().flatten();
        Ok(GetItemOutput { item })
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, DynamoDBError> {
        self.record(DynamoDBOperation::PutItem, &input)?;
        Ok(PutItemOutput::default())
    }

    async fn update_item(
        &self,
        input: UpdateItemInput,
    ) -> Result<UpdateItemOutput, DynamoDBError> {
        self.record(DynamoDBOperation::UpdateItem, &input)?;
        Ok(UpdateItemOutput::default())
    }

    async fn delete_item(
        &self,
        input: DeleteItemInput,
    ) -> Result<DeleteItemOutput, DynamoDBError> {
        self.record(DynamoDBOperation::DeleteItem, &input)?;
        Ok(DeleteItemOutput::default())
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, DynamoDBError> {
        self.record(DynamoDBOperation::Query, &input)?;
        let (items, last_evaluated_key) = self.next_page();
        let count = i32::try_from(items.len()).unwrap_or(i32::MAX);
        Ok(QueryOutput {
            items,
            count,
            scanned_count: count,
            last_evaluated_key,
        })
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, DynamoDBError> {
        self.record(DynamoDBOperation::Scan, &input)?;
        let (items, last_evaluated_key) = self.next_page();
        let count = i32::try_from(items.len()).unwrap_or(i32::MAX);
        Ok(ScanOutput {
            items,
            count,
            scanned_count: count,
            last_evaluated_key,
        })
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, DynamoDBError> {
        self.record(DynamoDBOperation::TransactWriteItems, &input)?;
        Ok(TransactWriteItemsOutput::default())
    }
}

mod test_query;
mod test_transaction;
