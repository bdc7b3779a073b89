//! The store client seam.
//!
//! The record engine only ever talks to a [`StoreClient`]: it hands over
//! request descriptors and receives raw item payloads or raw result pages.
//! How a client is configured, authenticated or transported is none of the
//! engine's business. [`MemoryStore`] is the in-process implementation used
//! for local development and tests.
//!
//! The trait uses `#[async_trait]` so it stays object-safe; the engine holds
//! clients as `Arc<dyn StoreClient>`.

mod eval;
mod memory;

use dynarecord_model::DynamoDBError;
use dynarecord_model::input::{
    DeleteItemInput, GetItemInput, PutItemInput, QueryInput, ScanInput, TransactWriteItemsInput,
    UpdateItemInput,
};
use dynarecord_model::output::{
    DeleteItemOutput, GetItemOutput, PutItemOutput, QueryOutput, ScanOutput,
    TransactWriteItemsOutput, UpdateItemOutput,
};

pub use memory::MemoryStore;

/// Maximum number of operations in one `TransactWriteItems` request.
pub const MAX_TRANSACT_ITEMS: usize = 100;

/// A DynamoDB-compatible item store.
///
/// Failures are reported with DynamoDB's error codes; a failed write
/// precondition must surface as `ConditionalCheckFailedException`, a failed
/// transaction as `TransactionCanceledException`.
#[async_trait::async_trait]
pub trait StoreClient: Send + Sync + 'static {
    /// Fetch one item by primary key.
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, DynamoDBError>;

    /// Create or replace one item, subject to its condition.
    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, DynamoDBError>;

    /// Modify attributes of one item, subject to its condition.
    async fn update_item(&self, input: UpdateItemInput)
    -> Result<UpdateItemOutput, DynamoDBError>;

    /// Remove one item by primary key.
    async fn delete_item(&self, input: DeleteItemInput)
    -> Result<DeleteItemOutput, DynamoDBError>;

    /// Fetch one page of an index (or table) partition.
    async fn query(&self, input: QueryInput) -> Result<QueryOutput, DynamoDBError>;

    /// Fetch one page of a full table scan.
    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, DynamoDBError>;

    /// Apply every write atomically, or none of them.
    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, DynamoDBError>;
}
