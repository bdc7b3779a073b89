//! Shared engine state: store handle, configuration, entity registry and
//! the transaction buffer.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use dynarecord_model::DynamoDBOperation;
use dynarecord_model::input::{
    DeleteItemInput, PutItemInput, TransactWriteItemsInput, UpdateItemInput,
};
use dynarecord_model::output::TransactWriteItemsOutput;
use dynarecord_model::types::{ReturnValue, TransactWriteItem};

use crate::config::RecordConfig;
use crate::descriptor::EntityDescriptor;
use crate::error::{RecordError, Result};
use crate::repository::Repository;
use crate::store::{MAX_TRANSACT_ITEMS, StoreClient};
use crate::transaction::PendingTransaction;

/// What happened to a write handed to [`RecordContext::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The store confirmed the write.
    Executed,
    /// The write was appended to the pending transaction.
    Enqueued,
}

/// Engine state shared by every repository and record.
///
/// Cheap to share behind an `Arc`; the transaction buffer lock is only ever
/// held for synchronous bookkeeping, never across a store call.
pub struct RecordContext {
    client: Arc<dyn StoreClient>,
    config: RecordConfig,
    entities: DashMap<String, Arc<EntityDescriptor>>,
    transaction: Mutex<PendingTransaction>,
}

impl fmt::Debug for RecordContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordContext")
            .field("config", &self.config)
            .field("entities", &self.entities.len())
            .field("transaction", &*self.transaction.lock())
            .finish_non_exhaustive()
    }
}

impl RecordContext {
    /// Create a context with the default configuration.
    pub fn new(client: Arc<dyn StoreClient>) -> Arc<Self> {
        Self::with_config(client, RecordConfig::default())
    }

    /// Create a context with an explicit configuration.
    pub fn with_config(client: Arc<dyn StoreClient>, config: RecordConfig) -> Arc<Self> {
        Arc::new(Self {
            client,
            config,
            entities: DashMap::new(),
            transaction: Mutex::new(PendingTransaction::default()),
        })
    }

    /// The store client.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn StoreClient> {
        &self.client
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &RecordConfig {
        &self.config
    }

    /// Register (or replace) an entity descriptor.
    pub fn register(&self, entity: EntityDescriptor) -> Arc<EntityDescriptor> {
        let entity = Arc::new(entity);
        debug!(
            entity = %entity.name,
            table = %self.config.table_name(&entity.table_name),
            indexes = entity.indexes.len(),
            "registered entity"
        );
        self.entities
            .insert(entity.name.clone(), Arc::clone(&entity));
        entity
    }

    /// Look up a registered entity.
    pub fn descriptor(&self, entity: &str) -> Result<Arc<EntityDescriptor>> {
        self.entities
            .get(entity)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| RecordError::NotRegistered(entity.to_owned()))
    }

    /// A repository for a registered entity.
    pub fn repository(self: &Arc<Self>, entity: &str) -> Result<Repository> {
        Ok(Repository::new(Arc::clone(self), self.descriptor(entity)?))
    }

    // -- Transactions ------------------------------------------------------

    /// Defer subsequent saves and deletes into the shared buffer until
    /// [`commit`](Self::commit) or [`discard_transaction`](Self::discard_transaction).
    pub fn use_transaction(&self) {
        self.transaction.lock().begin();
        debug!("transaction mode on");
    }

    /// `true` while writes are being deferred.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction.lock().is_active()
    }

    /// Number of buffered writes.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.transaction.lock().len()
    }

    /// Flush the buffer as one atomic `TransactWriteItems` request.
    ///
    /// The buffer is reset before the request is issued, so it is clear
    /// whether the commit succeeds or fails. An empty buffer issues nothing.
    pub async fn commit(&self) -> Result<TransactWriteItemsOutput> {
        let operations = self
            .transaction
            .lock()
            .take()
            .ok_or(RecordError::NoActiveTransaction)?;
        let count = operations.len();
        if count == 0 {
            debug!("commit with empty transaction, nothing to write");
            return Ok(TransactWriteItemsOutput::default());
        }
        if count > MAX_TRANSACT_ITEMS {
            return Err(RecordError::TransactionTooLarge {
                count,
                max: MAX_TRANSACT_ITEMS,
            });
        }

        let token = uuid::Uuid::new_v4().to_string();
        debug!(count, token = %token, "committing transaction");
        let output = self
            .client
            .transact_write_items(TransactWriteItemsInput {
                transact_items: operations,
                client_request_token: Some(token),
            })
            .await
            .inspect_err(|e| debug!(count, error = %e, "transaction failed"))?;
        info!(count, "transaction committed");
        Ok(output)
    }

    /// Leave transaction mode, dropping every buffered write. Returns how
    /// many were dropped.
    pub fn discard_transaction(&self) -> usize {
        let dropped = self.transaction.lock().reset();
        debug!(dropped, "transaction discarded");
        dropped
    }

    // -- Writes ------------------------------------------------------------

    /// Execute a write now, or append it to the pending transaction.
    pub async fn dispatch(&self, write: TransactWriteItem) -> Result<Dispatch> {
        let write = match self.transaction.lock().push(write) {
            Ok(()) => return Ok(Dispatch::Enqueued),
            Err(write) => write,
        };
        match write {
            TransactWriteItem::Put(p) => {
                self.client
                    .put_item(PutItemInput {
                        table_name: p.table_name,
                        item: p.item,
                        condition_expression: p.condition_expression,
                        expression_attribute_names: p.expression_attribute_names,
                        expression_attribute_values: p.expression_attribute_values,
                        return_values: Some(ReturnValue::AllOld),
                    })
                    .await?;
                debug!(operation = %DynamoDBOperation::PutItem, "write executed");
            }
            TransactWriteItem::Update(u) => {
                self.client
                    .update_item(UpdateItemInput {
                        table_name: u.table_name,
                        key: u.key,
                        update_expression: Some(u.update_expression),
                        condition_expression: u.condition_expression,
                        expression_attribute_names: u.expression_attribute_names,
                        expression_attribute_values: u.expression_attribute_values,
                        return_values: Some(ReturnValue::AllNew),
                    })
                    .await?;
                debug!(operation = %DynamoDBOperation::UpdateItem, "write executed");
            }
            TransactWriteItem::Delete(d) => {
                self.client
                    .delete_item(DeleteItemInput {
                        table_name: d.table_name,
                        key: d.key,
                        condition_expression: d.condition_expression,
                        expression_attribute_names: d.expression_attribute_names,
                        expression_attribute_values: d.expression_attribute_values,
                        return_values: Some(ReturnValue::None),
                    })
                    .await?;
                debug!(operation = %DynamoDBOperation::DeleteItem, "write executed");
            }
        }
        Ok(Dispatch::Executed)
    }
}
