//! A single entity item with change tracking.
//!
//! A [`Record`] is either *new* (never persisted) or *loaded*. New records
//! are written with a create-only `PutItem`; loaded records track every
//! field assigned after loading and write only those fields back with a
//! conditional `UpdateItem`:
//!
//! ```text
//! new ──save──▶ persisted ──set──▶ dirty ──save──▶ persisted
//!                  │                                  │
//!                  └────────────── delete ────────────┴──▶ deleted (inert)
//! ```

use std::collections::BTreeMap;

use dynarecord_model::AttributeValue;
use dynarecord_model::types::{Delete, Put, TransactWriteItem, Update};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::codec;
use crate::context::Dispatch;
use crate::error::{RecordError, Result};
use crate::expression::{
    ATTRIBUTE_EXISTS_ID, ATTRIBUTE_NOT_EXISTS_ID, ExpressionAttributes, build_update,
};
use crate::repository::Repository;
use crate::value::Value;

/// Primary-key field.
pub const ID: &str = "id";
/// Creation timestamp field (epoch seconds).
pub const CREATED: &str = "created";
/// Last-write timestamp field (epoch seconds).
pub const MODIFIED: &str = "modified";

/// Which write a [`Record::save`] performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A create-only put was executed or enqueued.
    Created(Dispatch),
    /// A conditional update covering these fields was executed or enqueued.
    Updated {
        /// Fields written with `SET`, in expression order.
        set: Vec<String>,
        /// Fields written with `REMOVE`.
        removed: Vec<String>,
        /// Whether the write ran now or was deferred.
        dispatch: Dispatch,
    },
    /// Nothing had changed.
    Unchanged,
}

/// One item of a registered entity.
#[derive(Debug, Clone)]
pub struct Record {
    repository: Repository,
    attributes: BTreeMap<String, Value>,
    dirty: Vec<String>,
    removed: Vec<String>,
    is_new: bool,
    deleted: bool,
}

impl Record {
    pub(crate) fn new(repository: Repository) -> Self {
        Self {
            repository,
            attributes: BTreeMap::new(),
            dirty: Vec::new(),
            removed: Vec::new(),
            is_new: true,
            deleted: false,
        }
    }

    /// Set the id of a record that was never persisted.
    pub(crate) fn set_new_id(&mut self, id: String) {
        self.attributes.insert(ID.to_owned(), Value::String(id));
    }

    /// Reconstitute a loaded record: not new, nothing dirty.
    pub(crate) fn from_item(
        repository: Repository,
        item: &dynarecord_model::Item,
    ) -> Result<Self> {
        Ok(Self {
            attributes: codec::decode_item(item)?,
            is_new: false,
            ..Self::new(repository)
        })
    }

    /// The repository this record belongs to.
    #[must_use]
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// The record's id, if set.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.attributes.get(ID).and_then(Value::as_str)
    }

    /// A field's current value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Assign a field. Assigning [`Value::Null`] removes it.
    ///
    /// On a persisted record the field is marked dirty. The id must be a
    /// string and cannot change once persisted.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self> {
        let field = field.into();
        let value = value.into();
        if field == ID {
            self.check_id_assignment(&value)?;
            if !self.is_new {
                return Ok(self);
            }
        }
        if value.is_null() {
            self.attributes.remove(&field);
        } else {
            self.attributes.insert(field.clone(), value);
        }
        if !self.is_new {
            self.removed.retain(|f| *f != field);
            if !self.dirty.contains(&field) {
                self.dirty.push(field);
            }
        }
        Ok(self)
    }

    /// Remove a field. On a persisted record the next save emits `REMOVE`
    /// for it. Returns the previous value.
    pub fn unset(&mut self, field: &str) -> Result<Option<Value>> {
        if field == ID && !self.is_new {
            return Err(RecordError::ImmutableId {
                current: self.id().unwrap_or_default().to_owned(),
            });
        }
        let previous = self.attributes.remove(field);
        if !self.is_new {
            self.dirty.retain(|f| f != field);
            if !self.removed.iter().any(|f| f == field) {
                self.removed.push(field.to_owned());
            }
        }
        Ok(previous)
    }

    fn check_id_assignment(&self, value: &Value) -> Result<()> {
        if self.is_new {
            return match value {
                Value::String(_) | Value::Null => Ok(()),
                other => Err(RecordError::MalformedRequest(format!(
                    "id must be a string, got {other:?}"
                ))),
            };
        }
        if value.as_str() == self.id() {
            Ok(())
        } else {
            Err(RecordError::ImmutableId {
                current: self.id().unwrap_or_default().to_owned(),
            })
        }
    }

    /// `true` until the first successful save (or enqueue).
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// `true` once the record was deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// `true` when a save would write something.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        !self.dirty.is_empty() || !self.removed.is_empty()
    }

    /// Fields assigned since the last persist, in assignment order.
    #[must_use]
    pub fn dirty_fields(&self) -> &[String] {
        &self.dirty
    }

    /// Fields unset since the last persist.
    #[must_use]
    pub fn removed_fields(&self) -> &[String] {
        &self.removed
    }

    /// All current attributes.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Creation time in epoch seconds.
    #[must_use]
    pub fn created(&self) -> Option<i64> {
        self.attributes.get(CREATED).and_then(Value::as_i64)
    }

    /// Last write time in epoch seconds.
    #[must_use]
    pub fn modified(&self) -> Option<i64> {
        self.attributes.get(MODIFIED).and_then(Value::as_i64)
    }

    /// The attributes as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().into()))
                .collect(),
        )
    }

    /// Deserialize the attributes into an entity struct.
    pub fn to_entity<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }

    // -- Persistence ---------------------------------------------------------

    /// Persist the record.
    ///
    /// New records are created with `attribute_not_exists(id)`; modified
    /// records are updated with `attribute_exists(id)`, writing only dirty
    /// fields plus `modified`. Anything else is a no-op. Change markers are
    /// only cleared once the store confirmed (or the transaction buffer
    /// accepted) the write.
    pub async fn save(&mut self) -> Result<SaveOutcome> {
        if self.deleted {
            return Err(RecordError::Deleted(
                self.id().unwrap_or_default().to_owned(),
            ));
        }
        codec::sanitize(&mut self.attributes);
        if self.is_new {
            return self.create().await;
        }
        if !self.is_modified() {
            return Ok(SaveOutcome::Unchanged);
        }
        self.update().await
    }

    async fn create(&mut self) -> Result<SaveOutcome> {
        let id = self.id().ok_or(RecordError::MissingId)?.to_owned();
        let now = Value::from(now_epoch());
        self.attributes.insert(CREATED.to_owned(), now.clone());
        self.attributes.insert(MODIFIED.to_owned(), now);

        let write = TransactWriteItem::Put(Put {
            table_name: self.repository.table_name().to_owned(),
            item: codec::encode_item(&self.attributes)?,
            condition_expression: Some(ATTRIBUTE_NOT_EXISTS_ID.to_owned()),
            ..Default::default()
        });
        let dispatch = self.repository.context().dispatch(write).await?;
        debug!(table = %self.repository.table_name(), %id, ?dispatch, "record created");

        self.is_new = false;
        self.dirty.clear();
        self.removed.clear();
        Ok(SaveOutcome::Created(dispatch))
    }

    async fn update(&mut self) -> Result<SaveOutcome> {
        let id = self.id().ok_or(RecordError::MissingId)?.to_owned();
        self.attributes
            .insert(MODIFIED.to_owned(), Value::from(now_epoch()));
        if !self.dirty.iter().any(|f| f == MODIFIED) {
            self.dirty.push(MODIFIED.to_owned());
        }

        let mut set = Vec::with_capacity(self.dirty.len());
        for field in &self.dirty {
            match self.attributes.get(field) {
                Some(value) => set.push((field.as_str(), value)),
                None => debug!(%id, %field, "skipping dirty field with nothing to persist"),
            }
        }
        let removed: Vec<&str> = self.removed.iter().map(String::as_str).collect();
        let mut attrs = ExpressionAttributes::new();
        let update_expression = build_update(&set, &removed, &mut attrs)?;
        let set_fields: Vec<String> = set.iter().map(|(f, _)| (*f).to_owned()).collect();

        let write = TransactWriteItem::Update(Update {
            table_name: self.repository.table_name().to_owned(),
            key: id_key(&id),
            update_expression,
            condition_expression: Some(ATTRIBUTE_EXISTS_ID.to_owned()),
            expression_attribute_names: attrs.names,
            expression_attribute_values: attrs.values,
        });
        let dispatch = self.repository.context().dispatch(write).await?;
        debug!(
            table = %self.repository.table_name(),
            %id,
            fields = ?set_fields,
            removed = ?self.removed,
            ?dispatch,
            "record updated"
        );

        self.dirty.clear();
        let removed = std::mem::take(&mut self.removed);
        Ok(SaveOutcome::Updated {
            set: set_fields,
            removed,
            dispatch,
        })
    }

    /// Delete the record's item. A missing item is not an error. Afterwards
    /// the record is inert.
    pub async fn delete(&mut self) -> Result<Dispatch> {
        let id = self.id().ok_or(RecordError::MissingId)?.to_owned();
        if self.deleted {
            return Err(RecordError::Deleted(id));
        }
        let write = TransactWriteItem::Delete(Delete {
            table_name: self.repository.table_name().to_owned(),
            key: id_key(&id),
            ..Default::default()
        });
        let dispatch = self.repository.context().dispatch(write).await?;
        debug!(table = %self.repository.table_name(), %id, ?dispatch, "record deleted");
        self.deleted = true;
        Ok(dispatch)
    }
}

/// Dump records as a JSON array of attribute objects.
#[must_use]
pub fn records_to_json(records: &[Record]) -> serde_json::Value {
    serde_json::Value::Array(records.iter().map(Record::to_json).collect())
}

/// Build a record's attributes from any serializable entity.
pub(crate) fn attributes_from_entity<T: Serialize>(entity: &T) -> Result<BTreeMap<String, Value>> {
    match serde_json::to_value(entity)? {
        serde_json::Value::Object(fields) => Ok(fields
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .filter(|(_, v)| !v.is_null())
            .collect()),
        other => Err(RecordError::MalformedRequest(format!(
            "entities must serialize to an object, got {other}"
        ))),
    }
}

fn id_key(id: &str) -> dynarecord_model::Item {
    dynarecord_model::Item::from([(ID.to_owned(), AttributeValue::s(id))])
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}
