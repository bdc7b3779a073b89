//! Record-oriented persistence over a DynamoDB store client.
//!
//! Three layers, leaves first:
//!
//! - [`codec`]: native [`Value`]s to wire `AttributeValue`s and back.
//! - [`expression`]: filters and declared indexes to key-condition, filter
//!   and update expressions with their placeholder tables.
//! - the record engine ([`Repository`], [`Record`], [`RecordContext`]):
//!   dirty tracking, create-only puts, conditional updates, paginated
//!   queries and the transaction buffer.
//!
//! All store traffic goes through a [`StoreClient`]; [`MemoryStore`] is the
//! in-process implementation.
//!
//! ```no_run
//! # async fn demo() -> dynarecord_core::Result<()> {
//! use std::sync::Arc;
//!
//! use dynarecord_core::{EntityDescriptor, IndexDescriptor, MemoryStore, RecordContext};
//!
//! let store = Arc::new(MemoryStore::new());
//! let ctx = RecordContext::new(store.clone());
//! let users = EntityDescriptor::new("user", "users")
//!     .with_index(IndexDescriptor::new("tenantId-idx", "tenantId"));
//! store.create_entity_table(&users, ctx.config());
//! ctx.register(users);
//!
//! let repo = ctx.repository("user")?;
//! let mut user = repo.new_record_with_id("u1");
//! user.set("tenantId", "t1")?.set("email", "a@b.com")?;
//! user.save().await?;
//! # Ok(())
//! # }
//! ```
// "DynamoDB" appears in virtually every doc comment in this crate.
#![allow(clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod codec;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod expression;
pub mod record;
pub mod repository;
pub mod store;
pub mod transaction;
pub mod value;

pub use config::RecordConfig;
pub use context::{Dispatch, RecordContext};
pub use descriptor::{EntityDescriptor, IndexDescriptor};
pub use error::{RecordError, Result};
pub use expression::{FilterValue, Filters};
pub use record::{Record, SaveOutcome, records_to_json};
pub use repository::{FindOptions, IndexTarget, QueryOptions, Repository};
pub use store::{MemoryStore, StoreClient};
pub use value::Value;
