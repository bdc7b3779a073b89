//! DynamoDB wire types for dynarecord.
//!
//! These are the request and response descriptors exchanged with a store
//! client. Field names follow DynamoDB's `awsJson1_0` protocol exactly, so a
//! descriptor serialized with `serde_json` is a valid DynamoDB request body.
// "DynamoDB" appears in virtually every doc comment in this crate.
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod attribute_value;
pub mod error;
pub mod input;
pub mod operations;
pub mod output;
pub mod types;

pub use attribute_value::{AttributeValue, Item};
pub use error::{DynamoDBError, DynamoDBErrorCode};
pub use operations::DynamoDBOperation;
