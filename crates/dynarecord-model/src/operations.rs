//! Store operations issued by the record engine.

use std::fmt;

/// Every request kind a store client must serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamoDBOperation {
    /// Get an item by primary key.
    GetItem,
    /// Put (insert or replace) an item.
    PutItem,
    /// Update selected attributes of an item.
    UpdateItem,
    /// Delete an item by primary key.
    DeleteItem,
    /// Query an index partition.
    Query,
    /// Scan a whole table.
    Scan,
    /// Apply several writes atomically.
    TransactWriteItems,
}

impl DynamoDBOperation {
    /// Returns the AWS operation name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetItem => "GetItem",
            Self::PutItem => "PutItem",
            Self::UpdateItem => "UpdateItem",
            Self::DeleteItem => "DeleteItem",
            Self::Query => "Query",
            Self::Scan => "Scan",
            Self::TransactWriteItems => "TransactWriteItems",
        }
    }

    /// `true` for operations that modify items.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::PutItem | Self::UpdateItem | Self::DeleteItem | Self::TransactWriteItems
        )
    }
}

impl fmt::Display for DynamoDBOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
