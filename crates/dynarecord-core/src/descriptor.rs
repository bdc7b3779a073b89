//! Entity and index metadata.

/// A secondary index usable for key-condition queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    /// Index name as known to the store.
    pub name: String,
    /// Partition-key attribute.
    pub partition_key: String,
    /// Optional sort-key attribute.
    pub sort_key: Option<String>,
}

impl IndexDescriptor {
    /// Create an index keyed on `partition_key` only.
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    /// Set the sort-key attribute.
    #[must_use]
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }
}

/// Metadata for one entity type: where its items live and which indexes
/// can drive a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Logical entity name used for registry lookups.
    pub name: String,
    /// Unprefixed table name.
    pub table_name: String,
    /// Declared secondary indexes, in declaration order.
    pub indexes: Vec<IndexDescriptor>,
}

impl EntityDescriptor {
    /// Describe an entity stored in `table_name`.
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            indexes: Vec::new(),
        }
    }

    /// Declare a secondary index.
    #[must_use]
    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    /// Look up a declared index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.name == name)
    }
}
