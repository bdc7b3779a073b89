//! Record engine configuration.

use std::env;

/// Record engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordConfig {
    /// Suffix appended to a field name to form its conventional index name.
    pub index_suffix: String,
    /// Issue strongly consistent reads for `get_by_id`.
    pub consistent_read: bool,
    /// Default query ordering (false = descending).
    pub scan_index_forward: bool,
    /// Upper bound on the `Limit` sent per query or scan page.
    pub page_size: Option<i32>,
    /// Prepended to every entity table name.
    pub table_prefix: String,
}

impl RecordConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            index_suffix: env::var("DYNARECORD_INDEX_SUFFIX").unwrap_or(defaults.index_suffix),
            consistent_read: env_bool("DYNARECORD_CONSISTENT_READ", defaults.consistent_read),
            scan_index_forward: env_bool(
                "DYNARECORD_SCAN_INDEX_FORWARD",
                defaults.scan_index_forward,
            ),
            page_size: env::var("DYNARECORD_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &i32| *n > 0),
            table_prefix: env::var("DYNARECORD_TABLE_PREFIX").unwrap_or(defaults.table_prefix),
        }
    }

    /// Resolve the physical table name for an entity table.
    #[must_use]
    pub fn table_name(&self, table: &str) -> String {
        format!("{}{table}", self.table_prefix)
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            index_suffix: "-idx".to_owned(),
            consistent_read: true,
            scan_index_forward: false,
            page_size: None,
            table_prefix: String::new(),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).map_or(default, |v| {
        matches!(v.as_str(), "1" | "true" | "yes" | "TRUE" | "YES")
    })
}
