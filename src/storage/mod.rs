//! Storage adapter: translates logical node operations into parameterized
//! queries against a Postgres backend that stores each collection as a
//! table of `(path ltree, value hstore)` rows.
//!
//! Table and schema names are embedded as quoted identifiers (queries are
//! built per-collection, so they cannot go through `sqlx::query!`'s
//! compile-time checking); the label path and hstore payload are always
//! bound parameters.

pub mod hstore;
pub mod pg;
pub mod provisioning;

#[cfg(test)]
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::path::NodePath;

/// A node's value map, always string-to-string (enforced at the service
/// boundary before it ever reaches the adapter).
pub type NodeValue = HashMap<String, String>;

/// For-every-key-an-ordered-list-of-values result of combo/reverse-combo.
pub type ComboValue = HashMap<String, Vec<String>>;

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn select_node(&self, p: &NodePath) -> AppResult<NodeValue>;
    async fn get_overridden(&self, p: &NodePath) -> AppResult<NodeValue>;
    async fn get_combo(&self, p: &NodePath) -> AppResult<ComboValue>;
    async fn get_reverse_combo(&self, p: &NodePath) -> AppResult<ComboValue>;
    async fn get_ancestors(&self, p: &NodePath) -> AppResult<Vec<String>>;
    async fn get_children(&self, p: &NodePath) -> AppResult<Vec<String>>;
    async fn get_descendants(&self, p: &NodePath) -> AppResult<HashMap<String, NodeValue>>;
    async fn search_node(&self, p: &NodePath, pattern: &str) -> AppResult<Vec<String>>;
    /// Lists collection names within a namespace; backs `children` queries
    /// against a single-segment (namespace-only) path.
    async fn get_collections(&self, namespace: &str) -> AppResult<Vec<String>>;
    async fn create_node(&self, p: &NodePath, v: NodeValue) -> AppResult<u64>;
    async fn update_node(&self, p: &NodePath, v: NodeValue) -> AppResult<u64>;
    async fn delete_node(&self, p: &NodePath, keys: Option<Vec<String>>, cascade: bool) -> AppResult<u64>;
}

/// Double-quotes a schema/table identifier, escaping internal `"` with a
/// backslash the way the original backend's `_buildTableName` does.
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}

pub fn qualified_table(namespace: &str, collection: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(collection))
}

/// Recognizes a `relation "..." does not exist` backend message.
pub fn is_missing_relation(msg: &str) -> bool {
    static RE: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r#"relation "[^"]+" does not exist"#).unwrap());
    RE.is_match(msg)
}

/// Recognizes a `schema "..." does not exist` backend message.
pub fn is_missing_schema(msg: &str) -> bool {
    static RE: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r#"schema "[^"]+" does not exist"#).unwrap());
    RE.is_match(msg)
}

/// Recognizes a unique-violation message ("duplicate key value violates...").
pub fn is_duplicate_key(msg: &str) -> bool {
    msg.starts_with("duplicate key value violates")
}
