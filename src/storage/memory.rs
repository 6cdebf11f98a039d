//! In-process fake of `StorageAdapter`, used only by unit tests for the
//! Node Service and Auth Guard so they don't need a live Postgres
//! instance. Never compiled into the production binary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AppError, AppResult};
use crate::path::NodePath;

use super::{ComboValue, NodeValue, StorageAdapter};

#[derive(Default)]
pub struct MemoryStorage {
    // keyed by (namespace, collection) -> label -> value
    tables: Mutex<BTreeMap<(String, String), BTreeMap<String, NodeValue>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(p: &NodePath) -> (String, String) {
        (p.namespace.clone(), p.collection.clone())
    }

    fn ancestors_of<'a>(table: &'a BTreeMap<String, NodeValue>, label: &str) -> Vec<(&'a String, &'a NodeValue)> {
        let mut out: Vec<_> = table
            .iter()
            .filter(|(path, _)| label == path.as_str() || label.starts_with(&format!("{path}.")) || path.is_empty())
            .collect();
        out.sort_by_key(|(path, _)| path.len());
        out
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn select_node(&self, p: &NodePath) -> AppResult<NodeValue> {
        let tables = self.tables.lock();
        let table = tables
            .get(&Self::key(p))
            .ok_or_else(|| AppError::NodeNotFound(p.qualify()))?;
        table
            .get(&p.label)
            .cloned()
            .ok_or_else(|| AppError::NodeNotFound(p.qualify()))
    }

    async fn get_overridden(&self, p: &NodePath) -> AppResult<NodeValue> {
        let tables = self.tables.lock();
        let mut merged = NodeValue::new();
        if let Some(table) = tables.get(&Self::key(p)) {
            for (_, v) in Self::ancestors_of(table, &p.label) {
                merged.extend(v.clone());
            }
        }
        Ok(merged)
    }

    async fn get_combo(&self, p: &NodePath) -> AppResult<ComboValue> {
        let tables = self.tables.lock();
        let mut combo = ComboValue::new();
        if let Some(table) = tables.get(&Self::key(p)) {
            for (_, v) in Self::ancestors_of(table, &p.label) {
                for (k, val) in v {
                    combo.entry(k.clone()).or_default().push(val.clone());
                }
            }
        }
        Ok(combo)
    }

    async fn get_reverse_combo(&self, p: &NodePath) -> AppResult<ComboValue> {
        let tables = self.tables.lock();
        let mut combo = ComboValue::new();
        if let Some(table) = tables.get(&Self::key(p)) {
            let mut matches: Vec<_> = table
                .iter()
                .filter(|(path, _)| path.as_str() == p.label || path.starts_with(&format!("{}.", p.label)))
                .collect();
            matches.sort_by_key(|(path, _)| path.len());
            for (_, v) in matches {
                for (k, val) in v {
                    combo.entry(k.clone()).or_default().push(val.clone());
                }
            }
        }
        Ok(combo)
    }

    async fn get_ancestors(&self, p: &NodePath) -> AppResult<Vec<String>> {
        let tables = self.tables.lock();
        let mut out = Vec::new();
        if let Some(table) = tables.get(&Self::key(p)) {
            for (path, _) in Self::ancestors_of(table, &p.label) {
                if path != &p.label {
                    out.push(p.with_label(path.clone()).qualify());
                }
            }
        }
        Ok(out)
    }

    async fn get_children(&self, p: &NodePath) -> AppResult<Vec<String>> {
        let tables = self.tables.lock();
        let mut out = Vec::new();
        if let Some(table) = tables.get(&Self::key(p)) {
            for path in table.keys() {
                let rest = if p.label.is_empty() {
                    Some(path.as_str())
                } else {
                    path.strip_prefix(&format!("{}.", p.label))
                };
                if let Some(rest) = rest {
                    if !rest.is_empty() && !rest.contains('.') {
                        out.push(p.with_label(if p.label.is_empty() {
                            rest.to_string()
                        } else {
                            format!("{}.{}", p.label, rest)
                        }).qualify());
                    }
                }
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn get_descendants(&self, p: &NodePath) -> AppResult<std::collections::HashMap<String, NodeValue>> {
        let tables = self.tables.lock();
        let mut out = std::collections::HashMap::new();
        if let Some(table) = tables.get(&Self::key(p)) {
            for (path, v) in table {
                let is_descendant = !path.is_empty()
                    && path != &p.label
                    && (p.label.is_empty() || path.starts_with(&format!("{}.", p.label)));
                if is_descendant {
                    out.insert(p.with_label(path.clone()).qualify(), v.clone());
                }
            }
        }
        Ok(out)
    }

    async fn search_node(&self, p: &NodePath, pattern: &str) -> AppResult<Vec<String>> {
        let tables = self.tables.lock();
        let mut out = Vec::new();
        if let Some(table) = tables.get(&Self::key(p)) {
            for path in table.keys() {
                if path.contains(pattern) {
                    out.push(p.with_label(path.clone()).qualify());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    async fn get_collections(&self, namespace: &str) -> AppResult<Vec<String>> {
        let tables = self.tables.lock();
        let mut out: Vec<String> = tables
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(ns, coll)| format!("{ns}.{coll}"))
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn create_node(&self, p: &NodePath, v: NodeValue) -> AppResult<u64> {
        let segments = p.label_segments();
        let mut tables = self.tables.lock();
        let is_new_table = !tables.contains_key(&Self::key(p));
        let table = tables.entry(Self::key(p)).or_default();

        // Mirrors the Postgres adapter's provisioning step: a just-created
        // collection gets its empty root materialized so ancestor queries
        // for depth-1 nodes observe it.
        if is_new_table && !p.label.is_empty() {
            table.entry(String::new()).or_insert_with(NodeValue::new);
        }

        if segments.len() > 1 {
            let parent_label = segments[..segments.len() - 1].join(".");
            if !table.contains_key(&parent_label) {
                return Err(AppError::ParentNotFound(format!("{}.{}.{}", p.namespace, p.collection, parent_label)));
            }
        }

        if table.contains_key(&p.label) {
            return Err(AppError::PathDuplicated(format!("{} already exists", p.qualify())));
        }
        table.insert(p.label.clone(), v);
        Ok(1)
    }

    async fn update_node(&self, p: &NodePath, v: NodeValue) -> AppResult<u64> {
        let mut tables = self.tables.lock();
        let table = match tables.get_mut(&Self::key(p)) {
            Some(t) => t,
            None => return Ok(0),
        };
        match table.get_mut(&p.label) {
            Some(entry) => {
                entry.extend(v);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_node(&self, p: &NodePath, keys: Option<Vec<String>>, cascade: bool) -> AppResult<u64> {
        let mut tables = self.tables.lock();
        let table = match tables.get_mut(&Self::key(p)) {
            Some(t) => t,
            None => return Ok(0),
        };

        if let Some(keys) = keys {
            if !keys.is_empty() {
                if let Some(node) = table.get_mut(&p.label) {
                    for k in &keys {
                        node.remove(k);
                    }
                    return Ok(1);
                }
                return Ok(0);
            }
        }

        if !p.label.is_empty() {
            if cascade {
                let before = table.len();
                table.retain(|path, _| !(path == &p.label || path.starts_with(&format!("{}.", p.label))));
                return Ok((before - table.len()) as u64);
            } else {
                return Ok(if table.remove(&p.label).is_some() { 1 } else { 0 });
            }
        }

        if cascade {
            let n = table.len();
            drop(table);
            tables.remove(&Self::key(p));
            return Ok(n as u64);
        }

        Ok(0)
    }
}
