//! Postgres-backed implementation of `StorageAdapter`.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::{AppError, AppResult};
use crate::path::NodePath;

use super::{hstore, is_missing_relation, is_missing_schema, qualified_table, provisioning, ComboValue, NodeValue, StorageAdapter};

pub struct PgStorage {
    pub pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        PgStorage { pool }
    }
}

fn pg_message(e: &sqlx::Error) -> String {
    match e.as_database_error() {
        Some(dbe) => dbe.message().to_string(),
        None => e.to_string(),
    }
}

/// Classifies a read-path error: collection/namespace-missing becomes
/// `NodeNotFound`, everything else is `Internal`.
fn classify_read(e: sqlx::Error) -> AppError {
    let msg = pg_message(&e);
    if is_missing_relation(&msg) || is_missing_schema(&msg) {
        AppError::NodeNotFound(msg)
    } else {
        AppError::Internal(msg)
    }
}

/// Splits a label path into immediate-child segments relative to `parent`.
/// Returns `None` if `candidate` is not a strict, one-level-deeper
/// descendant of `parent`.
fn immediate_child_label<'a>(parent: &str, candidate: &'a str) -> Option<&'a str> {
    if parent.is_empty() {
        if candidate.is_empty() || candidate.contains('.') {
            None
        } else {
            Some(candidate)
        }
    } else {
        let rest = candidate.strip_prefix(parent)?.strip_prefix('.')?;
        if rest.is_empty() || rest.contains('.') {
            None
        } else {
            Some(rest)
        }
    }
}

#[async_trait]
impl StorageAdapter for PgStorage {
    async fn select_node(&self, p: &NodePath) -> AppResult<NodeValue> {
        let table = qualified_table(&p.namespace, &p.collection);

        // Existence probe + main query are one logical operation (spec
        // §5): both run against the same held connection/transaction so
        // "node exists but has no keys" and "node does not exist" are
        // distinguished consistently even under concurrent writers.
        let mut tx = self.pool.begin().await.map_err(classify_read)?;

        let exists_sql = format!("SELECT 1 FROM {table} WHERE path = $1::ltree LIMIT 1");
        let found = sqlx::query(&exists_sql)
            .bind(&p.label)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify_read)?;
        if found.is_none() {
            tx.rollback().await.map_err(classify_read)?;
            return Err(AppError::NodeNotFound(format!("{} has no node", p.qualify())));
        }

        let sql = format!("SELECT value::text AS v FROM {table} WHERE path = $1::ltree LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(&p.label)
            .fetch_one(&mut *tx)
            .await
            .map_err(classify_read)?;
        let text: String = row.try_get("v").map_err(|e| AppError::Internal(e.to_string()))?;
        tx.commit().await.map_err(classify_read)?;
        Ok(hstore::parse(&text))
    }

    async fn get_overridden(&self, p: &NodePath) -> AppResult<NodeValue> {
        let table = qualified_table(&p.namespace, &p.collection);
        let sql = format!("SELECT value::text AS v FROM {table} WHERE path @> $1::ltree ORDER BY path ASC");
        let rows = sqlx::query(&sql)
            .bind(&p.label)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_read)?;

        let mut merged = HashMap::new();
        for row in rows {
            let text: String = row.try_get("v").map_err(|e| AppError::Internal(e.to_string()))?;
            merged.extend(hstore::parse(&text));
        }
        Ok(merged)
    }

    async fn get_combo(&self, p: &NodePath) -> AppResult<ComboValue> {
        let table = qualified_table(&p.namespace, &p.collection);
        let sql = format!("SELECT value::text AS v FROM {table} WHERE path @> $1::ltree ORDER BY path ASC");
        let rows = sqlx::query(&sql)
            .bind(&p.label)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_read)?;

        let mut combo: ComboValue = HashMap::new();
        for row in rows {
            let text: String = row.try_get("v").map_err(|e| AppError::Internal(e.to_string()))?;
            for (k, v) in hstore::parse(&text) {
                combo.entry(k).or_default().push(v);
            }
        }
        Ok(combo)
    }

    async fn get_reverse_combo(&self, p: &NodePath) -> AppResult<ComboValue> {
        let table = qualified_table(&p.namespace, &p.collection);
        let sql = format!("SELECT value::text AS v FROM {table} WHERE path <@ $1::ltree ORDER BY path ASC");
        let rows = sqlx::query(&sql)
            .bind(&p.label)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_read)?;

        let mut combo: ComboValue = HashMap::new();
        for row in rows {
            let text: String = row.try_get("v").map_err(|e| AppError::Internal(e.to_string()))?;
            for (k, v) in hstore::parse(&text) {
                combo.entry(k).or_default().push(v);
            }
        }
        Ok(combo)
    }

    async fn get_ancestors(&self, p: &NodePath) -> AppResult<Vec<String>> {
        let table = qualified_table(&p.namespace, &p.collection);
        let sql = format!("SELECT path::text AS pth FROM {table} WHERE path @> $1::ltree AND path != $1::ltree ORDER BY path ASC");
        let rows = sqlx::query(&sql)
            .bind(&p.label)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_read)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let label: String = row.try_get("pth").map_err(|e| AppError::Internal(e.to_string()))?;
            out.push(p.with_label(label).qualify());
        }
        Ok(out)
    }

    async fn get_children(&self, p: &NodePath) -> AppResult<Vec<String>> {
        let table = qualified_table(&p.namespace, &p.collection);
        let sql = if p.label.is_empty() {
            format!("SELECT path::text AS pth FROM {table}")
        } else {
            format!("SELECT path::text AS pth FROM {table} WHERE path <@ $1::ltree")
        };
        let query = sqlx::query(&sql);
        let query = if p.label.is_empty() { query } else { query.bind(&p.label) };
        let rows = query.fetch_all(&self.pool).await.map_err(classify_read)?;

        let mut out = Vec::new();
        for row in rows {
            let candidate: String = row.try_get("pth").map_err(|e| AppError::Internal(e.to_string()))?;
            if let Some(child) = immediate_child_label(&p.label, &candidate) {
                out.push(p.with_label(if p.label.is_empty() {
                    child.to_string()
                } else {
                    format!("{}.{}", p.label, child)
                }).qualify());
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn get_descendants(&self, p: &NodePath) -> AppResult<HashMap<String, NodeValue>> {
        let table = qualified_table(&p.namespace, &p.collection);
        let sql = format!("SELECT path::text AS pth, value::text AS v FROM {table} WHERE path <@ $1::ltree AND path != $1::ltree ORDER BY path ASC");
        let rows = sqlx::query(&sql)
            .bind(&p.label)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_read)?;

        let mut out = HashMap::new();
        for row in rows {
            let label: String = row.try_get("pth").map_err(|e| AppError::Internal(e.to_string()))?;
            let text: String = row.try_get("v").map_err(|e| AppError::Internal(e.to_string()))?;
            out.insert(p.with_label(label).qualify(), hstore::parse(&text));
        }
        Ok(out)
    }

    async fn search_node(&self, p: &NodePath, pattern: &str) -> AppResult<Vec<String>> {
        let table = qualified_table(&p.namespace, &p.collection);
        let sql = format!("SELECT path::text AS pth FROM {table} WHERE path ~ $1::lquery ORDER BY path ASC");
        let rows = sqlx::query(&sql)
            .bind(pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_read)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let label: String = row.try_get("pth").map_err(|e| AppError::Internal(e.to_string()))?;
            out.push(p.with_label(label).qualify());
        }
        Ok(out)
    }

    async fn get_collections(&self, namespace: &str) -> AppResult<Vec<String>> {
        let sql = "SELECT table_name FROM information_schema.tables WHERE table_schema = $1 ORDER BY table_name";
        let rows = sqlx::query(sql)
            .bind(namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_read)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("table_name").map_err(|e| AppError::Internal(e.to_string()))?;
            out.push(format!("{namespace}.{name}"));
        }
        Ok(out)
    }

    async fn create_node(&self, p: &NodePath, v: NodeValue) -> AppResult<u64> {
        provisioning::create_node(&self.pool, p, v).await
    }

    async fn update_node(&self, p: &NodePath, v: NodeValue) -> AppResult<u64> {
        let table = qualified_table(&p.namespace, &p.collection);
        let literal = hstore::serialize(&v);
        let sql = format!("UPDATE {table} SET value = value || $1::hstore, last_modified = now() WHERE path = $2::ltree");
        let result = sqlx::query(&sql)
            .bind(&literal)
            .bind(&p.label)
            .execute(&self.pool)
            .await
            .map_err(classify_read)?;
        Ok(result.rows_affected())
    }

    async fn delete_node(&self, p: &NodePath, keys: Option<Vec<String>>, cascade: bool) -> AppResult<u64> {
        let table = qualified_table(&p.namespace, &p.collection);

        if let Some(keys) = keys {
            if !keys.is_empty() {
                let sql = format!("UPDATE {table} SET value = delete(value, $1), last_modified = now() WHERE path = $2::ltree");
                let result = sqlx::query(&sql)
                    .bind(&keys)
                    .bind(&p.label)
                    .execute(&self.pool)
                    .await
                    .map_err(classify_read)?;
                return Ok(result.rows_affected());
            }
        }

        if !p.label.is_empty() {
            let sql = if cascade {
                format!("DELETE FROM {table} WHERE path <@ $1::ltree")
            } else {
                format!("DELETE FROM {table} WHERE path = $1::ltree")
            };
            let result = sqlx::query(&sql)
                .bind(&p.label)
                .execute(&self.pool)
                .await
                .map_err(classify_read)?;
            return Ok(result.rows_affected());
        }

        if cascade {
            let sql = format!("DROP TABLE {table}");
            sqlx::query(&sql).execute(&self.pool).await.map_err(classify_read)?;
            return Ok(0);
        }

        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_child_of_root() {
        assert_eq!(immediate_child_label("", "a"), Some("a"));
        assert_eq!(immediate_child_label("", "a.b"), None);
        assert_eq!(immediate_child_label("", ""), None);
    }

    #[test]
    fn immediate_child_of_nonroot() {
        assert_eq!(immediate_child_label("a", "a.b"), Some("b"));
        assert_eq!(immediate_child_label("a", "a.b.c"), None);
        assert_eq!(immediate_child_label("a", "a"), None);
        assert_eq!(immediate_child_label("a", "x.y"), None);
    }
}
