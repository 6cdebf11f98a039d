//! Lazy provisioning: create the containing namespace (Postgres schema)
//! and/or collection (table) on first write, retrying the insert under
//! the same logical operation, bounded to prevent runaway recursion.

use sqlx::{Connection as _, PgPool, Postgres, Transaction};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::path::NodePath;

use super::{hstore, is_missing_relation, is_missing_schema, is_duplicate_key, qualified_table, quote_ident, NodeValue};

const MAX_RETRIES: u32 = 3;

fn pg_message(e: &sqlx::Error) -> String {
    match e.as_database_error() {
        Some(dbe) => dbe.message().to_string(),
        None => e.to_string(),
    }
}

async fn create_schema(txn: &mut Transaction<'_, Postgres>, namespace: &str) -> AppResult<()> {
    let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(namespace));
    sqlx::query(&sql)
        .execute(&mut **txn)
        .await
        .map_err(|e| AppError::Internal(pg_message(&e)))?;
    Ok(())
}

async fn create_table_with_root(txn: &mut Transaction<'_, Postgres>, p: &NodePath) -> AppResult<()> {
    let table = qualified_table(&p.namespace, &p.collection);
    let create = format!(
        "CREATE TABLE IF NOT EXISTS {table} (id SERIAL PRIMARY KEY, path ltree UNIQUE, value hstore, last_modified TIMESTAMPTZ NOT NULL DEFAULT now())"
    );
    sqlx::query(&create)
        .execute(&mut **txn)
        .await
        .map_err(|e| AppError::Internal(pg_message(&e)))?;

    // Materialize the empty root record so containment queries for
    // depth-1 nodes observe it as an ancestor. Skipped when the request
    // that triggered provisioning is itself a create of the root node;
    // the caller's own INSERT will populate path='' a moment later.
    if !p.label.is_empty() {
        let insert_root = format!("INSERT INTO {table}(path, value) VALUES ($1::ltree, ''::hstore) ON CONFLICT DO NOTHING");
        sqlx::query(&insert_root)
            .bind("")
            .execute(&mut **txn)
            .await
            .map_err(|e| AppError::Internal(pg_message(&e)))?;
    }
    Ok(())
}

/// Returns `Ok(true)` if a node with the given label exists,
/// `Ok(false)` if the table exists but the label does not, or the
/// underlying `sqlx::Error` if the table/schema itself is missing.
async fn node_exists(txn: &mut Transaction<'_, Postgres>, p: &NodePath, label: &str) -> Result<bool, sqlx::Error> {
    let table = qualified_table(&p.namespace, &p.collection);
    let sql = format!("SELECT 1 FROM {table} WHERE path = $1::ltree LIMIT 1");
    let row = sqlx::query(&sql).bind(label).fetch_optional(&mut **txn).await?;
    Ok(row.is_some())
}

/// Runs the whole retry loop — parent-existence pre-check, DDL fixes, and
/// the final `INSERT` — on one connection held exclusively for the
/// operation's duration (spec §5). Each attempt opens its own transaction;
/// on a provisioning error that transaction is rolled back before the DDL
/// fix runs and the insert is retried (spec §4.C's state machine), so the
/// final `INSERT` always observes the DDL it just performed.
pub async fn create_node(pool: &PgPool, p: &NodePath, v: NodeValue) -> AppResult<u64> {
    let segments = p.label_segments();
    let mut attempt: u32 = 0;

    let mut conn = pool.acquire().await.map_err(|e| AppError::Internal(pg_message(&e)))?;

    loop {
        if attempt > MAX_RETRIES {
            return Err(AppError::NodeCreationError(p.qualify(), attempt));
        }

        let mut txn = conn.begin().await.map_err(|e| AppError::Internal(pg_message(&e)))?;

        if segments.len() > 1 {
            let parent_label = segments[..segments.len() - 1].join(".");
            match node_exists(&mut txn, p, &parent_label).await {
                Ok(true) => {}
                Ok(false) => {
                    txn.rollback().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                    return Err(AppError::ParentNotFound(format!("{}.{}.{}", p.namespace, p.collection, parent_label)));
                }
                Err(e) => {
                    let msg = pg_message(&e);
                    txn.rollback().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                    if is_missing_schema(&msg) {
                        debug!(namespace = %p.namespace, "provisioning: creating missing schema");
                        let mut ddl = conn.begin().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                        create_schema(&mut ddl, &p.namespace).await?;
                        ddl.commit().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                        attempt += 1;
                        continue;
                    } else if is_missing_relation(&msg) {
                        debug!(collection = %p.collection, "provisioning: creating missing table");
                        let mut ddl = conn.begin().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                        create_table_with_root(&mut ddl, p).await?;
                        ddl.commit().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                        attempt += 1;
                        continue;
                    } else {
                        return Err(AppError::Internal(msg));
                    }
                }
            }
        }

        let table = qualified_table(&p.namespace, &p.collection);
        let literal = hstore::serialize(&v);
        let sql = format!("INSERT INTO {table}(path, value) VALUES ($1::ltree, $2::hstore)");
        match sqlx::query(&sql).bind(&p.label).bind(&literal).execute(&mut *txn).await {
            Ok(result) => {
                txn.commit().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                return Ok(result.rows_affected());
            }
            Err(e) => {
                let msg = pg_message(&e);
                txn.rollback().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                if is_duplicate_key(&msg) {
                    return Err(AppError::PathDuplicated(format!("{} already exists", p.qualify())));
                } else if is_missing_schema(&msg) {
                    debug!(namespace = %p.namespace, "provisioning: creating missing schema");
                    let mut ddl = conn.begin().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                    create_schema(&mut ddl, &p.namespace).await?;
                    ddl.commit().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                    attempt += 1;
                    continue;
                } else if is_missing_relation(&msg) {
                    debug!(collection = %p.collection, "provisioning: creating missing table");
                    let mut ddl = conn.begin().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                    create_table_with_root(&mut ddl, p).await?;
                    ddl.commit().await.map_err(|e| AppError::Internal(pg_message(&e)))?;
                    attempt += 1;
                    continue;
                } else {
                    return Err(AppError::Internal(msg));
                }
            }
        }
    }
}
