// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed instance repository.
//!
//! Instance rows hold scalar attributes and the workflow id; metadata lives in
//! `instance_metadata`, one URL-encoded row per value. The workflow structure
//! (tasks, conditions, configuration) is not persisted: instances read back
//! from this backend carry a [`Workflow::reference`] holding only the
//! workflow id, and callers needing the definition resolve it elsewhere.
//!
//! Every operation runs in its own transaction. On failure the transaction is
//! rolled back before the error is returned.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, error, warn};

use crate::error::{CodecError, StoreError};
use crate::migrations::SQLITE as MIGRATOR;
use crate::model::{Metadata, Workflow, WorkflowInstance};
use crate::pagination::page_offset;

use super::{InstanceRepository, effective_page_size};

const SELECT_INSTANCES: &str = r#"
    SELECT instance_id, status, workflow_id, current_task_id,
           start_time, end_time, current_task_start_time, current_task_end_time,
           priority, times_blocked
    FROM instances
"#;

const PAGE_ORDER: &str =
    "ORDER BY start_time IS NULL, start_time DESC, CAST(instance_id AS TEXT) ASC";

/// Whether `url` names an in-memory SQLite database.
pub fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Row of the `instances` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct InstanceRow {
    instance_id: i64,
    status: String,
    workflow_id: String,
    current_task_id: String,
    start_time: Option<String>,
    end_time: Option<String>,
    current_task_start_time: Option<String>,
    current_task_end_time: Option<String>,
    priority: f64,
    times_blocked: i64,
}

/// Row of the `instance_metadata` table. A NULL value marks a key that holds
/// no values.
#[derive(Debug, Clone, sqlx::FromRow)]
struct MetadataRow {
    instance_id: i64,
    met_key: String,
    met_value: Option<String>,
}

impl InstanceRow {
    fn into_instance(self, shared_context: Metadata) -> Result<WorkflowInstance, StoreError> {
        let times_blocked =
            u32::try_from(self.times_blocked).map_err(|_| CodecError::InvalidValue {
                field: "times_blocked".to_string(),
                value: self.times_blocked.to_string(),
            })?;

        Ok(WorkflowInstance {
            id: self.instance_id.to_string(),
            status: self.status,
            current_task_id: self.current_task_id,
            start_time: self.start_time,
            end_time: self.end_time,
            current_task_start_time: self.current_task_start_time,
            current_task_end_time: self.current_task_end_time,
            priority: self.priority,
            times_blocked,
            shared_context,
            workflow: Workflow::reference(self.workflow_id),
        })
    }
}

/// SQLite-backed instance repository.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
    page_size: usize,
}

impl SqliteRepository {
    /// Create a repository over an existing, already migrated pool.
    ///
    /// A non-positive `page_size` selects the default page size.
    pub fn new(pool: SqlitePool, page_size: i64) -> Self {
        Self {
            pool,
            page_size: effective_page_size(page_size),
        }
    }

    /// Connect to `url`, creating the database if needed, and run migrations.
    pub async fn connect(url: &str, max_connections: u32, page_size: i64) -> Result<Self, StoreError> {
        // Each connection to an in-memory URL opens a separate database.
        let max_connections = if is_memory_url(url) { 1 } else { max_connections };
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::repository("connect", format!("Invalid SQLite URL '{}': {}", url, e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::repository("connect", format!("Failed to connect to SQLite at '{}': {}", url, e)))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::repository("migrate", format!("Failed to run migrations: {}", e)))?;

        Ok(Self::new(pool, page_size))
    }

    /// Create and initialize a repository from a database file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Runs all migrations
    pub async fn from_path(path: impl AsRef<Path>, page_size: i64) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::repository("create_dir", format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url, 5, page_size).await
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Sqlite>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::repository(operation, e))
    }
}

/// Commit on success, roll back on failure.
///
/// A failed rollback is reported as a repository error carrying both messages.
async fn finish<T>(
    tx: Transaction<'static, Sqlite>,
    operation: &str,
    result: Result<T, StoreError>,
) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| StoreError::repository(operation, e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                error!(operation, error = %rollback, "Unable to roll back transaction");
                return Err(StoreError::repository(
                    operation,
                    format!("{}; rollback failed: {}", err, rollback),
                ));
            }
            Err(err)
        }
    }
}

fn parse_id(instance_id: &str) -> Option<i64> {
    instance_id.parse().ok()
}

fn require_id(operation: &str, instance_id: &str) -> Result<i64, StoreError> {
    parse_id(instance_id).ok_or_else(|| {
        StoreError::repository(operation, format!("Invalid instance id '{}'", instance_id))
    })
}

// ============================================================================
// Statements (run inside a transaction)
// ============================================================================

async fn insert_instance(
    conn: &mut SqliteConnection,
    instance: &WorkflowInstance,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO instances (status, workflow_id, current_task_id,
                               start_time, end_time, current_task_start_time,
                               current_task_end_time, priority, times_blocked)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&instance.status)
    .bind(&instance.workflow.id)
    .bind(&instance.current_task_id)
    .bind(&instance.start_time)
    .bind(&instance.end_time)
    .bind(&instance.current_task_start_time)
    .bind(&instance.current_task_end_time)
    .bind(instance.priority)
    .bind(i64::from(instance.times_blocked))
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();
    insert_metadata(conn, id, &instance.shared_context).await?;
    Ok(id)
}

async fn update_instance(
    conn: &mut SqliteConnection,
    id: i64,
    instance: &WorkflowInstance,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE instances
        SET status = ?1,
            workflow_id = ?2,
            current_task_id = ?3,
            start_time = ?4,
            end_time = ?5,
            current_task_start_time = ?6,
            current_task_end_time = ?7,
            priority = ?8,
            times_blocked = ?9
        WHERE instance_id = ?10
        "#,
    )
    .bind(&instance.status)
    .bind(&instance.workflow.id)
    .bind(&instance.current_task_id)
    .bind(&instance.start_time)
    .bind(&instance.end_time)
    .bind(&instance.current_task_start_time)
    .bind(&instance.current_task_end_time)
    .bind(instance.priority)
    .bind(i64::from(instance.times_blocked))
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    delete_metadata(conn, id).await?;
    insert_metadata(conn, id, &instance.shared_context).await?;
    Ok(true)
}

async fn insert_metadata(
    conn: &mut SqliteConnection,
    id: i64,
    metadata: &Metadata,
) -> Result<(), StoreError> {
    let mut position: i64 = 0;
    for (key, values) in metadata.iter() {
        let encoded: Vec<Option<String>> = if values.is_empty() {
            vec![None]
        } else {
            values
                .iter()
                .map(|v| Some(urlencoding::encode(v).into_owned()))
                .collect()
        };

        for value in encoded {
            sqlx::query(
                r#"
                INSERT INTO instance_metadata (instance_id, position, met_key, met_value)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(id)
            .bind(position)
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await?;
            position += 1;
        }
    }
    Ok(())
}

async fn delete_metadata(conn: &mut SqliteConnection, id: i64) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM instance_metadata WHERE instance_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn decode_metadata_rows(
    rows: Vec<MetadataRow>,
) -> Result<HashMap<i64, Metadata>, StoreError> {
    let mut by_instance: HashMap<i64, Metadata> = HashMap::new();
    for row in rows {
        let metadata = by_instance.entry(row.instance_id).or_default();
        match row.met_value {
            Some(raw) => {
                let value = urlencoding::decode(&raw)
                    .map_err(|e| StoreError::repository("decode_metadata", e))?;
                metadata.add_value(row.met_key, value.into_owned());
            }
            None => {
                if !metadata.contains_key(&row.met_key) {
                    metadata.replace(row.met_key, Vec::new());
                }
            }
        }
    }
    Ok(by_instance)
}

async fn fetch_instance(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<WorkflowInstance>, StoreError> {
    let sql = format!("{SELECT_INSTANCES} WHERE instance_id = ?1");
    let Some(row) = sqlx::query_as::<_, InstanceRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let rows = sqlx::query_as::<_, MetadataRow>(
        r#"
        SELECT instance_id, met_key, met_value
        FROM instance_metadata
        WHERE instance_id = ?1
        ORDER BY position
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let metadata = decode_metadata_rows(rows)?.remove(&id).unwrap_or_default();
    row.into_instance(metadata).map(Some)
}

async fn fetch_instances(
    conn: &mut SqliteConnection,
    status: Option<&str>,
) -> Result<Vec<WorkflowInstance>, StoreError> {
    let sql = format!("{SELECT_INSTANCES} WHERE (?1 IS NULL OR status = ?1) {PAGE_ORDER}");
    let rows = sqlx::query_as::<_, InstanceRow>(&sql)
        .bind(status)
        .fetch_all(&mut *conn)
        .await?;

    let met_rows = sqlx::query_as::<_, MetadataRow>(
        r#"
        SELECT m.instance_id, m.met_key, m.met_value
        FROM instance_metadata m
        JOIN instances i ON i.instance_id = m.instance_id
        WHERE (?1 IS NULL OR i.status = ?1)
        ORDER BY m.instance_id, m.position
        "#,
    )
    .bind(status)
    .fetch_all(&mut *conn)
    .await?;
    let mut metadata = decode_metadata_rows(met_rows)?;

    rows.into_iter()
        .map(|row| {
            let met = metadata.remove(&row.instance_id).unwrap_or_default();
            row.into_instance(met)
        })
        .collect()
}

async fn count_matching(
    conn: &mut SqliteConnection,
    status: Option<&str>,
) -> Result<usize, StoreError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM instances WHERE (?1 IS NULL OR status = ?1)")
            .bind(status)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count.max(0) as usize)
}

async fn page_ids(
    conn: &mut SqliteConnection,
    page_num: usize,
    page_size: usize,
    status: Option<&str>,
) -> Result<Vec<String>, StoreError> {
    let total = count_matching(conn, status).await?;
    let offset = page_offset(page_num, page_size, total);

    let sql = format!(
        "SELECT instance_id FROM instances WHERE (?1 IS NULL OR status = ?1) {PAGE_ORDER} LIMIT ?2 OFFSET ?3"
    );
    let ids: Vec<i64> = sqlx::query_scalar(&sql)
        .bind(status)
        .bind(page_size as i64)
        .bind(offset as i64)
        .fetch_all(&mut *conn)
        .await?;

    Ok(ids.into_iter().map(|id| id.to_string()).collect())
}

// ============================================================================
// Repository
// ============================================================================

#[async_trait::async_trait]
impl InstanceRepository for SqliteRepository {
    async fn add(&self, instance: &WorkflowInstance) -> Result<String, StoreError> {
        let mut tx = self.begin("add").await?;
        let result = insert_instance(&mut tx, instance).await;
        let id = finish(tx, "add", result).await?;

        debug!(instance_id = id, status = %instance.status, "Instance added");
        Ok(id.to_string())
    }

    async fn update(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        let id = require_id("update", &instance.id)?;

        let mut tx = self.begin("update").await?;
        let result = update_instance(&mut tx, id, instance).await;
        let updated = finish(tx, "update", result).await?;

        if updated {
            debug!(instance_id = id, status = %instance.status, "Instance updated");
        } else {
            warn!(instance_id = id, "Attempt to update an instance that is not tracked");
        }
        Ok(())
    }

    async fn remove(&self, instance_id: &str) -> Result<(), StoreError> {
        let id = require_id("remove", instance_id)?;

        let mut tx = self.begin("remove").await?;
        let result: Result<(), StoreError> = async {
            delete_metadata(&mut tx, id).await?;
            sqlx::query("DELETE FROM instances WHERE instance_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            Ok(())
        }
        .await;
        finish(tx, "remove", result).await?;

        debug!(instance_id = id, "Instance removed");
        Ok(())
    }

    async fn get_by_id(&self, instance_id: &str) -> Result<Option<WorkflowInstance>, StoreError> {
        let Some(id) = parse_id(instance_id) else {
            debug!(instance_id, "Lookup with non-numeric instance id");
            return Ok(None);
        };

        let mut tx = self.begin("get_by_id").await?;
        let result = fetch_instance(&mut tx, id).await;
        finish(tx, "get_by_id", result).await
    }

    async fn get_all(&self) -> Result<Vec<WorkflowInstance>, StoreError> {
        let mut tx = self.begin("get_all").await?;
        let result = fetch_instances(&mut tx, None).await;
        finish(tx, "get_all", result).await
    }

    async fn get_all_by_status(&self, status: &str) -> Result<Vec<WorkflowInstance>, StoreError> {
        let mut tx = self.begin("get_all_by_status").await?;
        let result = fetch_instances(&mut tx, Some(status)).await;
        finish(tx, "get_all_by_status", result).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let mut tx = self.begin("count").await?;
        let result = count_matching(&mut tx, None).await;
        finish(tx, "count", result).await
    }

    async fn count_by_status(&self, status: &str) -> Result<usize, StoreError> {
        let mut tx = self.begin("count_by_status").await?;
        let result = count_matching(&mut tx, Some(status)).await;
        finish(tx, "count_by_status", result).await
    }

    async fn ids_for_page(
        &self,
        page_num: usize,
        status: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let mut tx = self.begin("ids_for_page").await?;
        let result = page_ids(&mut tx, page_num, self.page_size, status).await;
        finish(tx, "ids_for_page", result).await
    }

    async fn clear_all(&self) -> Result<bool, StoreError> {
        let mut tx = self.begin("clear_all").await?;
        let result: Result<u64, StoreError> = async {
            sqlx::query("DELETE FROM instance_metadata")
                .execute(&mut *tx)
                .await?;
            let deleted = sqlx::query("DELETE FROM instances")
                .execute(&mut *tx)
                .await?;
            Ok(deleted.rows_affected())
        }
        .await;
        let deleted = finish(tx, "clear_all", result).await?;

        debug!(deleted, "All instances cleared");
        Ok(true)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
