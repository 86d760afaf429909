//! Tenant directory stored in a SQLite control-plane database.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{ErrorCode, OptionalExtension, Row, TransactionBehavior, params};

use crate::core::{TenantDirectory, rejected_update};
use crate::error::{TenancyError, TenancyResult};
use crate::tenant::{TenantId, TenantRecord, TenantStatus};

use super::engine::SqliteEngine;
use super::schema::{self, sql_error};

const SELECT_COLUMNS: &str =
    "SELECT id, display_name, storage_instance_name, status, created_at, updated_at FROM tenants";

/// [`TenantDirectory`] backed by the control-plane SQLite database.
pub struct SqliteTenantDirectory {
    instance: String,
    pool: Pool<SqliteConnectionManager>,
}

impl Debug for SqliteTenantDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTenantDirectory")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

impl SqliteTenantDirectory {
    /// Opens (creating if needed) the control-plane instance and its schema.
    ///
    /// The control plane lives next to the tenant databases but is never
    /// routed to through the tenant registry.
    pub fn open(engine: &SqliteEngine, control_plane_instance: &str) -> TenancyResult<Self> {
        let conn = engine.open_connection(control_plane_instance, true)?;
        schema::initialize_control_plane(&conn, control_plane_instance)?;
        drop(conn);

        let pool = engine.build_pool(control_plane_instance)?.into_inner();
        tracing::info!(
            storage_instance = %control_plane_instance,
            "Opened SQLite tenant directory"
        );

        Ok(Self {
            instance: control_plane_instance.to_string(),
            pool,
        })
    }

    fn connection(&self) -> TenancyResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| TenancyError::unavailable(&self.instance, e))
    }

    fn query_one(
        &self,
        clause: &str,
        param: &str,
    ) -> TenancyResult<Option<TenantRecord>> {
        let conn = self.connection()?;
        let sql = format!("{} WHERE {}", SELECT_COLUMNS, clause);
        conn.query_row(&sql, [param], row_to_record)
            .optional()
            .map_err(|e| sql_error(&self.instance, "Failed to query tenants", e))?
            .transpose()
    }

    fn query_many(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> TenancyResult<Vec<TenantRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| sql_error(&self.instance, "Failed to prepare tenant query", e))?;
        let rows = stmt
            .query_map(params, row_to_record)
            .map_err(|e| sql_error(&self.instance, "Failed to list tenants", e))?;

        let mut records = Vec::new();
        for row in rows {
            let record = row.map_err(|e| sql_error(&self.instance, "Failed to read tenant", e))?;
            records.push(record?);
        }
        Ok(records)
    }

    /// Conditionally moves a tenant to `status` inside one immediate
    /// transaction and returns whether a row changed plus the record after
    /// the update.
    fn compare_and_set_status(
        &self,
        id: &TenantId,
        status: TenantStatus,
    ) -> TenancyResult<(bool, TenantRecord)> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| sql_error(&self.instance, "Failed to begin status update", e))?;

        let sources = status.allowed_sources();
        let placeholders = (0..sources.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE tenants SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status IN ({})",
            placeholders
        );

        let target = status.as_str();
        let now = Utc::now().to_rfc3339();
        let tenant = id.as_str();
        let source_names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&target, &now, &tenant];
        bound.extend(source_names.iter().map(|s| s as &dyn rusqlite::ToSql));

        let updated = tx
            .execute(&sql, bound.as_slice())
            .map_err(|e| sql_error(&self.instance, "Failed to update tenant status", e))?;

        let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
        let record = tx
            .query_row(&sql, [tenant], row_to_record)
            .optional()
            .map_err(|e| sql_error(&self.instance, "Failed to read tenant", e))?
            .transpose()?;

        if updated == 0 {
            rejected_update(id, record.as_ref().map(|r| r.status), status)?;
        }

        tx.commit()
            .map_err(|e| sql_error(&self.instance, "Failed to commit status update", e))?;

        let record = record.ok_or_else(|| TenancyError::UnknownTenant {
            tenant_id: id.clone(),
        })?;
        Ok((updated > 0, record))
    }
}

/// Reads one row; the inner result carries directory-level decoding errors.
fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TenancyResult<TenantRecord>> {
    let id: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let storage_instance_name: String = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(decode_record(
        id,
        display_name,
        storage_instance_name,
        &status,
        &created_at,
        &updated_at,
    ))
}

fn decode_record(
    id: String,
    display_name: String,
    storage_instance_name: String,
    status: &str,
    created_at: &str,
    updated_at: &str,
) -> TenancyResult<TenantRecord> {
    Ok(TenantRecord {
        id: TenantId::new(id),
        display_name,
        storage_instance_name,
        status: status.parse()?,
        created_at: parse_timestamp(created_at)?,
        updated_at: parse_timestamp(updated_at)?,
    })
}

fn parse_timestamp(value: &str) -> TenancyResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TenancyError::Configuration {
            message: format!("corrupt timestamp '{}' in tenant directory: {}", value, e),
        })
}

#[async_trait]
impl TenantDirectory for SqliteTenantDirectory {
    async fn insert(&self, record: &TenantRecord) -> TenancyResult<()> {
        let conn = self.connection()?;
        let result = conn.execute(
            "INSERT INTO tenants (id, display_name, storage_instance_name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.as_str(),
                record.display_name,
                record.storage_instance_name,
                record.status.as_str(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => {
                tracing::debug!(
                    tenant_id = %record.id,
                    storage_instance = %record.storage_instance_name,
                    "Inserted tenant record"
                );
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(TenancyError::NameConflict {
                    display_name: record.display_name.clone(),
                    storage_instance: record.storage_instance_name.clone(),
                })
            }
            Err(e) => Err(sql_error(&self.instance, "Failed to insert tenant", e)),
        }
    }

    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<TenantRecord>> {
        self.query_one("id = ?1", id.as_str())
    }

    async fn find_by_name(&self, display_name: &str) -> TenancyResult<Option<TenantRecord>> {
        // The column is declared COLLATE NOCASE, so equality ignores case.
        self.query_one("display_name = ?1", display_name)
    }

    async fn find_by_storage_instance(
        &self,
        instance: &str,
    ) -> TenancyResult<Option<TenantRecord>> {
        self.query_one("storage_instance_name = ?1", instance)
    }

    async fn update_status(
        &self,
        id: &TenantId,
        status: TenantStatus,
    ) -> TenancyResult<TenantRecord> {
        let (changed, record) = self.compare_and_set_status(id, status)?;
        if changed {
            tracing::info!(tenant_id = %id, status = %status, "Updated tenant status");
        }
        Ok(record)
    }

    async fn exists(&self, id: &TenantId) -> TenancyResult<bool> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tenants WHERE id = ?1)",
            [id.as_str()],
            |row| row.get(0),
        )
        .map_err(|e| sql_error(&self.instance, "Failed to query tenants", e))
    }

    async fn list(&self) -> TenancyResult<Vec<TenantRecord>> {
        let sql = format!("{} ORDER BY created_at, id", SELECT_COLUMNS);
        self.query_many(&sql, &[])
    }

    async fn list_by_status(&self, status: TenantStatus) -> TenancyResult<Vec<TenantRecord>> {
        let sql = format!("{} WHERE status = ?1 ORDER BY created_at, id", SELECT_COLUMNS);
        self.query_many(&sql, &[&status.as_str()])
    }
}
