//! Tenant directory stored in a PostgreSQL control-plane database.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;

use crate::core::{StorageEngine, TenantDirectory, rejected_update};
use crate::error::{TenancyError, TenancyResult};
use crate::tenant::{TenantId, TenantRecord, TenantStatus};

use super::engine::PostgresEngine;
use super::schema::{self, pg_error};

const SELECT_COLUMNS: &str =
    "SELECT id, display_name, storage_instance_name, status, created_at, updated_at FROM tenants";

/// [`TenantDirectory`] backed by the control-plane PostgreSQL database.
#[derive(Clone)]
pub struct PostgresTenantDirectory {
    instance: String,
    pool: Pool,
}

impl Debug for PostgresTenantDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTenantDirectory")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

impl PostgresTenantDirectory {
    /// Opens (creating if needed) the control-plane database and its schema.
    pub async fn open(engine: &PostgresEngine, control_plane_instance: &str) -> TenancyResult<Self> {
        engine.create_instance(control_plane_instance).await?;

        let pool = engine.build_pool(control_plane_instance).await?.inner().clone();
        let mut client = pool
            .get()
            .await
            .map_err(|e| TenancyError::unavailable(control_plane_instance, e))?;
        schema::initialize_control_plane(&mut client, control_plane_instance).await?;
        drop(client);

        tracing::info!(
            storage_instance = %control_plane_instance,
            "Opened PostgreSQL tenant directory"
        );

        Ok(Self {
            instance: control_plane_instance.to_string(),
            pool,
        })
    }

    async fn client(&self) -> TenancyResult<deadpool_postgres::Client> {
        self.pool
            .get()
            .await
            .map_err(|e| TenancyError::unavailable(&self.instance, e))
    }

    async fn query_one(&self, clause: &str, param: &str) -> TenancyResult<Option<TenantRecord>> {
        let client = self.client().await?;
        let sql = format!("{} WHERE {}", SELECT_COLUMNS, clause);
        client
            .query_opt(&sql, &[&param])
            .await
            .map_err(|e| pg_error(&self.instance, "Failed to query tenants", e))?
            .map(|row| row_to_record(&row))
            .transpose()
    }

    async fn query_many(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> TenancyResult<Vec<TenantRecord>> {
        let client = self.client().await?;
        let rows = client
            .query(sql, params)
            .await
            .map_err(|e| pg_error(&self.instance, "Failed to list tenants", e))?;
        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &Row) -> TenancyResult<TenantRecord> {
    let status: String = row.get(3);
    Ok(TenantRecord {
        id: TenantId::new(row.get::<_, String>(0)),
        display_name: row.get(1),
        storage_instance_name: row.get(2),
        status: status.parse()?,
        created_at: row.get::<_, DateTime<Utc>>(4),
        updated_at: row.get::<_, DateTime<Utc>>(5),
    })
}

#[async_trait]
impl TenantDirectory for PostgresTenantDirectory {
    async fn insert(&self, record: &TenantRecord) -> TenancyResult<()> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO tenants (id, display_name, storage_instance_name, status, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &record.id.as_str(),
                    &record.display_name,
                    &record.storage_instance_name,
                    &record.status.as_str(),
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(
                    tenant_id = %record.id,
                    storage_instance = %record.storage_instance_name,
                    "Inserted tenant record"
                );
                Ok(())
            }
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(TenancyError::NameConflict {
                    display_name: record.display_name.clone(),
                    storage_instance: record.storage_instance_name.clone(),
                })
            }
            Err(e) => Err(pg_error(&self.instance, "Failed to insert tenant", e)),
        }
    }

    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<TenantRecord>> {
        self.query_one("id = $1", id.as_str()).await
    }

    async fn find_by_name(&self, display_name: &str) -> TenancyResult<Option<TenantRecord>> {
        self.query_one("lower(display_name) = lower($1)", display_name)
            .await
    }

    async fn find_by_storage_instance(
        &self,
        instance: &str,
    ) -> TenancyResult<Option<TenantRecord>> {
        self.query_one("storage_instance_name = $1", instance).await
    }

    async fn update_status(
        &self,
        id: &TenantId,
        status: TenantStatus,
    ) -> TenancyResult<TenantRecord> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| pg_error(&self.instance, "Failed to begin status update", e))?;

        let current = tx
            .query_opt(
                "SELECT status FROM tenants WHERE id = $1 FOR UPDATE",
                &[&id.as_str()],
            )
            .await
            .map_err(|e| pg_error(&self.instance, "Failed to lock tenant", e))?
            .map(|row| row.get::<_, String>(0).parse::<TenantStatus>())
            .transpose()?;

        let changed = match current {
            Some(from) if from != status && from.can_transition_to(status) => true,
            other => {
                rejected_update(id, other, status)?;
                false
            }
        };

        let row = if changed {
            tx.query_one(
                "UPDATE tenants SET status = $2, updated_at = $3 WHERE id = $1 \
                 RETURNING id, display_name, storage_instance_name, status, created_at, updated_at",
                &[&id.as_str(), &status.as_str(), &Utc::now()],
            )
            .await
        } else {
            let sql = format!("{} WHERE id = $1", SELECT_COLUMNS);
            tx.query_one(&sql, &[&id.as_str()]).await
        }
        .map_err(|e| pg_error(&self.instance, "Failed to update tenant status", e))?;
        let record = row_to_record(&row)?;

        tx.commit()
            .await
            .map_err(|e| pg_error(&self.instance, "Failed to commit status update", e))?;

        if changed {
            tracing::info!(tenant_id = %id, status = %status, "Updated tenant status");
        }
        Ok(record)
    }

    async fn list(&self) -> TenancyResult<Vec<TenantRecord>> {
        let sql = format!("{} ORDER BY created_at, id", SELECT_COLUMNS);
        self.query_many(&sql, &[]).await
    }

    async fn list_by_status(&self, status: TenantStatus) -> TenancyResult<Vec<TenantRecord>> {
        let sql = format!("{} WHERE status = $1 ORDER BY created_at, id", SELECT_COLUMNS);
        self.query_many(&sql, &[&status.as_str()]).await
    }
}
