//! PostgreSQL schema definitions for tenant databases and the control plane.

use crate::core::BASELINE_SCHEMA_VERSION;
use crate::error::{TenancyError, TenancyResult};
use crate::tenant::TenantId;

/// Current control-plane schema version.
pub const CONTROL_PLANE_SCHEMA_VERSION: i32 = 1;

/// Serializes concurrent schema changes on one database.
const SCHEMA_LOCK_KEY: i64 = 0x6865_6c69_6f73;

/// Applies the baseline schema to a tenant database and stamps its owner.
pub async fn apply_baseline(
    client: &mut deadpool_postgres::Client,
    instance: &str,
    owner: &TenantId,
) -> TenancyResult<u32> {
    let tx = client
        .transaction()
        .await
        .map_err(|e| pg_error(instance, "Failed to begin schema transaction", e))?;

    tx.execute("SELECT pg_advisory_xact_lock($1)", &[&SCHEMA_LOCK_KEY])
        .await
        .map_err(|e| pg_error(instance, "Failed to take schema lock", e))?;

    let current_version = get_schema_version(&tx, instance).await?;
    if current_version == 0 {
        tx.batch_execute(
            "CREATE TABLE IF NOT EXISTS tenant_owner (
                tenant_id TEXT NOT NULL PRIMARY KEY,
                stamped_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );

            CREATE TABLE IF NOT EXISTS user_data (
                id BIGSERIAL PRIMARY KEY,
                data VARCHAR(255) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );",
        )
        .await
        .map_err(|e| pg_error(instance, "Failed to create baseline schema", e))?;
        set_schema_version(&tx, instance, BASELINE_SCHEMA_VERSION as i32).await?;
    }

    let existing = tx
        .query_opt("SELECT tenant_id FROM tenant_owner LIMIT 1", &[])
        .await
        .map_err(|e| pg_error(instance, "Failed to read tenant_owner", e))?
        .map(|row| row.get::<_, String>(0));

    match existing {
        Some(existing) if existing == owner.as_str() => {}
        Some(existing) => {
            return Err(TenancyError::InstanceOwnershipConflict {
                storage_instance: instance.to_string(),
                owner: TenantId::new(existing),
            });
        }
        None => {
            tx.execute(
                "INSERT INTO tenant_owner (tenant_id) VALUES ($1)",
                &[&owner.as_str()],
            )
            .await
            .map_err(|e| pg_error(instance, "Failed to stamp tenant_owner", e))?;
        }
    }

    tx.commit()
        .await
        .map_err(|e| pg_error(instance, "Failed to commit schema transaction", e))?;

    Ok((current_version as u32).max(BASELINE_SCHEMA_VERSION))
}

/// Initialize the control-plane schema.
pub async fn initialize_control_plane(
    client: &mut deadpool_postgres::Client,
    instance: &str,
) -> TenancyResult<()> {
    let tx = client
        .transaction()
        .await
        .map_err(|e| pg_error(instance, "Failed to begin schema transaction", e))?;

    tx.execute("SELECT pg_advisory_xact_lock($1)", &[&SCHEMA_LOCK_KEY])
        .await
        .map_err(|e| pg_error(instance, "Failed to take schema lock", e))?;

    let current_version = get_schema_version(&tx, instance).await?;
    if current_version == 0 {
        tx.batch_execute(
            "CREATE TABLE IF NOT EXISTS tenants (
                id TEXT NOT NULL PRIMARY KEY,
                display_name TEXT NOT NULL,
                storage_instance_name TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL CHECK (status IN ('PROVISIONING', 'ACTIVE', 'FAILED', 'DEACTIVATED')),
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_tenants_display_name
                ON tenants (lower(display_name));
            CREATE INDEX IF NOT EXISTS idx_tenants_status ON tenants (status);

            CREATE OR REPLACE FUNCTION tenants_storage_instance_immutable() RETURNS trigger AS $$
            BEGIN
                IF OLD.status IN ('ACTIVE', 'DEACTIVATED')
                    AND NEW.storage_instance_name <> OLD.storage_instance_name THEN
                    RAISE EXCEPTION 'storage_instance_name is immutable once active';
                END IF;
                RETURN NEW;
            END;
            $$ LANGUAGE plpgsql;

            DROP TRIGGER IF EXISTS tenants_storage_instance_immutable ON tenants;
            CREATE TRIGGER tenants_storage_instance_immutable
                BEFORE UPDATE ON tenants
                FOR EACH ROW EXECUTE FUNCTION tenants_storage_instance_immutable();",
        )
        .await
        .map_err(|e| pg_error(instance, "Failed to create control-plane schema", e))?;
        set_schema_version(&tx, instance, CONTROL_PLANE_SCHEMA_VERSION).await?;
    }

    tx.commit()
        .await
        .map_err(|e| pg_error(instance, "Failed to commit schema transaction", e))
}

/// Get the current schema version.
async fn get_schema_version(
    tx: &deadpool_postgres::Transaction<'_>,
    instance: &str,
) -> TenancyResult<i32> {
    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        &[],
    )
    .await
    .map_err(|e| pg_error(instance, "Failed to create schema_version table", e))?;

    let row = tx
        .query_opt("SELECT version FROM schema_version LIMIT 1", &[])
        .await
        .map_err(|e| pg_error(instance, "Failed to query schema version", e))?;

    Ok(row.map(|r| r.get::<_, i32>(0)).unwrap_or(0))
}

/// Set the schema version.
async fn set_schema_version(
    tx: &deadpool_postgres::Transaction<'_>,
    instance: &str,
    version: i32,
) -> TenancyResult<()> {
    tx.execute("DELETE FROM schema_version", &[])
        .await
        .map_err(|e| pg_error(instance, "Failed to clear schema_version", e))?;

    tx.execute(
        "INSERT INTO schema_version (version) VALUES ($1)",
        &[&version],
    )
    .await
    .map_err(|e| pg_error(instance, "Failed to set schema_version", e))?;

    Ok(())
}

/// Maps a tokio-postgres error on `instance` to [`TenancyError::StorageUnavailable`].
pub(crate) fn pg_error(instance: &str, context: &str, e: tokio_postgres::Error) -> TenancyError {
    TenancyError::unavailable(instance, format!("{}: {}", context, e))
}
