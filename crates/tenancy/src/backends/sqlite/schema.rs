//! SQLite schema definitions for tenant instances and the control plane.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use crate::core::BASELINE_SCHEMA_VERSION;
use crate::error::{TenancyError, TenancyResult};
use crate::tenant::TenantId;

/// Current control-plane schema version.
pub const CONTROL_PLANE_SCHEMA_VERSION: u32 = 1;

/// Applies the baseline schema to a tenant instance and stamps its owner.
///
/// Runs in one immediate transaction, so concurrent callers serialize and a
/// failure leaves the instance untouched.
pub fn apply_baseline(
    conn: &mut Connection,
    instance: &str,
    owner: &TenantId,
) -> TenancyResult<u32> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| sql_error(instance, "Failed to begin schema transaction", e))?;

    let current_version = get_schema_version(&tx, instance)?;
    if current_version == 0 {
        create_baseline_v1(&tx, instance)?;
        set_schema_version(&tx, instance, BASELINE_SCHEMA_VERSION)?;
    }

    stamp_owner(&tx, instance, owner)?;

    tx.commit()
        .map_err(|e| sql_error(instance, "Failed to commit schema transaction", e))?;

    Ok(current_version.max(BASELINE_SCHEMA_VERSION))
}

/// Initialize the control-plane schema.
pub fn initialize_control_plane(conn: &Connection, instance: &str) -> TenancyResult<()> {
    let current_version = get_schema_version(conn, instance)?;

    if current_version == 0 {
        create_control_plane_v1(conn, instance)?;
        set_schema_version(conn, instance, CONTROL_PLANE_SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection, instance: &str) -> TenancyResult<u32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| sql_error(instance, "Failed to create schema_version table", e))?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| sql_error(instance, "Failed to read schema_version", e))?;

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, instance: &str, version: u32) -> TenancyResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| sql_error(instance, "Failed to clear schema_version", e))?;

    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| sql_error(instance, "Failed to set schema_version", e))?;

    Ok(())
}

fn create_baseline_v1(conn: &Connection, instance: &str) -> TenancyResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenant_owner (
            tenant_id TEXT NOT NULL PRIMARY KEY,
            stamped_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )
    .map_err(|e| sql_error(instance, "Failed to create baseline schema", e))
}

fn stamp_owner(conn: &Connection, instance: &str, owner: &TenantId) -> TenancyResult<()> {
    let existing: Option<String> = conn
        .query_row("SELECT tenant_id FROM tenant_owner LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| sql_error(instance, "Failed to read tenant_owner", e))?;

    match existing {
        Some(existing) if existing == owner.as_str() => Ok(()),
        Some(existing) => Err(TenancyError::InstanceOwnershipConflict {
            storage_instance: instance.to_string(),
            owner: TenantId::new(existing),
        }),
        None => {
            conn.execute(
                "INSERT INTO tenant_owner (tenant_id, stamped_at) VALUES (?1, ?2)",
                [owner.as_str(), Utc::now().to_rfc3339().as_str()],
            )
            .map_err(|e| sql_error(instance, "Failed to stamp tenant_owner", e))?;
            Ok(())
        }
    }
}

fn create_control_plane_v1(conn: &Connection, instance: &str) -> TenancyResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenants (
            id TEXT NOT NULL PRIMARY KEY,
            display_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            storage_instance_name TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL CHECK (status IN ('PROVISIONING', 'ACTIVE', 'FAILED', 'DEACTIVATED')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tenants_status ON tenants(status);

        CREATE TRIGGER IF NOT EXISTS tenants_storage_instance_immutable
        BEFORE UPDATE OF storage_instance_name ON tenants
        WHEN OLD.status IN ('ACTIVE', 'DEACTIVATED')
            AND NEW.storage_instance_name <> OLD.storage_instance_name
        BEGIN
            SELECT RAISE(ABORT, 'storage_instance_name is immutable once active');
        END;",
    )
    .map_err(|e| sql_error(instance, "Failed to create control-plane schema", e))
}

/// Maps a rusqlite error on `instance` to [`TenancyError::StorageUnavailable`].
pub(crate) fn sql_error(instance: &str, context: &str, e: rusqlite::Error) -> TenancyError {
    TenancyError::unavailable(instance, format!("{}: {}", context, e))
}
