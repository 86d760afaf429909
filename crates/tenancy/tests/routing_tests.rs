//! Routing facade integration tests.
//!
//! These tests drive `TenantRouter` end to end against SQLite files in a
//! temporary data directory.

#![cfg(feature = "sqlite")]

mod common;

use std::time::Duration;

use helios_tenancy::tenant::context;
use helios_tenancy::{TenancyConfig, TenancyError, TenantDirectory, TenantId, TenantRecord, TenantStatus};

use common::*;

fn insert_data(session_conn: &rusqlite::Connection, value: &str) -> Result<(), TenancyError> {
    session_conn
        .execute("INSERT INTO user_data (data) VALUES (?1)", [value])
        .map(|_| ())
        .map_err(TenancyError::operation)
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test]
async fn test_create_tenant_end_to_end() {
    let harness = create_router();
    let router = &harness.router;

    let acme = router.create_tenant("Acme Corp").await.unwrap();
    assert_eq!(acme.storage_instance_name, "tenant_acme_corp");
    assert_eq!(acme.status, TenantStatus::Active);
    assert!(harness.instance_file_exists("tenant_acme_corp"));

    let globex = router.create_tenant("Globex").await.unwrap();

    router
        .with_tenant(&acme.id, |session| async move {
            let conn = session.connection().await?;
            insert_data(&conn, "acme-row")
        })
        .await
        .unwrap();

    assert_eq!(harness.user_data("tenant_acme_corp"), vec!["acme-row"]);
    assert!(harness.user_data(&globex.storage_instance_name).is_empty());
}

#[tokio::test]
async fn test_session_exposes_tenant_and_instance() {
    let harness = create_router();
    let acme = harness.router.create_tenant("Acme").await.unwrap();

    let (tenant_id, instance) = harness
        .router
        .with_tenant(&acme.id, |session| async move {
            assert_eq!(session.context().tenant_id(), session.tenant_id());
            assert_eq!(session.pool().storage_instance(), session.storage_instance());
            Ok((session.tenant_id().clone(), session.storage_instance().to_string()))
        })
        .await
        .unwrap();

    assert_eq!(tenant_id, acme.id);
    assert_eq!(instance, "tenant_acme");
}

#[tokio::test]
async fn test_resolved_pool_is_cached() {
    let harness = create_router();
    let acme = harness.router.create_tenant("Acme").await.unwrap();
    assert_eq!(harness.engine().connect_calls(), 1);

    for _ in 0..5 {
        harness
            .router
            .with_tenant(&acme.id, |_session| async { Ok(()) })
            .await
            .unwrap();
    }

    assert_eq!(harness.engine().connect_calls(), 1);
    assert_eq!(harness.router.registry().pools_created(), 1);
}

// ============================================================================
// Inbound boundary
// ============================================================================

#[tokio::test]
async fn test_missing_tenant_header() {
    assert!(matches!(
        TenantId::from_header(None),
        Err(TenancyError::MissingTenantId)
    ));
    assert!(matches!(
        TenantId::from_header(Some("   ")),
        Err(TenancyError::MissingTenantId)
    ));
}

#[tokio::test]
async fn test_unknown_tenant_is_not_cached() {
    let harness = create_router();
    let result = harness
        .router
        .with_tenant(&TenantId::new("nobody"), |_session| async { Ok(()) })
        .await;

    assert!(matches!(result, Err(TenancyError::UnknownTenant { .. })));
    assert!(harness.router.registry().is_empty());
    assert_eq!(harness.engine().create_calls(), 0);
}

#[tokio::test]
async fn test_operation_error_is_propagated() {
    let harness = create_router();
    let acme = harness.router.create_tenant("Acme").await.unwrap();

    let result: Result<(), _> = harness
        .router
        .with_tenant(&acme.id, |session| async move {
            let conn = session.connection().await?;
            conn.execute("INSERT INTO missing_table VALUES (1)", [])
                .map(|_| ())
                .map_err(TenancyError::operation)
        })
        .await;

    assert!(matches!(result, Err(TenancyError::Operation { .. })));
    // The pool stays usable after an operation error.
    assert!(harness.router.registry().get(&acme.id).is_some());
}

// ============================================================================
// Context lifecycle
// ============================================================================

#[tokio::test]
async fn test_context_cleared_after_success_and_error() {
    let harness = create_router();
    let acme = harness.router.create_tenant("Acme").await.unwrap();

    let inside = harness
        .router
        .with_tenant(&acme.id, |_session| async { Ok(context::current()) })
        .await
        .unwrap();
    assert_eq!(inside, Some(acme.id.clone()));
    assert_eq!(context::current(), None);

    let _ = harness
        .router
        .with_tenant(&acme.id, |_session| async {
            Err::<(), _>(TenancyError::Configuration {
                message: "boom".to_string(),
            })
        })
        .await;
    assert_eq!(context::current(), None);
}

#[tokio::test]
async fn test_context_cleared_after_cancellation() {
    let harness = create_router();
    let acme = harness.router.create_tenant("Acme").await.unwrap();

    let slow = harness.router.with_tenant(&acme.id, |_session| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    });
    let result = tokio::time::timeout(Duration::from_millis(50), slow).await;
    assert!(result.is_err());
    assert_eq!(context::current(), None);

    // A later unit of work on the same task sees only its own tenant.
    let globex = harness.router.create_tenant("Globex").await.unwrap();
    let seen = harness
        .router
        .with_tenant(&globex.id, |_session| async { Ok(context::current()) })
        .await
        .unwrap();
    assert_eq!(seen, Some(globex.id));
}

#[tokio::test]
async fn test_context_cleared_after_panic() {
    let harness = create_router();
    let acme = harness.router.create_tenant("Acme").await.unwrap();

    let router = harness.router.clone();
    let tenant_id = acme.id.clone();
    let handle = tokio::spawn(async move {
        router
            .with_tenant(&tenant_id, |_session| async {
                if context::is_set() {
                    panic!("operation panicked");
                }
                Ok(())
            })
            .await
    });

    let join = handle.await;
    assert!(join.is_err_and(|e| e.is_panic()));
    assert_eq!(context::current(), None);

    // The registry is still usable after the panic.
    harness
        .router
        .with_tenant(&acme.id, |_session| async { Ok(()) })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_spawned_task_does_not_inherit_context() {
    let harness = create_router();
    let acme = harness.router.create_tenant("Acme").await.unwrap();

    let child = harness
        .router
        .with_tenant(&acme.id, |_session| async {
            let handle = tokio::spawn(async { context::current() });
            handle.await.map_err(TenancyError::operation)
        })
        .await
        .unwrap();

    assert_eq!(child, None);
}

#[tokio::test]
async fn test_with_current_tenant_routes_open_context() {
    let harness = create_router();
    let acme = harness.router.create_tenant("Acme").await.unwrap();

    let instance = context::unit_of_work(async {
        context::set_current(acme.id.clone()).unwrap();
        harness
            .router
            .with_current_tenant(|session| async move {
                Ok(session.storage_instance().to_string())
            })
            .await
    })
    .await
    .unwrap();
    assert_eq!(instance, "tenant_acme");

    let result = harness
        .router
        .with_current_tenant(|_session| async { Ok(()) })
        .await;
    assert!(matches!(result, Err(TenancyError::ContextMisuse { .. })));
}

// ============================================================================
// Transparent provisioning
// ============================================================================

#[tokio::test]
async fn test_with_tenant_completes_pending_record() {
    let harness = create_router();

    // A record inserted by another process that never finished provisioning.
    let record = TenantRecord::provisioning("Initech", "tenant_initech");
    harness.router.directory().insert(&record).await.unwrap();
    assert!(!harness.instance_file_exists("tenant_initech"));

    harness
        .router
        .with_tenant(&record.id, |session| async move {
            let conn = session.connection().await?;
            insert_data(&conn, "initech-row")
        })
        .await
        .unwrap();

    let stored = harness.router.find_tenant(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TenantStatus::Active);
    assert_eq!(harness.user_data("tenant_initech"), vec!["initech-row"]);
}

#[tokio::test]
async fn test_deactivated_tenant_is_not_routable() {
    let harness = create_router();
    let acme = harness.router.create_tenant("Acme").await.unwrap();

    let deactivated = harness.router.deactivate_tenant(&acme.id).await.unwrap();
    assert_eq!(deactivated.status, TenantStatus::Deactivated);
    assert!(!harness.router.registry().contains(&acme.id));

    let result = harness
        .router
        .with_tenant(&acme.id, |_session| async { Ok(()) })
        .await;
    assert!(matches!(result, Err(TenancyError::TenantDeactivated { .. })));
    assert!(result.unwrap_err().is_terminal());
}

#[tokio::test]
async fn test_idle_pools_are_evicted() {
    let harness = create_router_with(
        TenancyConfig::default().with_idle_timeout(Duration::from_secs(3600)),
    );
    let acme = harness.router.create_tenant("Acme").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert!(harness.router.evict_idle_pools().await.is_empty());
    assert_eq!(
        harness.router.evict_idle_for(Duration::ZERO).await,
        vec![acme.id.clone()]
    );

    // The next unit of work rebuilds the pool.
    harness
        .router
        .with_tenant(&acme.id, |_session| async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(harness.router.registry().pools_created(), 2);
}

#[tokio::test]
async fn test_pool_limit_evicts_least_recently_used() {
    let harness = create_router_with(TenancyConfig::default().with_max_pools(2));
    let a = harness.router.create_tenant("Alpha").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = harness.router.create_tenant("Beta").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let c = harness.router.create_tenant("Gamma").await.unwrap();

    let cached = harness.router.registry().tenants();
    assert_eq!(cached.len(), 2);
    assert!(!cached.contains(&a.id));
    assert!(cached.contains(&b.id));
    assert!(cached.contains(&c.id));
}
