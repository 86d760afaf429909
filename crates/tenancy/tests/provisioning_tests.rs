//! Provisioning state machine integration tests.
//!
//! Failures are injected through `FaultyEngine` to exercise every step after
//! the directory insert, the FAILED state and idempotent retry.

#![cfg(feature = "sqlite")]

mod common;

use std::time::Duration;

use helios_tenancy::{
    ProvisioningStep, StorageEngine, TenancyConfig, TenancyError, TenantDirectory, TenantId,
    TenantRecord, TenantStatus,
};

use common::*;

async fn status_of(harness: &TestRouter, tenant_id: &TenantId) -> TenantStatus {
    harness
        .router
        .find_tenant(tenant_id)
        .await
        .unwrap()
        .expect("tenant record should exist")
        .status
}

async fn only_tenant(harness: &TestRouter) -> TenantRecord {
    let mut tenants = harness.router.list_tenants().await.unwrap();
    assert_eq!(tenants.len(), 1);
    tenants.remove(0)
}

// ============================================================================
// Failure at each step
// ============================================================================

#[tokio::test]
async fn test_create_instance_failure_leaves_failed_record() {
    let harness = create_router();
    harness.engine().fail(Fault::CreateInstance, 1);

    let err = harness.router.create_tenant("Acme").await.unwrap_err();
    assert_eq!(err.failed_step(), Some(ProvisioningStep::CreateInstance));
    assert!(err.is_retryable());

    let record = only_tenant(&harness).await;
    assert_eq!(record.status, TenantStatus::Failed);
    assert!(!harness.instance_file_exists("tenant_acme"));
    assert!(harness.router.registry().is_empty());
}

#[tokio::test]
async fn test_schema_failure_then_retry_does_not_recreate_instance() {
    let harness = create_router();
    harness.engine().fail(Fault::ApplySchema, 1);

    let err = harness.router.create_tenant("Acme").await.unwrap_err();
    assert!(matches!(
        err,
        TenancyError::ProvisioningFailed {
            step: ProvisioningStep::ApplySchema,
            ..
        }
    ));

    let record = only_tenant(&harness).await;
    assert_eq!(record.status, TenantStatus::Failed);
    assert!(harness.instance_file_exists("tenant_acme"));
    assert_eq!(harness.engine().create_calls(), 1);

    let retried = harness.router.retry_provisioning(&record.id).await.unwrap();
    assert_eq!(retried.status, TenantStatus::Active);
    assert_eq!(retried.storage_instance_name, "tenant_acme");
    assert_eq!(harness.engine().create_calls(), 1);
    assert_eq!(harness.engine().schema_calls(), 2);
    assert!(harness.router.registry().contains(&record.id));
}

#[tokio::test]
async fn test_pool_failure_is_register_pool_step() {
    let harness = create_router();
    harness.engine().fail(Fault::Connect, 1);

    let err = harness.router.create_tenant("Acme").await.unwrap_err();
    assert_eq!(err.failed_step(), Some(ProvisioningStep::RegisterPool));

    let record = only_tenant(&harness).await;
    assert_eq!(record.status, TenantStatus::Failed);
    assert!(harness.router.registry().is_empty());

    let retried = harness.router.retry_provisioning(&record.id).await.unwrap();
    assert_eq!(retried.status, TenantStatus::Active);
}

#[tokio::test]
async fn test_failure_source_is_preserved() {
    let harness = create_router();
    harness.engine().fail(Fault::ApplySchema, 1);

    let err = harness.router.create_tenant("Acme").await.unwrap_err();
    let source = std::error::Error::source(&err).expect("provisioning error has a source");
    assert!(source.to_string().contains("injected"));
}

#[tokio::test]
async fn test_cancelled_create_still_finishes_instance() {
    let harness = create_router();
    harness.engine().delay_create(Duration::from_millis(400));

    let result = tokio::time::timeout(
        Duration::from_millis(100),
        harness.router.create_tenant("Acme"),
    )
    .await;
    assert!(result.is_err());

    let record = only_tenant(&harness).await;
    assert_eq!(record.status, TenantStatus::Provisioning);

    // Instance creation and schema keep running after the caller is gone.
    let mut waited = Duration::ZERO;
    while !harness.instance_file_exists("tenant_acme") || harness.engine().schema_calls() == 0 {
        assert!(waited < Duration::from_secs(5), "instance was never created");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert_eq!(status_of(&harness, &record.id).await, TenantStatus::Provisioning);
    assert!(harness.router.registry().is_empty());

    let outcomes = harness.router.reconcile().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_active());
    assert_eq!(harness.engine().create_calls(), 1);
    assert_eq!(status_of(&harness, &record.id).await, TenantStatus::Active);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_retry_is_safe_to_repeat() {
    let harness = create_router();
    let acme = harness.router.create_tenant("Acme").await.unwrap();

    for _ in 0..3 {
        let record = harness.router.retry_provisioning(&acme.id).await.unwrap();
        assert_eq!(record.status, TenantStatus::Active);
    }
    assert_eq!(harness.engine().create_calls(), 1);
    assert_eq!(harness.router.registry().pools_created(), 1);
}

#[tokio::test]
async fn test_retry_unknown_and_deactivated() {
    let harness = create_router();

    let err = harness
        .router
        .retry_provisioning(&TenantId::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::UnknownTenant { .. }));

    let acme = harness.router.create_tenant("Acme").await.unwrap();
    harness.router.deactivate_tenant(&acme.id).await.unwrap();
    let err = harness
        .router
        .retry_provisioning(&acme.id)
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::TenantDeactivated { .. }));
}

#[tokio::test]
async fn test_failed_tenant_can_be_deactivated() {
    let harness = create_router();
    harness.engine().fail(Fault::CreateInstance, 1);
    let _ = harness.router.create_tenant("Acme").await;

    let record = only_tenant(&harness).await;
    let deactivated = harness.router.deactivate_tenant(&record.id).await.unwrap();
    assert_eq!(deactivated.status, TenantStatus::Deactivated);

    // Deactivation is terminal.
    let err = harness
        .router
        .directory()
        .update_status(&record.id, TenantStatus::Active)
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::InvalidStatusTransition { .. }));
}

// ============================================================================
// Naming and conflicts
// ============================================================================

#[tokio::test]
async fn test_duplicate_create_is_name_conflict() {
    let harness = create_router();
    harness.router.create_tenant("Acme").await.unwrap();

    let err = harness.router.create_tenant("Acme").await.unwrap_err();
    assert!(matches!(err, TenancyError::NameConflict { .. }));
    assert!(err.is_terminal());
    assert_eq!(harness.engine().create_calls(), 1);
    assert_eq!(harness.router.list_tenants().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_names_normalizing_to_same_instance_conflict() {
    let harness = create_router();
    let first = harness.router.create_tenant("Acme Corp").await.unwrap();
    assert_eq!(first.storage_instance_name, "tenant_acme_corp");

    let err = harness.router.create_tenant("acme-corp").await.unwrap_err();
    assert!(matches!(
        err,
        TenancyError::NameConflict { ref storage_instance, .. } if storage_instance == "tenant_acme_corp"
    ));
}

#[tokio::test]
async fn test_invalid_names_rejected_before_insert() {
    let harness = create_router();
    let too_long = "x".repeat(80);

    for name in ["", "   ", "!!!", too_long.as_str()] {
        let err = harness.router.create_tenant(name).await.unwrap_err();
        assert!(
            matches!(err, TenancyError::InvalidTenantName { .. }),
            "expected InvalidTenantName for {:?}, got {:?}",
            name,
            err
        );
    }
    assert!(harness.router.list_tenants().await.unwrap().is_empty());
    assert_eq!(harness.engine().create_calls(), 0);
}

#[tokio::test]
async fn test_control_plane_instance_is_not_a_tenant() {
    let harness = create_router_with(TenancyConfig::default().with_storage_prefix(""));

    let err = harness
        .router
        .create_tenant("Helios Control")
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::InvalidTenantName { .. }));
    assert!(!err.is_retryable());
    assert!(harness.router.list_tenants().await.unwrap().is_empty());
    assert_eq!(harness.engine().create_calls(), 0);

    let acme = harness.router.create_tenant("Acme").await.unwrap();
    assert_eq!(acme.storage_instance_name, "acme");
}

#[tokio::test]
async fn test_instance_owned_by_other_tenant_is_refused() {
    let harness = create_router();

    // A leftover instance stamped by some other tenant.
    let engine = harness.engine().inner();
    engine.create_instance("tenant_acme").await.unwrap();
    engine
        .apply_baseline_schema("tenant_acme", &TenantId::new("someone-else"))
        .await
        .unwrap();

    let err = harness.router.create_tenant("Acme").await.unwrap_err();
    match err {
        TenancyError::ProvisioningFailed { step, source, .. } => {
            assert_eq!(step, ProvisioningStep::ApplySchema);
            assert!(matches!(
                *source,
                TenancyError::InstanceOwnershipConflict { .. }
            ));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let record = only_tenant(&harness).await;
    assert_eq!(status_of(&harness, &record.id).await, TenantStatus::Failed);
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_reconcile_reports_per_tenant_outcomes() {
    let harness = create_router();

    harness.engine().fail(Fault::ApplySchema, 2);
    let _ = harness.router.create_tenant("Alpha").await;
    let _ = harness.router.create_tenant("Beta").await;

    // A record whose creator crashed right after the insert.
    let pending = TenantRecord::provisioning("Gamma", "tenant_gamma");
    harness.router.directory().insert(&pending).await.unwrap();

    // One of the three re-drives fails again.
    harness.engine().fail(Fault::ApplySchema, 1);
    let outcomes = harness.router.reconcile().await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes.iter().filter(|o| o.is_active()).count(), 2);

    let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_active()).collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        failed[0].result,
        Err(TenancyError::ProvisioningFailed { .. })
    ));
    assert_eq!(
        status_of(&harness, &failed[0].tenant_id).await,
        TenantStatus::Failed
    );

    // A second pass finishes the rest.
    let outcomes = harness.router.reconcile().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_active());
    assert!(harness.router.reconcile().await.unwrap().is_empty());
}
