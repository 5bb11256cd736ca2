//! Scenario and property tests for the batch and step state machines
//! and their audit contract.

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::audit::{self, AuditQuery};
use crate::batch::lifecycle::{self, CreateBatchRequest, RequestScope};
use crate::batch::steps::{self, SignStepRequest, UpdateStepRequest};
use crate::db::testutil::{self, TestContext};
use crate::error::AppError;
use crate::types::{BatchStatus, Role, StepStatus};

fn scope(ctx: &TestContext) -> RequestScope {
    RequestScope {
        tenant_id: ctx.tenant.id.clone(),
        performed_by: ctx.user.full_name.clone(),
        ip_address: Some("10.0.0.1".into()),
    }
}

/// Insert a recipe with `count` steps; step `sign_step` (1-based, 0 for
/// none) is flagged requires_signature.
async fn seed_recipe(pool: &SqlitePool, tenant_id: &str, count: i64, sign_step: i64) -> String {
    let recipe_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO recipes (id, tenant_id, name, product_name, version, created_by, created_at, updated_at)
         VALUES (?, ?, 'Granulation v2', 'Paracetamol 500mg', '2.0', 'QA Author', ?, ?)",
    )
    .bind(&recipe_id)
    .bind(tenant_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();
    for n in 1..=count {
        sqlx::query(
            "INSERT INTO recipe_steps (id, recipe_id, step_number, description, instructions, step_type, expected_value, unit, requires_signature)
             VALUES (?, ?, ?, ?, 'Follow SOP-042', 'measurement', 65.0, '°C', ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&recipe_id)
        .bind(n)
        .bind(format!("Step {n}: charge vessel"))
        .bind(n == sign_step)
        .execute(pool)
        .await
        .unwrap();
    }
    recipe_id
}

async fn audit_actions(pool: &SqlitePool, tenant_id: &str, batch_id: &str) -> Vec<String> {
    // Oldest first, to compare against the documented emission order.
    sqlx::query_scalar(
        "SELECT action FROM audit_logs WHERE tenant_id = ? AND batch_id = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(tenant_id)
    .bind(batch_id)
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn happy_path_scenario_b100() {
    let pool = testutil::pool().await;
    let ctx = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
    let scope = scope(&ctx);
    let recipe_id = seed_recipe(&pool, &ctx.tenant.id, 3, 0).await;

    let batch = lifecycle::create_batch(
        &pool,
        &scope,
        CreateBatchRequest {
            batch_number: "B-100".into(),
            product_name: "Paracetamol 500mg".into(),
            batch_size: 500.0,
            recipe_id: Some(recipe_id),
        },
    )
    .await
    .unwrap();
    assert_eq!(batch.status, BatchStatus::Draft);
    assert!(batch.started_at.is_none());

    // Recipe round-trip: 3 steps, numbered 1..=3, fields copied.
    let copied = steps::list_steps(&pool, &ctx.tenant.id, &batch.id).await.unwrap();
    assert_eq!(copied.len(), 3);
    for (i, step) in copied.iter().enumerate() {
        assert_eq!(step.step_number, i as i64 + 1);
        assert_eq!(step.description, format!("Step {}: charge vessel", i + 1));
        assert_eq!(step.expected_value, Some(65.0));
        assert_eq!(step.unit.as_deref(), Some("°C"));
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.actual_value.is_none());
        assert!(step.signature_data.is_none());
    }

    let started = lifecycle::start_batch(&pool, &scope, &batch.id).await.unwrap();
    assert_eq!(started.status, BatchStatus::Active);
    assert!(started.started_at.is_some());

    let step1 = steps::update_step(
        &pool,
        &scope,
        &batch.id,
        &copied[0].id,
        UpdateStepRequest {
            status: StepStatus::Completed,
            notes: None,
            actual_value: Some(10.0),
        },
    )
    .await
    .unwrap();
    assert_eq!(step1.status, StepStatus::Completed);
    assert_eq!(step1.actual_value, Some(10.0));
    assert!(step1.completed_at.is_some());

    let completed = lifecycle::complete_batch(&pool, &scope, &batch.id).await.unwrap();
    assert_eq!(completed.status, BatchStatus::Completed);
    assert!(completed.completed_at.is_some());

    assert_eq!(
        audit_actions(&pool, &ctx.tenant.id, &batch.id).await,
        vec![
            "batch.created",
            "batch.started",
            "batch.step.completed",
            "batch.completed"
        ]
    );

    let view = lifecycle::get_batch(&pool, &ctx.tenant.id, &batch.id).await.unwrap();
    assert_eq!(view.total_steps, 3);
    assert_eq!(view.completed_steps, 1);
}

#[tokio::test]
async fn illegal_batch_transitions_leave_state_unchanged() {
    let pool = testutil::pool().await;
    let ctx = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
    let scope = scope(&ctx);

    let batch = lifecycle::create_batch(
        &pool,
        &scope,
        CreateBatchRequest {
            batch_number: "B-101".into(),
            product_name: "Ibuprofen 200mg".into(),
            batch_size: 250.0,
            recipe_id: None,
        },
    )
    .await
    .unwrap();

    // Complete from draft: not a legal edge.
    assert!(matches!(
        lifecycle::complete_batch(&pool, &scope, &batch.id).await,
        Err(AppError::NotFound(_))
    ));
    let unchanged = lifecycle::get_batch(&pool, &ctx.tenant.id, &batch.id).await.unwrap();
    assert_eq!(unchanged.batch.status, BatchStatus::Draft);

    // Start twice: second racer observes zero rows.
    lifecycle::start_batch(&pool, &scope, &batch.id).await.unwrap();
    assert!(matches!(
        lifecycle::start_batch(&pool, &scope, &batch.id).await,
        Err(AppError::NotFound(_))
    ));

    // Cancelled is terminal.
    lifecycle::cancel_batch(&pool, &scope, &batch.id, Some("spill".into())).await.unwrap();
    assert!(matches!(
        lifecycle::cancel_batch(&pool, &scope, &batch.id, None).await,
        Err(AppError::NotFound(_))
    ));

    // Failed transitions emitted no audit rows beyond the accepted ones.
    assert_eq!(
        audit_actions(&pool, &ctx.tenant.id, &batch.id).await,
        vec!["batch.created", "batch.started", "batch.cancelled"]
    );
}

#[tokio::test]
async fn cancel_without_reason_defaults_the_audit_detail() {
    let pool = testutil::pool().await;
    let ctx = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
    let scope = scope(&ctx);

    let batch = lifecycle::create_batch(
        &pool,
        &scope,
        CreateBatchRequest {
            batch_number: "B-102".into(),
            product_name: "Placebo".into(),
            batch_size: 10.0,
            recipe_id: None,
        },
    )
    .await
    .unwrap();
    lifecycle::cancel_batch(&pool, &scope, &batch.id, None).await.unwrap();

    let details: String = sqlx::query_scalar(
        "SELECT details FROM audit_logs WHERE batch_id = ? AND action = 'batch.cancelled'",
    )
    .bind(&batch.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    let details: serde_json::Value = serde_json::from_str(&details).unwrap();
    assert_eq!(details["reason"], json!("No reason provided"));
}

#[tokio::test]
async fn duplicate_batch_number_conflicts_within_tenant_only() {
    let pool = testutil::pool().await;
    let acme = testutil::seed_tenant(&pool, "acme", Role::Operator).await;
    let globex = testutil::seed_tenant(&pool, "globex", Role::Operator).await;

    let request = CreateBatchRequest {
        batch_number: "B-200".into(),
        product_name: "Aspirin 100mg".into(),
        batch_size: 100.0,
        recipe_id: None,
    };
    lifecycle::create_batch(&pool, &scope(&acme), request.clone()).await.unwrap();

    assert!(matches!(
        lifecycle::create_batch(&pool, &scope(&acme), request.clone()).await,
        Err(AppError::Conflict(_))
    ));
    // Same number under another tenant is fine.
    lifecycle::create_batch(&pool, &scope(&globex), request).await.unwrap();
}

#[tokio::test]
async fn cross_tenant_ids_read_as_absent() {
    let pool = testutil::pool().await;
    let acme = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
    let globex = testutil::seed_tenant(&pool, "globex", Role::BatchManager).await;

    let batch = lifecycle::create_batch(
        &pool,
        &scope(&acme),
        CreateBatchRequest {
            batch_number: "B-300".into(),
            product_name: "Amoxicillin".into(),
            batch_size: 50.0,
            recipe_id: None,
        },
    )
    .await
    .unwrap();

    // Tenant B sees NotFound, never data, for tenant A's batch.
    assert!(matches!(
        lifecycle::get_batch(&pool, &globex.tenant.id, &batch.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        lifecycle::start_batch(&pool, &scope(&globex), &batch.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(steps::list_steps(&pool, &globex.tenant.id, &batch.id)
        .await
        .unwrap()
        .is_empty());

    // Cross-tenant recipe reference fails validation.
    let foreign_recipe = seed_recipe(&pool, &acme.tenant.id, 1, 0).await;
    assert!(matches!(
        lifecycle::create_batch(
            &pool,
            &scope(&globex),
            CreateBatchRequest {
                batch_number: "B-301".into(),
                product_name: "Amoxicillin".into(),
                batch_size: 50.0,
                recipe_id: Some(foreign_recipe),
            },
        )
        .await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn step_timestamps_are_ordered() {
    let pool = testutil::pool().await;
    let ctx = testutil::seed_tenant(&pool, "acme", Role::Operator).await;
    let scope = scope(&ctx);
    let recipe_id = seed_recipe(&pool, &ctx.tenant.id, 1, 0).await;

    let batch = lifecycle::create_batch(
        &pool,
        &scope,
        CreateBatchRequest {
            batch_number: "B-400".into(),
            product_name: "Paracetamol".into(),
            batch_size: 500.0,
            recipe_id: Some(recipe_id),
        },
    )
    .await
    .unwrap();
    let step_id = steps::list_steps(&pool, &ctx.tenant.id, &batch.id).await.unwrap()[0]
        .id
        .clone();

    let in_progress = steps::update_step(
        &pool,
        &scope,
        &batch.id,
        &step_id,
        UpdateStepRequest {
            status: StepStatus::InProgress,
            notes: Some("weighing".into()),
            actual_value: None,
        },
    )
    .await
    .unwrap();
    let started_at = in_progress.started_at.unwrap();

    let done = steps::update_step(
        &pool,
        &scope,
        &batch.id,
        &step_id,
        UpdateStepRequest {
            status: StepStatus::Completed,
            notes: None,
            actual_value: Some(64.8),
        },
    )
    .await
    .unwrap();
    assert!(done.completed_at.unwrap() >= started_at);
    // Merge semantics: notes survived the second update.
    assert_eq!(done.notes.as_deref(), Some("weighing"));
    assert_eq!(done.actual_value, Some(64.8));
}

#[tokio::test]
async fn signature_required_steps_reject_plain_completion() {
    let pool = testutil::pool().await;
    let ctx = testutil::seed_tenant(&pool, "acme", Role::Operator).await;
    let scope = scope(&ctx);
    let recipe_id = seed_recipe(&pool, &ctx.tenant.id, 2, 2).await;

    let batch = lifecycle::create_batch(
        &pool,
        &scope,
        CreateBatchRequest {
            batch_number: "B-500".into(),
            product_name: "Morphine 10mg".into(),
            batch_size: 20.0,
            recipe_id: Some(recipe_id),
        },
    )
    .await
    .unwrap();
    let listed = steps::list_steps(&pool, &ctx.tenant.id, &batch.id).await.unwrap();
    let signed_step = &listed[1];
    assert!(signed_step.requires_signature);

    let err = steps::update_step(
        &pool,
        &scope,
        &batch.id,
        &signed_step.id,
        UpdateStepRequest {
            status: StepStatus::Completed,
            notes: None,
            actual_value: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // Signing the same step succeeds and stamps both timestamps.
    let signed = steps::sign_step(
        &pool,
        &scope,
        &batch.id,
        &signed_step.id,
        SignStepRequest {
            signature_data: "data:image/png;base64,iVBORw0KGgo=".into(),
            notes: None,
            actual_value: Some(65.2),
        },
    )
    .await
    .unwrap();
    assert_eq!(signed.status, StepStatus::Completed);
    assert!(signed.signature_data.is_some());
    assert!(signed.started_at.is_some());
    assert!(signed.completed_at.unwrap() >= signed.started_at.unwrap());

    // Terminal: a second signature is rejected.
    assert!(matches!(
        steps::sign_step(
            &pool,
            &scope,
            &batch.id,
            &signed_step.id,
            SignStepRequest {
                signature_data: "data:image/png;base64,again".into(),
                notes: None,
                actual_value: None,
            },
        )
        .await,
        Err(AppError::InvalidState(_))
    ));

    assert_eq!(
        audit_actions(&pool, &ctx.tenant.id, &batch.id).await,
        vec!["batch.created", "batch.step.signed"]
    );
}

#[tokio::test]
async fn each_accepted_mutation_adds_exactly_one_audit_row() {
    let pool = testutil::pool().await;
    let ctx = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
    let scope = scope(&ctx);

    async fn tenant_rows(pool: &SqlitePool, tenant_id: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    let before = tenant_rows(&pool, &ctx.tenant.id).await;
    let batch = lifecycle::create_batch(
        &pool,
        &scope,
        CreateBatchRequest {
            batch_number: "B-600".into(),
            product_name: "Caffeine 50mg".into(),
            batch_size: 75.0,
            recipe_id: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(tenant_rows(&pool, &ctx.tenant.id).await, before + 1);

    lifecycle::start_batch(&pool, &scope, &batch.id).await.unwrap();
    assert_eq!(tenant_rows(&pool, &ctx.tenant.id).await, before + 2);

    // A rejected transition adds nothing.
    let _ = lifecycle::start_batch(&pool, &scope, &batch.id).await;
    assert_eq!(tenant_rows(&pool, &ctx.tenant.id).await, before + 2);
}

#[tokio::test]
async fn batch_audit_query_is_batch_scoped() {
    let pool = testutil::pool().await;
    let ctx = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
    let scope = scope(&ctx);

    let first = lifecycle::create_batch(
        &pool,
        &scope,
        CreateBatchRequest {
            batch_number: "B-700".into(),
            product_name: "Zinc".into(),
            batch_size: 10.0,
            recipe_id: None,
        },
    )
    .await
    .unwrap();
    let second = lifecycle::create_batch(
        &pool,
        &scope,
        CreateBatchRequest {
            batch_number: "B-701".into(),
            product_name: "Zinc".into(),
            batch_size: 10.0,
            recipe_id: None,
        },
    )
    .await
    .unwrap();
    lifecycle::start_batch(&pool, &scope, &second.id).await.unwrap();

    let events = audit::list_events(
        &pool,
        &ctx.tenant.id,
        &AuditQuery {
            batch_id: Some(first.id.clone()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entry.action, "batch.created");
    assert_eq!(events[0].batch_number.as_deref(), Some("B-700"));
}
