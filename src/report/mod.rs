//! Batch record report generation.
//!
//! A report is only available for a completed batch: the document is a
//! point-in-time rendering of the full record (batch header, every step
//! with its recorded values and signature state, and the audit trail
//! oldest-first). Each generation writes a new file and a new
//! `pdf_reports` row; prior reports are never overwritten.

pub mod pdf;

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::audit::{self, actions, AuditEvent};
use crate::batch::lifecycle::RequestScope;
use crate::error::AppError;
use crate::types::{Batch, BatchStatus, BatchStep, EntityRef, PdfReport, StepStatus};

use pdf::Line;

/// Generate the batch record document for a completed batch, persist it
/// under `storage_dir`, and record the generation.
pub async fn generate_report(
    pool: &SqlitePool,
    scope: &RequestScope,
    storage_dir: &Path,
    batch_id: &str,
) -> Result<PdfReport, AppError> {
    let batch: Batch = sqlx::query_as("SELECT * FROM batches WHERE id = ? AND tenant_id = ?")
        .bind(batch_id)
        .bind(&scope.tenant_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Batch not found".into()))?;
    if batch.status != BatchStatus::Completed {
        return Err(AppError::InvalidState(
            "Reports can only be generated for completed batches".into(),
        ));
    }

    let steps: Vec<BatchStep> = sqlx::query_as(
        "SELECT * FROM batch_steps WHERE batch_id = ? AND tenant_id = ? ORDER BY step_number",
    )
    .bind(batch_id)
    .bind(&scope.tenant_id)
    .fetch_all(pool)
    .await?;
    let trail = audit::batch_trail(pool, &scope.tenant_id, batch_id).await?;

    let document = pdf::render(&compose(&batch, &steps, &trail));

    tokio::fs::create_dir_all(storage_dir)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    let file_name = format!("batch-record-{}-{}.pdf", batch.id, Utc::now().timestamp_millis());
    let file_path: PathBuf = storage_dir.join(&file_name);
    tokio::fs::write(&file_path, &document)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    let mut tx = pool.begin().await?;
    let report = PdfReport {
        id: Uuid::new_v4().to_string(),
        tenant_id: scope.tenant_id.clone(),
        batch_id: batch.id.clone(),
        file_path: file_path.to_string_lossy().into_owned(),
        generated_by: scope.performed_by.clone(),
        created_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO pdf_reports (id, tenant_id, batch_id, file_path, generated_by, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&report.id)
    .bind(&report.tenant_id)
    .bind(&report.batch_id)
    .bind(&report.file_path)
    .bind(&report.generated_by)
    .bind(report.created_at)
    .execute(&mut *tx)
    .await?;
    audit::log_event(
        &mut *tx,
        AuditEvent::new(&scope.tenant_id, actions::BATCH_REPORT_GENERATED)
            .entity(EntityRef::Batch(batch.id.clone()))
            .batch(&batch.id)
            .performed_by(&scope.performed_by)
            .ip(scope.ip_address.clone())
            .details(json!({
                "batch_number": batch.batch_number,
                "file": file_name,
            })),
    )
    .await?;
    tx.commit().await?;

    info!(batch = %batch.batch_number, path = %report.file_path, "report generated");
    Ok(report)
}

/// Most recent generated report for a batch, if any.
pub async fn latest_report(
    pool: &SqlitePool,
    tenant_id: &str,
    batch_id: &str,
) -> Result<Option<PdfReport>, AppError> {
    Ok(sqlx::query_as(
        "SELECT * FROM pdf_reports WHERE batch_id = ? AND tenant_id = ?
         ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(batch_id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?)
}

fn compose(
    batch: &Batch,
    steps: &[BatchStep],
    trail: &[crate::types::AuditLogEntry],
) -> Vec<Line> {
    let mut lines = vec![
        Line::Title(format!("Batch Record {}", batch.batch_number)),
        Line::Blank,
        Line::Text(format!("Product: {}", batch.product_name)),
        Line::Text(format!("Batch size: {}", batch.batch_size)),
        Line::Text(format!("Status: {}", batch.status.as_str())),
        Line::Text(format!("Created by: {} at {}", batch.created_by, stamp(Some(batch.created_at)))),
        Line::Text(format!("Started: {}", stamp(batch.started_at))),
        Line::Text(format!("Completed: {}", stamp(batch.completed_at))),
        Line::Blank,
        Line::Heading("Steps".into()),
    ];

    if steps.is_empty() {
        lines.push(Line::Text("No steps recorded.".into()));
    }
    for step in steps {
        lines.push(Line::Text(format!(
            "{}. {} ({}) [{}]",
            step.step_number,
            step.description,
            step.step_type.as_str(),
            step.status.as_str()
        )));
        if let (Some(expected), Some(actual)) = (step.expected_value, step.actual_value) {
            lines.push(Line::Text(format!(
                "    Expected {} {u}, recorded {} {u}",
                expected,
                actual,
                u = step.unit.as_deref().unwrap_or("")
            )));
        } else if let Some(actual) = step.actual_value {
            lines.push(Line::Text(format!(
                "    Recorded {} {}",
                actual,
                step.unit.as_deref().unwrap_or("")
            )));
        }
        if let Some(performed_by) = &step.performed_by {
            lines.push(Line::Text(format!(
                "    By {} at {}",
                performed_by,
                stamp(step.completed_at.or(step.started_at))
            )));
        }
        if step.status == StepStatus::Completed && step.requires_signature {
            let signed = if step.signature_data.is_some() {
                "electronically signed"
            } else {
                "SIGNATURE MISSING"
            };
            lines.push(Line::Text(format!("    Signature: {signed}")));
        }
        if let Some(notes) = &step.notes {
            lines.push(Line::Text(format!("    Notes: {notes}")));
        }
    }

    lines.push(Line::Blank);
    lines.push(Line::Heading("Audit Trail".into()));
    for event in trail {
        lines.push(Line::Text(format!(
            "{}  {}  {}",
            stamp(Some(event.created_at)),
            event.action,
            event.performed_by.as_deref().unwrap_or("-")
        )));
    }
    lines
}

fn stamp(at: Option<chrono::DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::lifecycle::{self, CreateBatchRequest};
    use crate::db::testutil;
    use crate::types::Role;

    fn scope(ctx: &testutil::TestContext) -> RequestScope {
        RequestScope {
            tenant_id: ctx.tenant.id.clone(),
            performed_by: ctx.user.full_name.clone(),
            ip_address: None,
        }
    }

    fn temp_storage() -> PathBuf {
        std::env::temp_dir().join(format!("ebr-reports-{}", Uuid::new_v4()))
    }

    async fn completed_batch(pool: &SqlitePool, scope: &RequestScope) -> Batch {
        let batch = lifecycle::create_batch(
            pool,
            scope,
            CreateBatchRequest {
                batch_number: "B-RPT-1".into(),
                product_name: "Paracetamol 500mg".into(),
                batch_size: 500.0,
                recipe_id: None,
            },
        )
        .await
        .unwrap();
        lifecycle::start_batch(pool, scope, &batch.id).await.unwrap();
        lifecycle::complete_batch(pool, scope, &batch.id).await.unwrap()
    }

    #[tokio::test]
    async fn rejects_batches_that_are_not_completed() {
        let pool = testutil::pool().await;
        let ctx = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
        let scope = scope(&ctx);
        let batch = lifecycle::create_batch(
            &pool,
            &scope,
            CreateBatchRequest {
                batch_number: "B-RPT-0".into(),
                product_name: "Placebo".into(),
                batch_size: 1.0,
                recipe_id: None,
            },
        )
        .await
        .unwrap();

        let err = generate_report(&pool, &scope, &temp_storage(), &batch.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        // A rejected generation records nothing.
        assert!(latest_report(&pool, &ctx.tenant.id, &batch.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn generates_a_pdf_and_records_it() {
        let pool = testutil::pool().await;
        let ctx = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
        let scope = scope(&ctx);
        let batch = completed_batch(&pool, &scope).await;
        let dir = temp_storage();

        let report = generate_report(&pool, &scope, &dir, &batch.id).await.unwrap();
        let bytes = tokio::fs::read(&report.file_path).await.unwrap();
        assert!(bytes.starts_with(b"%PDF-"));

        let latest = latest_report(&pool, &ctx.tenant.id, &batch.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, report.id);

        let generated_events: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_logs WHERE batch_id = ? AND action = ?",
        )
        .bind(&batch.id)
        .bind(actions::BATCH_REPORT_GENERATED)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(generated_events, 1);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn document_prints_the_trail_oldest_first() {
        let pool = testutil::pool().await;
        let ctx = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
        let scope = scope(&ctx);
        let batch = completed_batch(&pool, &scope).await;
        let dir = temp_storage();

        let report = generate_report(&pool, &scope, &dir, &batch.id).await.unwrap();
        let text = String::from_utf8(tokio::fs::read(&report.file_path).await.unwrap()).unwrap();
        let created = text.find("batch.created").unwrap();
        let completed = text.find("batch.completed").unwrap();
        assert!(created < completed);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn long_trails_print_in_full() {
        let pool = testutil::pool().await;
        let ctx = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
        let scope = scope(&ctx);
        let batch = completed_batch(&pool, &scope).await;
        let dir = temp_storage();

        // Well past the public endpoint's page cap of 200.
        let base = Utc::now();
        for i in 0..250 {
            sqlx::query(
                "INSERT INTO audit_logs (id, tenant_id, action, batch_id, performed_by, created_at)
                 VALUES (?, ?, 'batch.step.completed', ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&ctx.tenant.id)
            .bind(&batch.id)
            .bind(format!("Operator {i}"))
            .bind(base + chrono::Duration::seconds(i))
            .execute(&pool)
            .await
            .unwrap();
        }

        let report = generate_report(&pool, &scope, &dir, &batch.id).await.unwrap();
        let text = String::from_utf8(tokio::fs::read(&report.file_path).await.unwrap()).unwrap();
        // Every event is present, and the oldest still leads.
        assert!(text.contains("Operator 0"));
        assert!(text.contains("Operator 249"));
        assert!(text.find("batch.created").unwrap() < text.find("Operator 0").unwrap());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn reports_are_tenant_scoped() {
        let pool = testutil::pool().await;
        let acme = testutil::seed_tenant(&pool, "acme", Role::BatchManager).await;
        let globex = testutil::seed_tenant(&pool, "globex", Role::BatchManager).await;
        let batch = completed_batch(&pool, &scope(&acme)).await;

        assert!(matches!(
            generate_report(&pool, &scope(&globex), &temp_storage(), &batch.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
