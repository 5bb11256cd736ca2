//! Audit-log normalization backfill.
//!
//! One-time repair pass for databases that predate the dot-notation
//! action codes and the polymorphic entity reference:
//!
//! 1. renames legacy action strings to their dot-notation codes,
//! 2. backfills `entity_type`/`entity_id` on batch-scoped rows,
//! 3. inserts synthetic `recipe.created` / `user.created` /
//!    `batch.created` entries for records that predate audit logging,
//!    preserving the original creation timestamps.
//!
//! Every step is guarded by its own predicate, so the pass is
//! idempotent: a second run performs zero renames and zero inserts.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::AppError;

/// Legacy action string → dot-notation code.
pub const ACTION_RENAMES: &[(&str, &str)] = &[
    ("batch_created", "batch.created"),
    ("start", "batch.started"),
    ("complete", "batch.completed"),
    ("cancel", "batch.cancelled"),
    ("step_in_progress", "batch.step.started"),
    ("step_completed", "batch.step.completed"),
    ("step_skipped", "batch.step.skipped"),
    ("step_signed", "batch.step.signed"),
];

/// What a normalization run changed. All-zero on a repeat run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub actions_renamed: u64,
    pub entities_backfilled: u64,
    pub synthetic_recipes: u64,
    pub synthetic_users: u64,
    pub synthetic_batches: u64,
}

impl BackfillReport {
    pub fn is_noop(&self) -> bool {
        *self == BackfillReport::default()
    }
}

/// Run the full normalization pass in one transaction.
pub async fn normalize_audit_log(pool: &SqlitePool) -> Result<BackfillReport, AppError> {
    let mut tx = pool.begin().await?;
    let mut report = BackfillReport::default();

    for (old, new) in ACTION_RENAMES {
        let result = sqlx::query("UPDATE audit_logs SET action = ? WHERE action = ?")
            .bind(new)
            .bind(old)
            .execute(&mut *tx)
            .await?;
        report.actions_renamed += result.rows_affected();
    }

    let result = sqlx::query(
        "UPDATE audit_logs
            SET entity_type = 'batch', entity_id = batch_id
          WHERE batch_id IS NOT NULL AND entity_type IS NULL",
    )
    .execute(&mut *tx)
    .await?;
    report.entities_backfilled = result.rows_affected();

    // Synthetic recipe.created entries for recipes with no audit row.
    let recipes: Vec<(String, String, String, String, String, String, i64)> = sqlx::query_as(
        "SELECT r.id, r.tenant_id, r.name, r.product_name, r.version, r.created_by,
                (SELECT COUNT(*) FROM recipe_steps rs WHERE rs.recipe_id = r.id)
           FROM recipes r
          WHERE NOT EXISTS (
            SELECT 1 FROM audit_logs al
             WHERE al.entity_type = 'recipe' AND al.entity_id = r.id
          )",
    )
    .fetch_all(&mut *tx)
    .await?;
    for (id, tenant_id, name, product_name, version, created_by, step_count) in recipes {
        sqlx::query(
            "INSERT INTO audit_logs (id, tenant_id, action, entity_type, entity_id, performed_by, details, created_at)
             SELECT ?, ?, 'recipe.created', 'recipe', ?, ?, ?, r.created_at
               FROM recipes r WHERE r.id = ?",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&tenant_id)
        .bind(&id)
        .bind(&created_by)
        .bind(
            serde_json::json!({
                "name": name,
                "product_name": product_name,
                "version": version,
                "step_count": step_count,
                "note": "backfilled",
            })
            .to_string(),
        )
        .bind(&id)
        .execute(&mut *tx)
        .await?;
        report.synthetic_recipes += 1;
    }

    // Synthetic user.created entries for users with no audit row.
    let users: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT u.id, u.tenant_id, u.email, u.role
           FROM users u
          WHERE NOT EXISTS (
            SELECT 1 FROM audit_logs al
             WHERE al.entity_type = 'user' AND al.entity_id = u.id
          )",
    )
    .fetch_all(&mut *tx)
    .await?;
    for (id, tenant_id, email, role) in users {
        sqlx::query(
            "INSERT INTO audit_logs (id, tenant_id, action, entity_type, entity_id, performed_by, details, created_at)
             SELECT ?, ?, 'user.created', 'user', ?, 'System (seed)', ?, u.created_at
               FROM users u WHERE u.id = ?",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&tenant_id)
        .bind(&id)
        .bind(serde_json::json!({"email": email, "role": role, "note": "backfilled"}).to_string())
        .bind(&id)
        .execute(&mut *tx)
        .await?;
        report.synthetic_users += 1;
    }

    // Synthetic batch.created entries for batches with no creation row.
    let batches: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT b.id, b.tenant_id, b.batch_number, b.created_by
           FROM batches b
          WHERE NOT EXISTS (
            SELECT 1 FROM audit_logs al
             WHERE al.batch_id = b.id AND al.action = 'batch.created'
          )",
    )
    .fetch_all(&mut *tx)
    .await?;
    for (id, tenant_id, batch_number, created_by) in batches {
        sqlx::query(
            "INSERT INTO audit_logs (id, tenant_id, action, entity_type, entity_id, batch_id, performed_by, details, created_at)
             SELECT ?, ?, 'batch.created', 'batch', ?, ?, ?, ?, b.created_at
               FROM batches b WHERE b.id = ?",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&tenant_id)
        .bind(&id)
        .bind(&id)
        .bind(&created_by)
        .bind(serde_json::json!({"batch_number": batch_number, "note": "backfilled"}).to_string())
        .bind(&id)
        .execute(&mut *tx)
        .await?;
        report.synthetic_batches += 1;
    }

    tx.commit().await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil;
    use crate::types::Role;
    use chrono::Utc;

    async fn count_audit_rows(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn normalizes_legacy_rows_and_is_idempotent() {
        let pool = testutil::pool().await;
        let ctx = testutil::seed_tenant(&pool, "acme", Role::Admin).await;

        // A legacy batch with a legacy-style audit row and no
        // batch.created entry.
        let batch_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO batches (id, tenant_id, batch_number, product_name, batch_size, status, created_by, created_at, updated_at)
             VALUES (?, ?, 'B-OLD-1', 'Legacy Product', 100.0, 'active', 'Old Operator', ?, ?)",
        )
        .bind(&batch_id)
        .bind(&ctx.tenant.id)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO audit_logs (id, tenant_id, action, batch_id, performed_by, created_at)
             VALUES (?, ?, 'start', ?, 'Old Operator', ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&ctx.tenant.id)
        .bind(&batch_id)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        let first = normalize_audit_log(&pool).await.unwrap();
        assert_eq!(first.actions_renamed, 1);
        assert_eq!(first.entities_backfilled, 1);
        assert_eq!(first.synthetic_batches, 1);
        // The seeded test user has no audit row either.
        assert_eq!(first.synthetic_users, 1);

        let renamed: String =
            sqlx::query_scalar("SELECT action FROM audit_logs WHERE batch_id = ? AND action != 'batch.created'")
                .bind(&batch_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(renamed, "batch.started");

        // Synthetic entry preserves the original creation timestamp.
        let (action, created_at): (String, chrono::DateTime<Utc>) = sqlx::query_as(
            "SELECT action, created_at FROM audit_logs WHERE batch_id = ? AND action = 'batch.created'",
        )
        .bind(&batch_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(action, "batch.created");
        assert_eq!(created_at, now);

        // Second run: no additional rows, no additional updates.
        let rows_before = count_audit_rows(&pool).await;
        let second = normalize_audit_log(&pool).await.unwrap();
        assert!(second.is_noop(), "second run changed rows: {second:?}");
        assert_eq!(count_audit_rows(&pool).await, rows_before);
    }
}
