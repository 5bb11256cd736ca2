//! Core domain types shared across the EBR service.
//!
//! Every persisted entity is scoped to a tenant; identifiers are UUIDv4
//! strings and timestamps are UTC. Status enums are stored as their
//! snake_case names in SQLite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// Lifecycle of a manufacturing batch.
///
/// `draft → active → completed`, with `cancelled` reachable from any
/// non-terminal state. Transitions outside these edges are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BatchStatus {
    Draft,
    Active,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Draft => "draft",
            BatchStatus::Active => "active",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
        }
    }
}

/// Execution state of a single batch step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Terminal steps admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Kind of work a step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepType {
    Manual,
    Measurement,
    Verification,
    EquipmentCheck,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Manual => "manual",
            StepType::Measurement => "measurement",
            StepType::Verification => "verification",
            StepType::EquipmentCheck => "equipment_check",
        }
    }
}

/// User roles, ordered roughly by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Role {
    Admin,
    BatchManager,
    OperatorSupervisor,
    Operator,
    QaQc,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::BatchManager => "batch_manager",
            Role::OperatorSupervisor => "operator_supervisor",
            Role::Operator => "operator",
            Role::QaQc => "qa_qc",
        }
    }
}

/// One manufacturing run.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Batch {
    pub id: String,
    pub tenant_id: String,
    pub batch_number: String,
    pub product_name: String,
    pub batch_size: f64,
    pub status: BatchStatus,
    pub recipe_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Batch plus aggregate step progress, as returned by list/get endpoints.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BatchWithProgress {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub batch: Batch,
    pub total_steps: i64,
    pub completed_steps: i64,
}

/// One unit of recorded work within a batch.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BatchStep {
    pub id: String,
    pub tenant_id: String,
    pub batch_id: String,
    pub step_number: i64,
    pub description: String,
    pub instructions: Option<String>,
    pub step_type: StepType,
    pub expected_value: Option<f64>,
    pub unit: Option<String>,
    pub actual_value: Option<f64>,
    pub requires_signature: bool,
    pub signature_data: Option<String>,
    pub status: StepStatus,
    pub performed_by: Option<String>,
    pub notes: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Versioned procedure template.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recipe {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub product_name: String,
    pub version: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Template row owned by a recipe; the run-time fields of `BatchStep`
/// (status, performer, actual value, signature) do not exist here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecipeStep {
    pub id: String,
    pub recipe_id: String,
    pub step_number: i64,
    pub description: String,
    pub instructions: Option<String>,
    pub step_type: StepType,
    pub expected_value: Option<f64>,
    pub unit: Option<String>,
    pub requires_signature: bool,
    pub duration_minutes: Option<i64>,
}

/// User account row, without credential material.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Authenticated caller, resolved from a session.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

/// Tenant the caller is operating in. Derived from the session only,
/// never from request parameters.
#[derive(Debug, Clone, Serialize)]
pub struct TenantContext {
    pub id: String,
    pub slug: String,
    pub name: String,
}

/// Polymorphic reference carried by audit entries. The tag determines
/// how `entity_id` is interpreted on the read side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Batch(String),
    Recipe(String),
    User(String),
    Session(String),
}

impl EntityRef {
    pub fn entity_type(&self) -> &'static str {
        match self {
            EntityRef::Batch(_) => "batch",
            EntityRef::Recipe(_) => "recipe",
            EntityRef::User(_) => "user",
            EntityRef::Session(_) => "session",
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            EntityRef::Batch(id)
            | EntityRef::Recipe(id)
            | EntityRef::User(id)
            | EntityRef::Session(id) => id,
        }
    }

    /// Rebuild the tagged reference from its stored parts.
    pub fn from_parts(entity_type: &str, entity_id: String) -> Option<Self> {
        match entity_type {
            "batch" => Some(EntityRef::Batch(entity_id)),
            "recipe" => Some(EntityRef::Recipe(entity_id)),
            "user" => Some(EntityRef::User(entity_id)),
            "session" => Some(EntityRef::Session(entity_id)),
            _ => None,
        }
    }
}

/// Immutable audit trail row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: String,
    pub tenant_id: String,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub batch_id: Option<String>,
    pub step_id: Option<String>,
    pub performed_by: Option<String>,
    pub ip_address: Option<String>,
    pub details: Option<Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

/// Audit entry enriched for display: batch/step context plus the
/// resolved human-readable name of the referenced entity.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogView {
    #[serde(flatten)]
    pub entry: AuditLogEntry,
    pub batch_number: Option<String>,
    pub step_number: Option<i64>,
    pub step_description: Option<String>,
    pub entity_name: Option<String>,
}

/// Persisted record of a generated batch report.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PdfReport {
    pub id: String,
    pub tenant_id: String,
    pub batch_id: String,
    pub file_path: String,
    pub generated_by: String,
    pub created_at: DateTime<Utc>,
}
