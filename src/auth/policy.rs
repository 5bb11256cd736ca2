//! Role-capability policy.
//!
//! Each operation declares the minimal role set that may perform it;
//! `allowed` is the single source of truth consulted by every handler.
//! Keeping it a pure function makes authorization unit-testable without
//! any transport in the picture.

use crate::types::Role;

/// Everything a caller can ask the service to do, grouped at the
/// granularity the role lists distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Read batches, steps, and the audit trail.
    BatchRead,
    /// Create batches, update and sign steps.
    BatchWrite,
    /// Start/complete/cancel batches and generate reports.
    BatchManage,
    RecipeRead,
    RecipeEdit,
    UserManage,
    AuditRead,
    IntegrationsRead,
    TenantRead,
}

/// Role gate per operation. Mirrors the writer/manager/editor role lists
/// of the HTTP surface.
pub fn allowed(role: Role, operation: Operation) -> bool {
    use Operation::*;
    use Role::*;
    match operation {
        BatchRead | RecipeRead | AuditRead | IntegrationsRead | TenantRead => true,
        BatchWrite => matches!(role, Admin | BatchManager | OperatorSupervisor | Operator),
        BatchManage => matches!(role, Admin | BatchManager | OperatorSupervisor),
        RecipeEdit => matches!(role, Admin | BatchManager),
        UserManage => matches!(role, Admin),
    }
}
