//! Electronic Batch Record (EBR) service for pharmaceutical
//! manufacturing: batch lifecycle, step execution with electronic
//! signatures, a tenant-scoped immutable audit trail, recipe templates,
//! batch record reports, and a simulated OPC-UA equipment integration.

pub mod types; // Domain entities, status enums, and the audit entity reference.
pub mod error; // Service error taxonomy and its HTTP mapping.
pub mod config; // TOML-backed runtime configuration.
pub mod db; // SQLite pool setup and embedded schema.
pub mod auth; // Passwords, sessions, and the role-capability policy.
pub mod audit; // Audit trail writer, reader, and legacy-log backfill.
pub mod batch; // Batch lifecycle and step execution state machines.
pub mod recipe; // Recipe templates with import/export.
pub mod report; // Batch record PDF generation.
pub mod opcua; // Deterministic OPC-UA process-data simulator.
pub mod api; // HTTP surface.

pub use config::Config;
pub use error::AppError;
pub use types::*;
