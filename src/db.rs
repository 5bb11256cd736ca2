//! Database setup.
//!
//! Opens the SQLite pool and applies the embedded schema idempotently at
//! startup. Every table is `CREATE TABLE IF NOT EXISTS`, so re-running
//! against an existing database is a no-op.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

const SCHEMA: &str = include_str!("schema.sql");

/// Open a connection pool against `url`, creating the database file when
/// it does not exist. Foreign keys are enforced so cascade deletes
/// (batch → steps, recipe → recipe_steps) behave as declared.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Apply the embedded schema statement by statement.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    info!("database schema applied");
    Ok(())
}
