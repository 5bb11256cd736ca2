use ebr_server::api::server::Server;
use ebr_server::audit::backfill;
use ebr_server::config::Config;
use ebr_server::db;
use tracing::info;

/// Entry point: logging, configuration, database, audit normalization,
/// then the API server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::load("config/default.toml")?;
    info!("EBR server starting on {}:{}", config.api.host, config.api.port);

    let pool = db::connect(&config.database.url).await?;
    db::init_schema(&pool).await?;

    // Repair legacy audit rows before serving; a clean database is a
    // no-op.
    let report = backfill::normalize_audit_log(&pool).await?;
    if !report.is_noop() {
        info!(?report, "audit log normalized");
    }

    let server = Server::new(config, pool);
    server.start().await?;

    Ok(())
}
