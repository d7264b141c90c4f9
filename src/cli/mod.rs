//! Command implementations behind the `catalog` binary.

pub mod browse;
pub mod ingest;

use anyhow::Result;
use tracing::info;

use crate::config::CatalogConfig;
use crate::database_ops::db::Db;

/// Connects with `database_url` (or the configured one) and applies pending
/// migrations when `AUTO_MIGRATE` is on.
pub async fn connect(cfg: &CatalogConfig, database_url: Option<&str>) -> Result<Db> {
    let url = match database_url {
        Some(url) => url,
        None => cfg.database_url()?,
    };
    let db = Db::connect(url, cfg.max_connections).await?;
    if cfg.auto_migrate {
        let applied = db.run_migrations(&cfg.migrations_dir).await?;
        info!(applied, "auto-migrate finished");
    }
    Ok(db)
}
