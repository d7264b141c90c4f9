// HTTP API server binary: read-only catalog endpoints

use anyhow::Result;
use playhorizon_catalog::api::ApiServer;
use playhorizon_catalog::config::CatalogConfig;
use playhorizon_catalog::database_ops::pg_store::PgCatalogStore;
use playhorizon_catalog::tracing::init_tracing;
use playhorizon_catalog::util::env as env_util;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing("api_server", "info,sqlx=warn")?;

    tracing::info!("Initializing catalog API server");

    let server = ApiServer::from_env();
    let cfg = CatalogConfig::from_env();
    let db = playhorizon_catalog::cli::connect(&cfg, None).await?;

    tracing::info!("Database connected successfully");

    server.run(Arc::new(PgCatalogStore::new(db))).await?;

    Ok(())
}
