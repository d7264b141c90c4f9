use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::CatalogConfig;
use crate::database_ops::batch::{BatchCoordinator, BatchReport, DuplicatePolicy};
use crate::database_ops::ingest_row::RowIngestor;
use crate::database_ops::memory_store::MemoryCatalogStore;
use crate::database_ops::models::RefKind;
use crate::database_ops::pg_store::PgCatalogStore;
use crate::database_ops::resolver::ReferenceCache;
use crate::database_ops::source::CsvSource;
use crate::database_ops::store::CatalogStore;

#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    pub csv_path: PathBuf,
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    /// Overrides INGEST_CONCURRENCY.
    pub concurrency: Option<usize>,
    /// Overrides INGEST_DUPLICATES.
    pub duplicates: Option<DuplicatePolicy>,
    /// Normalize into process memory instead of the database.
    pub dry_run: bool,
}

pub async fn run(cfg: IngestConfig, base: &CatalogConfig) -> Result<BatchReport> {
    let mut options = base.batch.clone();
    if let Some(n) = cfg.concurrency {
        options.concurrency = n.max(1);
    }
    if let Some(policy) = cfg.duplicates {
        options.duplicates = policy;
    }

    let memory = cfg.dry_run.then(MemoryCatalogStore::new);
    let store: Arc<dyn CatalogStore> = match &memory {
        Some(mem) => Arc::new(mem.clone()),
        None => {
            let db = super::connect(base, cfg.database_url.as_deref()).await?;
            Arc::new(PgCatalogStore::new(db))
        }
    };

    let source = CsvSource::open(&cfg.csv_path)?;
    info!(
        file = %cfg.csv_path.display(),
        concurrency = options.concurrency,
        duplicates = %options.duplicates,
        dry_run = cfg.dry_run,
        "ingest: starting"
    );

    let mut ingestor = RowIngestor::new(store);
    if options.concurrency > 1 {
        ingestor = ingestor.with_cache(Arc::new(ReferenceCache::new()));
    }
    let coordinator = BatchCoordinator::new(ingestor, options);

    let cancel = coordinator.cancel_flag();
    let signal = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("ingest: Ctrl+C received; finishing in-flight rows");
                cancel.store(true, Ordering::SeqCst);
            }
            Err(err) => warn!(error = %err, "ingest: failed to install Ctrl+C handler"),
        }
    });

    let report = coordinator.run(source.records()).await;
    signal.abort();

    if let Some(mem) = memory {
        info!(games = mem.game_count().await, "dry-run: games normalized");
        for kind in RefKind::ALL {
            info!(
                %kind,
                entities = mem.reference_count(kind).await,
                links = mem.link_count(kind).await,
                "dry-run: references"
            );
        }
    }
    Ok(report)
}
