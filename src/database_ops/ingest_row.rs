use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::database_ops::associations::sync_associations;
use crate::database_ops::error::{IngestError, StoreError};
use crate::database_ops::models::{AppId, GameRecord, MediaKind, RawGameRecord, RefKind};
use crate::database_ops::resolver::{ReferenceCache, Resolver};
use crate::database_ops::store::{CatalogStore, CatalogTx};

/// Attempts per row when the backend reports a deadlock or serialization failure.
const MAX_ATTEMPTS: usize = 3;

/// What one committed row changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowChanges {
    pub references: usize,
    pub links_added: usize,
    pub links_removed: usize,
    pub media: usize,
}

#[derive(Debug, Clone)]
pub enum RowOutcome {
    Ok {
        app_id: AppId,
        changes: RowChanges,
    },
    Failed {
        app_id: Option<AppId>,
        error: IngestError,
    },
}

impl RowOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, RowOutcome::Ok { .. })
    }

    pub fn app_id(&self) -> Option<AppId> {
        match self {
            RowOutcome::Ok { app_id, .. } => Some(*app_id),
            RowOutcome::Failed { app_id, .. } => *app_id,
        }
    }

    /// `Some` when the failure means the storage itself is unusable.
    pub fn fatal_error(&self) -> Option<&IngestError> {
        match self {
            RowOutcome::Failed { error, .. } if error.is_fatal() => Some(error),
            _ => None,
        }
    }
}

/// Writes one source row as a single transaction: game upsert, reference
/// resolution and association reconciliation per kind, then media replacement.
#[derive(Clone)]
pub struct RowIngestor {
    store: Arc<dyn CatalogStore>,
    cache: Option<Arc<ReferenceCache>>,
}

impl RowIngestor {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<ReferenceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validates and writes `raw`. Never panics or returns early on bad data;
    /// every problem ends up in the outcome.
    pub async fn ingest(&self, raw: RawGameRecord) -> RowOutcome {
        let key = raw.key();
        match GameRecord::try_from(raw) {
            Ok(record) => self.ingest_record(&record).await,
            Err(err) => {
                warn!(app_id = ?key.map(|k| k.0), error = %err, "row rejected");
                RowOutcome::Failed {
                    app_id: key,
                    error: err.into(),
                }
            }
        }
    }

    pub async fn ingest_record(&self, record: &GameRecord) -> RowOutcome {
        let app_id = record.app_id();
        let mut attempt = 1;
        loop {
            match self.write(record).await {
                Ok(changes) => {
                    debug!(app_id = app_id.0, ?changes, "row committed");
                    return RowOutcome::Ok { app_id, changes };
                }
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    debug!(app_id = app_id.0, attempt, error = %err, "row conflicted; retrying");
                    attempt += 1;
                }
                Err(err) => {
                    warn!(app_id = app_id.0, error = %err, "row failed");
                    return RowOutcome::Failed {
                        app_id: Some(app_id),
                        error: err.into(),
                    };
                }
            }
        }
    }

    async fn write(&self, record: &GameRecord) -> Result<RowChanges, StoreError> {
        let mut tx = self.store.begin().await?;
        let mut resolver = Resolver::new(self.cache.as_deref());
        match apply(tx.as_mut(), &mut resolver, record).await {
            Ok(changes) => {
                tx.commit().await?;
                resolver.publish();
                Ok(changes)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(app_id = record.app_id().0, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

async fn apply(
    tx: &mut dyn CatalogTx,
    resolver: &mut Resolver<'_>,
    record: &GameRecord,
) -> Result<RowChanges, StoreError> {
    let app_id = record.app_id();
    tx.upsert_game(&record.attributes).await?;

    let mut changes = RowChanges::default();
    for kind in RefKind::ALL {
        let mut target = BTreeSet::new();
        for name in record.references.names(kind) {
            target.insert(resolver.resolve(tx, kind, name).await?);
        }
        changes.references += target.len();
        let plan = sync_associations(tx, app_id, kind, &target).await?;
        changes.links_added += plan.add.len();
        changes.links_removed += plan.remove.len();
    }

    for kind in MediaKind::ALL {
        let urls = record.media(kind);
        tx.replace_media(app_id, kind, urls).await?;
        changes.media += urls.len();
    }
    Ok(changes)
}
