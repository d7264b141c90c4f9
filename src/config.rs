//! Runtime settings collected from the environment (and `.env`).

use anyhow::Result;
use std::fmt;
use std::path::PathBuf;

use crate::database_ops::batch::{BatchOptions, DuplicatePolicy};
use crate::util::env::{db_url, env_flag, env_opt, env_parse};

#[derive(Clone)]
pub struct CatalogConfig {
    database_url: Option<String>,
    pub max_connections: u32,
    pub batch: BatchOptions,
    pub auto_migrate: bool,
    pub migrations_dir: PathBuf,
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        let duplicates = env_opt("INGEST_DUPLICATES")
            .and_then(|raw| match raw.parse::<DuplicatePolicy>() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring INGEST_DUPLICATES");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            database_url: db_url().ok(),
            max_connections: env_parse("DB_MAX_CONNS", 5u32).max(1),
            batch: BatchOptions {
                concurrency: env_parse("INGEST_CONCURRENCY", 1usize).max(1),
                progress_every: env_parse("INGEST_PROGRESS_EVERY", 100usize),
                duplicates,
            },
            auto_migrate: env_flag("AUTO_MIGRATE", false),
            migrations_dir: env_opt("MIGRATIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"))
                }),
        }
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("set CATALOG_DATABASE_URL or DATABASE_URL"))
    }

    pub fn has_database(&self) -> bool {
        self.database_url.is_some()
    }
}

// SECURITY: the DSN may carry credentials; only report whether it is set.
impl fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("max_connections", &self.max_connections)
            .field("batch", &self.batch)
            .field("auto_migrate", &self.auto_migrate)
            .field("migrations_dir", &self.migrations_dir)
            .finish()
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            batch: BatchOptions::default(),
            auto_migrate: false,
            migrations_dir: PathBuf::from("migrations"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sequential_last_wins() {
        let cfg = CatalogConfig::default();
        assert_eq!(cfg.batch.concurrency, 1);
        assert_eq!(cfg.batch.progress_every, 100);
        assert_eq!(cfg.batch.duplicates, DuplicatePolicy::LastWins);
        assert!(!cfg.auto_migrate);
        assert!(cfg.database_url().is_err());
    }

    #[test]
    fn debug_output_hides_the_dsn() {
        let cfg = CatalogConfig {
            database_url: Some("postgres://user:hunter2@db/catalog".into()),
            ..CatalogConfig::default()
        };
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<set>"));
    }
}
