use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::util::env::env_flag;

const MIGRATIONS_TABLE: &str = "_catalog_migrations";

/// Explicitly constructed connection handle; every storage component receives one.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("invalid database URL")?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        // Batch loads tolerate losing the last few commits on a crash; rows are re-runnable.
        let fast_ingest = env_flag("FAST_INGEST", false);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if fast_ingest {
                        if let Err(e) = sqlx::query("SET synchronous_commit = 'off'")
                            .execute(&mut *conn)
                            .await
                        {
                            warn!(error = %e, "FAST_INGEST ignored; synchronous_commit unchanged");
                        }
                    }
                    Ok(())
                })
            })
            .connect_with(connect_options)
            .await
            .context("failed to connect to catalog database")?;
        info!(max_connections, fast_ingest, "connected to db");
        Ok(Self { pool })
    }

    /// Applies numbered `NNNN_description.sql` files from `dir` that have not been recorded yet.
    /// Each file runs in its own transaction together with its bookkeeping row.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            warn!(dir = %dir.display(), "migrations directory missing; nothing to apply");
            return Ok(0);
        }
        sqlx::raw_sql(&format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )"
        ))
        .execute(&self.pool)
        .await?;

        let mut applied: HashSet<i64> = HashSet::new();
        for r in sqlx::query(&format!("SELECT version FROM {MIGRATIONS_TABLE}"))
            .fetch_all(&self.pool)
            .await?
        {
            applied.insert(r.try_get::<i64, _>("version")?);
        }

        let mut candidates: Vec<(i64, String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some((version, desc)) = migration_version(fname) {
                candidates.push((version, desc, path));
            }
        }
        candidates.sort_by_key(|(v, _, _)| *v);

        let mut count = 0usize;
        for (version, desc, path) in candidates {
            if !applied.insert(version) {
                continue;
            }
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("reading migration {}", path.display()))?;
            info!(version, file = ?path, "applying migration");
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(&sql).execute(&mut *tx).await?;
            sqlx::query(&format!(
                "INSERT INTO {MIGRATIONS_TABLE} (version, description) VALUES ($1, $2)"
            ))
            .bind(version)
            .bind(&desc)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            count += 1;
        }
        info!(applied = count, "migrations up-to-date");
        Ok(count)
    }
}

/// Parses `0001_catalog.sql` into `(1, "catalog")`; other file names are ignored.
fn migration_version(fname: &str) -> Option<(i64, String)> {
    let stem = fname.strip_suffix(".sql")?;
    let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let rest = stem[digits.len()..].strip_prefix('_')?;
    Some((digits.parse().ok()?, rest.to_string()))
}
