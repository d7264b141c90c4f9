use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use playhorizon_catalog::cli::browse::{self, ByReferenceConfig};
use playhorizon_catalog::cli::ingest::{self, IngestConfig};
use playhorizon_catalog::config::CatalogConfig;
use playhorizon_catalog::database_ops::batch::{DuplicatePolicy, Termination};
use playhorizon_catalog::database_ops::models::RefKind;
use playhorizon_catalog::database_ops::pg_store::PgCatalogStore;
use playhorizon_catalog::database_ops::store::CatalogStore;
use playhorizon_catalog::database_ops::trending::DEFAULT_TRENDING_LIMIT;
use playhorizon_catalog::tracing::init_tracing;
use playhorizon_catalog::util::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "catalog", version, about = "Game catalog ingestion and lookup")]
struct Cli {
    /// Optional override for the database URL
    #[arg(long, global = true)]
    db_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Load a games CSV export into the normalized catalog
    Ingest {
        csv: PathBuf,
        /// Rows processed in parallel (defaults to INGEST_CONCURRENCY or 1)
        #[arg(long)]
        concurrency: Option<usize>,
        /// last-wins, first-wins or reject (defaults to INGEST_DUPLICATES)
        #[arg(long)]
        duplicates: Option<DuplicatePolicy>,
        /// Normalize in memory and print counts; the database is not touched
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// List games in a genre (or another reference kind), one page at a time
    ByGenre {
        /// Exact name to match; omit for any
        #[arg(long)]
        genre: Option<String>,
        /// developer, publisher, category, genre or tag
        #[arg(long, default_value = "genre")]
        kind: RefKind,
        #[arg(long)]
        min_price: Option<f64>,
        #[arg(long)]
        max_price: Option<f64>,
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        page_size: Option<i64>,
    },
    /// List the names of one reference kind that are in use
    References {
        #[arg(default_value = "genre")]
        kind: RefKind,
    },
    /// Page through the whole catalog in app id order
    List {
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        page_size: Option<i64>,
    },
    /// Find games whose name contains the query (case-insensitive)
    Search { query: String },
    /// Show the highest trending scores as of today
    Trending {
        #[arg(long, default_value_t = DEFAULT_TRENDING_LIMIT)]
        limit: i64,
    },
    /// Print everything stored for one game as JSON
    Game { app_id: i64 },
    /// Print a game's genre metrics as JSON
    Metrics { app_id: i64 },
    /// Delete one game together with its associations and media
    Delete { app_id: i64 },
    /// Apply pending schema migrations
    Migrate,
}

async fn pg_store(cfg: &CatalogConfig, db_url: Option<&str>) -> Result<Arc<dyn CatalogStore>> {
    let db = playhorizon_catalog::cli::connect(cfg, db_url).await?;
    Ok(Arc::new(PgCatalogStore::new(db)))
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("catalog", "info,sqlx=warn")?;

    let cli = Cli::parse();
    let cfg = CatalogConfig::from_env();
    let db_url = cli.db_url.as_deref();

    match cli.command {
        Commands::Ingest {
            csv,
            concurrency,
            duplicates,
            dry_run,
        } => {
            let report = ingest::run(
                IngestConfig {
                    csv_path: csv,
                    database_url: cli.db_url.clone(),
                    concurrency,
                    duplicates,
                    dry_run,
                },
                &cfg,
            )
            .await?;
            println!("{report}");
            match report.termination {
                Termination::Completed => {}
                Termination::Cancelled => bail!("ingest cancelled"),
                Termination::Fatal { reason } => bail!("ingest stopped early: {reason}"),
            }
        }
        Commands::ByGenre {
            genre,
            kind,
            min_price,
            max_price,
            page,
            page_size,
        } => {
            let store = pg_store(&cfg, db_url).await?;
            let page = browse::by_reference(
                store,
                ByReferenceConfig {
                    kind,
                    name: genre,
                    min_price,
                    max_price,
                    page,
                    page_size,
                },
            )
            .await?;
            print!("{}", browse::render_page(&page));
        }
        Commands::References { kind } => {
            let store = pg_store(&cfg, db_url).await?;
            for reference in browse::references(store, kind).await? {
                println!("{:>8}  {}", reference.id.0, reference.name);
            }
        }
        Commands::List { page, page_size } => {
            let store = pg_store(&cfg, db_url).await?;
            let page = browse::list(store, page, page_size).await?;
            print!("{}", browse::render_page(&page));
        }
        Commands::Search { query } => {
            let store = pg_store(&cfg, db_url).await?;
            let games = browse::search(store, &query).await?;
            print!("{}", browse::render_games(&games));
            println!("{} match(es)", games.len());
        }
        Commands::Trending { limit } => {
            let store = pg_store(&cfg, db_url).await?;
            for ranked in browse::trending(store, limit).await? {
                println!(
                    "{:>5}  {:>8}  {}",
                    (ranked.score * 100.0).round() as i64,
                    ranked.game.app_id.0,
                    ranked.game.name
                );
            }
        }
        Commands::Metrics { app_id } => {
            let store = pg_store(&cfg, db_url).await?;
            let metrics = browse::metrics(store, app_id).await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Game { app_id } => {
            let store = pg_store(&cfg, db_url).await?;
            let detail = browse::game(store, app_id).await?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        Commands::Delete { app_id } => {
            let store = pg_store(&cfg, db_url).await?;
            if browse::delete(store, app_id).await? {
                info!(app_id, "game deleted");
            } else {
                bail!("game {app_id} not found");
            }
        }
        Commands::Migrate => {
            let url = match db_url {
                Some(url) => url,
                None => cfg.database_url()?,
            };
            let db = playhorizon_catalog::database_ops::db::Db::connect(url, cfg.max_connections)
                .await?;
            let applied = db.run_migrations(&cfg.migrations_dir).await?;
            println!("applied {applied} migration(s)");
        }
    }

    Ok(())
}
