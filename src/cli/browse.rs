use anyhow::{bail, Result};
use std::sync::Arc;

use crate::database_ops::models::{
    AppId, GameDetail, GameMetrics, GameSummary, RefKind, Reference, TrendingGame,
};
use crate::database_ops::search::{
    all_games, games_by_name, games_by_reference, GameQuery, Page, DEFAULT_LIST_PAGE_SIZE,
    NAME_SEARCH_LIMIT,
};
use crate::database_ops::store::CatalogStore;

#[derive(Debug, Clone, Default)]
pub struct ByReferenceConfig {
    pub kind: RefKind,
    pub name: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn by_reference(
    store: Arc<dyn CatalogStore>,
    cfg: ByReferenceConfig,
) -> Result<Page<GameSummary>> {
    let defaults = GameQuery::new(cfg.kind);
    let query = GameQuery {
        name: cfg.name,
        min_price: cfg.min_price,
        max_price: cfg.max_price,
        page: cfg.page.unwrap_or(defaults.page),
        page_size: cfg.page_size.unwrap_or(defaults.page_size),
        ..defaults
    };
    Ok(games_by_reference(store.as_ref(), &query).await?)
}

pub async fn references(store: Arc<dyn CatalogStore>, kind: RefKind) -> Result<Vec<Reference>> {
    Ok(store.list_references(kind).await?)
}

pub async fn game(store: Arc<dyn CatalogStore>, app_id: i64) -> Result<GameDetail> {
    match store.game_detail(AppId(app_id)).await? {
        Some(detail) => Ok(detail),
        None => bail!("game {app_id} not found"),
    }
}

pub async fn delete(store: Arc<dyn CatalogStore>, app_id: i64) -> Result<bool> {
    Ok(store.delete_game(AppId(app_id)).await?)
}

pub async fn list(
    store: Arc<dyn CatalogStore>,
    page: Option<i64>,
    page_size: Option<i64>,
) -> Result<Page<GameSummary>> {
    let page = page.unwrap_or(1);
    let page_size = page_size.unwrap_or(DEFAULT_LIST_PAGE_SIZE);
    Ok(all_games(store.as_ref(), page, page_size).await?)
}

pub async fn search(store: Arc<dyn CatalogStore>, term: &str) -> Result<Vec<GameSummary>> {
    if term.trim().is_empty() {
        bail!("search query is required");
    }
    Ok(games_by_name(store.as_ref(), term, NAME_SEARCH_LIMIT).await?)
}

pub async fn trending(store: Arc<dyn CatalogStore>, limit: i64) -> Result<Vec<TrendingGame>> {
    let today = chrono::Utc::now().date_naive();
    Ok(store.trending_games(today, limit).await?)
}

pub async fn metrics(store: Arc<dyn CatalogStore>, app_id: i64) -> Result<GameMetrics> {
    match store.game_metrics(AppId(app_id)).await? {
        Some(metrics) => Ok(metrics),
        None => bail!("game {app_id} not found"),
    }
}

fn render_line(game: &GameSummary) -> String {
    let reviews = game
        .review_percentage()
        .map(|p| format!("{p}% positive"))
        .unwrap_or_else(|| "no reviews".to_string());
    format!(
        "{:>8}  {:<48}  {:>8.2}  {}\n",
        game.app_id.0, game.name, game.price, reviews
    )
}

/// One line per game, no paging footer.
pub fn render_games<'a, I>(games: I) -> String
where
    I: IntoIterator<Item = &'a GameSummary>,
{
    games.into_iter().map(render_line).collect()
}

/// Plain-text rendering of one listing page.
pub fn render_page(page: &Page<GameSummary>) -> String {
    let mut out = render_games(&page.items);
    out.push_str(&format!(
        "page {}/{} ({} games, {} per page)\n",
        page.current_page, page.total_pages, page.total_count, page.page_size
    ));
    out
}
