use serde::Serialize;
use tracing::instrument;

use crate::database_ops::error::StoreError;
use crate::database_ops::models::{GameSummary, RefKind};
use crate::database_ops::store::{CatalogStore, GameFilter};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
/// The unfiltered catalog listing pages by 10.
pub const DEFAULT_LIST_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const NAME_SEARCH_LIMIT: i64 = 10;

/// Paginated lookup of games attached to one reference kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameQuery {
    pub kind: RefKind,
    /// Exact reference name; blank means any entity of `kind`.
    pub name: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// 1-based.
    pub page: i64,
    pub page_size: i64,
}

impl GameQuery {
    pub fn new(kind: RefKind) -> Self {
        Self {
            kind,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            ..Self::default()
        }
    }

    fn filter(&self) -> GameFilter {
        GameFilter {
            kind: Some(self.kind),
            name: self
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            min_price: self.min_price,
            max_price: self.max_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: i64,
    pub page_size: i64,
    pub total_count: i64,
    pub total_pages: i64,
}

pub fn total_pages(total: i64, page_size: i64) -> i64 {
    if page_size <= 0 {
        return 0;
    }
    (total + page_size - 1) / page_size
}

/// Normalized `(page, page_size, offset)`.
fn page_window(page: i64, page_size: i64) -> (i64, i64, i64) {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    (page, page_size, (page - 1).saturating_mul(page_size))
}

fn page_of<T>(items: Vec<T>, page: i64, page_size: i64, total: i64) -> Page<T> {
    Page {
        items,
        current_page: page,
        page_size,
        total_count: total,
        total_pages: total_pages(total, page_size),
    }
}

/// Games ordered by name. Pages past the end come back empty with the real totals.
#[instrument(skip(store))]
pub async fn games_by_reference(
    store: &dyn CatalogStore,
    query: &GameQuery,
) -> Result<Page<GameSummary>, StoreError> {
    let (page, page_size, offset) = page_window(query.page, query.page_size);
    let (items, total) = store
        .search_games(&query.filter(), page_size, offset)
        .await?;
    Ok(page_of(items, page, page_size, total))
}

/// The whole catalog in `app_id` order, same paging rules as [`games_by_reference`].
#[instrument(skip(store))]
pub async fn all_games(
    store: &dyn CatalogStore,
    page: i64,
    page_size: i64,
) -> Result<Page<GameSummary>, StoreError> {
    let (page, page_size, offset) = page_window(page, page_size);
    let (items, total) = store.list_games(page_size, offset).await?;
    Ok(page_of(items, page, page_size, total))
}

/// Case-insensitive substring match on the game name. A blank term matches nothing.
#[instrument(skip(store))]
pub async fn games_by_name(
    store: &dyn CatalogStore,
    term: &str,
    limit: i64,
) -> Result<Vec<GameSummary>, StoreError> {
    let term = term.trim();
    if term.is_empty() {
        return Ok(Vec::new());
    }
    store
        .search_by_name(term, limit.clamp(1, MAX_PAGE_SIZE))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::batch::{BatchCoordinator, BatchOptions};
    use crate::database_ops::ingest_row::RowIngestor;
    use crate::database_ops::memory_store::MemoryCatalogStore;
    use crate::database_ops::models::RawGameRecord;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    async fn seeded(rows: Vec<RawGameRecord>) -> MemoryCatalogStore {
        let store = MemoryCatalogStore::new();
        let ingestor = RowIngestor::new(Arc::new(store.clone()));
        BatchCoordinator::new(ingestor, BatchOptions::default())
            .run(rows.into_iter().map(Ok))
            .await;
        store
    }

    fn game(app_id: i64, name: &str, price: &str, genres: &str) -> RawGameRecord {
        RawGameRecord {
            app_id: Some(app_id.to_string()),
            name: Some(name.into()),
            price: Some(price.into()),
            genres: Some(genres.into()),
            ..Default::default()
        }
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(total_pages(25, 10), 3);
        assert_eq!(total_pages(20, 10), 2);
        assert_eq!(total_pages(0, 10), 0);
    }

    #[tokio::test]
    async fn third_page_of_twenty_five() {
        let rows = (1..=25)
            .map(|i| game(i, &format!("Game {i:02}"), "9.99", "Action"))
            .collect();
        let store = seeded(rows).await;

        let query = GameQuery {
            name: Some("Action".into()),
            page: 3,
            page_size: 10,
            ..GameQuery::new(RefKind::Genre)
        };
        let page = games_by_reference(&store, &query).await.unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.total_count, 25);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items[0].name, "Game 21");
    }

    #[tokio::test]
    async fn filters_by_name_and_inclusive_price() {
        let store = seeded(vec![
            game(1, "Cheap", "", "Indie"),
            game(2, "Mid", "10", "Indie,RPG"),
            game(3, "Pricey", "60", "RPG"),
            game(4, "Bare", "5", ""),
        ])
        .await;

        let mut query = GameQuery::new(RefKind::Genre);
        let any = games_by_reference(&store, &query).await.unwrap();
        let names: Vec<_> = any.items.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Cheap", "Mid", "Pricey"]);

        query.name = Some("RPG".into());
        query.min_price = Some(10.0);
        query.max_price = Some(60.0);
        let rpg = games_by_reference(&store, &query).await.unwrap();
        assert_eq!(rpg.total_count, 2);

        query.max_price = Some(59.99);
        let rpg = games_by_reference(&store, &query).await.unwrap();
        assert_eq!(rpg.items.len(), 1);
        assert_eq!(rpg.items[0].name, "Mid");

        query.name = Some("   ".into());
        query.min_price = None;
        query.max_price = Some(0.0);
        let free = games_by_reference(&store, &query).await.unwrap();
        assert_eq!(free.items[0].name, "Cheap");
    }

    #[tokio::test]
    async fn full_listing_pages_in_app_id_order() {
        let store = seeded(vec![
            game(30, "Alpha", "1", ""),
            game(10, "Zulu", "1", "Action"),
            game(20, "Mike", "1", "RPG"),
        ])
        .await;

        let first = all_games(&store, 1, 2).await.unwrap();
        let ids: Vec<i64> = first.items.iter().map(|g| g.app_id.0).collect();
        assert_eq!(ids, vec![10, 20]);
        assert_eq!((first.total_count, first.total_pages), (3, 2));

        let second = all_games(&store, 2, 2).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].name, "Alpha");
    }

    #[tokio::test]
    async fn name_search_is_partial_and_case_insensitive() {
        let store = seeded(vec![
            game(1, "Half-Life 2", "9.99", "Action"),
            game(2, "Half-Life", "9.99", "Action"),
            game(3, "Portal", "9.99", "Puzzle"),
            game(4, "100% Orange Juice", "4.99", "Casual"),
        ])
        .await;

        let hits = games_by_name(&store, "  half-LIFE ", NAME_SEARCH_LIMIT)
            .await
            .unwrap();
        let names: Vec<_> = hits.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Half-Life", "Half-Life 2"]);

        let pct = games_by_name(&store, "0%", NAME_SEARCH_LIMIT).await.unwrap();
        assert_eq!(pct.len(), 1);
        assert!(games_by_name(&store, "   ", NAME_SEARCH_LIMIT)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(games_by_name(&store, "l", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_paging_is_clamped() {
        let store = seeded(vec![game(1, "Solo", "1", "Action")]).await;
        let query = GameQuery {
            page: 0,
            page_size: 10_000,
            ..GameQuery::new(RefKind::Genre)
        };
        let page = games_by_reference(&store, &query).await.unwrap();
        assert_eq!(page.current_page, 1);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
        assert_eq!(page.items.len(), 1);
    }
}
