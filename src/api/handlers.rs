// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::database_ops::models::{AppId, RefKind};
use crate::database_ops::models::GameSummary;
use crate::database_ops::search::{
    all_games, games_by_name, games_by_reference, GameQuery, Page, DEFAULT_LIST_PAGE_SIZE,
    DEFAULT_PAGE_SIZE, NAME_SEARCH_LIMIT,
};
use crate::database_ops::store::CatalogStore;
use crate::database_ops::trending::DEFAULT_TRENDING_LIMIT;
use crate::database_ops::StoreError;
use actix_web::{web, HttpResponse, Result};
use chrono::Utc;
use std::time::Instant;

/// When the server started; registered as app data for the health check.
#[derive(Debug, Clone, Copy)]
pub struct StartedAt(pub Instant);

fn storage_failure(err: StoreError) -> HttpResponse {
    tracing::error!(error = %err, "catalog query failed");
    let mut builder = if err.is_fatal() {
        HttpResponse::ServiceUnavailable()
    } else {
        HttpResponse::InternalServerError()
    };
    builder.json(ApiResponse::<()>::error("Failed to fetch games"))
}

/// Health check endpoint
pub async fn health_check(
    store: web::Data<dyn CatalogStore>,
    started: web::Data<StartedAt>,
) -> Result<HttpResponse> {
    let db_status = match store.ping().await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: db_status.to_string(),
        uptime_seconds: started.0.elapsed().as_secs(),
    });

    Ok(HttpResponse::Ok().json(response))
}

/// Paginated games in a genre, with inclusive price bounds
pub async fn games_by_genre(
    store: web::Data<dyn CatalogStore>,
    query: web::Query<ByGenreQuery>,
) -> Result<HttpResponse> {
    let query = query.into_inner();
    let search = GameQuery {
        name: query.genre,
        min_price: query.min_price,
        max_price: query.max_price,
        page: query.page.unwrap_or(1),
        page_size: query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        ..GameQuery::new(RefKind::Genre)
    };

    let page = match games_by_reference(store.get_ref(), &search).await {
        Ok(page) => page,
        Err(err) => return Ok(storage_failure(err)),
    };

    tracing::debug!(
        genre = ?search.name,
        page = page.current_page,
        total = page.total_count,
        "by-genre served"
    );

    Ok(paged(page))
}

/// Page body plus the pagination headers the web client reads.
fn paged(page: Page<GameSummary>) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header(("X-Total-Count", page.total_count.to_string()))
        .insert_header(("X-Current-Page", page.current_page.to_string()))
        .insert_header(("X-Total-Pages", page.total_pages.to_string()))
        .insert_header(("X-Page-Size", page.page_size.to_string()))
        .json(ApiResponse::success(Page {
            items: page.items.into_iter().map(GameListItem::from).collect(),
            current_page: page.current_page,
            page_size: page.page_size,
            total_count: page.total_count,
            total_pages: page.total_pages,
        }))
}

/// Whole catalog, paginated by `app_id`
pub async fn list_games(
    store: web::Data<dyn CatalogStore>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse> {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_LIST_PAGE_SIZE);
    match all_games(store.get_ref(), page, page_size).await {
        Ok(page) => Ok(paged(page)),
        Err(err) => Ok(storage_failure(err)),
    }
}

/// Name search; a missing or blank `query` is a client error
pub async fn search_games(
    store: web::Data<dyn CatalogStore>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse> {
    let term = query.query.as_deref().map(str::trim).unwrap_or_default();
    if term.is_empty() {
        return Ok(HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error("Search query is required")));
    }

    match games_by_name(store.get_ref(), term, NAME_SEARCH_LIMIT).await {
        Ok(games) => {
            let games: Vec<GameListItem> = games.into_iter().map(GameListItem::from).collect();
            let total = games.len();
            Ok(HttpResponse::Ok().json(ApiResponse::success(SearchResponse { games, total })))
        }
        Err(err) => Ok(storage_failure(err)),
    }
}

/// Top games by trending score as of today (UTC)
pub async fn trending(store: web::Data<dyn CatalogStore>) -> Result<HttpResponse> {
    let today = Utc::now().date_naive();
    match store.trending_games(today, DEFAULT_TRENDING_LIMIT).await {
        Ok(ranked) => {
            tracing::debug!(count = ranked.len(), "trending served");
            let items: Vec<TrendingItem> = ranked.into_iter().map(TrendingItem::from).collect();
            Ok(HttpResponse::Ok().json(ApiResponse::success(items)))
        }
        Err(err) => Ok(storage_failure(err)),
    }
}

/// Genres attached to at least one game
pub async fn list_genres(store: web::Data<dyn CatalogStore>) -> Result<HttpResponse> {
    match store.list_references(RefKind::Genre).await {
        Ok(genres) => Ok(HttpResponse::Ok().json(ApiResponse::success(genres))),
        Err(err) => Ok(storage_failure(err)),
    }
}

/// Full record for one game
pub async fn game_detail(
    store: web::Data<dyn CatalogStore>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let app_id = AppId(path.into_inner());
    match store.game_detail(app_id).await {
        Ok(Some(detail)) => Ok(HttpResponse::Ok().json(ApiResponse::success(detail))),
        Ok(None) => Ok(HttpResponse::NotFound()
            .json(ApiResponse::<()>::error(format!("game {app_id} not found")))),
        Err(err) => Ok(storage_failure(err)),
    }
}

/// Genre context for one game
pub async fn game_metrics(
    store: web::Data<dyn CatalogStore>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let app_id = AppId(path.into_inner());
    match store.game_metrics(app_id).await {
        Ok(Some(metrics)) => Ok(HttpResponse::Ok().json(ApiResponse::success(metrics))),
        Ok(None) => Ok(HttpResponse::NotFound()
            .json(ApiResponse::<()>::error(format!("game {app_id} not found")))),
        Err(err) => Ok(storage_failure(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::configure_routes;
    use crate::database_ops::batch::{BatchCoordinator, BatchOptions};
    use crate::database_ops::ingest_row::RowIngestor;
    use crate::database_ops::memory_store::MemoryCatalogStore;
    use crate::database_ops::models::RawGameRecord;
    use actix_web::{test, App};
    use serde_json::Value;
    use std::sync::Arc;

    async fn seeded_store() -> Arc<dyn CatalogStore> {
        let store = MemoryCatalogStore::new();
        let rows = (1..=12).map(|i| {
            Ok(RawGameRecord {
                app_id: Some(i.to_string()),
                name: Some(format!("Game {i:02}")),
                price: Some(format!("{i}.00")),
                genres: Some(if i % 2 == 0 { "Action" } else { "Action,RPG" }.into()),
                positive: Some("3".into()),
                negative: Some("1".into()),
                ..Default::default()
            })
        });
        BatchCoordinator::new(RowIngestor::new(Arc::new(store.clone())), BatchOptions::default())
            .run(rows)
            .await;
        Arc::new(store)
    }

    macro_rules! app {
        ($store:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::from($store))
                    .app_data(web::Data::new(StartedAt(Instant::now())))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn by_genre_paginates_with_headers() {
        let app = app!(seeded_store().await);
        let req = test::TestRequest::get()
            .uri("/api/by-genre?genre=RPG&minPrice=2&maxPrice=11&page=2&pageSize=2")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        // RPG games are the odd ids; 3,5,7,9,11 fall inside the price range.
        assert_eq!(resp.headers().get("X-Total-Count").unwrap(), "5");
        assert_eq!(resp.headers().get("X-Total-Pages").unwrap(), "3");

        let body: Value = test::read_body_json(resp).await;
        let items = body["data"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["name"], "Game 07");
        assert_eq!(items[0]["review_percentage"], 75);
    }

    #[actix_web::test]
    async fn genres_and_detail() {
        let app = app!(seeded_store().await);

        let req = test::TestRequest::get().uri("/api/genres").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let names: Vec<_> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|g| g["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Action", "RPG"]);

        let req = test::TestRequest::get().uri("/api/games/3").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["genres"], serde_json::json!(["Action", "RPG"]));

        let req = test::TestRequest::get().uri("/api/games/999").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn full_listing_and_name_search() {
        let app = app!(seeded_store().await);

        let req = test::TestRequest::get()
            .uri("/api/games?page=2&pageSize=5")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.headers().get("X-Total-Count").unwrap(), "12");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["items"][0]["app_id"], 6);
        assert_eq!(body["data"]["totalPages"], 3);

        let req = test::TestRequest::get()
            .uri("/api/games/search?query=game%200")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 9);
        assert_eq!(body["data"]["games"][0]["name"], "Game 01");

        let req = test::TestRequest::get()
            .uri("/api/games/search?query=%20")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn trending_and_metrics() {
        let store = MemoryCatalogStore::new();
        let rows = [("1", "Fresh", "85"), ("2", "Sibling", "75")].map(|(id, name, score)| {
            Ok(RawGameRecord {
                app_id: Some(id.into()),
                name: Some(name.into()),
                release_date: Some("Jan 10, 2015".into()),
                genres: Some("Action".into()),
                metacritic_score: Some(score.into()),
                positive: Some("90".into()),
                negative: Some("10".into()),
                average_playtime_forever: Some("1200".into()),
                ..Default::default()
            })
        });
        BatchCoordinator::new(RowIngestor::new(Arc::new(store.clone())), BatchOptions::default())
            .run(rows)
            .await;
        let app = app!(Arc::new(store) as Arc<dyn CatalogStore>);

        let req = test::TestRequest::get().uri("/api/trending").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let ranked = body["data"].as_array().unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0]["name"], "Fresh");
        // 0.85*0.25 + 0.9*0.35 + 0.4*0.25 - 0.15, scaled to 100
        assert_eq!(ranked[0]["trending_score"], 48);
        assert_eq!(ranked[0]["playtime_hours"], 20);

        let req = test::TestRequest::get().uri("/api/games/1/metrics").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["average_genre_metacritic"], 75.0);
        assert_eq!(body["data"]["number_of_genres"], 1);

        let req = test::TestRequest::get().uri("/api/games/3/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn health_reports_store_state() {
        let store = MemoryCatalogStore::new();
        store.set_offline(true);
        let app = app!(Arc::new(store) as Arc<dyn CatalogStore>);
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["database"], "disconnected");
    }
}
