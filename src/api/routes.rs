// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        .service(
            web::scope("/api")
                .route("/health", web::get().to(handlers::health_check))
                .route("/by-genre", web::get().to(handlers::games_by_genre))
                .route("/genres", web::get().to(handlers::list_genres))
                .route("/trending", web::get().to(handlers::trending))
                .route("/games", web::get().to(handlers::list_games))
                // Literal segment first so it is not taken for an app id.
                .route("/games/search", web::get().to(handlers::search_games))
                .route("/games/{app_id}", web::get().to(handlers::game_detail))
                .route("/games/{app_id}/metrics", web::get().to(handlers::game_metrics)),
        );
}
