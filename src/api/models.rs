// API request/response models (DTOs)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database_ops::models::{GameSummary, TrendingGame};

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            meta: Some(Meta::now()),
        }
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub uptime_seconds: u64,
}

/// `GET /api/by-genre` query string, in the camelCase the web client sends.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByGenreQuery {
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
}

/// `GET /api/games` query string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
}

/// `GET /api/games/search?query=...`
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: Option<String>,
}

/// Listing row with the derived review share and playtime in hours.
#[derive(Debug, Serialize)]
pub struct GameListItem {
    #[serde(flatten)]
    pub game: GameSummary,
    pub review_percentage: Option<i64>,
    pub playtime_hours: Option<i64>,
}

impl From<GameSummary> for GameListItem {
    fn from(game: GameSummary) -> Self {
        let review_percentage = game.review_percentage();
        let playtime_hours = game
            .average_playtime_forever
            .map(|minutes| (minutes as f64 / 60.0).round() as i64);
        Self {
            game,
            review_percentage,
            playtime_hours,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub games: Vec<GameListItem>,
    pub total: usize,
}

/// Trending row; the score is scaled to a whole number out of 100.
#[derive(Debug, Serialize)]
pub struct TrendingItem {
    #[serde(flatten)]
    pub game: GameListItem,
    pub trending_score: i64,
}

impl From<TrendingGame> for TrendingItem {
    fn from(ranked: TrendingGame) -> Self {
        Self {
            trending_score: (ranked.score * 100.0).round() as i64,
            game: GameListItem::from(ranked.game),
        }
    }
}
