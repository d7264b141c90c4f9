use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::database_ops::error::RecordError;
use crate::normalization::{normalize_multi, scalars};

/// External game identifier (`games.app_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub i64);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Surrogate identifier of a reference entity within one [`RefKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefId(pub i64);

/// The five deduplicated lookup tables.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Developer,
    Publisher,
    Category,
    #[default]
    Genre,
    Tag,
}

impl RefKind {
    pub const ALL: [RefKind; 5] = [
        RefKind::Developer,
        RefKind::Publisher,
        RefKind::Category,
        RefKind::Genre,
        RefKind::Tag,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RefKind::Developer => "developer",
            RefKind::Publisher => "publisher",
            RefKind::Category => "category",
            RefKind::Genre => "genre",
            RefKind::Tag => "tag",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            RefKind::Developer => "developers",
            RefKind::Publisher => "publishers",
            RefKind::Category => "categories",
            RefKind::Genre => "genres",
            RefKind::Tag => "tags",
        }
    }

    pub fn junction(self) -> &'static str {
        match self {
            RefKind::Developer => "game_developers",
            RefKind::Publisher => "game_publishers",
            RefKind::Category => "game_categories",
            RefKind::Genre => "game_genres",
            RefKind::Tag => "game_tags",
        }
    }

    /// Reference column inside the junction table.
    pub fn column(self) -> &'static str {
        match self {
            RefKind::Developer => "developer_id",
            RefKind::Publisher => "publisher_id",
            RefKind::Category => "category_id",
            RefKind::Genre => "genre_id",
            RefKind::Tag => "tag_id",
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        RefKind::ALL
            .into_iter()
            .find(|k| k.as_str() == key || k.table() == key)
            .ok_or_else(|| format!("unknown reference kind {s:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    Screenshot,
    Movie,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Screenshot, MediaKind::Movie];

    pub fn table(self) -> &'static str {
        match self {
            MediaKind::Screenshot => "screenshots",
            MediaKind::Movie => "movies",
        }
    }
}

/// One CSV row exactly as the source wrote it. Every column is optional text;
/// typing happens in [`GameRecord::try_from`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawGameRecord {
    #[serde(rename = "AppID")]
    pub app_id: Option<String>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Release date")]
    pub release_date: Option<String>,
    #[serde(rename = "Estimated owners")]
    pub estimated_owners: Option<String>,
    #[serde(rename = "Peak CCU")]
    pub peak_ccu: Option<String>,
    #[serde(rename = "Required age")]
    pub required_age: Option<String>,
    #[serde(rename = "Price")]
    pub price: Option<String>,
    #[serde(rename = "DLC count")]
    pub dlc_count: Option<String>,
    #[serde(rename = "About the game")]
    pub about_the_game: Option<String>,
    #[serde(rename = "Supported languages")]
    pub supported_languages: Option<String>,
    #[serde(rename = "Full audio languages")]
    pub full_audio_languages: Option<String>,
    #[serde(rename = "Reviews")]
    pub reviews: Option<String>,
    #[serde(rename = "Header image")]
    pub header_image: Option<String>,
    #[serde(rename = "Website")]
    pub website: Option<String>,
    #[serde(rename = "Support url")]
    pub support_url: Option<String>,
    #[serde(rename = "Support email")]
    pub support_email: Option<String>,
    #[serde(rename = "Windows")]
    pub windows: Option<String>,
    #[serde(rename = "Mac")]
    pub mac: Option<String>,
    #[serde(rename = "Linux")]
    pub linux: Option<String>,
    #[serde(rename = "Metacritic score")]
    pub metacritic_score: Option<String>,
    #[serde(rename = "Metacritic url")]
    pub metacritic_url: Option<String>,
    #[serde(rename = "User score")]
    pub user_score: Option<String>,
    #[serde(rename = "Positive")]
    pub positive: Option<String>,
    #[serde(rename = "Negative")]
    pub negative: Option<String>,
    #[serde(rename = "Score rank")]
    pub score_rank: Option<String>,
    #[serde(rename = "Achievements")]
    pub achievements: Option<String>,
    #[serde(rename = "Recommendations")]
    pub recommendations: Option<String>,
    #[serde(rename = "Notes")]
    pub notes: Option<String>,
    #[serde(rename = "Average playtime forever")]
    pub average_playtime_forever: Option<String>,
    #[serde(rename = "Average playtime two weeks")]
    pub average_playtime_two_weeks: Option<String>,
    #[serde(rename = "Median playtime forever")]
    pub median_playtime_forever: Option<String>,
    #[serde(rename = "Median playtime two weeks")]
    pub median_playtime_two_weeks: Option<String>,
    #[serde(rename = "Developers")]
    pub developers: Option<String>,
    #[serde(rename = "Publishers")]
    pub publishers: Option<String>,
    #[serde(rename = "Categories")]
    pub categories: Option<String>,
    #[serde(rename = "Genres")]
    pub genres: Option<String>,
    #[serde(rename = "Tags")]
    pub tags: Option<String>,
    #[serde(rename = "Screenshots")]
    pub screenshots: Option<String>,
    #[serde(rename = "Movies")]
    pub movies: Option<String>,
}

impl RawGameRecord {
    /// The key as an integer, if it parses. Used to group rows before full validation.
    pub fn key(&self) -> Option<AppId> {
        parse_app_id(self.app_id.as_deref()).ok()
    }
}

fn parse_app_id(raw: Option<&str>) -> Result<AppId, RecordError> {
    let value = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(RecordError::MissingKey)?;
    match value.parse::<i64>() {
        Ok(id) if id > 0 => Ok(AppId(id)),
        _ => Err(RecordError::InvalidKey(value.to_string())),
    }
}

/// Scalar columns of the `games` row; upserted wholesale (last write wins).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameAttributes {
    pub app_id: AppId,
    pub name: String,
    pub release_date: Option<NaiveDate>,
    pub estimated_owners: Option<String>,
    pub peak_ccu: Option<i64>,
    pub required_age: Option<i64>,
    pub price: f64,
    pub dlc_count: Option<i64>,
    pub about_the_game: Option<String>,
    pub supported_languages: Vec<String>,
    pub full_audio_languages: Vec<String>,
    pub reviews: Option<String>,
    pub header_image: Option<String>,
    pub website: Option<String>,
    pub support_url: Option<String>,
    pub support_email: Option<String>,
    pub windows: i16,
    pub mac: i16,
    pub linux: i16,
    pub metacritic_score: Option<i64>,
    pub metacritic_url: Option<String>,
    pub user_score: Option<i64>,
    pub positive_reviews: Option<i64>,
    pub negative_reviews: Option<i64>,
    pub score_rank: Option<String>,
    pub achievements: Option<i64>,
    pub recommendations: Option<i64>,
    pub notes: Option<String>,
    pub average_playtime_forever: Option<i64>,
    pub average_playtime_two_weeks: Option<i64>,
    pub median_playtime_forever: Option<i64>,
    pub median_playtime_two_weeks: Option<i64>,
}

#[cfg(test)]
impl GameAttributes {
    /// Minimal row for tests: everything unknown, free, no platforms.
    pub fn named(app_id: AppId, name: &str) -> Self {
        Self {
            app_id,
            name: name.to_string(),
            release_date: None,
            estimated_owners: None,
            peak_ccu: None,
            required_age: None,
            price: 0.0,
            dlc_count: None,
            about_the_game: None,
            supported_languages: Vec::new(),
            full_audio_languages: Vec::new(),
            reviews: None,
            header_image: None,
            website: None,
            support_url: None,
            support_email: None,
            windows: 0,
            mac: 0,
            linux: 0,
            metacritic_score: None,
            metacritic_url: None,
            user_score: None,
            positive_reviews: None,
            negative_reviews: None,
            score_rank: None,
            achievements: None,
            recommendations: None,
            notes: None,
            average_playtime_forever: None,
            average_playtime_two_weeks: None,
            median_playtime_forever: None,
            median_playtime_two_weeks: None,
        }
    }
}

/// Reference names per kind, as parsed from one row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceNames {
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
    pub categories: Vec<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
}

impl ReferenceNames {
    pub fn names(&self, kind: RefKind) -> &[String] {
        match kind {
            RefKind::Developer => &self.developers,
            RefKind::Publisher => &self.publishers,
            RefKind::Category => &self.categories,
            RefKind::Genre => &self.genres,
            RefKind::Tag => &self.tags,
        }
    }
}

/// A validated source row.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    pub attributes: GameAttributes,
    pub references: ReferenceNames,
    pub screenshots: Vec<String>,
    pub movies: Vec<String>,
}

impl GameRecord {
    pub fn app_id(&self) -> AppId {
        self.attributes.app_id
    }

    pub fn media(&self, kind: MediaKind) -> &[String] {
        match kind {
            MediaKind::Screenshot => &self.screenshots,
            MediaKind::Movie => &self.movies,
        }
    }
}

impl TryFrom<RawGameRecord> for GameRecord {
    type Error = RecordError;

    fn try_from(raw: RawGameRecord) -> Result<Self, Self::Error> {
        use scalars::{bounded, flag, integer, price, release_date, text};

        let app_id = parse_app_id(raw.app_id.as_deref())?;
        let name = text(raw.name).ok_or(RecordError::MissingName(app_id.0))?;

        let attributes = GameAttributes {
            app_id,
            name,
            release_date: release_date(raw.release_date.as_deref())?,
            estimated_owners: text(raw.estimated_owners),
            peak_ccu: integer("Peak CCU", raw.peak_ccu.as_deref())?,
            required_age: integer("Required age", raw.required_age.as_deref())?,
            price: price(raw.price.as_deref())?,
            dlc_count: integer("DLC count", raw.dlc_count.as_deref())?,
            about_the_game: text(raw.about_the_game),
            supported_languages: normalize_multi(raw.supported_languages.as_deref()),
            full_audio_languages: normalize_multi(raw.full_audio_languages.as_deref()),
            reviews: text(raw.reviews),
            header_image: text(raw.header_image),
            website: text(raw.website),
            support_url: text(raw.support_url),
            support_email: text(raw.support_email),
            windows: flag(raw.windows.as_deref()),
            mac: flag(raw.mac.as_deref()),
            linux: flag(raw.linux.as_deref()),
            metacritic_score: bounded(
                "Metacritic score",
                integer("Metacritic score", raw.metacritic_score.as_deref())?,
                0,
                100,
            )?,
            metacritic_url: text(raw.metacritic_url),
            user_score: integer("User score", raw.user_score.as_deref())?,
            positive_reviews: bounded(
                "Positive",
                integer("Positive", raw.positive.as_deref())?,
                0,
                i64::MAX,
            )?,
            negative_reviews: bounded(
                "Negative",
                integer("Negative", raw.negative.as_deref())?,
                0,
                i64::MAX,
            )?,
            score_rank: text(raw.score_rank),
            achievements: integer("Achievements", raw.achievements.as_deref())?,
            recommendations: integer("Recommendations", raw.recommendations.as_deref())?,
            notes: text(raw.notes),
            average_playtime_forever: integer(
                "Average playtime forever",
                raw.average_playtime_forever.as_deref(),
            )?,
            average_playtime_two_weeks: integer(
                "Average playtime two weeks",
                raw.average_playtime_two_weeks.as_deref(),
            )?,
            median_playtime_forever: integer(
                "Median playtime forever",
                raw.median_playtime_forever.as_deref(),
            )?,
            median_playtime_two_weeks: integer(
                "Median playtime two weeks",
                raw.median_playtime_two_weeks.as_deref(),
            )?,
        };

        Ok(Self {
            attributes,
            references: ReferenceNames {
                developers: normalize_multi(raw.developers.as_deref()),
                publishers: normalize_multi(raw.publishers.as_deref()),
                categories: normalize_multi(raw.categories.as_deref()),
                genres: normalize_multi(raw.genres.as_deref()),
                tags: normalize_multi(raw.tags.as_deref()),
            },
            screenshots: normalize_multi(raw.screenshots.as_deref()),
            movies: normalize_multi(raw.movies.as_deref()),
        })
    }
}

/// A reference entity row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub id: RefId,
    pub name: String,
}

/// Listing projection used by the paginated read path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSummary {
    pub app_id: AppId,
    pub name: String,
    pub release_date: Option<NaiveDate>,
    pub price: f64,
    pub header_image: Option<String>,
    pub metacritic_score: Option<i64>,
    pub positive_reviews: Option<i64>,
    pub negative_reviews: Option<i64>,
    pub average_playtime_forever: Option<i64>,
}

impl GameSummary {
    pub fn from_attributes(game: &GameAttributes) -> Self {
        Self {
            app_id: game.app_id,
            name: game.name.clone(),
            release_date: game.release_date,
            price: game.price,
            header_image: game.header_image.clone(),
            metacritic_score: game.metacritic_score,
            positive_reviews: game.positive_reviews,
            negative_reviews: game.negative_reviews,
            average_playtime_forever: game.average_playtime_forever,
        }
    }

    /// Share of positive reviews, rounded to a whole percent; `None` without reviews.
    pub fn review_percentage(&self) -> Option<i64> {
        review_percentage(self.positive_reviews, self.negative_reviews)
    }
}

pub fn review_percentage(positive: Option<i64>, negative: Option<i64>) -> Option<i64> {
    // Counts from older rows may be negative or huge; clamp and sum in f64.
    let pos = positive.unwrap_or(0).max(0) as f64;
    let total = pos + negative.unwrap_or(0).max(0) as f64;
    (total > 0.0).then(|| (pos / total * 100.0).round() as i64)
}

/// Everything stored for one game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameDetail {
    pub game: GameAttributes,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
    pub categories: Vec<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub screenshots: Vec<String>,
    pub movies: Vec<String>,
}

impl GameDetail {
    pub fn names_mut(&mut self, kind: RefKind) -> &mut Vec<String> {
        match kind {
            RefKind::Developer => &mut self.developers,
            RefKind::Publisher => &mut self.publishers,
            RefKind::Category => &mut self.categories,
            RefKind::Genre => &mut self.genres,
            RefKind::Tag => &mut self.tags,
        }
    }

    pub fn media_mut(&mut self, kind: MediaKind) -> &mut Vec<String> {
        match kind {
            MediaKind::Screenshot => &mut self.screenshots,
            MediaKind::Movie => &mut self.movies,
        }
    }
}

/// A listing row together with its trending score (roughly -0.15 to 0.85).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendingGame {
    #[serde(flatten)]
    pub game: GameSummary,
    pub score: f64,
}

/// How one game sits within its genres.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameMetrics {
    pub app_id: AppId,
    /// Mean metacritic score of the other scored games sharing at least one genre.
    pub average_genre_metacritic: Option<f64>,
    pub achievement_count: Option<i64>,
    pub number_of_genres: i64,
}
