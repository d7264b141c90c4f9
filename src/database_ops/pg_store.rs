use async_trait::async_trait;
use chrono::NaiveDate;
use itertools::Itertools;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::instrument;

use crate::database_ops::db::Db;
use crate::database_ops::error::StoreError;
use crate::database_ops::models::{
    AppId, GameAttributes, GameDetail, GameMetrics, GameSummary, MediaKind, RefId, RefKind,
    Reference, TrendingGame,
};
use crate::database_ops::store::{CatalogStore, CatalogTx, GameFilter};
use crate::database_ops::trending::{
    AGE_PENALTY, APPROVAL_WEIGHT, EARLIEST_YEAR, METACRITIC_WEIGHT, MIN_REVIEWS,
    PLAYTIME_CAP_MINUTES, PLAYTIME_WEIGHT,
};

/// `games` columns in bind order for the upsert.
const GAME_COLUMNS: &[&str] = &[
    "app_id",
    "name",
    "release_date",
    "estimated_owners",
    "peak_ccu",
    "required_age",
    "price",
    "dlc_count",
    "about_the_game",
    "supported_languages",
    "full_audio_languages",
    "reviews",
    "header_image",
    "website",
    "support_url",
    "support_email",
    "windows",
    "mac",
    "linux",
    "metacritic_score",
    "metacritic_url",
    "user_score",
    "positive_reviews",
    "negative_reviews",
    "score_rank",
    "achievements",
    "recommendations",
    "notes",
    "average_playtime_forever",
    "average_playtime_two_weeks",
    "median_playtime_forever",
    "median_playtime_two_weeks",
];

const SUMMARY_COLUMNS: &str = "g.app_id, g.name, g.release_date, g.price, g.header_image, \
     g.metacritic_score, g.positive_reviews, g.negative_reviews, g.average_playtime_forever";

/// Escapes `LIKE` wildcards so `term` matches literally (with `ESCAPE '\\'`).
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Mirrors `trending::trending_score`; `$1` is today's date.
fn trending_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        let pos = "GREATEST(COALESCE(g.positive_reviews, 0), 0)::float8";
        let neg = "GREATEST(COALESCE(g.negative_reviews, 0), 0)::float8";
        format!(
            "WITH scored AS ( \
               SELECT {SUMMARY_COLUMNS}, \
                 COALESCE(g.metacritic_score, 0)::float8 / 100.0 * {METACRITIC_WEIGHT} \
                 + CASE WHEN {pos} + {neg} = 0 THEN 0 ELSE {pos} / ({pos} + {neg}) END \
                   * {APPROVAL_WEIGHT} \
                 + LEAST(COALESCE(g.average_playtime_forever, 0)::float8 / {PLAYTIME_CAP_MINUTES:.1}, 1) \
                   * {PLAYTIME_WEIGHT} \
                 - LEAST(($1::date - g.release_date)::float8 / 365.0, 1) * {AGE_PENALTY} AS score \
               FROM games g \
               WHERE g.release_date >= make_date({EARLIEST_YEAR}, 1, 1) \
                 AND {pos} + {neg} > {MIN_REVIEWS} \
             ) \
             SELECT * FROM scored WHERE score > 0 ORDER BY score DESC, app_id LIMIT $2"
        )
    })
}

fn upsert_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        let placeholders = (1..=GAME_COLUMNS.len()).map(|i| format!("${i}")).join(", ");
        let updates = GAME_COLUMNS[1..]
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .join(", ");
        format!(
            "INSERT INTO games ({}) VALUES ({placeholders}) ON CONFLICT (app_id) DO UPDATE SET {updates}",
            GAME_COLUMNS.join(", ")
        )
    })
}

fn bind_game<'q>(
    query: Query<'q, Postgres, PgArguments>,
    g: &'q GameAttributes,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(g.app_id.0)
        .bind(&g.name)
        .bind(g.release_date)
        .bind(&g.estimated_owners)
        .bind(g.peak_ccu)
        .bind(g.required_age)
        .bind(g.price)
        .bind(g.dlc_count)
        .bind(&g.about_the_game)
        .bind(Json(&g.supported_languages))
        .bind(Json(&g.full_audio_languages))
        .bind(&g.reviews)
        .bind(&g.header_image)
        .bind(&g.website)
        .bind(&g.support_url)
        .bind(&g.support_email)
        .bind(g.windows)
        .bind(g.mac)
        .bind(g.linux)
        .bind(g.metacritic_score)
        .bind(&g.metacritic_url)
        .bind(g.user_score)
        .bind(g.positive_reviews)
        .bind(g.negative_reviews)
        .bind(&g.score_rank)
        .bind(g.achievements)
        .bind(g.recommendations)
        .bind(&g.notes)
        .bind(g.average_playtime_forever)
        .bind(g.average_playtime_two_weeks)
        .bind(g.median_playtime_forever)
        .bind(g.median_playtime_two_weeks)
}

fn summary_from_row(row: &PgRow) -> Result<GameSummary, sqlx::Error> {
    Ok(GameSummary {
        app_id: AppId(row.try_get("app_id")?),
        name: row.try_get("name")?,
        release_date: row.try_get("release_date")?,
        price: row.try_get("price")?,
        header_image: row.try_get("header_image")?,
        metacritic_score: row.try_get("metacritic_score")?,
        positive_reviews: row.try_get("positive_reviews")?,
        negative_reviews: row.try_get("negative_reviews")?,
        average_playtime_forever: row.try_get("average_playtime_forever")?,
    })
}

fn game_from_row(row: &PgRow) -> Result<GameAttributes, sqlx::Error> {
    let supported: Json<Vec<String>> = row.try_get("supported_languages")?;
    let full_audio: Json<Vec<String>> = row.try_get("full_audio_languages")?;
    Ok(GameAttributes {
        app_id: AppId(row.try_get("app_id")?),
        name: row.try_get("name")?,
        release_date: row.try_get("release_date")?,
        estimated_owners: row.try_get("estimated_owners")?,
        peak_ccu: row.try_get("peak_ccu")?,
        required_age: row.try_get("required_age")?,
        price: row.try_get("price")?,
        dlc_count: row.try_get("dlc_count")?,
        about_the_game: row.try_get("about_the_game")?,
        supported_languages: supported.0,
        full_audio_languages: full_audio.0,
        reviews: row.try_get("reviews")?,
        header_image: row.try_get("header_image")?,
        website: row.try_get("website")?,
        support_url: row.try_get("support_url")?,
        support_email: row.try_get("support_email")?,
        windows: row.try_get("windows")?,
        mac: row.try_get("mac")?,
        linux: row.try_get("linux")?,
        metacritic_score: row.try_get("metacritic_score")?,
        metacritic_url: row.try_get("metacritic_url")?,
        user_score: row.try_get("user_score")?,
        positive_reviews: row.try_get("positive_reviews")?,
        negative_reviews: row.try_get("negative_reviews")?,
        score_rank: row.try_get("score_rank")?,
        achievements: row.try_get("achievements")?,
        recommendations: row.try_get("recommendations")?,
        notes: row.try_get("notes")?,
        average_playtime_forever: row.try_get("average_playtime_forever")?,
        average_playtime_two_weeks: row.try_get("average_playtime_two_weeks")?,
        median_playtime_forever: row.try_get("median_playtime_forever")?,
        median_playtime_two_weeks: row.try_get("median_playtime_two_weeks")?,
    })
}

/// Catalog backend over the Postgres pool; one `sqlx` transaction per row.
#[derive(Clone)]
pub struct PgCatalogStore {
    db: Db,
}

impl PgCatalogStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

pub struct PgCatalogTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTx for PgCatalogTx {
    async fn upsert_game(&mut self, game: &GameAttributes) -> Result<(), StoreError> {
        bind_game(sqlx::query(upsert_sql()), game)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_reference(
        &mut self,
        kind: RefKind,
        name: &str,
    ) -> Result<Option<RefId>, StoreError> {
        let sql = format!("SELECT id FROM {} WHERE name = $1", kind.table());
        let id: Option<i64> = sqlx::query_scalar(&sql)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id.map(RefId))
    }

    async fn insert_reference(
        &mut self,
        kind: RefKind,
        name: &str,
    ) -> Result<Option<RefId>, StoreError> {
        // A concurrent uncommitted insert of the same name blocks here until it settles;
        // if it commits, no row is returned and the caller re-reads.
        let sql = format!(
            "INSERT INTO {} (name) VALUES ($1) ON CONFLICT (name) DO NOTHING RETURNING id",
            kind.table()
        );
        let id: Option<i64> = sqlx::query_scalar(&sql)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id.map(RefId))
    }

    async fn associated_ids(
        &mut self,
        app_id: AppId,
        kind: RefKind,
    ) -> Result<BTreeSet<RefId>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE app_id = $1",
            kind.column(),
            kind.junction()
        );
        let ids: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(app_id.0)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(ids.into_iter().map(RefId).collect())
    }

    async fn link(
        &mut self,
        app_id: AppId,
        kind: RefKind,
        ids: &[RefId],
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (app_id, {}) SELECT $1, unnest($2::bigint[]) ON CONFLICT DO NOTHING",
            kind.junction(),
            kind.column()
        );
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
        sqlx::query(&sql)
            .bind(app_id.0)
            .bind(&raw)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn unlink(
        &mut self,
        app_id: AppId,
        kind: RefKind,
        ids: &[RefId],
    ) -> Result<(), StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE app_id = $1 AND {} = ANY($2)",
            kind.junction(),
            kind.column()
        );
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
        sqlx::query(&sql)
            .bind(app_id.0)
            .bind(&raw)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn replace_media(
        &mut self,
        app_id: AppId,
        kind: MediaKind,
        urls: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query(&format!("DELETE FROM {} WHERE app_id = $1", kind.table()))
            .bind(app_id.0)
            .execute(&mut *self.tx)
            .await?;
        if urls.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "INSERT INTO {} (app_id, position, url) \
             SELECT $1, m.ord - 1, m.url FROM unnest($2::text[]) WITH ORDINALITY AS m(url, ord)",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(app_id.0)
            .bind(urls)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>, StoreError> {
        let tx = self.db.pool.begin().await?;
        Ok(Box::new(PgCatalogTx { tx }))
    }

    #[instrument(skip(self))]
    async fn search_games(
        &self,
        filter: &GameFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<GameSummary>, i64), StoreError> {
        let kind = filter.kind();
        let predicate = format!(
            "EXISTS (SELECT 1 FROM {j} x JOIN {t} r ON r.id = x.{c} \
               WHERE x.app_id = g.app_id AND ($1::text IS NULL OR r.name = $1)) \
             AND ($2::float8 IS NULL OR g.price >= $2) \
             AND ($3::float8 IS NULL OR g.price <= $3)",
            j = kind.junction(),
            t = kind.table(),
            c = kind.column()
        );

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM games g WHERE {predicate}"
        ))
        .bind(&filter.name)
        .bind(filter.min_price)
        .bind(filter.max_price)
        .fetch_one(&self.db.pool)
        .await?;

        let rows = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM games g WHERE {predicate} \
             ORDER BY g.name, g.app_id LIMIT $4 OFFSET $5"
        ))
        .bind(&filter.name)
        .bind(filter.min_price)
        .bind(filter.max_price)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db.pool)
        .await?;

        let games = rows
            .iter()
            .map(summary_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((games, total))
    }

    #[instrument(skip(self))]
    async fn list_games(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<GameSummary>, i64), StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games")
            .fetch_one(&self.db.pool)
            .await?;
        let rows = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM games g ORDER BY g.app_id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db.pool)
        .await?;
        let games = rows
            .iter()
            .map(summary_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((games, total))
    }

    #[instrument(skip(self))]
    async fn search_by_name(
        &self,
        term: &str,
        limit: i64,
    ) -> Result<Vec<GameSummary>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM games g \
             WHERE g.name ILIKE '%' || $1 || '%' ESCAPE '\\' \
             ORDER BY g.name, g.app_id LIMIT $2"
        ))
        .bind(escape_like(term))
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        let games = rows
            .iter()
            .map(summary_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(games)
    }

    #[instrument(skip(self))]
    async fn trending_games(
        &self,
        today: NaiveDate,
        limit: i64,
    ) -> Result<Vec<TrendingGame>, StoreError> {
        let rows = sqlx::query(trending_sql())
            .bind(today)
            .bind(limit)
            .fetch_all(&self.db.pool)
            .await?;
        let ranked = rows
            .iter()
            .map(|r| -> Result<TrendingGame, sqlx::Error> {
                Ok(TrendingGame {
                    game: summary_from_row(r)?,
                    score: r.try_get("score")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ranked)
    }

    #[instrument(skip(self))]
    async fn game_metrics(&self, app_id: AppId) -> Result<Option<GameMetrics>, StoreError> {
        let genres = RefKind::Genre.junction();
        let genre_id = RefKind::Genre.column();
        let sql = format!(
            "SELECT g.achievements, \
               (SELECT COUNT(*) FROM {genres} WHERE app_id = g.app_id) AS number_of_genres, \
               (SELECT AVG(o.metacritic_score)::float8 FROM games o \
                 WHERE o.app_id <> g.app_id AND o.metacritic_score IS NOT NULL \
                   AND EXISTS (SELECT 1 FROM {genres} theirs \
                                 JOIN {genres} mine ON mine.{genre_id} = theirs.{genre_id} \
                                WHERE theirs.app_id = o.app_id AND mine.app_id = g.app_id) \
               ) AS average_genre_metacritic \
             FROM games g WHERE g.app_id = $1"
        );
        let Some(row) = sqlx::query(&sql)
            .bind(app_id.0)
            .fetch_optional(&self.db.pool)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(GameMetrics {
            app_id,
            average_genre_metacritic: row.try_get("average_genre_metacritic")?,
            achievement_count: row.try_get("achievements")?,
            number_of_genres: row.try_get("number_of_genres")?,
        }))
    }

    #[instrument(skip(self))]
    async fn game_detail(&self, app_id: AppId) -> Result<Option<GameDetail>, StoreError> {
        let Some(row) = sqlx::query(&format!(
            "SELECT {} FROM games WHERE app_id = $1",
            GAME_COLUMNS.join(", ")
        ))
        .bind(app_id.0)
        .fetch_optional(&self.db.pool)
        .await?
        else {
            return Ok(None);
        };

        let mut detail = GameDetail {
            game: game_from_row(&row)?,
            developers: Vec::new(),
            publishers: Vec::new(),
            categories: Vec::new(),
            genres: Vec::new(),
            tags: Vec::new(),
            screenshots: Vec::new(),
            movies: Vec::new(),
        };
        for kind in RefKind::ALL {
            let sql = format!(
                "SELECT r.name FROM {j} x JOIN {t} r ON r.id = x.{c} WHERE x.app_id = $1 ORDER BY r.name",
                j = kind.junction(),
                t = kind.table(),
                c = kind.column()
            );
            *detail.names_mut(kind) = sqlx::query_scalar(&sql)
                .bind(app_id.0)
                .fetch_all(&self.db.pool)
                .await?;
        }
        for kind in MediaKind::ALL {
            let sql = format!(
                "SELECT url FROM {} WHERE app_id = $1 ORDER BY position",
                kind.table()
            );
            *detail.media_mut(kind) = sqlx::query_scalar(&sql)
                .bind(app_id.0)
                .fetch_all(&self.db.pool)
                .await?;
        }
        Ok(Some(detail))
    }

    #[instrument(skip(self))]
    async fn list_references(&self, kind: RefKind) -> Result<Vec<Reference>, StoreError> {
        let sql = format!(
            "SELECT r.id, r.name FROM {t} r \
             WHERE EXISTS (SELECT 1 FROM {j} x WHERE x.{c} = r.id) ORDER BY r.name",
            j = kind.junction(),
            t = kind.table(),
            c = kind.column()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.db.pool).await?;
        let refs = rows
            .iter()
            .map(|r| -> Result<Reference, sqlx::Error> {
                Ok(Reference {
                    id: RefId(r.try_get("id")?),
                    name: r.try_get("name")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(refs)
    }

    #[instrument(skip(self))]
    async fn delete_game(&self, app_id: AppId) -> Result<bool, StoreError> {
        let mut tx = self.db.pool.begin().await?;
        for kind in RefKind::ALL {
            sqlx::query(&format!("DELETE FROM {} WHERE app_id = $1", kind.junction()))
                .bind(app_id.0)
                .execute(&mut *tx)
                .await?;
        }
        for kind in MediaKind::ALL {
            sqlx::query(&format!("DELETE FROM {} WHERE app_id = $1", kind.table()))
                .bind(app_id.0)
                .execute(&mut *tx)
                .await?;
        }
        let deleted = sqlx::query("DELETE FROM games WHERE app_id = $1")
            .bind(app_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_binds_every_column_once() {
        let sql = upsert_sql();
        assert!(sql.contains(&format!("${}", GAME_COLUMNS.len())));
        assert!(!sql.contains(&format!("${}", GAME_COLUMNS.len() + 1)));
        assert!(!sql.contains("app_id = EXCLUDED.app_id"));
        assert!(sql.contains("median_playtime_two_weeks = EXCLUDED.median_playtime_two_weeks"));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("Half-Life"), "Half-Life");
        assert_eq!(escape_like("100%_done"), "100\\%\\_done");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }

    #[test]
    fn trending_sql_carries_the_shared_weights() {
        let sql = trending_sql();
        assert!(sql.contains("* 0.25"));
        assert!(sql.contains("* 0.35"));
        assert!(sql.contains("/ 3000.0"));
        assert!(sql.contains("make_date(2000, 1, 1)"));
        assert!(sql.contains("> 5"));
        assert!(sql.contains("ORDER BY score DESC, app_id LIMIT $2"));
    }
}
