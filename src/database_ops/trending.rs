//! Weighted ranking behind `GET /api/trending`.
//!
//! A game scores from critic score, review approval and playtime, minus an age
//! penalty that saturates after a year. Postgres evaluates the same formula in SQL
//! (`PgCatalogStore::trending_games`); keep the two in step.

use chrono::{Datelike, NaiveDate};
use std::cmp::Ordering;

use crate::database_ops::models::{GameSummary, TrendingGame};

pub const DEFAULT_TRENDING_LIMIT: i64 = 10;

pub const METACRITIC_WEIGHT: f64 = 0.25;
pub const APPROVAL_WEIGHT: f64 = 0.35;
pub const PLAYTIME_WEIGHT: f64 = 0.25;
pub const AGE_PENALTY: f64 = 0.15;
/// Average playtime (minutes) that earns the full playtime share.
pub const PLAYTIME_CAP_MINUTES: f64 = 3000.0;
/// Games need strictly more reviews than this.
pub const MIN_REVIEWS: i64 = 5;
pub const EARLIEST_YEAR: i32 = 2000;

fn review_counts(game: &GameSummary) -> (f64, f64) {
    let pos = game.positive_reviews.unwrap_or(0).max(0) as f64;
    let neg = game.negative_reviews.unwrap_or(0).max(0) as f64;
    (pos, neg)
}

/// Released since 2000 with enough reviews to rank.
pub fn is_candidate(game: &GameSummary) -> bool {
    let (pos, neg) = review_counts(game);
    pos + neg > MIN_REVIEWS as f64
        && game
            .release_date
            .is_some_and(|d| d.year() >= EARLIEST_YEAR)
}

pub fn trending_score(game: &GameSummary, today: NaiveDate) -> f64 {
    let metacritic = game.metacritic_score.unwrap_or(0) as f64 / 100.0;
    let (pos, neg) = review_counts(game);
    let approval = if pos + neg > 0.0 { pos / (pos + neg) } else { 0.0 };
    let playtime =
        (game.average_playtime_forever.unwrap_or(0) as f64 / PLAYTIME_CAP_MINUTES).min(1.0);
    let age = game
        .release_date
        .map_or(1.0, |d| ((today - d).num_days() as f64 / 365.0).min(1.0));

    metacritic * METACRITIC_WEIGHT + approval * APPROVAL_WEIGHT + playtime * PLAYTIME_WEIGHT
        - age * AGE_PENALTY
}

/// Candidates with a positive score, best first; ties go to the lower `app_id`.
pub fn rank<'a, I>(games: I, today: NaiveDate, limit: i64) -> Vec<TrendingGame>
where
    I: IntoIterator<Item = &'a GameSummary>,
{
    let mut ranked: Vec<TrendingGame> = games
        .into_iter()
        .filter(|g| is_candidate(g))
        .map(|g| TrendingGame {
            score: trending_score(g, today),
            game: g.clone(),
        })
        .filter(|t| t.score > 0.0)
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.game.app_id.cmp(&b.game.app_id))
    });
    ranked.truncate(limit.max(0) as usize);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::models::AppId;

    fn summary(app_id: i64, released: &str, pos: i64, neg: i64) -> GameSummary {
        GameSummary {
            app_id: AppId(app_id),
            name: format!("Game {app_id}"),
            release_date: NaiveDate::parse_from_str(released, "%Y-%m-%d").ok(),
            price: 0.0,
            header_image: None,
            metacritic_score: Some(80),
            positive_reviews: Some(pos),
            negative_reviews: Some(neg),
            average_playtime_forever: Some(1500),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn score_combines_weights() {
        // 0.8*0.25 + 0.75*0.35 + 0.5*0.25 - 1.0*0.15
        let old = summary(1, "2010-01-01", 75, 25);
        assert!((trending_score(&old, today()) - 0.4375).abs() < 1e-9);

        // Released half a year ago: only half the age penalty.
        let fresh = summary(2, "2024-01-01", 75, 25);
        let age = (today() - NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).num_days() as f64;
        let expected = 0.5875 - age / 365.0 * AGE_PENALTY;
        assert!((trending_score(&fresh, today()) - expected).abs() < 1e-9);
    }

    #[test]
    fn candidates_need_reviews_and_a_modern_release() {
        assert!(is_candidate(&summary(1, "2010-01-01", 5, 1)));
        assert!(!is_candidate(&summary(2, "2010-01-01", 4, 1)));
        assert!(!is_candidate(&summary(3, "1999-12-31", 50, 1)));
        let mut undated = summary(4, "2010-01-01", 50, 1);
        undated.release_date = None;
        assert!(!is_candidate(&undated));
    }

    #[test]
    fn ranking_orders_filters_and_limits() {
        let mut weak = summary(9, "2010-01-01", 1, 99);
        weak.metacritic_score = None;
        weak.average_playtime_forever = Some(0);
        let games = vec![
            summary(3, "2010-01-01", 50, 50),
            summary(1, "2010-01-01", 90, 10),
            summary(2, "2010-01-01", 90, 10),
            weak,
        ];

        let ranked = rank(&games, today(), 10);
        let ids: Vec<i64> = ranked.iter().map(|t| t.game.app_id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(rank(&games, today(), 1).len(), 1);
    }
}
