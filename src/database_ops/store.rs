//! Storage seam between the ingestion engine and a concrete backend.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeSet;

use crate::database_ops::error::StoreError;
use crate::database_ops::models::{
    AppId, GameAttributes, GameDetail, GameMetrics, GameSummary, MediaKind, RefId, RefKind,
    Reference, TrendingGame,
};

/// Filter for the paginated read path. `None` bounds are unbounded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameFilter {
    pub kind: Option<RefKind>,
    pub name: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl GameFilter {
    pub fn kind(&self) -> RefKind {
        self.kind.unwrap_or(RefKind::Genre)
    }

    pub fn matches_price(&self, price: f64) -> bool {
        self.min_price.map_or(true, |min| price >= min)
            && self.max_price.map_or(true, |max| price <= max)
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Opens the transaction scope for one source row.
    async fn begin(&self) -> Result<Box<dyn CatalogTx>, StoreError>;

    /// Games associated with at least one entity of `filter.kind()` (named `filter.name`
    /// when set), ordered by name, plus the total match count.
    async fn search_games(
        &self,
        filter: &GameFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<GameSummary>, i64), StoreError>;

    /// Every game ordered by `app_id`, plus the total game count.
    async fn list_games(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<GameSummary>, i64), StoreError>;

    /// Games whose name contains `term`, ignoring case, ordered by name.
    async fn search_by_name(
        &self,
        term: &str,
        limit: i64,
    ) -> Result<Vec<GameSummary>, StoreError>;

    /// Top games by [`trending_score`](crate::database_ops::trending::trending_score)
    /// as of `today`.
    async fn trending_games(
        &self,
        today: NaiveDate,
        limit: i64,
    ) -> Result<Vec<TrendingGame>, StoreError>;

    async fn game_detail(&self, app_id: AppId) -> Result<Option<GameDetail>, StoreError>;

    /// `None` when the game does not exist.
    async fn game_metrics(&self, app_id: AppId) -> Result<Option<GameMetrics>, StoreError>;

    /// Entities of `kind` attached to at least one game, ordered by name.
    async fn list_references(&self, kind: RefKind) -> Result<Vec<Reference>, StoreError>;

    /// Removes a game after severing its junction and media rows. Returns whether it existed.
    async fn delete_game(&self, app_id: AppId) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Writes for one row. Dropping without `commit` discards everything.
#[async_trait]
pub trait CatalogTx: Send {
    async fn upsert_game(&mut self, game: &GameAttributes) -> Result<(), StoreError>;

    async fn find_reference(
        &mut self,
        kind: RefKind,
        name: &str,
    ) -> Result<Option<RefId>, StoreError>;

    /// Inserts a new name. `Ok(None)` means the uniqueness constraint already holds it.
    async fn insert_reference(
        &mut self,
        kind: RefKind,
        name: &str,
    ) -> Result<Option<RefId>, StoreError>;

    async fn associated_ids(
        &mut self,
        app_id: AppId,
        kind: RefKind,
    ) -> Result<BTreeSet<RefId>, StoreError>;

    async fn link(&mut self, app_id: AppId, kind: RefKind, ids: &[RefId])
        -> Result<(), StoreError>;

    async fn unlink(
        &mut self,
        app_id: AppId,
        kind: RefKind,
        ids: &[RefId],
    ) -> Result<(), StoreError>;

    /// Replaces the ordered media list wholesale.
    async fn replace_media(
        &mut self,
        app_id: AppId,
        kind: MediaKind,
        urls: &[String],
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
