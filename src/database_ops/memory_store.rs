//! Process-local catalog backend.
//!
//! Transactions are serialized behind one async mutex and undone from a journal on
//! rollback or drop, so the observable semantics match one Postgres row transaction
//! at a time. Powers `catalog ingest --dry-run` and the engine tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::database_ops::error::StoreError;
use crate::database_ops::models::{
    AppId, GameAttributes, GameDetail, GameMetrics, GameSummary, MediaKind, RefId, RefKind,
    Reference, TrendingGame,
};
use crate::database_ops::store::{CatalogStore, CatalogTx, GameFilter};
use crate::database_ops::trending;

#[derive(Debug, Default)]
struct RefTable {
    by_name: HashMap<String, RefId>,
    names: BTreeMap<RefId, String>,
    last_id: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    games: BTreeMap<AppId, GameAttributes>,
    references: HashMap<RefKind, RefTable>,
    links: HashMap<(AppId, RefKind), BTreeSet<RefId>>,
    media: HashMap<(AppId, MediaKind), Vec<String>>,
    media_faults: HashMap<AppId, (StoreError, usize)>,
}

impl MemoryState {
    fn table(&mut self, kind: RefKind) -> &mut RefTable {
        self.references.entry(kind).or_default()
    }

    fn reference_name(&self, kind: RefKind, id: RefId) -> Option<&str> {
        self.references
            .get(&kind)
            .and_then(|t| t.names.get(&id))
            .map(String::as_str)
    }

    fn linked_names(&self, app_id: AppId, kind: RefKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .links
            .get(&(app_id, kind))
            .into_iter()
            .flatten()
            .filter_map(|id| self.reference_name(kind, *id).map(str::to_string))
            .collect();
        names.sort();
        names
    }

    fn require_game(&self, app_id: AppId, table: &str) -> Result<(), StoreError> {
        if self.games.contains_key(&app_id) {
            Ok(())
        } else {
            Err(StoreError::Constraint(format!(
                "{table}.app_id {app_id} has no games row"
            )))
        }
    }
}

enum Undo {
    Game(AppId, Option<GameAttributes>),
    Reference(RefKind, String, RefId, i64),
    Links(AppId, RefKind, Option<BTreeSet<RefId>>),
    Media(AppId, MediaKind, Option<Vec<String>>),
}

#[derive(Clone, Default)]
pub struct MemoryCatalogStore {
    state: Arc<Mutex<MemoryState>>,
    offline: Arc<AtomicBool>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn game_count(&self) -> usize {
        self.state.lock().await.games.len()
    }

    pub async fn reference_count(&self, kind: RefKind) -> usize {
        self.state
            .lock()
            .await
            .references
            .get(&kind)
            .map_or(0, |t| t.names.len())
    }

    pub async fn link_count(&self, kind: RefKind) -> usize {
        self.state
            .lock()
            .await
            .links
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|(_, ids)| ids.len())
            .sum()
    }
}

#[cfg(test)]
impl MemoryCatalogStore {
    /// Makes every later `begin`/`ping` fail as if the server went away.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next `times` calls to `replace_media` for `app_id` fail, after the game
    /// and its links were written.
    pub async fn fail_media_for(&self, app_id: AppId, error: StoreError, times: usize) {
        self.state
            .lock()
            .await
            .media_faults
            .insert(app_id, (error, times));
    }

    pub async fn game(&self, app_id: AppId) -> Option<GameAttributes> {
        self.state.lock().await.games.get(&app_id).cloned()
    }

    pub async fn linked_names(&self, app_id: AppId, kind: RefKind) -> Vec<String> {
        self.state.lock().await.linked_names(app_id, kind)
    }

    pub async fn media(&self, app_id: AppId, kind: MediaKind) -> Vec<String> {
        self.state
            .lock()
            .await
            .media
            .get(&(app_id, kind))
            .cloned()
            .unwrap_or_default()
    }
}

pub struct MemoryCatalogTx {
    state: OwnedMutexGuard<MemoryState>,
    journal: Vec<Undo>,
}

impl MemoryCatalogTx {
    fn undo_all(&mut self) {
        while let Some(entry) = self.journal.pop() {
            let state = &mut *self.state;
            match entry {
                Undo::Game(app_id, previous) => match previous {
                    Some(game) => {
                        state.games.insert(app_id, game);
                    }
                    None => {
                        state.games.remove(&app_id);
                    }
                },
                Undo::Reference(kind, name, id, last_id) => {
                    let table = state.table(kind);
                    table.by_name.remove(&name);
                    table.names.remove(&id);
                    table.last_id = last_id;
                }
                Undo::Links(app_id, kind, previous) => match previous {
                    Some(ids) => {
                        state.links.insert((app_id, kind), ids);
                    }
                    None => {
                        state.links.remove(&(app_id, kind));
                    }
                },
                Undo::Media(app_id, kind, previous) => match previous {
                    Some(urls) => {
                        state.media.insert((app_id, kind), urls);
                    }
                    None => {
                        state.media.remove(&(app_id, kind));
                    }
                },
            }
        }
    }

    fn save_links(&mut self, app_id: AppId, kind: RefKind) {
        let previous = self.state.links.get(&(app_id, kind)).cloned();
        self.journal.push(Undo::Links(app_id, kind, previous));
    }
}

impl Drop for MemoryCatalogTx {
    fn drop(&mut self) {
        self.undo_all();
    }
}

#[async_trait]
impl CatalogTx for MemoryCatalogTx {
    async fn upsert_game(&mut self, game: &GameAttributes) -> Result<(), StoreError> {
        let previous = self.state.games.insert(game.app_id, game.clone());
        self.journal.push(Undo::Game(game.app_id, previous));
        Ok(())
    }

    async fn find_reference(
        &mut self,
        kind: RefKind,
        name: &str,
    ) -> Result<Option<RefId>, StoreError> {
        Ok(self
            .state
            .references
            .get(&kind)
            .and_then(|t| t.by_name.get(name))
            .copied())
    }

    async fn insert_reference(
        &mut self,
        kind: RefKind,
        name: &str,
    ) -> Result<Option<RefId>, StoreError> {
        let table = self.state.table(kind);
        if table.by_name.contains_key(name) {
            return Ok(None);
        }
        let last_id = table.last_id;
        let id = RefId(last_id + 1);
        table.last_id = id.0;
        table.by_name.insert(name.to_string(), id);
        table.names.insert(id, name.to_string());
        self.journal
            .push(Undo::Reference(kind, name.to_string(), id, last_id));
        Ok(Some(id))
    }

    async fn associated_ids(
        &mut self,
        app_id: AppId,
        kind: RefKind,
    ) -> Result<BTreeSet<RefId>, StoreError> {
        Ok(self
            .state
            .links
            .get(&(app_id, kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn link(
        &mut self,
        app_id: AppId,
        kind: RefKind,
        ids: &[RefId],
    ) -> Result<(), StoreError> {
        self.state.require_game(app_id, kind.junction())?;
        if let Some(missing) = ids
            .iter()
            .find(|id| self.state.reference_name(kind, **id).is_none())
        {
            return Err(StoreError::Constraint(format!(
                "{}.{} {} has no {} row",
                kind.junction(),
                kind.column(),
                missing.0,
                kind.table()
            )));
        }
        self.save_links(app_id, kind);
        self.state
            .links
            .entry((app_id, kind))
            .or_default()
            .extend(ids.iter().copied());
        Ok(())
    }

    async fn unlink(
        &mut self,
        app_id: AppId,
        kind: RefKind,
        ids: &[RefId],
    ) -> Result<(), StoreError> {
        self.save_links(app_id, kind);
        if let Some(set) = self.state.links.get_mut(&(app_id, kind)) {
            for id in ids {
                set.remove(id);
            }
            if set.is_empty() {
                self.state.links.remove(&(app_id, kind));
            }
        }
        Ok(())
    }

    async fn replace_media(
        &mut self,
        app_id: AppId,
        kind: MediaKind,
        urls: &[String],
    ) -> Result<(), StoreError> {
        if let Some((err, remaining)) = self.state.media_faults.get_mut(&app_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(err.clone());
            }
        }
        self.state.require_game(app_id, kind.table())?;
        let previous = if urls.is_empty() {
            self.state.media.remove(&(app_id, kind))
        } else {
            self.state.media.insert((app_id, kind), urls.to_vec())
        };
        self.journal.push(Undo::Media(app_id, kind, previous));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        this.journal.clear();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        this.undo_all();
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("memory store is offline".into()));
        }
        let state = Arc::clone(&self.state).lock_owned().await;
        Ok(Box::new(MemoryCatalogTx {
            state,
            journal: Vec::new(),
        }))
    }

    async fn search_games(
        &self,
        filter: &GameFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<GameSummary>, i64), StoreError> {
        let state = self.state.lock().await;
        let kind = filter.kind();
        let mut hits: Vec<&GameAttributes> = state
            .games
            .values()
            .filter(|g| filter.matches_price(g.price))
            .filter(|g| {
                let linked = state.links.get(&(g.app_id, kind));
                match filter.name.as_deref() {
                    None => linked.is_some_and(|ids| !ids.is_empty()),
                    Some(name) => linked.into_iter().flatten().any(|id| {
                        state.reference_name(kind, *id) == Some(name)
                    }),
                }
            })
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name).then(a.app_id.cmp(&b.app_id)));

        let total = hits.len() as i64;
        let page = hits
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(GameSummary::from_attributes)
            .collect();
        Ok((page, total))
    }

    async fn list_games(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<GameSummary>, i64), StoreError> {
        let state = self.state.lock().await;
        let page = state
            .games
            .values()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(GameSummary::from_attributes)
            .collect();
        Ok((page, state.games.len() as i64))
    }

    async fn search_by_name(
        &self,
        term: &str,
        limit: i64,
    ) -> Result<Vec<GameSummary>, StoreError> {
        let needle = term.to_lowercase();
        let state = self.state.lock().await;
        let mut hits: Vec<&GameAttributes> = state
            .games
            .values()
            .filter(|g| g.name.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name).then(a.app_id.cmp(&b.app_id)));
        Ok(hits
            .into_iter()
            .take(limit.max(0) as usize)
            .map(GameSummary::from_attributes)
            .collect())
    }

    async fn trending_games(
        &self,
        today: NaiveDate,
        limit: i64,
    ) -> Result<Vec<TrendingGame>, StoreError> {
        let state = self.state.lock().await;
        let summaries: Vec<GameSummary> = state
            .games
            .values()
            .map(GameSummary::from_attributes)
            .collect();
        Ok(trending::rank(&summaries, today, limit))
    }

    async fn game_metrics(&self, app_id: AppId) -> Result<Option<GameMetrics>, StoreError> {
        let state = self.state.lock().await;
        let Some(game) = state.games.get(&app_id) else {
            return Ok(None);
        };
        let empty = BTreeSet::new();
        let genres = state
            .links
            .get(&(app_id, RefKind::Genre))
            .unwrap_or(&empty);

        let scores: Vec<f64> = state
            .games
            .values()
            .filter(|other| other.app_id != app_id)
            .filter(|other| {
                state
                    .links
                    .get(&(other.app_id, RefKind::Genre))
                    .is_some_and(|theirs| !theirs.is_disjoint(genres))
            })
            .filter_map(|other| other.metacritic_score)
            .map(|score| score as f64)
            .collect();
        let average_genre_metacritic =
            (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

        Ok(Some(GameMetrics {
            app_id,
            average_genre_metacritic,
            achievement_count: game.achievements,
            number_of_genres: genres.len() as i64,
        }))
    }

    async fn game_detail(&self, app_id: AppId) -> Result<Option<GameDetail>, StoreError> {
        let state = self.state.lock().await;
        let Some(game) = state.games.get(&app_id) else {
            return Ok(None);
        };
        let mut detail = GameDetail {
            game: game.clone(),
            developers: Vec::new(),
            publishers: Vec::new(),
            categories: Vec::new(),
            genres: Vec::new(),
            tags: Vec::new(),
            screenshots: Vec::new(),
            movies: Vec::new(),
        };
        for kind in RefKind::ALL {
            *detail.names_mut(kind) = state.linked_names(app_id, kind);
        }
        for kind in MediaKind::ALL {
            if let Some(urls) = state.media.get(&(app_id, kind)) {
                *detail.media_mut(kind) = urls.clone();
            }
        }
        Ok(Some(detail))
    }

    async fn list_references(&self, kind: RefKind) -> Result<Vec<Reference>, StoreError> {
        let state = self.state.lock().await;
        let used: BTreeSet<RefId> = state
            .links
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        let mut out: Vec<Reference> = used
            .into_iter()
            .filter_map(|id| {
                state.reference_name(kind, id).map(|name| Reference {
                    id,
                    name: name.to_string(),
                })
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete_game(&self, app_id: AppId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.games.contains_key(&app_id) {
            return Ok(false);
        }
        for kind in RefKind::ALL {
            state.links.remove(&(app_id, kind));
        }
        for kind in MediaKind::ALL {
            state.media.remove(&(app_id, kind));
        }
        state.games.remove(&app_id);
        Ok(true)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("memory store is offline".into()));
        }
        Ok(())
    }
}
