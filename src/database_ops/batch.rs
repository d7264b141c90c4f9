use futures::{future, stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database_ops::error::{IngestError, RecordError};
use crate::database_ops::ingest_row::{RowIngestor, RowOutcome};
use crate::database_ops::models::{AppId, GameRecord, RawGameRecord};

/// What happens when one batch carries several rows for the same `app_id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// The last row in input order determines the stored game.
    #[default]
    LastWins,
    FirstWins,
    /// Rows after the first for a key are reported as failures.
    Reject,
}

impl DuplicatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DuplicatePolicy::LastWins => "last-wins",
            DuplicatePolicy::FirstWins => "first-wins",
            DuplicatePolicy::Reject => "reject",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "last-wins" | "last" => Ok(DuplicatePolicy::LastWins),
            "first-wins" | "first" => Ok(DuplicatePolicy::FirstWins),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(format!(
                "unknown duplicate policy {other:?} (expected last-wins, first-wins or reject)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Rows in flight at once; 1 processes the input strictly in order.
    pub concurrency: usize,
    /// Emit an `info` progress line every N finished rows; 0 disables it.
    pub progress_every: usize,
    pub duplicates: DuplicatePolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            progress_every: 100,
            duplicates: DuplicatePolicy::LastWins,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Cancelled,
    Fatal { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows committed.
    pub processed: usize,
    /// Rows that failed, including a fatal one.
    pub errors: usize,
    /// Duplicate rows dropped by the policy without being attempted.
    pub skipped: usize,
    pub termination: Termination,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.termination == Termination::Completed
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} errors={} skipped={}",
            self.processed, self.errors, self.skipped
        )?;
        match &self.termination {
            Termination::Completed => f.write_str(" (completed)"),
            Termination::Cancelled => f.write_str(" (cancelled)"),
            Termination::Fatal { reason } => write!(f, " (stopped early: {reason})"),
        }
    }
}

/// Per-row signal handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub finished: usize,
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
}

/// A row after duplicate planning: either written, or failed up front.
#[derive(Debug)]
pub enum PlannedRow {
    Ingest(RawGameRecord),
    Rejected {
        app_id: Option<AppId>,
        error: RecordError,
    },
}

/// Applies `policy` to the input. Returns the rows to run and how many were skipped.
///
/// Under `LastWins` with parallel workers only the last valid row per key is kept, so
/// the stored values do not depend on scheduling and match a sequential run. Invalid
/// rows and rows without a usable key are never deduplicated; they fail on their own.
pub fn plan_rows<I>(rows: I, policy: DuplicatePolicy, parallel: bool) -> (Vec<PlannedRow>, usize)
where
    I: IntoIterator<Item = Result<RawGameRecord, RecordError>>,
{
    let rows: Vec<PlannedRow> = rows
        .into_iter()
        .map(|row| match row {
            Ok(raw) => PlannedRow::Ingest(raw),
            Err(error) => PlannedRow::Rejected { app_id: None, error },
        })
        .collect();

    let key_of = |row: &PlannedRow| match row {
        PlannedRow::Ingest(raw) => raw.key(),
        PlannedRow::Rejected { .. } => None,
    };

    match policy {
        DuplicatePolicy::LastWins if !parallel => (rows, 0),
        DuplicatePolicy::LastWins => {
            // A row that cannot be stored must not displace an earlier valid one, so
            // rows are validated before the last row per key is chosen.
            let rows: Vec<PlannedRow> = rows
                .into_iter()
                .map(|row| match row {
                    PlannedRow::Ingest(raw) => match GameRecord::try_from(raw.clone()) {
                        Ok(_) => PlannedRow::Ingest(raw),
                        Err(error) => PlannedRow::Rejected {
                            app_id: raw.key(),
                            error,
                        },
                    },
                    rejected => rejected,
                })
                .collect();
            let last: HashMap<AppId, usize> = rows
                .iter()
                .enumerate()
                .filter_map(|(idx, row)| key_of(row).map(|k| (k, idx)))
                .collect();
            let before = rows.len();
            let kept: Vec<PlannedRow> = rows
                .into_iter()
                .enumerate()
                .filter(|(idx, row)| key_of(row).map_or(true, |k| last.get(&k) == Some(idx)))
                .map(|(_, row)| row)
                .collect();
            let skipped = before - kept.len();
            (kept, skipped)
        }
        DuplicatePolicy::FirstWins => {
            let mut seen = HashSet::new();
            let before = rows.len();
            let kept: Vec<PlannedRow> = rows
                .into_iter()
                .filter(|row| key_of(row).map_or(true, |k| seen.insert(k)))
                .collect();
            let skipped = before - kept.len();
            (kept, skipped)
        }
        DuplicatePolicy::Reject => {
            let mut seen = HashSet::new();
            let planned = rows
                .into_iter()
                .map(|row| match key_of(&row) {
                    Some(k) if !seen.insert(k) => PlannedRow::Rejected {
                        app_id: Some(k),
                        error: RecordError::Duplicate(k.0),
                    },
                    _ => row,
                })
                .collect();
            (planned, 0)
        }
    }
}

type ProgressFn = Box<dyn Fn(&Progress) + Send + Sync>;

/// Drives the row ingestor over one bounded input.
///
/// Row failures are tallied and never stop the run. A fatal storage error or the
/// cancel flag stops new rows from starting; rows already in flight finish (commit or
/// roll back) on their own and nothing committed is undone.
pub struct BatchCoordinator {
    ingestor: RowIngestor,
    options: BatchOptions,
    cancel: Arc<AtomicBool>,
    on_progress: Option<ProgressFn>,
}

impl BatchCoordinator {
    pub fn new(ingestor: RowIngestor, options: BatchOptions) -> Self {
        Self {
            ingestor,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
            on_progress: None,
        }
    }

    /// Flag that, once set, cancels the run. Share it with a signal handler.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub async fn run<I>(&self, rows: I) -> BatchReport
    where
        I: IntoIterator<Item = Result<RawGameRecord, RecordError>>,
    {
        let concurrency = self.options.concurrency.max(1);
        let (planned, skipped) = plan_rows(rows, self.options.duplicates, concurrency > 1);
        let total = planned.len();
        if skipped > 0 {
            info!(skipped, policy = %self.options.duplicates, "duplicate rows dropped");
        }

        let halted = AtomicBool::new(false);
        let mut outcomes = stream::iter(planned)
            .take_while(|_| {
                future::ready(
                    !halted.load(Ordering::SeqCst) && !self.cancel.load(Ordering::SeqCst),
                )
            })
            .map(|row| async move {
                match row {
                    PlannedRow::Ingest(raw) => self.ingestor.ingest(raw).await,
                    PlannedRow::Rejected { app_id, error } => {
                        warn!(app_id = ?app_id.map(|k| k.0), error = %error, "row rejected");
                        RowOutcome::Failed {
                            app_id,
                            error: IngestError::Record(error),
                        }
                    }
                }
            })
            .buffer_unordered(concurrency);

        let mut progress = Progress {
            finished: 0,
            total,
            processed: 0,
            errors: 0,
        };
        let mut fatal: Option<String> = None;

        while let Some(outcome) = outcomes.next().await {
            progress.finished += 1;
            if outcome.is_ok() {
                progress.processed += 1;
            } else {
                progress.errors += 1;
            }
            if let Some(err) = outcome.fatal_error() {
                halted.store(true, Ordering::SeqCst);
                if fatal.is_none() {
                    error!(
                        app_id = ?outcome.app_id().map(|k| k.0),
                        error = %err,
                        "fatal storage error; no further rows will start"
                    );
                    fatal = Some(err.to_string());
                }
            }
            if let Some(cb) = &self.on_progress {
                cb(&progress);
            }
            let every = self.options.progress_every;
            if every > 0 && progress.finished % every == 0 {
                info!(
                    finished = progress.finished,
                    total,
                    processed = progress.processed,
                    errors = progress.errors,
                    "ingest progress"
                );
            }
        }

        let termination = match fatal {
            Some(reason) => Termination::Fatal { reason },
            None if progress.finished < total => Termination::Cancelled,
            None => Termination::Completed,
        };
        let report = BatchReport {
            processed: progress.processed,
            errors: progress.errors,
            skipped,
            termination,
        };
        info!(%report, "batch finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::error::StoreError;
    use crate::database_ops::memory_store::MemoryCatalogStore;
    use crate::database_ops::models::RefKind;
    use crate::database_ops::resolver::ReferenceCache;
    use crate::database_ops::store::CatalogStore;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn row(app_id: &str, name: &str, tags: &str) -> Result<RawGameRecord, RecordError> {
        Ok(RawGameRecord {
            app_id: Some(app_id.into()),
            name: Some(name.into()),
            tags: Some(tags.into()),
            developers: Some("Valve".into()),
            ..Default::default()
        })
    }

    fn coordinator(store: &MemoryCatalogStore, options: BatchOptions) -> BatchCoordinator {
        let ingestor = RowIngestor::new(Arc::new(store.clone()))
            .with_cache(Arc::new(ReferenceCache::new()));
        BatchCoordinator::new(ingestor, options)
    }

    fn parallel(concurrency: usize) -> BatchOptions {
        BatchOptions {
            concurrency,
            ..BatchOptions::default()
        }
    }

    #[tokio::test]
    async fn malformed_row_is_isolated() {
        let store = MemoryCatalogStore::new();
        let rows = vec![
            row("1", "One", "A"),
            row("2", "Two", "B"),
            row("abc", "Broken", "C"),
            row("4", "Four", "A,B"),
            row("5", "Five", ""),
        ];
        let report = coordinator(&store, BatchOptions::default()).run(rows).await;
        assert_eq!(
            report,
            BatchReport {
                processed: 4,
                errors: 1,
                skipped: 0,
                termination: Termination::Completed,
            }
        );
        assert_eq!(store.game_count().await, 4);
        for app in [1, 2, 4, 5] {
            assert!(store.game(AppId(app)).await.is_some());
        }
    }

    #[tokio::test]
    async fn unreadable_source_record_counts_as_row_error() {
        let store = MemoryCatalogStore::new();
        let rows = vec![
            row("1", "One", "A"),
            Err(RecordError::Unreadable("line 3: wrong field count".into())),
        ];
        let report = coordinator(&store, BatchOptions::default()).run(rows).await;
        assert_eq!((report.processed, report.errors), (1, 1));
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn shared_names_are_deduplicated_across_workers() {
        let store = MemoryCatalogStore::new();
        let rows: Vec<_> = (1..=40)
            .map(|i| row(&i.to_string(), &format!("Game {i}"), "Indie,Action"))
            .collect();
        let report = coordinator(&store, parallel(8)).run(rows).await;
        assert_eq!(report.processed, 40);
        assert_eq!(store.reference_count(RefKind::Developer).await, 1);
        assert_eq!(store.reference_count(RefKind::Tag).await, 2);
        assert_eq!(store.link_count(RefKind::Tag).await, 80);
    }

    #[tokio::test]
    async fn rerunning_a_batch_changes_nothing() {
        let store = MemoryCatalogStore::new();
        let rows = || vec![row("1", "One", "A,B"), row("2", "Two", "B,C")];
        coordinator(&store, BatchOptions::default()).run(rows()).await;
        let before = store.game_detail(AppId(2)).await.unwrap();

        let report = coordinator(&store, BatchOptions::default()).run(rows()).await;
        assert_eq!(report.processed, 2);
        assert_eq!(store.game_detail(AppId(2)).await.unwrap(), before);
        assert_eq!(store.reference_count(RefKind::Tag).await, 3);
        assert_eq!(store.link_count(RefKind::Tag).await, 4);
    }

    #[tokio::test]
    async fn later_batch_reconciles_tag_set() {
        let store = MemoryCatalogStore::new();
        coordinator(&store, BatchOptions::default())
            .run(vec![row("9", "Shifty", "A,B,C")])
            .await;
        coordinator(&store, BatchOptions::default())
            .run(vec![row("9", "Shifty", "B,D")])
            .await;
        assert_eq!(
            store.linked_names(AppId(9), RefKind::Tag).await,
            vec!["B".to_string(), "D".to_string()]
        );
    }

    #[tokio::test]
    async fn fatal_error_stops_the_run() {
        let store = MemoryCatalogStore::new();
        let rows = vec![row("1", "One", "A"), row("2", "Two", "B"), row("3", "Three", "C")];
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let go_offline = store.clone();
        // Take the store down once the first row has committed.
        let coordinator = coordinator(&store, BatchOptions::default()).on_progress(move |p| {
            seen.store(p.finished, Ordering::SeqCst);
            if p.finished == 1 {
                go_offline.set_offline(true);
            }
        });
        let report = coordinator.run(rows).await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.errors, 1);
        assert!(matches!(report.termination, Termination::Fatal { .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(store.game_count().await, 1);
    }

    #[tokio::test]
    async fn cancellation_stops_new_rows() {
        let store = MemoryCatalogStore::new();
        let rows: Vec<_> = (1..=5)
            .map(|i| row(&i.to_string(), &format!("G{i}"), "A"))
            .collect();
        let coordinator = coordinator(&store, BatchOptions::default());
        let cancel = coordinator.cancel_flag();
        let coordinator = coordinator.on_progress(move |p| {
            if p.finished == 2 {
                cancel.store(true, Ordering::SeqCst);
            }
        });
        let report = coordinator.run(rows).await;
        assert_eq!(report.termination, Termination::Cancelled);
        assert_eq!(report.processed, 2);
        assert_eq!(store.game_count().await, 2);
    }

    #[tokio::test]
    async fn duplicate_policies() {
        let rows = || {
            vec![
                row("7", "First", "A"),
                row("8", "Other", "A"),
                row("7", "Second", "B"),
            ]
        };

        let store = MemoryCatalogStore::new();
        let report = coordinator(&store, BatchOptions::default()).run(rows()).await;
        assert_eq!((report.processed, report.skipped), (3, 0));
        assert_eq!(store.game(AppId(7)).await.unwrap().name, "Second");

        let store = MemoryCatalogStore::new();
        let report = coordinator(&store, parallel(4)).run(rows()).await;
        assert_eq!((report.processed, report.skipped), (2, 1));
        assert_eq!(store.game(AppId(7)).await.unwrap().name, "Second");

        let store = MemoryCatalogStore::new();
        let options = BatchOptions {
            duplicates: DuplicatePolicy::FirstWins,
            ..parallel(4)
        };
        let report = coordinator(&store, options).run(rows()).await;
        assert_eq!((report.processed, report.skipped), (2, 1));
        assert_eq!(store.game(AppId(7)).await.unwrap().name, "First");

        let store = MemoryCatalogStore::new();
        let options = BatchOptions {
            duplicates: DuplicatePolicy::Reject,
            ..BatchOptions::default()
        };
        let report = coordinator(&store, options).run(rows()).await;
        assert_eq!((report.processed, report.errors, report.skipped), (2, 1, 0));
        assert_eq!(store.game(AppId(7)).await.unwrap().name, "First");
    }

    #[tokio::test]
    async fn invalid_last_row_does_not_displace_valid_one() {
        let rows = || {
            vec![
                Ok(RawGameRecord {
                    app_id: Some("7".into()),
                    name: Some("Good".into()),
                    price: Some("1.0".into()),
                    ..Default::default()
                }),
                Ok(RawGameRecord {
                    app_id: Some("7".into()),
                    name: Some("Bad".into()),
                    price: Some("not-a-price".into()),
                    ..Default::default()
                }),
            ]
        };

        let sequential = MemoryCatalogStore::new();
        let seq_report = coordinator(&sequential, BatchOptions::default())
            .run(rows())
            .await;
        let concurrent = MemoryCatalogStore::new();
        let par_report = coordinator(&concurrent, parallel(4)).run(rows()).await;

        assert_eq!(par_report, seq_report);
        assert_eq!((par_report.processed, par_report.errors), (1, 1));
        assert_eq!(
            concurrent.game_detail(AppId(7)).await.unwrap(),
            sequential.game_detail(AppId(7)).await.unwrap()
        );
        assert_eq!(concurrent.game(AppId(7)).await.unwrap().name, "Good");
    }

    #[test]
    fn policy_parses_from_flags() {
        assert_eq!("last-wins".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::LastWins));
        assert_eq!("FIRST_WINS".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::FirstWins));
        assert_eq!(" reject ".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Reject));
        assert!("newest".parse::<DuplicatePolicy>().is_err());
    }

    #[test]
    fn report_renders_termination() {
        let report = BatchReport {
            processed: 3,
            errors: 1,
            skipped: 0,
            termination: Termination::Fatal {
                reason: StoreError::Connection("reset".into()).to_string(),
            },
        };
        assert_eq!(
            report.to_string(),
            "processed=3 errors=1 skipped=0 (stopped early: storage connection lost: reset)"
        );
    }
}
