//! Shared dashboard runtime: refresh, the action form and completion.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDate, Utc};
use kamdash_core::notes::{self, CompletionMarker};
use kamdash_core::views::DashboardView;
use kamdash_storage::{CompletedIdsStore, HttpClientConfig, HttpFetcher};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::fetch::{fixture_root, AirtableRecordSource, FixtureRecordSource, RecordSource};
use crate::store::{Alert, DashboardStore};
use crate::writer::{DryRunBackend, NotesBackend, NotesWriter, WeekdayBackend, WriteError, WriteOutcome};
use crate::{load_registry_or_builtin, SyncConfig};

pub const SNOOZE_NEEDS_COMMENT: &str = "Please add a comment to snooze this item.";
pub const EMPTY_ACTION: &str = "Please add a comment or select a snooze date.";

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("no actionable item with id {0}")]
    NotFound(String),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("background write task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    pub completion_marker: CompletionMarker,
    /// Wait between the optimistic hide and the completion write.
    pub complete_delay: Duration,
    /// Wait between a successful completion and the silent refresh.
    pub post_write_refresh: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            completion_marker: CompletionMarker::default(),
            complete_delay: Duration::from_millis(4000),
            post_write_refresh: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub items: usize,
    pub warnings: Vec<String>,
    pub pruned_completed: usize,
    pub pruned_handled: usize,
}

/// A write running in the background.
#[derive(Debug)]
pub enum Submission {
    Started(JoinHandle<Result<WriteOutcome, WriteError>>),
    /// A completion for the same id is still in flight.
    AlreadyInFlight,
}

impl Submission {
    pub fn is_started(&self) -> bool {
        matches!(self, Submission::Started(_))
    }

    pub async fn wait(self) -> Result<Option<WriteOutcome>, ActionError> {
        match self {
            Submission::AlreadyInFlight => Ok(None),
            Submission::Started(handle) => {
                let result = handle.await.map_err(|e| ActionError::Task(e.to_string()))?;
                Ok(Some(result?))
            }
        }
    }
}

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

#[derive(Clone)]
pub struct DashboardService {
    store: Arc<RwLock<DashboardStore>>,
    records: Arc<dyn RecordSource>,
    writer: Arc<NotesWriter>,
    completed: CompletedIdsStore,
    /// Serializes completed-id saves so a later snapshot is never overwritten
    /// by an earlier one.
    persist: Arc<Mutex<()>>,
    options: ServiceOptions,
    clock: Clock,
}

impl DashboardService {
    pub async fn new(
        records: Arc<dyn RecordSource>,
        backend: Arc<dyn NotesBackend>,
        completed: CompletedIdsStore,
        options: ServiceOptions,
    ) -> Self {
        let completed_ids = completed.load().await;
        let writer = NotesWriter::new(records.clone(), backend, options.completion_marker);
        Self {
            store: Arc::new(RwLock::new(DashboardStore::new(completed_ids))),
            records,
            writer: Arc::new(writer),
            completed,
            persist: Arc::new(Mutex::new(())),
            options,
            clock: Arc::new(|| Local::now().date_naive()),
        }
    }

    /// Live Airtable sources and the notes backend.
    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?);
        let registry = load_registry_or_builtin(&config.workspace_root).await;
        let records = Arc::new(AirtableRecordSource::new(http.clone(), &registry, config));
        let backend = Arc::new(WeekdayBackend::new(
            http,
            config.backend_update_url.clone(),
            config.backend_identity_id.clone(),
        ));
        Ok(Self::new(
            records,
            backend,
            CompletedIdsStore::in_dir(&config.state_dir),
            config.service_options(),
        )
        .await)
    }

    /// Captured fixture pages with writes logged instead of sent.
    pub async fn from_fixtures(config: &SyncConfig, dir: Option<&Path>) -> Self {
        let root = dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| fixture_root(&config.workspace_root));
        Self::new(
            Arc::new(FixtureRecordSource::new(root)),
            Arc::new(DryRunBackend),
            CompletedIdsStore::in_dir(&config.state_dir),
            config.service_options(),
        )
        .await
    }

    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    pub fn store(&self) -> &Arc<RwLock<DashboardStore>> {
        &self.store
    }

    pub async fn view(&self) -> DashboardView {
        self.store.read().await.view(self.today())
    }

    pub async fn with_store<R>(&self, f: impl FnOnce(&mut DashboardStore) -> R) -> R {
        let mut store = self.store.write().await;
        f(&mut store)
    }

    pub async fn take_alert(&self) -> Option<Alert> {
        self.store.write().await.take_alert()
    }

    /// `silent` leaves the loading flag alone.
    pub async fn refresh(&self, silent: bool) -> RefreshSummary {
        if !silent {
            self.store.write().await.set_loading(true);
        }

        let outcome = self.records.fetch_all().await;
        for warning in &outcome.warnings {
            warn!(%warning, "refresh returned degraded data");
        }

        let summary = {
            let mut store = self.store.write().await;
            let warnings = outcome.warnings.clone();
            let items = outcome.items.len();
            let reconciliation = store.replace_items(outcome, Utc::now());
            if !silent {
                store.set_loading(false);
            }
            RefreshSummary {
                items,
                warnings,
                pruned_completed: reconciliation.pruned_completed.len(),
                pruned_handled: reconciliation.pruned_handled.len(),
            }
        };

        if summary.pruned_completed > 0 {
            self.persist_completed().await;
        }
        info!(
            silent,
            items = summary.items,
            warnings = summary.warnings.len(),
            pruned_completed = summary.pruned_completed,
            pruned_handled = summary.pruned_handled,
            "refresh applied"
        );
        summary
    }

    /// Validates the action form, patches the item in place and writes in the
    /// background. A failed write removes only its own entry again.
    pub async fn submit_action(
        &self,
        id: &str,
        comment: &str,
        snooze: Option<NaiveDate>,
    ) -> Result<Submission, ActionError> {
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(ActionError::Validation(match snooze {
                Some(_) => SNOOZE_NEEDS_COMMENT,
                None => EMPTY_ACTION,
            }));
        }

        let text = match snooze {
            Some(until) => notes::snooze_comment(until, comment),
            None => comment.to_string(),
        };
        let today = self.today();
        let entry = notes::comment_entry(today, &text);

        let (item, token) = {
            let mut store = self.store.write().await;
            let item = store
                .item(id)
                .cloned()
                .ok_or_else(|| ActionError::NotFound(id.to_string()))?;
            let token = store
                .apply_optimistic(id, &entry, snooze)
                .ok_or_else(|| ActionError::NotFound(id.to_string()))?;
            store.mark_handled(id);
            (item, token)
        };

        let store = self.store.clone();
        let writer = self.writer.clone();
        let handle = tokio::spawn(async move {
            let result = writer.add_comment(&item, &text, today).await;
            let mut store = store.write().await;
            match &result {
                Ok(_) => store.confirm_optimistic(&token),
                Err(err) => {
                    error!(id = %token.id(), error = %err, "comment write failed; rolling back");
                    store.rollback(&token);
                }
            }
            result
        });
        Ok(Submission::Started(handle))
    }

    /// Hides the item at once, writes the completion marker after the
    /// configured delay, then refreshes silently. A failed write raises an
    /// alert and triggers a full refresh; the local hide is kept.
    pub async fn complete(&self, id: &str) -> Result<Submission, ActionError> {
        let item = {
            let mut store = self.store.write().await;
            if store.is_completing(id) {
                return Ok(Submission::AlreadyInFlight);
            }
            let item = store
                .item(id)
                .cloned()
                .ok_or_else(|| ActionError::NotFound(id.to_string()))?;
            store.begin_completion(id);
            store.mark_complete(id);
            item
        };
        self.persist_completed().await;

        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.options.complete_delay).await;
            let result = this.writer.mark_complete(&item, this.today()).await;
            {
                let mut store = this.store.write().await;
                store.finish_completion(&item.id);
                match &result {
                    Ok(_) => store.push_alert(Alert::success(format!("{} marked as complete!", item.candidate_name))),
                    Err(err) => store.push_alert(Alert::error(format!("Failed to complete: {err}"))),
                }
            }

            match &result {
                Ok(_) => {
                    let later = this.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(later.options.post_write_refresh).await;
                        later.refresh(true).await;
                    });
                }
                Err(err) => {
                    error!(id = %item.id, error = %err, "completion write failed; full refresh");
                    this.refresh(false).await;
                }
            }
            result
        });
        Ok(Submission::Started(handle))
    }

    /// Snapshots the completed ids under the persist lock, so saves land in
    /// the order their snapshots were taken.
    async fn persist_completed(&self) {
        let _guard = self.persist.lock().await;
        let ids = self.store.read().await.overlay().completed_ids.clone();
        if let Err(err) = self.completed.save(&ids).await {
            warn!(path = %self.completed.path().display(), error = %err, "failed to persist completed ids");
        }
    }
}
