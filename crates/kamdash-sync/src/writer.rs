//! Append-only write-back of the notes field.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use kamdash_core::notes::{self, CompletionMarker};
use kamdash_core::ActionableItem;
use kamdash_storage::{FetchError, HttpFetcher, RequestSpec};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::fetch::RecordSource;

pub const IDENTITY_HEADER: &str = "weekdayidentityid";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{0}")]
    Validation(String),
    #[error("notes update rejected: {0}")]
    Backend(#[from] FetchError),
    #[error("encoding notes update: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait NotesBackend: Send + Sync {
    /// Replaces the whole notes value for the `jd_uid` + `public_identifier` pair.
    async fn post_notes(&self, jd_uid: i64, public_identifier: &str, notes: &str) -> Result<(), WriteError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotesUpdate<'a> {
    jd_uid: i64,
    public_identifier: &'a str,
    data: NotesUpdateData<'a>,
}

#[derive(Debug, Serialize)]
struct NotesUpdateData<'a> {
    #[serde(rename = "internalWeekdayNotes")]
    internal_weekday_notes: &'a str,
}

pub struct WeekdayBackend {
    http: Arc<HttpFetcher>,
    url: String,
    identity_id: String,
}

impl WeekdayBackend {
    pub fn new(http: Arc<HttpFetcher>, url: impl Into<String>, identity_id: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            identity_id: identity_id.into(),
        }
    }
}

#[async_trait]
impl NotesBackend for WeekdayBackend {
    async fn post_notes(&self, jd_uid: i64, public_identifier: &str, notes: &str) -> Result<(), WriteError> {
        let body = NotesUpdate {
            jd_uid,
            public_identifier,
            data: NotesUpdateData {
                internal_weekday_notes: notes,
            },
        };
        let spec = RequestSpec::post_json(self.url.as_str(), &body)?.header(IDENTITY_HEADER, self.identity_id.as_str());
        self.http.execute("backend", spec).await?;
        Ok(())
    }
}

/// Accepts every write and only logs it. Pairs with fixture data.
#[derive(Debug, Default, Clone)]
pub struct DryRunBackend;

#[async_trait]
impl NotesBackend for DryRunBackend {
    async fn post_notes(&self, jd_uid: i64, public_identifier: &str, notes: &str) -> Result<(), WriteError> {
        info!(jd_uid, public_identifier, bytes = notes.len(), "dry run: notes update not sent");
        Ok(())
    }
}

/// Where the appended-to notes value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotesBase {
    /// Re-fetched from the source right before the write.
    Fresh,
    /// The re-fetch failed; the locally held value was used and a concurrent
    /// edit may have been overwritten.
    LocalFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub updated_notes: String,
    pub base: NotesBase,
}

pub struct NotesWriter {
    records: Arc<dyn RecordSource>,
    backend: Arc<dyn NotesBackend>,
    marker: CompletionMarker,
}

impl NotesWriter {
    pub fn new(records: Arc<dyn RecordSource>, backend: Arc<dyn NotesBackend>, marker: CompletionMarker) -> Self {
        Self {
            records,
            backend,
            marker,
        }
    }

    pub fn marker(&self) -> CompletionMarker {
        self.marker
    }

    pub async fn add_comment(
        &self,
        item: &ActionableItem,
        text: &str,
        today: NaiveDate,
    ) -> Result<WriteOutcome, WriteError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(WriteError::Validation("Comment can't be empty".to_string()));
        }
        self.append(item, &notes::comment_entry(today, text)).await
    }

    pub async fn mark_complete(&self, item: &ActionableItem, today: NaiveDate) -> Result<WriteOutcome, WriteError> {
        self.append(item, &self.marker.entry(today)).await
    }

    async fn current_notes(&self, item: &ActionableItem) -> (String, NotesBase) {
        match self.records.fetch_record(item.source, &item.id).await {
            Ok(record) => (record.notes(), NotesBase::Fresh),
            Err(err) => {
                warn!(
                    id = %item.id,
                    source = %item.source,
                    error = %err,
                    "re-fetch before write failed; appending to local notes"
                );
                (item.kam_notes.clone(), NotesBase::LocalFallback)
            }
        }
    }

    async fn append(&self, item: &ActionableItem, entry: &str) -> Result<WriteOutcome, WriteError> {
        let (current, base) = self.current_notes(item).await;
        let updated_notes = notes::append_entry(&current, entry);

        if let Err(err) = self
            .backend
            .post_notes(item.jd_uid, &item.public_identifier, &updated_notes)
            .await
        {
            error!(id = %item.id, source = %item.source, error = %err, "notes write failed");
            return Err(err);
        }

        info!(id = %item.id, source = %item.source, ?base, "notes written");
        Ok(WriteOutcome { updated_notes, base })
    }
}
