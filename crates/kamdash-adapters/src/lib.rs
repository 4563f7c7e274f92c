//! Airtable source adapters: paginated listing fetch, single-record fetch and
//! the two per-schema normalizers.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kamdash_core::{notes, ActionableItem, Severity, Source};
use kamdash_storage::{FetchError, HttpFetcher, RequestSpec};
use reqwest::Url;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "kamdash-adapters";

pub const DEFAULT_API_ROOT: &str = "https://api.airtable.com";
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// The only field the backend writes back.
pub const NOTES_FIELD: &str = "internalWeekdayNotes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirtableRecord {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<String>,
}

impl AirtableRecord {
    pub fn notes(&self) -> String {
        text_field(&self.fields, &[NOTES_FIELD], "")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirtablePage {
    #[serde(default)]
    pub records: Vec<AirtableRecord>,
    #[serde(default)]
    pub offset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirtableTarget {
    pub api_root: String,
    pub base_id: String,
    pub table: String,
    pub view: String,
    pub api_key: String,
    pub page_size: u32,
}

impl AirtableTarget {
    fn table_url(&self, record_id: Option<&str>) -> Result<Url, AdapterError> {
        let mut url = Url::parse(&self.api_root)
            .map_err(|e| AdapterError::Message(format!("invalid api root {}: {e}", self.api_root)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| AdapterError::Message(format!("api root {} cannot carry a path", self.api_root)))?;
            segments
                .pop_if_empty()
                .extend(["v0", self.base_id.as_str(), self.table.as_str()]);
            if let Some(id) = record_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    pub fn listing_url(&self, offset: Option<&str>) -> Result<String, AdapterError> {
        let mut url = self.table_url(None)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("view", &self.view)
                .append_pair("pageSize", &self.page_size.to_string());
            if let Some(offset) = offset {
                query.append_pair("offset", offset);
            }
        }
        Ok(url.into())
    }

    pub fn record_url(&self, record_id: &str) -> Result<String, AdapterError> {
        Ok(self.table_url(Some(record_id))?.into())
    }

    /// Keys stored with their `Bearer ` prefix are forwarded unchanged.
    pub fn authorization(&self) -> String {
        let key = self.api_key.trim();
        if key.starts_with("Bearer ") {
            key.to_string()
        } else {
            format!("Bearer {key}")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
}

impl AdapterContext {
    pub fn new() -> Self {
        Self { run_id: Uuid::new_v4() }
    }
}

impl Default for AdapterContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Records gathered from one source. `error` is set when paging stopped early;
/// `records` then holds everything fetched before the failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingOutcome {
    pub records: Vec<AirtableRecord>,
    pub pages: usize,
    pub error: Option<String>,
}

impl ListingOutcome {
    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;
    fn target(&self) -> &AirtableTarget;

    async fn fetch_listing(&self, http: &HttpFetcher, ctx: &AdapterContext) -> ListingOutcome {
        fetch_all_pages(http, ctx, self.source(), self.target()).await
    }

    async fn fetch_record(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        record_id: &str,
    ) -> Result<AirtableRecord, AdapterError> {
        let url = self.target().record_url(record_id)?;
        debug!(run_id = %ctx.run_id, source = %self.source(), record_id, "fetching single record");
        let spec = RequestSpec::get(url).header("Authorization", self.target().authorization());
        Ok(http.get_json(self.source().as_str(), spec).await?)
    }

    fn normalize(&self, records: &[AirtableRecord]) -> Vec<ActionableItem>;
}

async fn fetch_all_pages(
    http: &HttpFetcher,
    ctx: &AdapterContext,
    source: Source,
    target: &AirtableTarget,
) -> ListingOutcome {
    let mut outcome = ListingOutcome::default();
    let mut offset: Option<String> = None;

    loop {
        let url = match target.listing_url(offset.as_deref()) {
            Ok(url) => url,
            Err(err) => {
                outcome.error = Some(err.to_string());
                break;
            }
        };
        let spec = RequestSpec::get(url).header("Authorization", target.authorization());
        match http.get_json::<AirtablePage>(source.as_str(), spec).await {
            Ok(page) => {
                outcome.pages += 1;
                outcome.records.extend(page.records);
                match page.offset {
                    Some(next) if offset.as_deref() == Some(next.as_str()) => {
                        outcome.error = Some(format!("pagination cursor {next} repeated"));
                        break;
                    }
                    Some(next) if !next.is_empty() => offset = Some(next),
                    _ => break,
                }
            }
            Err(err) => {
                warn!(
                    run_id = %ctx.run_id,
                    %source,
                    pages = outcome.pages,
                    kept = outcome.records.len(),
                    error = %err,
                    "listing fetch stopped early; keeping partial records"
                );
                outcome.error = Some(err.to_string());
                break;
            }
        }
    }

    outcome
}

/// Field names tried in order for the Post-TBR base.
pub mod post_tbr_fields {
    pub const CANDIDATE_NAME: &[&str] = &["candidateName"];
    pub const COMPANY: &[&str] = &["Company Name"];
    pub const ROLE: &[&str] = &["jobRole"];
    pub const STATUS: &[&str] = &["Post TBR Status"];
    pub const PENDING_DAYS: &[&str] = &["Update Pending since"];
    pub const KAM_NOTES: &[&str] = &["internalWeekdayNotes"];
    pub const SNOOZE_SCAN: &[&str] = &["internalWeekdayNotes", "weekdayComments"];
    pub const SCHEDULER_NOTES: &[&str] = &["Scheduler Notes"];
    pub const KAM: &[&str] = &["Account Manager (from companyMapperViaUid) (from uidMapped)"];
    pub const JD_UID: &[&str] = &["jdUid"];
    pub const PUBLIC_IDENTIFIER: &[&str] = &["publicIdentifier"];
    pub const PLATFORM_LINK: &[&str] = &["Candidate Platform Link"];
    pub const INTERVIEW_PROCESS_FINAL: &[&str] = &["interviewProcessFinal"];
    pub const STAGE: &[&str] = &["conversationStatus"];
    pub const ROLE_ACTIVE: &str = "isRoleActive? (from KAM JD Interface) (from jdUidMapper)";
}

/// Field names tried in order for the Info Collection base.
pub mod ic_fields {
    pub const CANDIDATE_NAME: &[&str] = &["candidateName", "Name", "Candidate Name"];
    pub const COMPANY: &[&str] = &[
        "companyName",
        "Company Name",
        "company",
        "Company",
        "company (from jdUidMapper)",
    ];
    pub const ROLE: &[&str] = &["Job Role", "jobRole", "role", "Designation"];
    pub const STATUS: &[&str] = &["Info Call Status", "IC Status", "Post TBR Status", "conversationStatus"];
    pub const PENDING_DAYS: &[&str] = &["Pending Since", "Update Pending since", "Pending since"];
    pub const KAM_NOTES: &[&str] = &["internalWeekdayNotes"];
    pub const CALLER_NOTES: &[&str] = &["IC Caller Notes"];
    pub const SLACK_LINK: &[&str] = &["Flagged Slack Link"];
    pub const SCHEDULER_NOTES: &[&str] = &["Scheduler Notes"];
    pub const KAM: &[&str] = &[
        "Account Manager (from companyMapperViaUid) (from uidMapped)",
        "Account Manager",
        "kam",
    ];
    pub const JD_UID: &[&str] = &["jdUid", "JD UID"];
    pub const PUBLIC_IDENTIFIER: &[&str] = &["publicIdentifier", "Public Identifier"];
    pub const PLATFORM_LINK: &[&str] = &["PF Link", "Candidate Dashboard", "Candidate Platform Link"];
    pub const STAGE: &[&str] = &["conversationStatus"];
    pub const ROLE_ACTIVE: &str = "isRoleActive? (from KAM JD Interface) (from jdUidMapper)";
}

/// First present value among `names`. Nulls, empty strings and empty arrays are
/// skipped; arrays yield their first element.
pub fn extract_field<'a>(fields: &'a Map<String, JsonValue>, names: &[&str]) -> Option<&'a JsonValue> {
    for name in names {
        let value = match fields.get(*name) {
            Some(JsonValue::Array(values)) => match values.first() {
                Some(first) => first,
                None => continue,
            },
            Some(other) => other,
            None => continue,
        };
        match value {
            JsonValue::Null => continue,
            JsonValue::String(s) if s.is_empty() => continue,
            _ => return Some(value),
        }
    }
    None
}

fn value_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn text_field(fields: &Map<String, JsonValue>, names: &[&str], default: &str) -> String {
    extract_field(fields, names)
        .map(value_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn value_number(value: &JsonValue) -> Option<f64> {
    let number = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Upstream computes the day count; fractions truncate and junk reads as zero.
pub fn pending_days_field(fields: &Map<String, JsonValue>, names: &[&str]) -> u32 {
    extract_field(fields, names)
        .and_then(value_number)
        .filter(|n| *n >= 0.0)
        .map(|n| n.trunc().min(f64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

pub fn integer_field(fields: &Map<String, JsonValue>, names: &[&str]) -> i64 {
    extract_field(fields, names)
        .and_then(value_number)
        .map(|n| n.trunc() as i64)
        .unwrap_or(0)
}

pub fn normalize_post_tbr(records: &[AirtableRecord]) -> Vec<ActionableItem> {
    use post_tbr_fields as f;

    records
        .iter()
        .map(|record| {
            let fields = &record.fields;
            let pending_days = pending_days_field(fields, f::PENDING_DAYS);
            let kam_notes = text_field(fields, f::KAM_NOTES, "");
            let snooze_text = text_field(fields, f::SNOOZE_SCAN, "");

            ActionableItem {
                id: record.id.clone(),
                source: Source::PostTbr,
                candidate_name: text_field(fields, f::CANDIDATE_NAME, "Unknown Candidate"),
                company: text_field(fields, f::COMPANY, "Unknown Company"),
                role: text_field(fields, f::ROLE, "Unknown Role"),
                status: text_field(fields, f::STATUS, "Unknown Status"),
                stage: text_field(fields, f::STAGE, ""),
                pending_days,
                severity: Severity::from_pending_days(pending_days),
                display_notes: kam_notes.clone(),
                snooze_until: notes::latest_snooze(&snooze_text),
                kam_notes,
                jd_uid: integer_field(fields, f::JD_UID),
                public_identifier: text_field(fields, f::PUBLIC_IDENTIFIER, ""),
                kam: text_field(fields, f::KAM, ""),
                platform_link: text_field(fields, f::PLATFORM_LINK, "#"),
                role_active: fields.get(f::ROLE_ACTIVE).cloned().unwrap_or(JsonValue::Null),
                scheduler_notes: text_field(fields, f::SCHEDULER_NOTES, ""),
                interview_process_final: text_field(fields, f::INTERVIEW_PROCESS_FINAL, ""),
                raw: fields.clone(),
            }
        })
        .collect()
}

pub fn normalize_info_collection(records: &[AirtableRecord]) -> Vec<ActionableItem> {
    use ic_fields as f;

    records
        .iter()
        .map(|record| {
            let fields = &record.fields;
            let pending_days = pending_days_field(fields, f::PENDING_DAYS);
            let kam_notes = text_field(fields, f::KAM_NOTES, "");
            let display_notes = [
                kam_notes.clone(),
                text_field(fields, f::CALLER_NOTES, ""),
                text_field(fields, f::SLACK_LINK, ""),
            ]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

            ActionableItem {
                id: record.id.clone(),
                source: Source::Ic,
                candidate_name: text_field(fields, f::CANDIDATE_NAME, "Unknown Candidate"),
                company: text_field(fields, f::COMPANY, "Unknown Company"),
                role: text_field(fields, f::ROLE, "Unknown Role"),
                status: text_field(fields, f::STATUS, "Unknown Status"),
                stage: text_field(fields, f::STAGE, ""),
                pending_days,
                severity: Severity::from_pending_days(pending_days),
                snooze_until: notes::latest_snooze(&kam_notes),
                kam_notes,
                display_notes,
                jd_uid: integer_field(fields, f::JD_UID),
                public_identifier: text_field(fields, f::PUBLIC_IDENTIFIER, ""),
                kam: text_field(fields, f::KAM, ""),
                platform_link: text_field(fields, f::PLATFORM_LINK, "#"),
                role_active: match fields.get(f::ROLE_ACTIVE) {
                    None | Some(JsonValue::Null) => JsonValue::Bool(true),
                    Some(value) => value.clone(),
                },
                scheduler_notes: text_field(fields, f::SCHEDULER_NOTES, ""),
                interview_process_final: String::new(),
                raw: fields.clone(),
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
struct PostTbrAdapter {
    target: AirtableTarget,
}

#[derive(Debug, Clone)]
struct InfoCollectionAdapter {
    target: AirtableTarget,
}

#[async_trait]
impl SourceAdapter for PostTbrAdapter {
    fn source(&self) -> Source {
        Source::PostTbr
    }

    fn target(&self) -> &AirtableTarget {
        &self.target
    }

    fn normalize(&self, records: &[AirtableRecord]) -> Vec<ActionableItem> {
        normalize_post_tbr(records)
    }
}

#[async_trait]
impl SourceAdapter for InfoCollectionAdapter {
    fn source(&self) -> Source {
        Source::Ic
    }

    fn target(&self) -> &AirtableTarget {
        &self.target
    }

    fn normalize(&self, records: &[AirtableRecord]) -> Vec<ActionableItem> {
        normalize_info_collection(records)
    }
}

pub fn post_tbr_adapter(target: AirtableTarget) -> impl SourceAdapter {
    PostTbrAdapter { target }
}

pub fn info_collection_adapter(target: AirtableTarget) -> impl SourceAdapter {
    InfoCollectionAdapter { target }
}

pub fn adapter_for_source(source: Source, target: AirtableTarget) -> Box<dyn SourceAdapter> {
    match source {
        Source::PostTbr => Box::new(post_tbr_adapter(target)),
        Source::Ic => Box::new(info_collection_adapter(target)),
    }
}

pub fn normalize_for_source(source: Source, records: &[AirtableRecord]) -> Vec<ActionableItem> {
    match source {
        Source::PostTbr => normalize_post_tbr(records),
        Source::Ic => normalize_info_collection(records),
    }
}

/// Reads a captured listing page, as returned by the Airtable list endpoint.
pub fn load_fixture_page(path: impl AsRef<Path>) -> Result<AirtablePage> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
