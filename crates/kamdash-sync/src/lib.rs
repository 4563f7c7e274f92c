//! Refresh, write-back and dashboard state orchestration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use kamdash_adapters::{AirtableTarget, DEFAULT_API_ROOT, DEFAULT_PAGE_SIZE};
use kamdash_core::notes::CompletionMarker;
use kamdash_core::views::DashboardView;
use kamdash_core::{Source, Swimlane};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub mod fetch;
pub mod service;
pub mod store;
pub mod writer;

pub use fetch::{AirtableRecordSource, FixtureRecordSource, RecordSource, RefreshOutcome};
pub use service::{ActionError, DashboardService, RefreshSummary, ServiceOptions, Submission};
pub use store::{Alert, AlertLevel, DashboardStore, EditToken, Reconciliation};
pub use writer::{DryRunBackend, NotesBackend, NotesBase, NotesWriter, WeekdayBackend, WriteError, WriteOutcome};

pub const CRATE_NAME: &str = "kamdash-sync";

pub const SOURCES_FILE: &str = "sources.yaml";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: `{value}`")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub airtable_api_key: String,
    pub airtable_api_root: String,
    pub post_tbr_base_id: String,
    pub ic_base_id: String,
    pub backend_update_url: String,
    pub backend_identity_id: String,
    pub state_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub completion_marker: CompletionMarker,
    pub complete_delay: Duration,
    pub post_write_refresh: Duration,
    pub scheduler_enabled: bool,
    pub refresh_cron: String,
    pub workspace_root: PathBuf,
}

impl SyncConfig {
    /// Reads the full configuration, credentials included.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Optional settings only; credentials stay blank. Used with fixture data.
    pub fn offline_from_env() -> Result<Self, ConfigError> {
        Self::offline_from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::offline_from_lookup(&lookup)?;
        config.airtable_api_key = required(&lookup, "AIRTABLE_API_KEY")?;
        config.post_tbr_base_id = required(&lookup, "AIRTABLE_BASE_ID")?;
        config.ic_base_id = required(&lookup, "AIRTABLE_IC_BASE_ID")?;
        config.backend_update_url = required(&lookup, "BACKEND_UPDATE_URL")?;
        config.backend_identity_id = required(&lookup, "BACKEND_IDENTITY_ID")?;
        Ok(config)
    }

    pub fn offline_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let optional = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let completion_marker = match optional("KAMDASH_COMPLETION_MARKER") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "KAMDASH_COMPLETION_MARKER",
                value,
            })?,
            None => CompletionMarker::default(),
        };

        Ok(Self {
            airtable_api_key: String::new(),
            airtable_api_root: optional("AIRTABLE_API_ROOT").unwrap_or_else(|| DEFAULT_API_ROOT.to_string()),
            post_tbr_base_id: String::new(),
            ic_base_id: String::new(),
            backend_update_url: String::new(),
            backend_identity_id: String::new(),
            state_dir: optional("KAMDASH_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./state")),
            http_timeout_secs: parse_number(&lookup, "KAMDASH_HTTP_TIMEOUT_SECS", 20)?,
            user_agent: optional("KAMDASH_USER_AGENT").unwrap_or_else(|| "kamdash/0.1".to_string()),
            completion_marker,
            complete_delay: Duration::from_millis(parse_number(&lookup, "KAMDASH_COMPLETE_DELAY_MS", 4000)?),
            post_write_refresh: Duration::from_millis(parse_number(
                &lookup,
                "KAMDASH_POST_WRITE_REFRESH_MS",
                5000,
            )?),
            scheduler_enabled: optional("KAMDASH_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            refresh_cron: optional("KAMDASH_REFRESH_CRON").unwrap_or_else(|| "0 */10 * * * *".to_string()),
            workspace_root: optional("KAMDASH_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    pub fn base_id(&self, source: Source) -> &str {
        match source {
            Source::PostTbr => &self.post_tbr_base_id,
            Source::Ic => &self.ic_base_id,
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            completion_marker: self.completion_marker,
            complete_delay: self.complete_delay,
            post_write_refresh: self.post_write_refresh,
        }
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<String, ConfigError> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_number(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source: Source,
    pub table: String,
    pub view: String,
    /// Overrides the base id taken from the environment.
    #[serde(default)]
    pub base_id: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn builtin() -> Self {
        Self {
            sources: vec![
                SourceConfig {
                    source: Source::PostTbr,
                    table: "tbliHNuWXCvnIZKLy".to_string(),
                    view: "DNT - Vaibhav KAM Pending 10 Days".to_string(),
                    base_id: None,
                    page_size: None,
                },
                SourceConfig {
                    source: Source::Ic,
                    table: "Info Collection".to_string(),
                    view: "DNT - KAM Pending (IC)".to_string(),
                    base_id: None,
                    page_size: None,
                },
            ],
        }
    }

    /// `<root>/sources.yaml` when present, else the built-in tables. Sources the
    /// file leaves out keep their built-in entry.
    pub async fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join(SOURCES_FILE);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::builtin()),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        let parsed: SourceRegistry =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(parsed.with_builtin_fallbacks())
    }

    fn with_builtin_fallbacks(mut self) -> Self {
        for builtin in Self::builtin().sources {
            if self.get(builtin.source).is_none() {
                self.sources.push(builtin);
            }
        }
        self
    }

    /// First entry wins when a source is listed twice.
    pub fn get(&self, source: Source) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source == source)
    }

    pub fn target(&self, source: Source, config: &SyncConfig) -> AirtableTarget {
        let entry = self
            .get(source)
            .cloned()
            .or_else(|| Self::builtin().sources.into_iter().find(|s| s.source == source));
        let (table, view, base_id, page_size) = match entry {
            Some(entry) => (entry.table, entry.view, entry.base_id, entry.page_size),
            None => (String::new(), String::new(), None, None),
        };
        AirtableTarget {
            api_root: config.airtable_api_root.clone(),
            base_id: base_id.unwrap_or_else(|| config.base_id(source).to_string()),
            table,
            view,
            api_key: config.airtable_api_key.clone(),
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }
}

/// Background silent refresh on `refresh_cron`, when the scheduler is enabled.
pub async fn maybe_build_scheduler(
    service: &DashboardService,
    config: &SyncConfig,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let svc = service.clone();
    let job = Job::new_async(config.refresh_cron.as_str(), move |_uuid, _l| {
        let svc = svc.clone();
        Box::pin(async move {
            let summary = svc.refresh(true).await;
            info!(items = summary.items, warnings = summary.warnings.len(), "scheduled refresh finished");
        })
    })
    .with_context(|| format!("creating scheduler job for cron {}", config.refresh_cron))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

/// Markdown digest of a derived view.
pub fn brief_markdown(view: &DashboardView) -> String {
    let mut lines = vec![
        "# KAM Actionables Brief".to_string(),
        String::new(),
        format!("_As of {}_", view.today.format("%Y-%m-%d")),
        String::new(),
        "## Totals".to_string(),
        format!("- total: {}", view.kpis.total),
        format!("- critical (45+ days): {}", view.kpis.critical),
        format!("- attention (30-44 days): {}", view.kpis.attention),
        format!("- normal (10-29 days): {}", view.kpis.normal),
        format!(
            "- sources: {} post-tbr / {} ic",
            view.source_counts.post_tbr, view.source_counts.ic
        ),
        format!("- new: {} of {}", view.view_counts.new, view.view_counts.all),
        String::new(),
        "## Swimlanes".to_string(),
    ];

    for lane in Swimlane::ORDER {
        let items = view.lane(lane);
        lines.push(format!("### {} ({})", lane.title(), items.len()));
        if items.is_empty() {
            lines.push(format!("_{}_", lane.empty_text()));
        }
        for item in items.iter().take(10) {
            lines.push(format!(
                "- {} @ {} ({} days, {}, {})",
                item.candidate_name,
                item.company,
                item.pending_days,
                item.source.label(),
                item.kam_label()
            ));
        }
        if items.len() > 10 {
            lines.push(format!("- ... and {} more", items.len() - 10));
        }
        lines.push(String::new());
    }

    lines.push("## KAM leaderboard".to_string());
    if view.leaderboard.is_empty() {
        lines.push("_No pending items_".to_string());
    }
    for stat in &view.leaderboard {
        lines.push(format!("- {}: {}", stat.name, stat.count));
    }

    if lines.last().is_some_and(|l| !l.is_empty()) {
        lines.push(String::new());
    }
    lines.join("\n")
}

pub async fn load_registry_or_builtin(workspace_root: &Path) -> SourceRegistry {
    match SourceRegistry::load(workspace_root).await {
        Ok(registry) => registry,
        Err(err) => {
            warn!(error = %err, "source registry unreadable; using built-in tables");
            SourceRegistry::builtin()
        }
    }
}
