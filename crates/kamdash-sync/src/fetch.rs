use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use kamdash_adapters::{
    adapter_for_source, load_fixture_page, normalize_for_source, AdapterContext, AirtableRecord, SourceAdapter,
};
use kamdash_core::{ActionableItem, Source};
use kamdash_storage::HttpFetcher;
use tracing::{info, warn};

use crate::{SourceRegistry, SyncConfig};

/// One joined fetch of both sources. Post-TBR items come first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshOutcome {
    pub items: Vec<ActionableItem>,
    /// Degraded-data notices, one per source that stopped early.
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_all(&self) -> RefreshOutcome;
    async fn fetch_record(&self, source: Source, record_id: &str) -> Result<AirtableRecord>;
}

pub struct AirtableRecordSource {
    http: Arc<HttpFetcher>,
    post_tbr: Box<dyn SourceAdapter>,
    ic: Box<dyn SourceAdapter>,
}

impl AirtableRecordSource {
    pub fn new(http: Arc<HttpFetcher>, registry: &SourceRegistry, config: &SyncConfig) -> Self {
        Self {
            http,
            post_tbr: adapter_for_source(Source::PostTbr, registry.target(Source::PostTbr, config)),
            ic: adapter_for_source(Source::Ic, registry.target(Source::Ic, config)),
        }
    }

    fn adapter(&self, source: Source) -> &dyn SourceAdapter {
        match source {
            Source::PostTbr => self.post_tbr.as_ref(),
            Source::Ic => self.ic.as_ref(),
        }
    }
}

#[async_trait]
impl RecordSource for AirtableRecordSource {
    async fn fetch_all(&self) -> RefreshOutcome {
        let ctx = AdapterContext::new();
        let (post_tbr, ic) = tokio::join!(
            self.post_tbr.fetch_listing(&self.http, &ctx),
            self.ic.fetch_listing(&self.http, &ctx)
        );

        let mut outcome = RefreshOutcome::default();
        for (adapter, listing) in [(self.post_tbr.as_ref(), post_tbr), (self.ic.as_ref(), ic)] {
            if let Some(error) = &listing.error {
                outcome
                    .warnings
                    .push(incomplete_warning(adapter.source(), listing.records.len(), error));
            }
            outcome.items.extend(adapter.normalize(&listing.records));
        }
        outcome.items = first_occurrence_wins(outcome.items);

        info!(
            run_id = %ctx.run_id,
            items = outcome.items.len(),
            warnings = outcome.warnings.len(),
            "refresh fetch complete"
        );
        outcome
    }

    async fn fetch_record(&self, source: Source, record_id: &str) -> Result<AirtableRecord> {
        let ctx = AdapterContext::new();
        self.adapter(source)
            .fetch_record(&self.http, &ctx, record_id)
            .await
            .with_context(|| format!("fetching {source} record {record_id}"))
    }
}

/// Captured listing pages under `<root>/post_tbr/*/page.json` and
/// `<root>/info_collection/*/page.json`.
#[derive(Debug, Clone)]
pub struct FixtureRecordSource {
    root: PathBuf,
}

impl FixtureRecordSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn source_dir(source: Source) -> &'static str {
        match source {
            Source::PostTbr => "post_tbr",
            Source::Ic => "info_collection",
        }
    }

    fn page_paths(&self, source: Source) -> Result<Vec<PathBuf>> {
        let dir = self.root.join(Self::source_dir(source));
        let mut paths = std::fs::read_dir(&dir)
            .with_context(|| format!("reading {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path().join("page.json"))
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        paths.sort();
        Ok(paths)
    }

    fn load_records(&self, source: Source) -> (Vec<AirtableRecord>, Option<String>) {
        let paths = match self.page_paths(source) {
            Ok(paths) => paths,
            Err(err) => return (Vec::new(), Some(format!("{err:#}"))),
        };
        let mut records = Vec::new();
        for path in paths {
            match load_fixture_page(&path) {
                Ok(page) => records.extend(page.records),
                Err(err) => return (records, Some(format!("{err:#}"))),
            }
        }
        (records, None)
    }
}

#[async_trait]
impl RecordSource for FixtureRecordSource {
    async fn fetch_all(&self) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();
        for source in Source::ALL {
            let (records, error) = self.load_records(source);
            if let Some(error) = error {
                warn!(%source, root = %self.root.display(), %error, "fixture load incomplete");
                outcome.warnings.push(incomplete_warning(source, records.len(), &error));
            }
            outcome.items.extend(normalize_for_source(source, &records));
        }
        outcome.items = first_occurrence_wins(outcome.items);
        outcome
    }

    async fn fetch_record(&self, source: Source, record_id: &str) -> Result<AirtableRecord> {
        let (records, _) = self.load_records(source);
        records
            .into_iter()
            .find(|r| r.id == record_id)
            .ok_or_else(|| anyhow!("{source} record {record_id} not found under {}", self.root.display()))
    }
}

pub fn fixture_root(workspace_root: &Path) -> PathBuf {
    workspace_root.join("fixtures")
}

fn incomplete_warning(source: Source, kept: usize, error: &str) -> String {
    format!(
        "{} data may be incomplete: fetch stopped after {kept} records ({error})",
        source.label()
    )
}

/// Record ids are unique per source; a repeated id keeps its first occurrence.
fn first_occurrence_wins(items: Vec<ActionableItem>) -> Vec<ActionableItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert((item.source, item.id.clone())))
        .collect()
}
