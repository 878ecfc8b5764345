//! Text extraction pass over reconciled bills.
//!
//! Every bill version is tried as XML, then HTML, then PDF. Workers run
//! concurrently and report back to a single coordinator, which buffers
//! finished bills and commits them to the store on a wall-clock interval.
//! Nothing a worker produced is durable before its checkpoint. A bill is
//! stamped as extracted only once every one of its versions succeeded, so
//! an interrupted run resumes from the bills it never committed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use legisync_extract::{FileHeader, SourceFormat, extract, render_text_file};
use legisync_fetch::{FetchConfig, Fetcher, url_file_name};
use legisync_shared::naming::{parse_timestamp, slugify};
use legisync_shared::{AppConfig, BillMetadata, DocumentLink, DocumentVersion, LegisyncError, Result};
use legisync_storage::{ExtractionErrorDir, Layout, Store, key_name, read_json, write_json};

use crate::context::RunContext;
use crate::pipeline::ProgressReporter;
use crate::summary::EntityError;

/// Maximum slug length of a version note inside file names.
const NOTE_SLUG_MAX_LEN: usize = 50;

/// Stand-in deadline when the checkpoint interval overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

// ---------------------------------------------------------------------------
// Configuration and results
// ---------------------------------------------------------------------------

/// Runtime extraction configuration.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub workers: usize,
    /// Skip bills whose text is newer than their logs and versions.
    pub incremental: bool,
    pub checkpoint_interval: Duration,
    pub fetch: FetchConfig,
}

impl From<&AppConfig> for ExtractConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            workers: config.defaults.workers.max(1),
            incremental: false,
            checkpoint_interval: Duration::from_secs(config.extraction.checkpoint_interval_secs),
            fetch: FetchConfig::from(config),
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    /// Bill directories holding metadata.
    pub bills: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub versions_extracted: usize,
    /// Successful versions per extraction method.
    pub methods: BTreeMap<SourceFormat, usize>,
    /// Failed versions per error kind.
    pub failures: BTreeMap<String, usize>,
    pub checkpoints: usize,
}

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub stats: ExtractionStats,
    pub errors: Vec<EntityError>,
}

// ---------------------------------------------------------------------------
// Bill discovery
// ---------------------------------------------------------------------------

/// A bill picked up for extraction.
#[derive(Debug, Clone)]
struct BillTarget {
    session: String,
    dir: String,
    bill: BillMetadata,
}

impl BillTarget {
    fn label(&self) -> String {
        format!("bill {}", self.bill.identifier)
    }
}

/// Whether the stored text is at least as new as the bill's logs and versions.
pub fn is_up_to_date(bill: &BillMetadata) -> bool {
    let Some(extracted_at) = bill.processing.text_extraction_latest_update else {
        return false;
    };
    let newest = bill
        .processing
        .logs_latest_update
        .into_iter()
        .chain(
            bill.versions
                .iter()
                .filter_map(|v| v.date.as_deref().and_then(parse_timestamp)),
        )
        .max();
    newest.is_none_or(|newest| extracted_at >= newest)
}

/// Every bill directory holding `metadata.json`, plus the ones whose
/// metadata could not be read.
fn discover(
    store: &dyn Store,
    layout: &Layout,
) -> Result<(Vec<BillTarget>, Vec<(String, String, LegisyncError)>)> {
    let mut targets = Vec::new();
    let mut unreadable = Vec::new();
    for session in store.children(&layout.sessions_root())? {
        for name in store.children(&layout.bills_root(&session))? {
            let dir = layout.bill_dir_by_name(&session, &name);
            let key = layout.metadata(&dir);
            if !store.exists(&key)? {
                continue;
            }
            match read_json::<BillMetadata>(store, &key) {
                Ok(Some(bill)) => targets.push(BillTarget {
                    session: session.clone(),
                    dir,
                    bill,
                }),
                Ok(None) => {}
                Err(e) => {
                    let err = LegisyncError::parsing(format!("unreadable metadata at {key}: {e}"));
                    unreadable.push((session.clone(), dir, err));
                }
            }
        }
    }
    Ok((targets, unreadable))
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Files produced for one version, not yet written.
#[derive(Debug)]
struct VersionOutput {
    method: SourceFormat,
    files: Vec<(String, Vec<u8>)>,
}

#[derive(Debug)]
struct VersionFailure {
    note: String,
    note_slug: String,
    urls: Vec<String>,
    error: LegisyncError,
}

/// Everything a worker learned about one bill.
#[derive(Debug)]
struct BillResult {
    target: BillTarget,
    outputs: Vec<VersionOutput>,
    failures: Vec<VersionFailure>,
}

fn note_slug(version: &DocumentVersion, index: usize) -> String {
    let slug = slugify(&version.note, NOTE_SLUG_MAX_LEN);
    if slug.is_empty() {
        format!("version_{}", index + 1)
    } else {
        slug
    }
}

/// Links of a version in fallback order. Links of unknown media types are ignored.
fn candidates(version: &DocumentVersion) -> Vec<(SourceFormat, &DocumentLink)> {
    SourceFormat::FALLBACK_ORDER
        .iter()
        .flat_map(|&format| {
            version
                .links
                .iter()
                .filter(move |link| SourceFormat::from_media_type(&link.media_type) == Some(format))
                .map(move |link| (format, link))
        })
        .collect()
}

async fn extract_bill(fetcher: &Fetcher, layout: &Layout, target: BillTarget) -> BillResult {
    let mut outputs = Vec::new();
    let mut failures = Vec::new();
    for (index, version) in target.bill.versions.iter().enumerate() {
        match extract_version(fetcher, layout, &target.dir, version, index).await {
            Ok(output) => outputs.push(output),
            Err(failure) => failures.push(failure),
        }
    }
    BillResult {
        target,
        outputs,
        failures,
    }
}

async fn extract_version(
    fetcher: &Fetcher,
    layout: &Layout,
    bill_dir: &str,
    version: &DocumentVersion,
    index: usize,
) -> std::result::Result<VersionOutput, VersionFailure> {
    let slug = note_slug(version, index);
    let links = candidates(version);
    let mut last_error = None;

    for &(format, link) in &links {
        let fetched = match format {
            SourceFormat::Xml => fetcher.fetch_xml(&link.url).await,
            _ => fetcher.fetch(&link.url).await,
        };
        let doc = match fetched {
            Ok(doc) => doc,
            Err(e) => {
                debug!(url = %link.url, %format, error = %e, "source unavailable, trying next");
                last_error = Some(e);
                continue;
            }
        };
        let text = match extract(format, &doc.bytes) {
            Ok(text) => text,
            Err(e) => {
                debug!(url = %link.url, %format, error = %e, "extraction failed, trying next");
                last_error = Some(e);
                continue;
            }
        };

        let base = url_file_name(&link.url)
            .map(|name| {
                name.rsplit_once('.')
                    .map_or(name.as_str(), |(stem, _)| stem)
                    .to_string()
            })
            .unwrap_or_else(|| key_name(bill_dir).to_string());
        let stem = format!("{base}_{slug}");
        let header = FileHeader {
            source_note: &version.note,
            media_type: &link.media_type,
            method: format,
            source_sha256: &doc.sha256,
        };
        let rendered = render_text_file(&text, &header);

        return Ok(VersionOutput {
            method: format,
            files: vec![
                (
                    layout.file(bill_dir, &format!("{stem}.{}", format.extension())),
                    doc.bytes,
                ),
                (
                    layout.file(bill_dir, &format!("{stem}_extracted.txt")),
                    rendered.into_bytes(),
                ),
            ],
        });
    }

    let error = last_error.unwrap_or_else(|| {
        LegisyncError::missing_file(format!(
            "version '{}' has no xml, html or pdf link",
            version.note
        ))
    });
    Err(VersionFailure {
        note: version.note.clone(),
        note_slug: slug,
        urls: links.iter().map(|(_, link)| link.url.clone()).collect(),
        error,
    })
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Failure record written under `text_extraction_errors/`.
#[derive(Debug, Serialize)]
struct ExtractionErrorRecord<'a> {
    identifier: &'a str,
    session: &'a str,
    version: &'a str,
    urls: &'a [String],
    kind: &'a str,
    message: String,
    run_id: String,
    recorded_at: DateTime<Utc>,
}

/// Where a failure record goes and what it names.
struct ErrorSite<'a> {
    session: &'a str,
    dir: &'a str,
    identifier: &'a str,
    version: &'a str,
    slug: &'a str,
    urls: &'a [String],
}

fn error_dir(error: &LegisyncError) -> ExtractionErrorDir {
    match error {
        LegisyncError::MissingFile { .. } => ExtractionErrorDir::MissingFile,
        LegisyncError::Parsing { .. } | LegisyncError::Json { .. } => ExtractionErrorDir::Parsing,
        _ => ExtractionErrorDir::Download,
    }
}

/// Owns every store write of the pass.
struct Committer<'a> {
    store: &'a dyn Store,
    layout: &'a Layout,
    ctx: &'a RunContext,
    stats: ExtractionStats,
    errors: Vec<EntityError>,
}

impl Committer<'_> {
    fn record_error(&self, site: &ErrorSite<'_>, error: &LegisyncError) -> Result<()> {
        let name = format!("{}_{}_{}.json", site.session, key_name(site.dir), site.slug);
        let key = self.layout.extraction_error(error_dir(error), &name);
        let record = ExtractionErrorRecord {
            identifier: site.identifier,
            session: site.session,
            version: site.version,
            urls: site.urls,
            kind: error.kind(),
            message: error.to_string(),
            run_id: self.ctx.run_id.to_string(),
            recorded_at: self.ctx.now(),
        };
        write_json(self.store, &key, &record)
    }

    fn unreadable(&mut self, session: &str, dir: &str, error: LegisyncError) {
        let entity = format!("bill dir {}", key_name(dir));
        warn!(entity = %entity, error = %error, "skipping bill");
        let site = ErrorSite {
            session,
            dir,
            identifier: key_name(dir),
            version: "metadata",
            slug: "metadata",
            urls: &[],
        };
        if let Err(e) = self.record_error(&site, &error) {
            warn!(error = %e, "failed to record extraction error");
        }
        *self.stats.failures.entry(error.kind().to_string()).or_default() += 1;
        self.stats.failed += 1;
        self.errors.push(EntityError::new(entity, &error));
    }

    /// Persist every buffered bill.
    fn checkpoint(&mut self, pending: &mut Vec<BillResult>) {
        if pending.is_empty() {
            return;
        }
        let bills = pending.len();
        for result in pending.drain(..) {
            let label = result.target.label();
            if let Err(e) = self.commit_bill(&result) {
                warn!(entity = %label, error = %e, "failed to commit bill");
                self.stats.failed += 1;
                self.errors.push(EntityError::new(label, &e));
            }
        }
        self.stats.checkpoints += 1;
        info!(bills, checkpoint = self.stats.checkpoints, "checkpoint committed");
    }

    fn commit_bill(&mut self, result: &BillResult) -> Result<()> {
        let target = &result.target;
        for output in &result.outputs {
            for (key, bytes) in &output.files {
                self.store.put(key, bytes)?;
            }
        }

        for failure in &result.failures {
            let site = ErrorSite {
                session: &target.session,
                dir: &target.dir,
                identifier: &target.bill.identifier,
                version: &failure.note,
                slug: &failure.note_slug,
                urls: &failure.urls,
            };
            self.record_error(&site, &failure.error)?;
        }

        for output in &result.outputs {
            self.stats.versions_extracted += 1;
            *self.stats.methods.entry(output.method).or_default() += 1;
        }
        for failure in &result.failures {
            *self.stats.failures.entry(failure.error.kind().to_string()).or_default() += 1;
            warn!(
                entity = %target.label(),
                version = %failure.note,
                kind = failure.error.kind(),
                error = %failure.error,
                "version failed"
            );
            self.errors.push(EntityError::new(
                format!("{} ({})", target.label(), failure.note),
                &failure.error,
            ));
        }

        if !result.failures.is_empty() {
            self.stats.failed += 1;
            return Ok(());
        }

        // Reconciliation may have rewritten the metadata since discovery.
        let key = self.layout.metadata(&target.dir);
        if let Some(mut bill) = read_json::<BillMetadata>(self.store, &key)? {
            bill.processing.text_extraction_latest_update = Some(self.ctx.now());
            write_json(self.store, &key, &bill)?;
        }
        self.stats.extracted += 1;
        Ok(())
    }
}

/// Extract text for every bill under the jurisdiction.
///
/// Entity failures are recorded, never propagated. Only store failures
/// outside a single bill abort the pass.
#[instrument(skip_all, fields(workers = config.workers, incremental = config.incremental))]
pub async fn extract_all(
    store: Arc<dyn Store>,
    layout: &Layout,
    config: &ExtractConfig,
    ctx: &RunContext,
    progress: &dyn ProgressReporter,
) -> Result<ExtractionOutcome> {
    let fetcher = Fetcher::new(config.fetch.clone())?;
    let (targets, unreadable) = discover(store.as_ref(), layout)?;

    let mut committer = Committer {
        store: store.as_ref(),
        layout,
        ctx,
        stats: ExtractionStats {
            bills: targets.len() + unreadable.len(),
            ..Default::default()
        },
        errors: Vec::new(),
    };
    for (session, dir, error) in unreadable {
        committer.unreadable(&session, &dir, error);
    }

    let (todo, skipped): (Vec<_>, Vec<_>) = targets
        .into_iter()
        .partition(|t| !(config.incremental && is_up_to_date(&t.bill)));
    committer.stats.skipped = skipped.len();
    for target in &skipped {
        debug!(entity = %target.label(), "text up to date");
    }

    let total = todo.len();
    info!(bills = total, skipped = skipped.len(), "extracting bill text");

    let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
    let mut set = JoinSet::new();
    for target in todo {
        let semaphore = semaphore.clone();
        let fetcher = fetcher.clone();
        let layout = layout.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            extract_bill(&fetcher, &layout, target).await
        });
    }

    let interval = config.checkpoint_interval;
    let mut last_checkpoint = Instant::now();
    let mut pending = Vec::new();
    let mut done = 0;
    loop {
        tokio::select! {
            joined = set.join_next() => match joined {
                None => break,
                Some(Ok(result)) => {
                    done += 1;
                    progress.advance("extract", done, total);
                    pending.push(result);
                    if last_checkpoint.elapsed() >= interval {
                        committer.checkpoint(&mut pending);
                        last_checkpoint = Instant::now();
                    }
                }
                Some(Err(e)) => {
                    done += 1;
                    warn!(error = %e, "extraction task aborted");
                    let err = LegisyncError::Storage(format!("extraction task aborted: {e}"));
                    committer.stats.failed += 1;
                    committer.errors.push(EntityError::new("extraction task", &err));
                }
            },
            _ = tokio::time::sleep_until(checkpoint_deadline(last_checkpoint, interval)), if !pending.is_empty() => {
                committer.checkpoint(&mut pending);
                last_checkpoint = Instant::now();
            }
        }
    }
    committer.checkpoint(&mut pending);

    let Committer { stats, errors, .. } = committer;
    info!(
        extracted = stats.extracted,
        skipped = stats.skipped,
        failed = stats.failed,
        checkpoints = stats.checkpoints,
        "extraction complete"
    );
    Ok(ExtractionOutcome { stats, errors })
}

fn checkpoint_deadline(last: Instant, interval: Duration) -> Instant {
    last.checked_add(interval)
        .or_else(|| last.checked_add(FAR_FUTURE))
        .unwrap_or(last)
}
