//! End-to-end run: raw input → reconcile → orphan pass → watermark, or
//! reconciled tree → text extraction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use legisync_shared::{AppConfig, Jurisdiction, LegisyncError, Result, SessionInfo};
use legisync_storage::layout::SESSIONS_KEY;
use legisync_storage::{EntityRegistry, FsStore, Layout, Store, WatermarkStore, read_json, write_json};

use crate::context::RunContext;
use crate::extraction::{ExtractConfig, extract_all};
use crate::input::load_dir;
use crate::orphans::OrphanTracker;
use crate::reconcile::{ReconcileConfig, reconcile};
use crate::summary::{EntityError, InputStats, RunMode, RunSummary};

/// Everything one invocation of [`run`] needs.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Raw scraped objects. Required for [`RunMode::Reconcile`].
    pub input_dir: Option<PathBuf>,
    /// Root of the output tree.
    pub output_dir: PathBuf,
    pub mode: RunMode,
    pub incremental: bool,
    pub jurisdiction: Jurisdiction,
    pub reconcile: ReconcileConfig,
    pub extract: ExtractConfig,
    pub chronic_orphan_threshold: u32,
}

impl RunRequest {
    /// A request carrying the file configuration. Callers override fields afterwards.
    pub fn new(
        mode: RunMode,
        output_dir: impl Into<PathBuf>,
        jurisdiction: Jurisdiction,
        config: &AppConfig,
    ) -> Self {
        Self {
            input_dir: None,
            output_dir: output_dir.into(),
            mode,
            incremental: false,
            jurisdiction,
            reconcile: ReconcileConfig::from(config),
            extract: ExtractConfig::from(config),
            chronic_orphan_threshold: config.reconcile.chronic_orphan_threshold,
        }
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a unit of work inside `phase` finishes.
    fn advance(&self, phase: &str, done: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn advance(&self, _phase: &str, _done: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Run against the filesystem tree at `request.output_dir` on the system clock.
pub async fn run(request: &RunRequest, progress: &dyn ProgressReporter) -> Result<RunSummary> {
    let store: Arc<dyn Store> = Arc::new(FsStore::open(&request.output_dir)?);
    run_with_store(store, request, &RunContext::system(), progress).await
}

/// Run against any store.
///
/// Entity failures end up in the summary. Only fatal errors and store
/// failures on the hidden metadata area are returned as `Err`.
#[instrument(skip_all, fields(run_id = %ctx.run_id, mode = %request.mode, jurisdiction = %request.jurisdiction))]
pub async fn run_with_store(
    store: Arc<dyn Store>,
    request: &RunRequest,
    ctx: &RunContext,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let layout = Layout::new(request.jurisdiction.clone());
    let mut summary = RunSummary::new(
        request.mode,
        request.incremental,
        request.jurisdiction.to_string(),
        ctx,
    );
    info!(incremental = request.incremental, "starting run");

    match request.mode {
        RunMode::Reconcile => {
            let input_dir = request
                .input_dir
                .as_deref()
                .ok_or_else(|| LegisyncError::config("reconcile needs an input directory"))?;
            run_reconcile(store, &layout, input_dir, request, ctx, progress, &mut summary).await?;
        }
        RunMode::Extract => {
            progress.phase("Extracting text");
            let config = ExtractConfig {
                incremental: request.incremental,
                ..request.extract.clone()
            };
            let outcome = extract_all(store, &layout, &config, ctx, progress).await?;
            summary.extraction = Some(outcome.stats);
            summary.errors.extend(outcome.errors);
        }
    }

    summary.finished_at = Some(ctx.now());
    info!(errors = summary.errors.len(), "run complete");
    progress.done(&summary);
    Ok(summary)
}

async fn run_reconcile(
    store: Arc<dyn Store>,
    layout: &Layout,
    input_dir: &Path,
    request: &RunRequest,
    ctx: &RunContext,
    progress: &dyn ProgressReporter,
    summary: &mut RunSummary,
) -> Result<()> {
    // --- Phase 1: Watermark and registry ---
    progress.phase("Loading watermark and registry");
    let mut watermark = WatermarkStore::load(store.clone())?;
    summary.watermark_before = Some(watermark.current());

    let registry = if EntityRegistry::is_persisted(store.as_ref())? {
        EntityRegistry::load(store.clone())?
    } else {
        info!("no bill/session mapping on disk, rebuilding from the tree");
        EntityRegistry::rebuild(store.clone(), layout)?
    };

    let result = reconcile_batch(
        store.clone(),
        layout,
        input_dir,
        request,
        ctx,
        progress,
        &registry,
        &mut watermark,
        summary,
    )
    .await;

    // The registry is flushed on every path, including failures.
    let flushed = registry.flush();
    if let Err(e) = &flushed {
        warn!(error = %e, "failed to flush bill/session mapping");
    }
    result?;
    flushed?;
    summary.watermark_after = Some(watermark.current());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn reconcile_batch(
    store: Arc<dyn Store>,
    layout: &Layout,
    input_dir: &Path,
    request: &RunRequest,
    ctx: &RunContext,
    progress: &dyn ProgressReporter,
    registry: &EntityRegistry,
    watermark: &mut WatermarkStore,
    summary: &mut RunSummary,
) -> Result<()> {
    // --- Phase 2: Raw input ---
    progress.phase("Loading raw input");
    let mut batch = load_dir(input_dir)?;
    for invalid in &batch.invalid {
        store.put(&layout.invalid_input(&invalid.source), &invalid.bytes)?;
        let err = LegisyncError::invalid_input(invalid.message.clone());
        warn!(file = %invalid.source, error = %err, "invalid raw input");
        summary
            .errors
            .push(EntityError::new(format!("input {}", invalid.source), &err));
    }

    if !batch.sessions.is_empty() {
        store_session_catalog(store.as_ref(), &batch.sessions)?;
    }

    let loaded = batch.objects.len();
    let below_watermark = if request.incremental {
        batch.retain_newer_than(watermark.current())
    } else {
        0
    };
    info!(
        loaded,
        below_watermark,
        watermark = %watermark.current(),
        "raw input ready"
    );
    summary.input = Some(InputStats {
        loaded,
        invalid: batch.invalid.len(),
        ignored: batch.ignored,
        below_watermark,
    });

    // --- Phase 3: Reconcile ---
    progress.phase("Reconciling");
    let outcome = reconcile(
        store.clone(),
        layout,
        registry,
        batch.objects,
        &request.reconcile,
        ctx,
        progress,
    )
    .await?;
    summary.reconcile = Some(outcome.stats);
    summary.errors.extend(outcome.errors);

    // --- Phase 4: Orphans ---
    progress.phase("Tracking orphaned placeholders");
    let tracker = OrphanTracker::new(store.as_ref(), layout, request.chronic_orphan_threshold);
    summary.orphans = Some(tracker.run(registry, ctx)?);

    // --- Phase 5: Watermark ---
    if let Some(candidate) = outcome
        .watermark_candidate
        .filter(|c| *c > watermark.current())
    {
        watermark.advance(candidate)?;
    }
    watermark.commit()?;
    Ok(())
}

/// Replace the session catalog when the jurisdiction file changed it.
fn store_session_catalog(store: &dyn Store, sessions: &BTreeMap<String, SessionInfo>) -> Result<()> {
    let current: Option<BTreeMap<String, SessionInfo>> =
        read_json(store, SESSIONS_KEY).unwrap_or_else(|e| {
            warn!(error = %e, "unreadable session catalog, replacing it");
            None
        });
    if current.as_ref() != Some(sessions) {
        write_json(store, SESSIONS_KEY, sessions)?;
        info!(sessions = sessions.len(), "session catalog updated");
    }
    Ok(())
}
