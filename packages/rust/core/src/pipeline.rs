//! Ingestion run: lock → discover → parse → filter → enrich → save → notify.
//!
//! Stages run one after another. Shutdown is checked before each stage and
//! never interrupts one already in flight. The run lock marker is held for
//! the whole run and released on every exit path.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use taxwatch_scraper::ConceptSource;
use taxwatch_shared::{Concept, Result, TaxwatchError};
use taxwatch_storage::{LockMarker, RecordStore};

use crate::enrichment::{EnrichmentGateway, EnrichmentProgress};
use crate::notify::{LogNotifier, NotifySink};
use crate::ollama::ChatClient;
use crate::shutdown::ShutdownSignal;

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Stages of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    AcquiringLock,
    Discovering,
    Parsing,
    Filtering,
    Enriching,
    Saving,
    Notifying,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AcquiringLock => "acquiring lock",
            Self::Discovering => "discovering month pages",
            Self::Parsing => "parsing concepts",
            Self::Filtering => "filtering known concepts",
            Self::Enriching => "enriching",
            Self::Saving => "saving",
            Self::Notifying => "notifying",
        };
        f.write_str(name)
    }
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// New concepts were saved.
    Completed,
    /// Every scraped concept was already stored; nothing was written.
    NothingNew,
    /// Dry run: new concepts were found but not enriched, saved or notified.
    DryRun,
    /// Shutdown was requested before `at` started.
    Aborted { at: RunStage },
}

/// Summary of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Last stage that was entered.
    pub last_stage: RunStage,
    pub scraped: usize,
    pub new: usize,
    pub saved: usize,
    pub enriched: bool,
    pub notified: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub enrich: bool,
    pub notify: bool,
    pub dry_run: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            enrich: true,
            notify: true,
            dry_run: false,
        }
    }
}

/// Mutable bookkeeping for the run in progress.
struct PipelineRun {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    clock: Instant,
    stage: RunStage,
    scraped: usize,
    new: usize,
    saved: usize,
    enriched: bool,
    notified: bool,
}

impl PipelineRun {
    fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            clock: Instant::now(),
            stage: RunStage::Idle,
            scraped: 0,
            new: 0,
            saved: 0,
            enriched: false,
            notified: false,
        }
    }

    fn finish(&self, outcome: RunOutcome) -> RunReport {
        RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            outcome,
            last_stage: self.stage,
            scraped: self.scraped,
            new: self.new,
            saved: self.saved,
            enriched: self.enriched,
            notified: self.notified,
            elapsed: self.clock.elapsed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn stage(&self, stage: RunStage);
    /// Called before each concept is enriched.
    fn concept_enriched(&self, current: usize, total: usize, title: &str);
    /// Called when the run ends without error.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: RunStage) {}
    fn concept_enriched(&self, _current: usize, _total: usize, _title: &str) {}
    fn done(&self, _report: &RunReport) {}
}

struct EnrichmentForwarder<'a>(&'a dyn ProgressReporter);

impl EnrichmentProgress for EnrichmentForwarder<'_> {
    fn concept_started(&self, current: usize, total: usize, title: &str) {
        self.0.concept_enriched(current, total, title);
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The ingestion orchestrator.
pub struct Pipeline {
    source: Box<dyn ConceptSource>,
    store: Arc<dyn RecordStore>,
    notifier: Box<dyn NotifySink>,
    chat: Option<Arc<dyn ChatClient>>,
    max_text_chars: usize,
    run_lock_path: PathBuf,
    shutdown: ShutdownSignal,
}

impl Pipeline {
    /// Pipeline without enrichment, notifying through the log.
    pub fn new(
        source: Box<dyn ConceptSource>,
        store: Arc<dyn RecordStore>,
        run_lock_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            store,
            notifier: Box::new(LogNotifier),
            chat: None,
            max_text_chars: 12_000,
            run_lock_path: run_lock_path.into(),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_enrichment(mut self, chat: Arc<dyn ChatClient>, max_text_chars: usize) -> Self {
        self.chat = Some(chat);
        self.max_text_chars = max_text_chars;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn NotifySink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn run_lock_path(&self) -> &Path {
        &self.run_lock_path
    }

    /// Concepts whose link is not in the store yet.
    pub fn filter_new(&self, scraped: Vec<Concept>) -> Result<Vec<Concept>> {
        let known: HashSet<String> = self.store.links()?;
        Ok(scraped
            .into_iter()
            .filter(|c| !known.contains(&c.link))
            .collect())
    }

    /// Run every stage once.
    ///
    /// Returns `Err` on a fatal failure (lock held, store read or write);
    /// an abort on shutdown is a successful report with
    /// [`RunOutcome::Aborted`].
    #[instrument(skip_all, fields(source = self.source.name(), dry_run = options.dry_run))]
    pub async fn run(
        &self,
        options: &PipelineOptions,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let mut run = PipelineRun::new();
        info!(run_id = %run.run_id, "starting ingestion run");

        // --- Stage 1: Lock ---
        if let Some(report) = self.enter(&mut run, RunStage::AcquiringLock, progress) {
            return Ok(report);
        }
        let _run_lock = LockMarker::acquire(&self.run_lock_path).inspect_err(|e| {
            warn!(run_id = %run.run_id, error = %e, "another run holds the lock");
        })?;
        if self.store.is_locked() {
            warn!(run_id = %run.run_id, "store is locked by another writer");
            return Err(TaxwatchError::RepositoryLocked {
                path: self.store.lock_path().to_path_buf(),
            });
        }

        // --- Stage 2: Discovery ---
        if let Some(report) = self.enter(&mut run, RunStage::Discovering, progress) {
            return Ok(report);
        }
        let months = self.source.discover_month_links().await?;

        // --- Stage 3: Parse ---
        if let Some(report) = self.enter(&mut run, RunStage::Parsing, progress) {
            return Ok(report);
        }
        let scraped = self.source.collect(&months).await;
        run.scraped = scraped.len();
        info!(months = months.len(), concepts = run.scraped, "scrape finished");

        // --- Stage 4: Filter ---
        if let Some(report) = self.enter(&mut run, RunStage::Filtering, progress) {
            return Ok(report);
        }
        let mut new_concepts = self.filter_new(scraped)?;
        run.new = new_concepts.len();

        if new_concepts.is_empty() {
            info!("no new concepts");
            return Ok(self.finish(&run, RunOutcome::NothingNew, progress));
        }
        info!(new = run.new, "found new concepts");

        if options.dry_run {
            return Ok(self.finish(&run, RunOutcome::DryRun, progress));
        }

        // --- Stage 5: Enrich ---
        if let Some(report) = self.enter(&mut run, RunStage::Enriching, progress) {
            return Ok(report);
        }
        match (&self.chat, options.enrich) {
            (Some(chat), true) => {
                let gateway = EnrichmentGateway::connect(chat.clone(), self.max_text_chars).await;
                new_concepts = gateway
                    .process_batch(new_concepts, &EnrichmentForwarder(progress))
                    .await;
                run.enriched = gateway.is_available();
            }
            _ => debug!("enrichment disabled for this run"),
        }

        // --- Stage 6: Save ---
        if let Some(report) = self.enter(&mut run, RunStage::Saving, progress) {
            return Ok(report);
        }
        self.store.save(&new_concepts)?;
        run.saved = new_concepts.len();

        // --- Stage 7: Notify ---
        if options.notify {
            if let Some(report) = self.enter(&mut run, RunStage::Notifying, progress) {
                return Ok(report);
            }
            match self
                .notifier
                .notify(&new_concepts, Some(self.store.location()))
                .await
            {
                Ok(()) => run.notified = true,
                Err(e) => warn!(error = %e, "notification failed"),
            }
        }

        Ok(self.finish(&run, RunOutcome::Completed, progress))
    }

    /// Enter `stage`, or return an aborted report if shutdown was requested.
    fn enter(
        &self,
        run: &mut PipelineRun,
        stage: RunStage,
        progress: &dyn ProgressReporter,
    ) -> Option<RunReport> {
        if self.shutdown.is_requested() {
            warn!(run_id = %run.run_id, before = %stage, "shutdown requested, aborting run");
            return Some(self.finish(run, RunOutcome::Aborted { at: stage }, progress));
        }
        run.stage = stage;
        debug!(run_id = %run.run_id, %stage, "entering stage");
        progress.stage(stage);
        None
    }

    fn finish(
        &self,
        run: &PipelineRun,
        outcome: RunOutcome,
        progress: &dyn ProgressReporter,
    ) -> RunReport {
        let report = run.finish(outcome);
        info!(
            run_id = %report.run_id,
            outcome = ?report.outcome,
            scraped = report.scraped,
            new = report.new,
            saved = report.saved,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished"
        );
        progress.done(&report);
        report
    }
}
