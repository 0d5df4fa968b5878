//! Candidate generation over paginated search results.
//!
//! For each page the driver compares every unordered pair of documents and
//! persists the relevant ones. Work is strictly sequential: one pair is
//! fetched, compared and persisted before the next one starts.

use crate::database::models::InsertOutcome;
use crate::pipeline::document::{Bitmap, DocumentRef, DocumentSource, FetchOutcome, SearchFilters};
use crate::pipeline::pairing::{pair_count, unordered_pairs};
use crate::pipeline::similarity::{ScoreResult, SimilarityEngine};
use crate::pipeline::store::CandidateStore;
use serde::Serialize;
use std::any::Any;
use std::ops::AddAssign;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub type CancellationToken = Arc<AtomicBool>;

/// How often a page pause checks for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Counters for one group, or aggregated over several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Pairs that went through the engine, relevant or not.
    pub processed: u64,
    /// Relevant pairs handed to the store.
    pub saved: u64,
    /// Of `saved`, pairs the store already had.
    pub already_known: u64,
    /// Pairs dropped because an image could not be retrieved.
    pub skipped: u64,
    /// Pairs whose comparison or persistence failed.
    pub failed: u64,
    pub pages: u64,
}

impl AddAssign for BatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.saved += other.saved;
        self.already_known += other.already_known;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.pages += other.pages;
    }
}

/// Why a group stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GroupOutcome {
    /// A page came back with fewer than two documents.
    Exhausted,
    Cancelled,
    /// The source failed while listing documents.
    SourceFailed(String),
    /// Skipped without searching, the group cannot form a pair.
    TooSmall { documents: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub filters: SearchFilters,
    pub summary: BatchSummary,
    pub outcome: GroupOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupedReport {
    pub groups: Vec<GroupReport>,
    pub totals: BatchSummary,
}

#[derive(Debug, Clone, Serialize)]
pub enum BatchProgress {
    PageStarted {
        filters: SearchFilters,
        offset: u64,
        documents: usize,
        pairs: usize,
    },
    PairCompared {
        doc1_id: String,
        doc2_id: String,
        result: ScoreResult,
    },
    PairSkipped {
        doc1_id: String,
        doc2_id: String,
        reason: String,
    },
    PairFailed {
        doc1_id: String,
        doc2_id: String,
        error: String,
    },
    CandidateSaved {
        doc1_id: String,
        doc2_id: String,
        score: f64,
        outcome: InsertOutcome,
    },
    GroupFinished(GroupReport),
}

/// Caller-owned parameters and signals for one run.
pub struct BatchContext {
    pub filters: SearchFilters,
    pub page_size: u32,
    pub start_offset: u64,
    /// Pause between pages, to go easy on the remote archive.
    pub page_delay: Duration,
    progress_sender: Option<mpsc::UnboundedSender<BatchProgress>>,
    cancellation_token: CancellationToken,
}

impl BatchContext {
    pub fn new(filters: SearchFilters, page_size: u32) -> Self {
        Self {
            filters,
            page_size,
            start_offset: 0,
            page_delay: Duration::ZERO,
            progress_sender: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_start_offset(mut self, start_offset: u64) -> Self {
        self.start_offset = start_offset;
        self
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<BatchProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn get_cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::Relaxed)
    }

    fn send_progress(&self, progress: BatchProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}

pub struct BatchDriver {
    source: Arc<dyn DocumentSource>,
    engine: Arc<dyn SimilarityEngine>,
    store: Arc<dyn CandidateStore>,
}

impl BatchDriver {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        engine: Arc<dyn SimilarityEngine>,
        store: Arc<dyn CandidateStore>,
    ) -> Self {
        Self {
            source,
            engine,
            store,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Runs one group defined by `ctx.filters` until the source is exhausted,
    /// the source fails, or the run is cancelled. A page size below two can
    /// never yield a pair, so such a run ends exhausted after one search.
    pub async fn run(&self, ctx: &BatchContext) -> GroupReport {
        let report = self.run_group(ctx, ctx.filters.clone()).await;
        self.finish_group(ctx, report)
    }

    /// Runs one group per `(collection, doc_type)` combination. `None`
    /// entries are wildcards and an empty list means "any". Groups with fewer
    /// than two matching documents are skipped; a failing group does not stop
    /// the others.
    pub async fn run_grouped(
        &self,
        ctx: &BatchContext,
        collections: &[Option<String>],
        doc_types: &[Option<String>],
    ) -> GroupedReport {
        let collections = wildcard_if_empty(collections);
        let doc_types = wildcard_if_empty(doc_types);
        let mut report = GroupedReport::default();

        'groups: for collection in &collections {
            for doc_type in &doc_types {
                if ctx.is_cancelled() {
                    log::info!("Grouped run cancelled before all groups were processed");
                    break 'groups;
                }

                let filters = ctx
                    .filters
                    .clone()
                    .with_collection(collection.clone())
                    .with_doc_type(doc_type.clone());

                let group = match self.source.count(&filters).await {
                    Ok(documents) if documents < 2 => {
                        log::info!(
                            "Skipping {}: only {} document(s)",
                            filters.label(),
                            documents
                        );
                        GroupReport {
                            filters,
                            summary: BatchSummary::default(),
                            outcome: GroupOutcome::TooSmall { documents },
                        }
                    }
                    Ok(_) => self.run_group(ctx, filters).await,
                    Err(e) => {
                        log::warn!("Failed to count documents for {}: {}", filters.label(), e);
                        GroupReport {
                            filters,
                            summary: BatchSummary::default(),
                            outcome: GroupOutcome::SourceFailed(e.to_string()),
                        }
                    }
                };

                let group = self.finish_group(ctx, group);
                report.totals += group.summary;
                report.groups.push(group);
            }
        }

        report
    }

    async fn run_group(&self, ctx: &BatchContext, filters: SearchFilters) -> GroupReport {
        let mut summary = BatchSummary::default();
        let mut offset = ctx.start_offset;

        let outcome = loop {
            if ctx.is_cancelled() {
                break GroupOutcome::Cancelled;
            }

            let documents = match self.source.search(&filters, offset, ctx.page_size).await {
                Ok(documents) => documents,
                Err(e) => {
                    log::warn!(
                        "Search failed for {} at offset {}: {}",
                        filters.label(),
                        offset,
                        e
                    );
                    break GroupOutcome::SourceFailed(e.to_string());
                }
            };

            if documents.len() < 2 {
                log::info!(
                    "{} exhausted at offset {} ({} document(s))",
                    filters.label(),
                    offset,
                    documents.len()
                );
                break GroupOutcome::Exhausted;
            }

            summary.pages += 1;
            ctx.send_progress(BatchProgress::PageStarted {
                filters: filters.clone(),
                offset,
                documents: documents.len(),
                pairs: pair_count(documents.len()),
            });

            if !self.process_page(ctx, &documents, &mut summary).await {
                break GroupOutcome::Cancelled;
            }

            offset += ctx.page_size as u64;

            pause(ctx).await;
        };

        GroupReport {
            filters,
            summary,
            outcome,
        }
    }

    /// Returns `false` when cancellation was observed before the page was
    /// finished.
    async fn process_page(
        &self,
        ctx: &BatchContext,
        documents: &[DocumentRef],
        summary: &mut BatchSummary,
    ) -> bool {
        for (i, j) in unordered_pairs(documents.len()) {
            if ctx.is_cancelled() {
                return false;
            }
            self.process_pair(ctx, &documents[i], &documents[j], summary)
                .await;
        }
        true
    }

    async fn process_pair(
        &self,
        ctx: &BatchContext,
        doc1: &DocumentRef,
        doc2: &DocumentRef,
        summary: &mut BatchSummary,
    ) {
        let result = {
            let bitmap1 = match self.load_bitmap(&doc1.id).await {
                Ok(bitmap) => bitmap,
                Err(reason) => return self.skip_pair(ctx, doc1, doc2, reason, summary),
            };
            let bitmap2 = match self.load_bitmap(&doc2.id).await {
                Ok(bitmap) => bitmap,
                Err(reason) => return self.skip_pair(ctx, doc1, doc2, reason, summary),
            };

            match self.compare_isolated(&bitmap1, &bitmap2) {
                Ok(result) => result,
                Err(error) => {
                    log::warn!(
                        "Comparison of {} and {} failed: {}",
                        doc1.id,
                        doc2.id,
                        error
                    );
                    return self.fail_pair(ctx, doc1, doc2, error, summary);
                }
            }
        };

        if result.relevant {
            match self.store.insert_candidate(
                &doc1.id,
                &doc2.id,
                result.score,
                self.engine.name(),
            ) {
                Ok(outcome) => {
                    summary.saved += 1;
                    if outcome == InsertOutcome::AlreadyExists {
                        summary.already_known += 1;
                    }
                    ctx.send_progress(BatchProgress::CandidateSaved {
                        doc1_id: doc1.id.clone(),
                        doc2_id: doc2.id.clone(),
                        score: result.score,
                        outcome,
                    });
                }
                Err(e) => {
                    log::error!(
                        "Failed to save candidate ({}, {}): {}",
                        doc1.id,
                        doc2.id,
                        e
                    );
                    return self.fail_pair(ctx, doc1, doc2, e.to_string(), summary);
                }
            }
        }

        summary.processed += 1;
        ctx.send_progress(BatchProgress::PairCompared {
            doc1_id: doc1.id.clone(),
            doc2_id: doc2.id.clone(),
            result,
        });
    }

    async fn load_bitmap(&self, doc_id: &str) -> Result<Bitmap, String> {
        match self.source.fetch_image(doc_id).await {
            Ok(FetchOutcome::Found(bitmap)) => Ok(bitmap),
            Ok(FetchOutcome::NotFound) => Err(format!("{} not found", doc_id)),
            Ok(FetchOutcome::DecodeError(e)) => Err(format!("{} could not be decoded: {}", doc_id, e)),
            Err(e) => Err(format!("{} could not be fetched: {}", doc_id, e)),
        }
    }

    /// Engine errors and panics are confined to the pair being compared.
    fn compare_isolated(&self, a: &Bitmap, b: &Bitmap) -> Result<ScoreResult, String> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.engine.compare(a, b))) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!("engine panicked: {}", panic_message(payload.as_ref()))),
        }
    }

    fn skip_pair(
        &self,
        ctx: &BatchContext,
        doc1: &DocumentRef,
        doc2: &DocumentRef,
        reason: String,
        summary: &mut BatchSummary,
    ) {
        log::debug!("Skipping pair ({}, {}): {}", doc1.id, doc2.id, reason);
        summary.skipped += 1;
        ctx.send_progress(BatchProgress::PairSkipped {
            doc1_id: doc1.id.clone(),
            doc2_id: doc2.id.clone(),
            reason,
        });
    }

    fn fail_pair(
        &self,
        ctx: &BatchContext,
        doc1: &DocumentRef,
        doc2: &DocumentRef,
        error: String,
        summary: &mut BatchSummary,
    ) {
        summary.failed += 1;
        ctx.send_progress(BatchProgress::PairFailed {
            doc1_id: doc1.id.clone(),
            doc2_id: doc2.id.clone(),
            error,
        });
    }

    fn finish_group(&self, ctx: &BatchContext, report: GroupReport) -> GroupReport {
        log::info!(
            "Finished {} ({:?}): {} processed, {} saved, {} skipped, {} failed",
            report.filters.label(),
            report.outcome,
            report.summary.processed,
            report.summary.saved,
            report.summary.skipped,
            report.summary.failed
        );
        ctx.send_progress(BatchProgress::GroupFinished(report.clone()));
        report
    }
}

/// Sleeps for `ctx.page_delay`, returning early once the run is cancelled.
async fn pause(ctx: &BatchContext) {
    let deadline = tokio::time::Instant::now() + ctx.page_delay;
    while !ctx.is_cancelled() {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL_INTERVAL)).await;
    }
}

fn wildcard_if_empty(values: &[Option<String>]) -> Vec<Option<String>> {
    if values.is_empty() {
        vec![None]
    } else {
        values.to_vec()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
