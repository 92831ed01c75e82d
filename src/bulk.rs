//! Bulk analysis orchestrator.
//!
//! Drives every pending URL through fetch → extract → classify → persist,
//! publishing progress per processed item and one completion event at the
//! end. A failing item is logged and skipped; the run always completes.

use std::sync::Arc;

use anyhow::Result;
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::{AnalysisEvent, RunRegistry};
use crate::classify::SentimentClassifier;
use crate::extract::extract_article_text;
use crate::fetch::ContentFetcher;
use crate::store::{AnalysisStore, UrlRecord};

/// round(processed/total * 100, 1 decimal).
pub fn progress_percentage(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (processed as f64 / total as f64 * 1000.0).round() / 10.0
}

pub struct BulkAnalysisJob {
    store: Arc<dyn AnalysisStore>,
    fetcher: Arc<dyn ContentFetcher>,
    classifier: Arc<SentimentClassifier>,
    registry: Arc<RunRegistry>,
}

impl BulkAnalysisJob {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        fetcher: Arc<dyn ContentFetcher>,
        classifier: Arc<SentimentClassifier>,
        registry: Arc<RunRegistry>,
    ) -> Self {
        Self {
            store,
            fetcher,
            classifier,
            registry,
        }
    }

    /// Run one batch. `total` is snapshotted up front; URLs added while the
    /// run is in flight belong to the next run. Zero pending items is a
    /// no-op with no events.
    pub async fn run(&self, run_id: &str, cancel: CancellationToken) {
        let pending = self.store.list_pending().await;
        let total = pending.len();
        if total == 0 {
            info!(run_id, "no pending URLs, nothing to analyze");
            return;
        }

        info!(run_id, total, "starting bulk analysis");
        counter!("bulk_runs_total").increment(1);
        gauge!("bulk_last_run_ts").set(chrono::Utc::now().timestamp().max(0) as f64);

        let mut processed = 0usize;
        for item in &pending {
            if cancel.is_cancelled() {
                warn!(run_id, processed, total, "bulk analysis cancelled");
                break;
            }
            match self.analyze_item(item).await {
                Ok(()) => {
                    processed += 1;
                    counter!("bulk_items_processed_total").increment(1);
                    self.registry.publish(
                        run_id,
                        AnalysisEvent::Progress {
                            processed,
                            total,
                            percentage: progress_percentage(processed, total),
                            current_url: Some(item.url.clone()),
                        },
                    );
                }
                Err(e) => {
                    // One bad item never aborts the batch.
                    warn!(error = ?e, url = %item.url, "item analysis failed, continuing");
                    counter!("bulk_items_failed_total").increment(1);
                }
            }
        }

        let message = format!("Bulk analysis complete! {processed} URLs analyzed.");
        self.registry.publish(
            run_id,
            AnalysisEvent::Complete {
                processed,
                total,
                message,
            },
        );
        self.registry.prune();
        info!(run_id, processed, total, "bulk analysis finished");
    }

    async fn analyze_item(&self, item: &UrlRecord) -> Result<()> {
        let html = self.fetcher.fetch(&item.url).await?.unwrap_or_default();
        let text = extract_article_text(&html);
        let result = self.classifier.classify(&text).await;
        self.store
            .record_result(item.id, result.sentiment, &result.reasoning)
            .await?;
        Ok(())
    }
}
