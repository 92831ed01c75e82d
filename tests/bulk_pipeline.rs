// tests/bulk_pipeline.rs
//
// Orchestrator behavior with mocked fetcher/provider/store:
// - fault isolation (a failing item never aborts the batch)
// - progress math and monotonicity
// - total snapshotted at run start
// - no-op runs emit no events
// - cancellation between items

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use solar_sentiment_analyzer::broadcast::{AnalysisEvent, RunRegistry};
use solar_sentiment_analyzer::bulk::BulkAnalysisJob;
use solar_sentiment_analyzer::classify::{MockProvider, Sentiment, SentimentClassifier};
use solar_sentiment_analyzer::fetch::ContentFetcher;
use solar_sentiment_analyzer::store::{
    AnalysisStore, MemoryStore, ResultPolicy, SentimentRecord, UrlId, UrlRecord,
};

/// Serves a fixed page for every URL, erroring for URLs in `fail_for`.
struct ScriptedFetcher {
    fail_for: Vec<String>,
    body: Option<String>,
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<String>> {
        if self.fail_for.iter().any(|f| url.contains(f.as_str())) {
            anyhow::bail!("connection reset by peer");
        }
        Ok(self.body.clone())
    }
}

fn classifier_replying(raw: &str) -> Arc<SentimentClassifier> {
    Arc::new(SentimentClassifier::new(
        Arc::new(MockProvider::replying(raw)),
        2000,
    ))
}

async fn seeded_store(urls: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(ResultPolicy::ReplaceLatest));
    for u in urls {
        store.add_url(u).await.unwrap();
    }
    store
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<AnalysisEvent>) -> Vec<AnalysisEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

#[tokio::test]
async fn failing_item_is_skipped_and_the_batch_completes() {
    let store = seeded_store(&[
        "https://example.com/one",
        "https://example.com/two",
        "https://example.com/three",
    ])
    .await;
    let fetcher = Arc::new(ScriptedFetcher {
        fail_for: vec!["two".into()],
        body: Some("<article><p>Panel prices fell again.</p></article>".into()),
    });
    let registry = Arc::new(RunRegistry::new());
    let mut rx = registry.subscribe("run-a");

    let job = BulkAnalysisJob::new(
        store.clone(),
        fetcher,
        classifier_replying(r#"{"sentiment":"positive","reasoning":"cheaper panels"}"#),
        registry.clone(),
    );
    job.run("run-a", CancellationToken::new()).await;

    let events = drain(&mut rx);
    match events.last().unwrap() {
        AnalysisEvent::Complete {
            processed, total, ..
        } => {
            assert_eq!(*processed, 2);
            assert_eq!(*total, 3);
        }
        other => panic!("expected completion event, got {other:?}"),
    }

    // The failing URL is still pending; the others are analyzed.
    let pending = store.list_pending().await;
    assert_eq!(pending.len(), 1);
    assert!(pending[0].url.contains("two"));
}

#[tokio::test]
async fn progress_percentages_are_rounded_and_monotonic() {
    let store = seeded_store(&[
        "https://example.com/a",
        "https://example.com/b",
        "https://example.com/c",
    ])
    .await;
    let fetcher = Arc::new(ScriptedFetcher {
        fail_for: vec![],
        body: Some("<p>Neutral coverage of tariffs.</p>".into()),
    });
    let registry = Arc::new(RunRegistry::new());
    let mut rx = registry.subscribe("run-b");

    let job = BulkAnalysisJob::new(
        store,
        fetcher,
        classifier_replying("Neutral overall. Tariffs cut both ways."),
        registry.clone(),
    );
    job.run("run-b", CancellationToken::new()).await;

    let events = drain(&mut rx);
    let percentages: Vec<f64> = events
        .iter()
        .filter_map(|ev| match ev {
            AnalysisEvent::Progress { percentage, .. } => Some(*percentage),
            _ => None,
        })
        .collect();
    assert_eq!(percentages, vec![33.3, 66.7, 100.0]);
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));

    let currents: Vec<Option<&str>> = events
        .iter()
        .filter_map(|ev| match ev {
            AnalysisEvent::Progress { current_url, .. } => Some(current_url.as_deref()),
            _ => None,
        })
        .collect();
    assert_eq!(currents[0], Some("https://example.com/a"));
}

#[tokio::test]
async fn zero_pending_items_is_a_no_op_with_no_events() {
    let store = Arc::new(MemoryStore::new(ResultPolicy::ReplaceLatest));
    let registry = Arc::new(RunRegistry::new());
    let mut rx = registry.subscribe("run-c");

    let job = BulkAnalysisJob::new(
        store,
        Arc::new(ScriptedFetcher {
            fail_for: vec![],
            body: None,
        }),
        classifier_replying("irrelevant"),
        registry.clone(),
    );
    job.run("run-c", CancellationToken::new()).await;

    assert!(drain(&mut rx).is_empty(), "no events for an empty batch");
}

#[tokio::test]
async fn unreachable_page_still_counts_as_processed_with_unclear_result() {
    let store = seeded_store(&["https://example.com/dead"]).await;
    let fetcher = Arc::new(ScriptedFetcher {
        fail_for: vec![],
        body: None, // both fetch strategies exhausted
    });
    let registry = Arc::new(RunRegistry::new());

    let job = BulkAnalysisJob::new(
        store.clone(),
        fetcher,
        // Provider would fail if called; the blank-content short-circuit
        // must win first.
        Arc::new(SentimentClassifier::new(
            Arc::new(MockProvider::failing("should not be called")),
            2000,
        )),
        registry,
    );
    job.run("run-d", CancellationToken::new()).await;

    assert!(store.list_pending().await.is_empty());
    let results = store.results_for(1).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].sentiment, Sentiment::Unclear);
    assert_eq!(results[0].reasoning, "content unavailable");
}

#[tokio::test]
async fn cancelled_run_publishes_completion_with_partial_counts() {
    let store = seeded_store(&["https://example.com/a", "https://example.com/b"]).await;
    let registry = Arc::new(RunRegistry::new());
    let mut rx = registry.subscribe("run-e");

    let cancel = CancellationToken::new();
    cancel.cancel();

    let job = BulkAnalysisJob::new(
        store,
        Arc::new(ScriptedFetcher {
            fail_for: vec![],
            body: Some("<p>text</p>".into()),
        }),
        classifier_replying("Neutral take."),
        registry.clone(),
    );
    job.run("run-e", cancel).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1, "only the completion event");
    match &events[0] {
        AnalysisEvent::Complete {
            processed, total, ..
        } => {
            assert_eq!(*processed, 0);
            assert_eq!(*total, 2);
        }
        other => panic!("expected completion event, got {other:?}"),
    }
}

/// Store that sneaks a new pending URL in while the run is writing results,
/// to prove the batch total is a start-of-run snapshot.
struct GrowingStore {
    inner: Arc<MemoryStore>,
    injected: AtomicBool,
}

#[async_trait]
impl AnalysisStore for GrowingStore {
    async fn add_url(&self, url: &str) -> Result<UrlRecord> {
        self.inner.add_url(url).await
    }

    async fn list_pending(&self) -> Vec<UrlRecord> {
        self.inner.list_pending().await
    }

    async fn record_result(&self, id: UrlId, sentiment: Sentiment, reasoning: &str) -> Result<()> {
        if !self.injected.swap(true, Ordering::SeqCst) {
            self.inner
                .add_url("https://example.com/latecomer")
                .await
                .unwrap();
        }
        self.inner.record_result(id, sentiment, reasoning).await
    }

    async fn results_for(&self, id: UrlId) -> Vec<SentimentRecord> {
        self.inner.results_for(id).await
    }

    async fn snapshot(&self) -> Vec<(UrlRecord, Option<SentimentRecord>)> {
        self.inner.snapshot().await
    }
}

#[tokio::test]
async fn total_is_snapshotted_at_run_start() {
    let inner = seeded_store(&["https://example.com/a", "https://example.com/b"]).await;
    let store = Arc::new(GrowingStore {
        inner: inner.clone(),
        injected: AtomicBool::new(false),
    });
    let registry = Arc::new(RunRegistry::new());
    let mut rx = registry.subscribe("run-f");

    let job = BulkAnalysisJob::new(
        store,
        Arc::new(ScriptedFetcher {
            fail_for: vec![],
            body: Some("<p>text</p>".into()),
        }),
        classifier_replying("Positive momentum."),
        registry.clone(),
    );
    job.run("run-f", CancellationToken::new()).await;

    let mut totals: HashMap<&'static str, Vec<usize>> = HashMap::new();
    for ev in drain(&mut rx) {
        match ev {
            AnalysisEvent::Progress { total, .. } => totals.entry("progress").or_default().push(total),
            AnalysisEvent::Complete {
                processed, total, ..
            } => {
                assert_eq!(processed, 2);
                totals.entry("complete").or_default().push(total);
            }
        }
    }
    assert!(totals["progress"].iter().all(|t| *t == 2));
    assert_eq!(totals["complete"], vec![2]);

    // The latecomer was excluded from this run and stays pending.
    let pending = inner.list_pending().await;
    assert_eq!(pending.len(), 1);
    assert!(pending[0].url.contains("latecomer"));
}
