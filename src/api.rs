use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::Stream;
use futures::StreamExt;
use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::broadcast::{RunRegistry, GLOBAL_RUN_ID};
use crate::bulk::BulkAnalysisJob;
use crate::classify::SentimentClassifier;
use crate::config::AppConfig;
use crate::fetch::{ContentFetcher, PageFetcher};
use crate::store::{AnalysisStore, MemoryStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AnalysisStore>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub classifier: Arc<SentimentClassifier>,
    pub registry: Arc<RunRegistry>,
    /// Cancellation handles for in-flight runs, keyed by run id.
    pub active_runs: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl AppState {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let provider = crate::classify::OpenAiProvider::from_config(&cfg.classifier);
        Self {
            store: Arc::new(MemoryStore::new(cfg.result_policy)),
            fetcher: Arc::new(PageFetcher::new(cfg.fetch.clone())),
            classifier: Arc::new(SentimentClassifier::new(
                Arc::new(provider),
                cfg.classifier.max_content_chars,
            )),
            registry: Arc::new(RunRegistry::new()),
            active_runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/urls", post(add_url).get(list_urls))
        .route("/analyze/bulk", post(trigger_bulk))
        .route("/analyze/cancel", post(cancel_bulk))
        .route("/analyze/events", get(analyze_events))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Deserialize)]
struct AddUrlReq {
    url: String,
}

#[derive(serde::Serialize)]
struct AddUrlResp {
    id: u64,
    url: String,
}

async fn add_url(
    State(state): State<AppState>,
    Json(body): Json<AddUrlReq>,
) -> Result<(StatusCode, Json<AddUrlResp>), (StatusCode, String)> {
    match state.store.add_url(&body.url).await {
        Ok(rec) => Ok((
            StatusCode::CREATED,
            Json(AddUrlResp {
                id: rec.id,
                url: rec.url,
            }),
        )),
        Err(e) => Err((StatusCode::UNPROCESSABLE_ENTITY, e.to_string())),
    }
}

#[derive(serde::Serialize)]
struct UrlRow {
    id: u64,
    url: String,
    added_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sentiment: Option<crate::classify::Sentiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<String>,
}

async fn list_urls(State(state): State<AppState>) -> Json<Vec<UrlRow>> {
    let rows = state
        .store
        .snapshot()
        .await
        .into_iter()
        .map(|(u, latest)| UrlRow {
            id: u.id,
            url: u.url,
            added_at: u.added_at,
            sentiment: latest.as_ref().map(|r| r.sentiment),
            reasoning: latest.map(|r| r.reasoning),
        })
        .collect();
    Json(rows)
}

#[derive(serde::Deserialize, Default)]
struct TriggerReq {
    #[serde(default)]
    run_id: Option<String>,
}

#[derive(serde::Serialize)]
struct TriggerResp {
    status: &'static str,
    run_id: String,
    pending: usize,
}

/// Start a bulk run as a background task. Without an explicit `run_id` the
/// run broadcasts on the global channel.
async fn trigger_bulk(
    State(state): State<AppState>,
    Json(body): Json<TriggerReq>,
) -> (StatusCode, Json<TriggerResp>) {
    let run_id = body.run_id.unwrap_or_else(|| GLOBAL_RUN_ID.to_string());

    let pending = state.store.list_pending().await.len();
    if pending == 0 {
        return (
            StatusCode::OK,
            Json(TriggerResp {
                status: "nothing-pending",
                run_id,
                pending: 0,
            }),
        );
    }

    let cancel = CancellationToken::new();
    {
        let mut runs = state.active_runs.lock().expect("runs lock poisoned");
        if runs.contains_key(&run_id) {
            return (
                StatusCode::OK,
                Json(TriggerResp {
                    status: "already-running",
                    run_id,
                    pending,
                }),
            );
        }
        runs.insert(run_id.clone(), cancel.clone());
    }

    let job = BulkAnalysisJob::new(
        state.store.clone(),
        state.fetcher.clone(),
        state.classifier.clone(),
        state.registry.clone(),
    );
    let active_runs = state.active_runs.clone();
    let task_run_id = run_id.clone();
    tokio::spawn(async move {
        job.run(&task_run_id, cancel).await;
        let mut runs = active_runs.lock().expect("runs lock poisoned");
        runs.remove(&task_run_id);
    });

    (
        StatusCode::ACCEPTED,
        Json(TriggerResp {
            status: "started",
            run_id,
            pending,
        }),
    )
}

#[derive(serde::Deserialize)]
struct CancelReq {
    #[serde(default)]
    run_id: Option<String>,
}

async fn cancel_bulk(
    State(state): State<AppState>,
    Json(body): Json<CancelReq>,
) -> (StatusCode, &'static str) {
    let run_id = body.run_id.unwrap_or_else(|| GLOBAL_RUN_ID.to_string());
    let runs = state.active_runs.lock().expect("runs lock poisoned");
    match runs.get(&run_id) {
        Some(token) => {
            token.cancel();
            (StatusCode::OK, "cancelling")
        }
        None => (StatusCode::NOT_FOUND, "no such run"),
    }
}

#[derive(serde::Deserialize)]
struct EventsQuery {
    #[serde(default)]
    run_id: Option<String>,
}

/// SSE stream of progress/completion events for one run.
async fn analyze_events(
    State(state): State<AppState>,
    Query(q): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let run_id = q.run_id.unwrap_or_else(|| GLOBAL_RUN_ID.to_string());
    let rx = state.registry.subscribe(&run_id);

    let stream = BroadcastStream::new(rx).filter_map(|res| async move {
        match res {
            Ok(ev) => Event::default().json_data(&ev).ok().map(Ok),
            Err(e) => {
                // Lagged subscriber: the bounded queue dropped the oldest events.
                warn!(error = ?e, "sse subscriber lagged");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}
