// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod broadcast;
pub mod bulk;
pub mod classify;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod metrics;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::broadcast::{AnalysisEvent, RunRegistry, GLOBAL_RUN_ID};
pub use crate::bulk::BulkAnalysisJob;
pub use crate::classify::{Classification, Sentiment, SentimentClassifier};
pub use crate::store::{AnalysisStore, MemoryStore, ResultPolicy};
