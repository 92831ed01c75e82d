//! Data model + storage boundary.
//!
//! The core only ever *reads* URLs and *writes* sentiment records; intake is
//! external. `AnalysisStore` is the seam a database-backed implementation
//! would plug into; `MemoryStore` is the shipped implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classify::Sentiment;

pub type UrlId = u64;

/// A unique resource eligible for sentiment analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub id: UrlId,
    pub url: String,
    pub added_at: u64,
}

/// Persisted outcome of classifying one URL. Both fields are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub sentiment: Sentiment,
    pub reasoning: String,
    pub created_at: u64,
}

/// What happens when a URL gets a second result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPolicy {
    /// Keep only the newest record per URL (single write, no
    /// delete-then-create window).
    #[default]
    ReplaceLatest,
    /// Keep every record; `latest` still returns the newest.
    AppendHistory,
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Validate and register a URL. Errors on malformed or duplicate input.
    async fn add_url(&self, url: &str) -> Result<UrlRecord>;

    /// URLs with no sentiment record yet, in stable insertion order.
    async fn list_pending(&self) -> Vec<UrlRecord>;

    /// Upsert a result for a URL according to the configured policy.
    async fn record_result(&self, id: UrlId, sentiment: Sentiment, reasoning: &str) -> Result<()>;

    /// All records for one URL, oldest first.
    async fn results_for(&self, id: UrlId) -> Vec<SentimentRecord>;

    /// Every URL with its latest record, in insertion order.
    async fn snapshot(&self) -> Vec<(UrlRecord, Option<SentimentRecord>)>;
}

fn validate_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw.trim())?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => bail!("unsupported scheme '{other}', expected http or https"),
    }
    if parsed.host_str().is_none() {
        bail!("URL has no host");
    }
    Ok(parsed.to_string())
}

fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[derive(Default)]
struct Inner {
    next_id: UrlId,
    urls: Vec<UrlRecord>,
    results: HashMap<UrlId, Vec<SentimentRecord>>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    policy: ResultPolicy,
}

impl MemoryStore {
    pub fn new(policy: ResultPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            policy,
        }
    }

    pub fn policy(&self) -> ResultPolicy {
        self.policy
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn add_url(&self, url: &str) -> Result<UrlRecord> {
        let normalized = validate_url(url)?;
        let mut g = self.inner.write().expect("store lock poisoned");
        if g.urls.iter().any(|u| u.url == normalized) {
            bail!("URL already exists");
        }
        g.next_id += 1;
        let rec = UrlRecord {
            id: g.next_id,
            url: normalized,
            added_at: now_unix(),
        };
        g.urls.push(rec.clone());
        Ok(rec)
    }

    async fn list_pending(&self) -> Vec<UrlRecord> {
        let g = self.inner.read().expect("store lock poisoned");
        g.urls
            .iter()
            .filter(|u| g.results.get(&u.id).map_or(true, |v| v.is_empty()))
            .cloned()
            .collect()
    }

    async fn record_result(&self, id: UrlId, sentiment: Sentiment, reasoning: &str) -> Result<()> {
        if reasoning.trim().is_empty() {
            bail!("reasoning must be non-empty");
        }
        let mut g = self.inner.write().expect("store lock poisoned");
        if !g.urls.iter().any(|u| u.id == id) {
            bail!("unknown URL id {id}");
        }
        let rec = SentimentRecord {
            sentiment,
            reasoning: reasoning.to_string(),
            created_at: now_unix(),
        };
        let slot = g.results.entry(id).or_default();
        match self.policy {
            ResultPolicy::ReplaceLatest => {
                slot.clear();
                slot.push(rec);
            }
            ResultPolicy::AppendHistory => slot.push(rec),
        }
        Ok(())
    }

    async fn results_for(&self, id: UrlId) -> Vec<SentimentRecord> {
        let g = self.inner.read().expect("store lock poisoned");
        g.results.get(&id).cloned().unwrap_or_default()
    }

    async fn snapshot(&self) -> Vec<(UrlRecord, Option<SentimentRecord>)> {
        let g = self.inner.read().expect("store lock poisoned");
        g.urls
            .iter()
            .map(|u| {
                let latest = g.results.get(&u.id).and_then(|v| v.last()).cloned();
                (u.clone(), latest)
            })
            .collect()
    }
}
