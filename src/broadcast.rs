//! Progress fan-out: a registry of broadcast channels keyed by run id.
//!
//! Delivery is at-least-once and best-effort. Channels are bounded; a slow
//! subscriber lags and drops the oldest events instead of blocking the
//! publisher. Distinct run ids never cross-deliver.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Run id used when a trigger does not scope its broadcasts.
pub const GLOBAL_RUN_ID: &str = "global";

const CHANNEL_CAPACITY: usize = 64;

/// Push notification describing batch advancement or termination. Serialized
/// shape matches the wire contract consumed by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnalysisEvent {
    Progress {
        processed: usize,
        total: usize,
        percentage: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_url: Option<String>,
    },
    Complete {
        processed: usize,
        total: usize,
        message: String,
    },
}

#[derive(Default)]
pub struct RunRegistry {
    channels: Mutex<HashMap<String, broadcast::Sender<AnalysisEvent>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join (or create) the channel for a run. Every subscriber to the same
    /// run id receives every event published after it joined.
    pub fn subscribe(&self, run_id: &str) -> broadcast::Receiver<AnalysisEvent> {
        let mut map = self.channels.lock().expect("registry lock poisoned");
        map.entry(run_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fire-and-forget publish. Zero subscribers is not an error; the event
    /// is dropped.
    pub fn publish(&self, run_id: &str, event: AnalysisEvent) {
        let tx = {
            let map = self.channels.lock().expect("registry lock poisoned");
            map.get(run_id).cloned()
        };
        match tx {
            Some(tx) => match tx.send(event) {
                Ok(n) => debug!(run_id, subscribers = n, "event published"),
                Err(_) => debug!(run_id, "no live subscribers, event dropped"),
            },
            None => debug!(run_id, "no channel for run, event dropped"),
        }
    }

    pub fn subscriber_count(&self, run_id: &str) -> usize {
        let map = self.channels.lock().expect("registry lock poisoned");
        map.get(run_id).map_or(0, |tx| tx.receiver_count())
    }

    /// Drop channels whose last receiver has disconnected.
    pub fn prune(&self) {
        let mut map = self.channels.lock().expect("registry lock poisoned");
        map.retain(|_, tx| tx.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(processed: usize, total: usize) -> AnalysisEvent {
        AnalysisEvent::Progress {
            processed,
            total,
            percentage: processed as f64 / total as f64 * 100.0,
            current_url: None,
        }
    }

    #[tokio::test]
    async fn all_subscribers_of_a_run_receive_the_event() {
        let reg = RunRegistry::new();
        let mut a = reg.subscribe("run-1");
        let mut b = reg.subscribe("run-1");

        reg.publish("run-1", progress(1, 2));

        assert_eq!(a.recv().await.unwrap(), progress(1, 2));
        assert_eq!(b.recv().await.unwrap(), progress(1, 2));
    }

    #[tokio::test]
    async fn runs_are_isolated_from_each_other() {
        let reg = RunRegistry::new();
        let mut one = reg.subscribe("run-1");
        let mut two = reg.subscribe("run-2");

        reg.publish("run-1", progress(1, 1));

        assert_eq!(one.recv().await.unwrap(), progress(1, 1));
        assert!(two.try_recv().is_err(), "no cross-delivery between runs");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let reg = RunRegistry::new();
        reg.publish("nobody-listening", progress(1, 1));
        assert_eq!(reg.subscriber_count("nobody-listening"), 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_others() {
        let reg = RunRegistry::new();
        let mut keep = reg.subscribe("run-1");
        let gone = reg.subscribe("run-1");
        drop(gone);

        reg.publish("run-1", progress(1, 1));
        assert_eq!(keep.recv().await.unwrap(), progress(1, 1));
    }

    #[tokio::test]
    async fn prune_removes_idle_channels_only() {
        let reg = RunRegistry::new();
        let live = reg.subscribe("live");
        let idle = reg.subscribe("idle");
        drop(idle);

        reg.prune();
        assert_eq!(reg.subscriber_count("live"), 1);
        {
            let map = reg.channels.lock().unwrap();
            assert!(!map.contains_key("idle"));
        }
        drop(live);
    }

    #[test]
    fn events_serialize_to_the_wire_shape() {
        let ev = AnalysisEvent::Progress {
            processed: 3,
            total: 7,
            percentage: 42.9,
            current_url: Some("https://example.com/a".into()),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["processed"], 3);
        assert_eq!(json["percentage"], 42.9);
        assert_eq!(json["current_url"], "https://example.com/a");

        let done = AnalysisEvent::Complete {
            processed: 7,
            total: 7,
            message: "Bulk analysis complete! 7 URLs analyzed.".into(),
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["message"], "Bulk analysis complete! 7 URLs analyzed.");
    }
}
