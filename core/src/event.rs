// Speech event bus implementation
use crate::utils::{gen_id, now_ms};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Host-facing lifecycle events, serialized as `{"type": "onStart", "id": ...}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SpeechEvent {
    #[serde(rename = "onStart")]
    Start { id: String },
    #[serde(rename = "onResume")]
    Resume { id: String },
    /// `location` is the absolute char position in the original text
    #[serde(rename = "onProgress")]
    Progress {
        id: String,
        location: usize,
        length: usize,
    },
    #[serde(rename = "onFinish")]
    Finish { id: String },
    #[serde(rename = "onError")]
    Error { id: String },
    #[serde(rename = "onPause")]
    Pause { id: String },
    #[serde(rename = "onStopped")]
    Stopped { id: String },
}

impl SpeechEvent {
    pub fn id(&self) -> &str {
        match self {
            SpeechEvent::Start { id }
            | SpeechEvent::Resume { id }
            | SpeechEvent::Progress { id, .. }
            | SpeechEvent::Finish { id }
            | SpeechEvent::Error { id }
            | SpeechEvent::Pause { id }
            | SpeechEvent::Stopped { id } => id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpeechEvent::Start { .. } => "onStart",
            SpeechEvent::Resume { .. } => "onResume",
            SpeechEvent::Progress { .. } => "onProgress",
            SpeechEvent::Finish { .. } => "onFinish",
            SpeechEvent::Error { .. } => "onError",
            SpeechEvent::Pause { .. } => "onPause",
            SpeechEvent::Stopped { .. } => "onStopped",
        }
    }
}

/// Delivery guarantee for a subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QoSLevel {
    /// Never wait on a slow subscriber; drop when its queue is full
    Realtime,
    /// Bounded queue; publishing waits for room
    Batched,
}

/// Subscription information
#[derive(Debug, Clone)]
struct Subscription {
    id: String,
    event_names: Vec<String>,
    qos: QoSLevel,
    sender: mpsc::Sender<SpeechEvent>,
}

/// Per event name statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub dropped_events: u64,
    pub last_published_ms: i64,
}

/// Fan-out of speech events to host subscribers
pub struct EventBus {
    // Subscription id -> subscription
    subscriptions: Arc<DashMap<String, Subscription>>,

    // Event name -> statistics
    stats: Arc<DashMap<String, EventBusStats>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(DashMap::new()),
            stats: Arc::new(DashMap::new()),
        }
    }

    pub fn shutdown(&self) {
        info!(target: "event_bus", "Event Bus shutting down");
        self.subscriptions.clear();
    }

    /// Publish an event to every matching subscriber; returns the delivery count
    pub async fn publish(&self, event: SpeechEvent) -> u64 {
        let name = event.name();
        debug!(target: "event_bus", event = name, id = %event.id(), "Publishing event");

        self.update_stats(name, |stats| {
            stats.total_published += 1;
            stats.last_published_ms = now_ms();
        });

        // Snapshot the targets so no map guard is held across an await
        let targets: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.event_names.is_empty() || s.event_names.iter().any(|n| n == name))
            .map(|s| s.value().clone())
            .collect();

        let mut delivered = 0;
        let mut dropped = 0;
        let mut closed = Vec::new();

        for sub in targets {
            match sub.qos {
                QoSLevel::Realtime => match sub.sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        dropped += 1;
                        warn!(target: "event_bus", subscription = %sub.id, "Dropped realtime event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(sub.id),
                },
                QoSLevel::Batched => match sub.sender.send(event.clone()).await {
                    Ok(()) => delivered += 1,
                    Err(_) => closed.push(sub.id),
                },
            }
        }

        for id in closed {
            debug!(target: "event_bus", subscription = %id, "Removing closed subscription");
            self.subscriptions.remove(&id);
        }

        self.update_stats(name, |stats| {
            stats.total_delivered += delivered;
            stats.dropped_events += dropped;
        });
        delivered
    }

    /// Subscribe to the given event names (empty = everything)
    pub fn subscribe(
        &self,
        event_names: Vec<String>,
        qos: QoSLevel,
    ) -> (String, mpsc::Receiver<SpeechEvent>) {
        let subscription_id = format!("sub_{}", gen_id());
        let cap = match qos {
            QoSLevel::Realtime => 64,
            QoSLevel::Batched => 1024,
        };
        let (tx, rx) = mpsc::channel(cap);

        self.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                id: subscription_id.clone(),
                event_names,
                qos,
                sender: tx,
            },
        );

        info!(target: "event_bus", subscription = %subscription_id, "Created subscription");
        (subscription_id, rx)
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let removed = self.subscriptions.remove(subscription_id).is_some();
        info!(target: "event_bus", subscription = %subscription_id, removed, "Unsubscribed");
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn stats(&self, event_name: &str) -> Option<EventBusStats> {
        self.stats.get(event_name).map(|s| s.clone())
    }

    fn update_stats<F>(&self, event_name: &str, f: F)
    where
        F: FnOnce(&mut EventBusStats),
    {
        f(self
            .stats
            .entry(event_name.to_string())
            .or_insert_with(EventBusStats::default)
            .value_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_host_names() {
        let ev = SpeechEvent::Progress {
            id: "u1".into(),
            location: 6,
            length: 5,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "onProgress");
        assert_eq!(json["location"], 6);
        assert_eq!(json["length"], 5);
        assert_eq!(ev.name(), "onProgress");
    }
}
