use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{debug, warn};

use super::{BusMessage, MessageBus, Subscription};
use crate::error::{OrchestratorError, Result};

/// In-process bus that fans messages out over one broadcast channel per
/// topic. Used for tests and single-process deployments where scanner
/// backends live in the same runtime.
///
/// The most recent published messages are also kept in a bounded journal so
/// callers can inspect what went out without racing a subscriber. Once the
/// journal is full the oldest entry is evicted.
pub struct InProcMessageBus {
    channels: DashMap<String, broadcast::Sender<BusMessage>>,
    journal: Mutex<VecDeque<BusMessage>>,
    journal_capacity: usize,
    connected: AtomicBool,
    channel_capacity: usize,
}

const DEFAULT_JOURNAL_CAPACITY: usize = 1024;

impl fmt::Debug for InProcMessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcMessageBus")
            .field("channel_capacity", &self.channel_capacity)
            .field("journal_capacity", &self.journal_capacity)
            .field("topics", &self.channels.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Default for InProcMessageBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InProcMessageBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            journal: Mutex::new(VecDeque::new()),
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
            connected: AtomicBool::new(false),
            channel_capacity: capacity.max(1),
        }
    }

    /// Keeps at most `capacity` messages in the journal; `0` disables it.
    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }

    /// Journaled payloads published on `topic`, oldest first.
    pub async fn published(&self, topic: &str) -> Vec<Arc<str>> {
        self.journal
            .lock()
            .await
            .iter()
            .filter(|message| message.topic == topic)
            .map(|message| Arc::clone(&message.payload))
            .collect()
    }

    /// Journaled messages, oldest first.
    pub async fn journal(&self) -> Vec<BusMessage> {
        self.journal.lock().await.iter().cloned().collect()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.channels
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or_default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone()
    }
}

#[async_trait]
impl MessageBus for InProcMessageBus {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the senders ends every open subscription stream.
        self.channels.clear();
        debug!(target: "scan::bus", "in-process bus disconnected");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(OrchestratorError::NotConnected);
        }

        let message = BusMessage::new(topic, payload);
        if self.journal_capacity > 0 {
            let mut journal = self.journal.lock().await;
            if journal.len() == self.journal_capacity {
                journal.pop_front();
            }
            journal.push_back(message.clone());
        }

        if let Some(sender) = self.channels.get(topic) {
            // No receivers is fine for pub/sub semantics.
            let _ = sender.send(message);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        if !self.is_connected() {
            return Err(OrchestratorError::NotConnected);
        }

        let receiver = self.sender(topic).subscribe();
        let topic_name = topic.to_string();
        let stream = BroadcastStream::new(receiver)
            .filter_map(move |item| {
                let topic = topic_name.clone();
                async move {
                    match item {
                        Ok(message) => Some(message),
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            warn!(
                                target: "scan::bus",
                                %topic,
                                skipped,
                                "subscriber lagged, messages were dropped"
                            );
                            None
                        }
                    }
                }
            })
            .boxed();

        Ok(Subscription::new(topic, stream))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_requires_connection() {
        let bus = InProcMessageBus::default();
        let err = bus.publish("t", "{}").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotConnected));
    }

    #[tokio::test]
    async fn subscribers_receive_and_journal_records() {
        let bus = InProcMessageBus::default();
        bus.connect().await.unwrap();

        let mut sub = bus.subscribe("scan:status").await.unwrap();
        bus.publish("scan:status", r#"{"scanId":"s1"}"#).await.unwrap();
        bus.publish("elsewhere", "{}").await.unwrap();

        let message = sub.next_raw().await.expect("delivered");
        assert_eq!(&*message.payload, r#"{"scanId":"s1"}"#);
        assert_eq!(bus.published("scan:status").await.len(), 1);
        assert_eq!(bus.journal().await.len(), 2);
    }

    #[tokio::test]
    async fn journal_keeps_only_the_most_recent_messages() {
        let bus = InProcMessageBus::default().with_journal_capacity(3);
        bus.connect().await.unwrap();

        for i in 0..10 {
            bus.publish("scan:updates", &i.to_string()).await.unwrap();
        }

        let kept: Vec<String> = bus
            .published("scan:updates")
            .await
            .iter()
            .map(|payload| payload.to_string())
            .collect();
        assert_eq!(kept, ["7", "8", "9"]);

        let silent = InProcMessageBus::default().with_journal_capacity(0);
        silent.connect().await.unwrap();
        silent.publish("t", "{}").await.unwrap();
        assert!(silent.journal().await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_closes_subscriptions() {
        let bus = InProcMessageBus::default();
        bus.connect().await.unwrap();
        let mut sub = bus.subscribe("t").await.unwrap();

        bus.disconnect().await.unwrap();
        assert!(!bus.is_connected());
        assert!(sub.next_raw().await.is_none());
    }
}
