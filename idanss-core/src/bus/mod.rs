//! Pub/sub transport used to receive scan requests and status updates and
//! to forward requests to scanner backends.

mod in_proc;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_proc::InProcMessageBus;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use crate::error::Result;

/// A message as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Arc<str>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Arc<str>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A decoded message together with the exact bytes it arrived as, so it can
/// be republished unmodified.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub topic: String,
    pub payload: T,
    pub raw: Arc<str>,
}

pub type MessageStream = BoxStream<'static, BusMessage>;

/// Connection-oriented pub/sub client.
///
/// Connection loss is only reported through [`MessageBus::is_connected`];
/// reconnecting is left to the infrastructure.
#[async_trait]
pub trait MessageBus: Send + Sync + fmt::Debug {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription>;

    fn is_connected(&self) -> bool;
}

/// Serializes `value` as JSON and publishes it on `topic`.
pub async fn publish_json<B, T>(bus: &B, topic: &str, value: &T) -> Result<()>
where
    B: MessageBus + ?Sized,
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_string(value)?;
    bus.publish(topic, &payload).await
}

/// Live subscription to one topic.
pub struct Subscription {
    topic: String,
    stream: MessageStream,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn new(topic: impl Into<String>, stream: MessageStream) -> Self {
        Self {
            topic: topic.into(),
            stream,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next raw message, or `None` once the transport closed the stream.
    pub async fn next_raw(&mut self) -> Option<BusMessage> {
        self.stream.next().await
    }

    /// Next message that decodes as `T`.
    ///
    /// Messages that fail to decode are logged and skipped; they never end
    /// the subscription.
    pub async fn next_decoded<T>(&mut self) -> Option<Delivery<T>>
    where
        T: DeserializeOwned,
    {
        loop {
            let message = self.stream.next().await?;
            match serde_json::from_str::<T>(&message.payload) {
                Ok(payload) => {
                    return Some(Delivery {
                        topic: message.topic,
                        payload,
                        raw: message.payload,
                    });
                }
                Err(err) => {
                    warn!(
                        target: "scan::bus",
                        topic = %message.topic,
                        error = %err,
                        "dropping message that failed to decode"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[tokio::test]
    async fn undecodable_messages_are_skipped() {
        let messages = vec![
            BusMessage::new("t", "not json"),
            BusMessage::new("t", r#"{"other":true}"#),
            BusMessage::new("t", r#"{"seq":7}"#),
        ];
        let mut sub = Subscription::new("t", stream::iter(messages).boxed());

        let delivery = sub.next_decoded::<Ping>().await.expect("decoded ping");
        assert_eq!(delivery.payload, Ping { seq: 7 });
        assert_eq!(&*delivery.raw, r#"{"seq":7}"#);
        assert!(sub.next_decoded::<Ping>().await.is_none());
    }
}
