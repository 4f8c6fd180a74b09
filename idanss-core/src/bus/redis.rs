use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, aio::ConnectionManager};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{BusMessage, MessageBus, Subscription};
use crate::error::{OrchestratorError, Result};

/// Open connection state. Dropped on disconnect.
struct RedisSession {
    publisher: ConnectionManager,
    cancel: CancellationToken,
}

/// Message bus over Redis pub/sub channels.
///
/// Publishing goes through a shared [`ConnectionManager`]; every subscription
/// opens its own pub/sub connection whose messages are forwarded into a
/// bounded channel by a background task.
pub struct RedisMessageBus {
    client: redis::Client,
    session: Mutex<Option<RedisSession>>,
    connected: Arc<AtomicBool>,
    subscription_buffer: usize,
}

impl fmt::Debug for RedisMessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisMessageBus")
            .field("connection", &"ConnectionManager")
            .field("connected", &self.is_connected())
            .field("subscription_buffer", &self.subscription_buffer)
            .finish()
    }
}

impl RedisMessageBus {
    /// Validates the URL; no connection is made until [`MessageBus::connect`].
    pub fn new(redis_url: &str, subscription_buffer: usize) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            OrchestratorError::Bus(format!("Failed to create Redis client: {e}"))
        })?;

        Ok(Self {
            client,
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            subscription_buffer: subscription_buffer.max(1),
        })
    }

    /// Shares the publishing connection, e.g. with a progress store.
    pub async fn connection_manager(&self) -> Option<ConnectionManager> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.publisher.clone())
    }

    async fn session_parts(&self) -> Result<(ConnectionManager, CancellationToken)> {
        let guard = self.session.lock().await;
        guard
            .as_ref()
            .map(|session| (session.publisher.clone(), session.cancel.clone()))
            .ok_or(OrchestratorError::NotConnected)
    }
}

#[async_trait]
impl MessageBus for RedisMessageBus {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        info!(target: "scan::bus", "Connecting to Redis message bus");
        let publisher = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| {
                OrchestratorError::Bus(format!("Failed to connect to Redis: {e}"))
            })?;

        *guard = Some(RedisSession {
            publisher,
            cancel: CancellationToken::new(),
        });
        self.connected.store(true, Ordering::SeqCst);
        info!(target: "scan::bus", "Successfully connected to Redis message bus");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);

        if let Some(session) = session {
            session.cancel.cancel();
            info!(target: "scan::bus", "Disconnected from Redis message bus");
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let (mut publisher, _) = self.session_parts().await?;

        let published: redis::RedisResult<i64> = publisher.publish(topic, payload).await;
        match published {
            Ok(receivers) => {
                self.connected.store(true, Ordering::SeqCst);
                debug!(target: "scan::bus", %topic, receivers, "published message");
                Ok(())
            }
            Err(err) => {
                if err.is_io_error() || err.is_connection_dropped() {
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(OrchestratorError::Redis(err))
            }
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let (_, cancel) = self.session_parts().await?;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        info!(target: "scan::bus", %topic, "Subscribed to channel");

        let (tx, rx) = mpsc::channel(self.subscription_buffer);
        let connected = Arc::clone(&self.connected);
        let topic_name = topic.to_string();

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(target: "scan::bus", topic = %topic_name, "subscription cancelled");
                        break;
                    }
                    next = messages.next() => match next {
                        Some(msg) => {
                            let payload: String = match msg.get_payload() {
                                Ok(payload) => payload,
                                Err(err) => {
                                    warn!(
                                        target: "scan::bus",
                                        topic = %topic_name,
                                        error = %err,
                                        "dropping message with unreadable payload"
                                    );
                                    continue;
                                }
                            };
                            let message = BusMessage::new(topic_name.clone(), payload);
                            if tx.send(message).await.is_err() {
                                debug!(target: "scan::bus", topic = %topic_name, "subscriber went away");
                                break;
                            }
                        }
                        None => {
                            connected.store(false, Ordering::SeqCst);
                            error!(target: "scan::bus", topic = %topic_name, "Redis subscription stream ended");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(topic, ReceiverStream::new(rx).boxed()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
