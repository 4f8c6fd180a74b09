#![allow(dead_code)]

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use idanss_core::{
    Delivery, InMemoryProgressStore, InProcMessageBus, MessageBus, OrchestratorConfig,
    OrchestratorError, OrchestratorRuntime, ProgressStore, Result,
};
use idanss_model::ProgressRecord;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub struct Harness {
    pub bus: Arc<InProcMessageBus>,
    pub store: Arc<InMemoryProgressStore>,
    pub runtime: OrchestratorRuntime,
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        worker_pool_size: 4,
        deadline_sweep_interval_ms: 50,
        shutdown_grace_ms: 2_000,
        ..OrchestratorConfig::default()
    }
}

/// Runtime over an in-process bus (already connected) and an in-memory
/// store. Not started.
pub async fn harness(config: OrchestratorConfig) -> Harness {
    build_harness(config, None).await
}

/// Like [`harness`], but every progress read takes `delay`.
pub async fn slow_harness(config: OrchestratorConfig, delay: Duration) -> Harness {
    build_harness(config, Some(delay)).await
}

async fn build_harness(config: OrchestratorConfig, delay: Option<Duration>) -> Harness {
    let bus = Arc::new(InProcMessageBus::default());
    bus.connect().await.unwrap();
    let store = Arc::new(InMemoryProgressStore::new());
    let runtime_store: Arc<dyn ProgressStore> = match delay {
        Some(delay) => Arc::new(SlowStore {
            inner: store.clone(),
            delay,
        }),
        None => store.clone(),
    };

    let runtime = OrchestratorRuntime::builder()
        .with_config(config)
        .with_bus(bus.clone())
        .with_store(runtime_store)
        .build()
        .unwrap();

    Harness { bus, store, runtime }
}

/// Decodes `value` the way a subscription would, keeping the exact text.
pub fn delivery<T: DeserializeOwned>(topic: &str, value: Value) -> Delivery<T> {
    let raw = value.to_string();
    Delivery {
        topic: topic.to_string(),
        payload: serde_json::from_str(&raw).unwrap(),
        raw: raw.into(),
    }
}

pub async fn record(store: &InMemoryProgressStore, scan_id: &str) -> Option<ProgressRecord> {
    store.get(scan_id).await.unwrap()
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within two seconds"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// In-memory store whose reads are slow, widening every read-modify-write.
#[derive(Debug)]
pub struct SlowStore {
    pub inner: Arc<InMemoryProgressStore>,
    pub delay: Duration,
}

#[async_trait]
impl ProgressStore for SlowStore {
    async fn get(&self, scan_id: &str) -> Result<Option<ProgressRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(scan_id).await
    }

    async fn set(&self, scan_id: &str, record: &ProgressRecord) -> Result<()> {
        self.inner.set(scan_id, record).await
    }
}

/// Store that is always down.
#[derive(Debug)]
pub struct UnavailableStore;

#[async_trait]
impl ProgressStore for UnavailableStore {
    async fn get(&self, _scan_id: &str) -> Result<Option<ProgressRecord>> {
        Err(OrchestratorError::Store("connection refused".into()))
    }

    async fn set(&self, _scan_id: &str, _record: &ProgressRecord) -> Result<()> {
        Err(OrchestratorError::Store("connection refused".into()))
    }
}
