use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use idanss_model::{ScanKeys, ScanRequestMessage, ScanStatusUpdate};
use serde::de::DeserializeOwned;
use tokio::{
    sync::{Mutex, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    bus::{Delivery, MessageBus, Subscription},
    error::{OrchestratorError, Result},
    orchestration::{
        collector::StatusCollector,
        config::OrchestratorConfig,
        deadline::DeadlineSweeper,
        dispatcher::ScanDispatcher,
        lanes::ScanLanes,
        registry::ScanRegistry,
        reporter::ErrorReporter,
    },
    progress::{ProgressStore, ProgressTracker},
};

/// Owns the orchestrator's background tasks for one process.
///
/// Each inbound channel gets a consumer loop that decodes messages and hands
/// them to the lane of their scan id. Messages for one scan are handled in
/// arrival order; different scans run concurrently. At most
/// `worker_pool_size` messages are queued or running across both channels.
pub struct OrchestratorRuntime {
    config: OrchestratorConfig,
    keys: ScanKeys,
    bus: Arc<dyn MessageBus>,
    registry: ScanRegistry,
    progress: ProgressTracker,
    dispatcher: ScanDispatcher,
    collector: StatusCollector,
    reporter: ErrorReporter,
    lanes: ScanLanes,
    workers: Arc<Semaphore>,
    // Runtime supervision
    started: AtomicBool,
    shutdown_token: CancellationToken,
    sweeper_token: CancellationToken,
    consumer_handles: Mutex<Vec<JoinHandle<()>>>,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for OrchestratorRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let consumer_count = self
            .consumer_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("OrchestratorRuntime")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .field("in_flight", &self.in_flight())
            .field("consumer_count", &consumer_count)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl OrchestratorRuntime {
    pub fn builder() -> OrchestratorRuntimeBuilder {
        OrchestratorRuntimeBuilder::new(OrchestratorConfig::default())
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn keys(&self) -> &ScanKeys {
        &self.keys
    }

    pub fn bus(&self) -> Arc<dyn MessageBus> {
        Arc::clone(&self.bus)
    }

    pub fn registry(&self) -> ScanRegistry {
        self.registry.clone()
    }

    pub fn progress(&self) -> ProgressTracker {
        self.progress.clone()
    }

    pub fn dispatcher(&self) -> ScanDispatcher {
        self.dispatcher.clone()
    }

    pub fn collector(&self) -> StatusCollector {
        self.collector.clone()
    }

    pub fn reporter(&self) -> ErrorReporter {
        self.reporter.clone()
    }

    pub fn lanes(&self) -> ScanLanes {
        self.lanes.clone()
    }

    /// Number of messages queued or being handled.
    pub fn in_flight(&self) -> usize {
        self.config
            .worker_pool_size
            .saturating_sub(self.workers.available_permits())
    }

    /// Connects the bus if needed, subscribes to the request and status
    /// channels and starts the consumer loops and the deadline sweeper.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::Internal("runtime already started".into()));
        }

        if !self.bus.is_connected() {
            self.bus.connect().await?;
        }

        let requests = self.bus.subscribe(&self.keys.requests()).await?;
        let status = self.bus.subscribe(&self.keys.status()).await?;

        let dispatcher = self.dispatcher.clone();
        let request_loop = self.spawn_consumer(
            requests,
            |message: &ScanRequestMessage| match message {
                ScanRequestMessage::StartScan(request) => request.scan_id().map(str::to_owned),
                ScanRequestMessage::Unsupported => None,
            },
            move |delivery| {
                let dispatcher = dispatcher.clone();
                async move {
                    let outcome = dispatcher.handle_scan_request(delivery).await;
                    debug!(target: "scan::dispatch", ?outcome, "request handled");
                }
            },
        );

        let collector = self.collector.clone();
        let status_loop = self.spawn_consumer(
            status,
            |update: &ScanStatusUpdate| update.scan_id().map(str::to_owned),
            move |delivery| {
                let collector = collector.clone();
                async move {
                    collector.handle_scan_status(delivery.payload).await;
                }
            },
        );

        self.consumer_handles
            .lock()
            .await
            .extend([request_loop, status_loop]);

        if let Some(timeout) = self.config.scan_timeout() {
            let sweeper = DeadlineSweeper::new(
                self.registry.clone(),
                self.reporter.clone(),
                timeout,
                self.config.deadline_sweep_interval(),
            )
            .with_lanes(self.lanes.clone());
            *self.sweeper_handle.lock().await = Some(sweeper.spawn(self.sweeper_token.clone()));
        } else {
            info!(target: "scan::deadline", "Scan deadlines disabled");
        }

        info!(
            requests = %self.keys.requests(),
            status = %self.keys.status(),
            workers = self.config.worker_pool_size,
            "Orchestrator runtime started"
        );
        Ok(())
    }

    fn spawn_consumer<T, K, H, Fut>(
        &self,
        mut subscription: Subscription,
        lane_key: K,
        handler: H,
    ) -> JoinHandle<()>
    where
        T: DeserializeOwned + Send + 'static,
        K: Fn(&T) -> Option<String> + Send + 'static,
        H: Fn(Delivery<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown_token.clone();
        let workers = Arc::clone(&self.workers);
        let lanes = self.lanes.clone();

        tokio::spawn(async move {
            let topic = subscription.topic().to_string();
            loop {
                let delivery = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    next = subscription.next_decoded::<T>() => match next {
                        Some(delivery) => delivery,
                        None => {
                            warn!(target: "scan::bus", %topic, "subscription closed, consumer stopping");
                            break;
                        }
                    },
                };

                let permit = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!(target: "scan::bus", %topic, "shutdown while waiting for a worker, message dropped");
                        break;
                    }
                    permit = Arc::clone(&workers).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let scan_id = lane_key(&delivery.payload);
                lanes.submit(scan_id.as_deref(), Some(permit), handler(delivery));
            }
            info!(%topic, "Consumer loop stopped");
        })
    }

    /// Stops consuming, waits up to the shutdown grace period for running
    /// handlers, stops the sweeper and disconnects the bus.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown of orchestrator runtime");
        let grace = self.config.shutdown_grace();

        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.consumer_handles.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Consumer task failed: {:?}", e),
                Err(_) => warn!("Consumer task timed out during shutdown"),
            }
        }

        let pool = u32::try_from(self.config.worker_pool_size).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.workers.acquire_many(pool)).await {
            Ok(Ok(_all)) => debug!("All in-flight handlers finished"),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                in_flight = self.in_flight(),
                "Shutdown grace period elapsed with handlers still running"
            ),
        }
        self.workers.close();

        self.sweeper_token.cancel();
        if let Some(handle) = self.sweeper_handle.lock().await.take()
            && let Err(e) = handle.await
        {
            warn!("Deadline sweeper failed: {:?}", e);
        }

        self.bus.disconnect().await?;
        info!("Orchestrator runtime shutdown complete");
        Ok(())
    }
}

/// Helper for constructing a runtime with explicit dependencies.
pub struct OrchestratorRuntimeBuilder {
    config: OrchestratorConfig,
    bus: Option<Arc<dyn MessageBus>>,
    store: Option<Arc<dyn ProgressStore>>,
    registry: Option<ScanRegistry>,
}

impl fmt::Debug for OrchestratorRuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorRuntimeBuilder")
            .field("config", &self.config)
            .field("bus_set", &self.bus.is_some())
            .field("store_set", &self.store.is_some())
            .field("registry_set", &self.registry.is_some())
            .finish()
    }
}

impl OrchestratorRuntimeBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            bus: None,
            store: None,
            registry: None,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_registry(mut self, registry: ScanRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<OrchestratorRuntime> {
        self.config.validate()?;

        let bus = self
            .bus
            .ok_or_else(|| OrchestratorError::Internal("message bus dependency missing".into()))?;
        let store = self
            .store
            .ok_or_else(|| OrchestratorError::Internal("progress store dependency missing".into()))?;
        let registry = self.registry.unwrap_or_default();
        let keys = ScanKeys::new(self.config.topic_prefix.as_str());

        let mut progress = ProgressTracker::new(store);
        if self.config.publish_updates {
            progress = progress.with_notifications(Arc::clone(&bus), keys.updates());
        }

        let reporter = ErrorReporter::new(registry.clone(), progress.clone());
        let dispatcher = ScanDispatcher::new(
            Arc::clone(&bus),
            registry.clone(),
            progress.clone(),
            keys.clone(),
        )
        .with_duplicate_policy(self.config.duplicate_policy);
        let collector = StatusCollector::new(registry.clone(), progress.clone());
        let workers = Arc::new(Semaphore::new(self.config.worker_pool_size));

        Ok(OrchestratorRuntime {
            config: self.config,
            keys,
            bus,
            registry,
            progress,
            dispatcher,
            collector,
            reporter,
            lanes: ScanLanes::new(),
            workers,
            started: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            sweeper_token: CancellationToken::new(),
            consumer_handles: Mutex::new(Vec::new()),
            sweeper_handle: Mutex::new(None),
        })
    }
}
