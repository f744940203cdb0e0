//! # Inference backend registry
//!
//! The registry keeps the live catalog of (model, backend) pairs and answers
//! requests for a model against it.
//!
//! ## Architecture
//!
//! ```text
//!   inference.new_server ──┐            ┌── inference.requested
//!   inference.unavailable ─┤            │
//!                          ▼            ▼
//!                   ┌─────────────────────────┐
//!                   │     RequestListener     │
//!                   └──────┬───────────┬──────┘
//!              register/   │           │ resolve
//!              deregister  ▼           ▼
//!                   ┌────────────┐ ┌────────────┐
//!                   │ BackendSet │ │  Catalog   │◄── atomic swap
//!                   └─────┬──────┘ └────────────┘        │
//!                         │ snapshot                     │
//!                         ▼                              │
//!                   ┌─────────────────────────┐          │
//!                   │      HealthChecker      │──────────┘
//!                   └────────────┬────────────┘
//!                                ▼
//!                   ┌─────────────────────────┐
//!                   │        Announcer        │──► inference.available
//!                   └─────────────────────────┘──► inference.unavailable
//! ```

pub mod announcer;
pub mod backends;
pub mod catalog;
pub mod health_checker;
pub mod listener;
pub mod matcher;
pub mod resolver;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub use announcer::Announcer;
pub use backends::BackendSet;
pub use catalog::{Catalog, CatalogStore};
pub use health_checker::{
    CycleSummary, HealthChecker, HealthCheckerConfig, HttpModelProbe, ModelProbe, ProbeError,
    ProbeReport,
};
pub use listener::{ListenerStreams, RequestListener};
pub use matcher::{matches, CompiledPattern, PatternError};
pub use resolver::resolve;

pub use crate::config::RegistryConfig;
use crate::bus::{BusError, MessageBus};
use crate::model::{ModelDescriptor, RequestPattern};

/// Default seconds between health-check cycles
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 300;

/// Default timeout for one backend probe in seconds
pub const PROBE_TIMEOUT_SECS: u64 = 10;

/// Shared registry state
pub struct Registry {
    bus: Arc<dyn MessageBus>,
    backends: Arc<BackendSet>,
    catalog: Arc<CatalogStore>,
    announcer: Announcer,
    probe_requests: mpsc::UnboundedSender<String>,
}

impl Registry {
    /// Create the registry and the health checker that maintains its catalog
    pub fn new(
        bus: Arc<dyn MessageBus>,
        probe: Arc<dyn ModelProbe>,
        config: RegistryConfig,
    ) -> (Self, HealthChecker) {
        let backends = Arc::new(BackendSet::new());
        let catalog = Arc::new(CatalogStore::new());
        let announcer = Announcer::new(bus.clone(), catalog.clone());
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();

        let checker = HealthChecker::new(
            config.health_checker(),
            probe,
            backends.clone(),
            catalog.clone(),
            announcer.clone(),
            probe_rx,
        );

        let registry = Self {
            bus,
            backends,
            catalog,
            announcer,
            probe_requests: probe_tx,
        };
        (registry, checker)
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    pub fn catalog_store(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn announcer(&self) -> &Announcer {
        &self.announcer
    }

    /// Current catalog snapshot
    pub async fn catalog(&self) -> Arc<Catalog> {
        self.catalog.snapshot().await
    }

    /// Add a backend and have it probed right away.
    ///
    /// Returns `false` if the backend was already known; it is probed again
    /// either way.
    pub async fn register_backend(&self, url: &str) -> bool {
        let added = self.backends.insert(url).await;
        if self
            .probe_requests
            .send(crate::model::normalize_backend_url(url))
            .is_err()
        {
            debug!("Health checker not running, {} waits for the next cycle", url);
        }
        added
    }

    /// Stop probing a backend. Its catalog entries go away with the next
    /// cycle.
    pub async fn deregister_backend(&self, url: &str) -> bool {
        self.backends.remove(url).await
    }

    /// Resolve a request against the current catalog
    pub async fn resolve(
        &self,
        pattern: &RequestPattern,
    ) -> Result<Option<ModelDescriptor>, PatternError> {
        let catalog = self.catalog.snapshot().await;
        Ok(resolve(pattern, &catalog)?.cloned())
    }

    /// Withdraw every model and flush, so the withdrawal leaves the process
    /// before the bus connection goes away
    pub async fn withdraw_all(&self) -> Result<(), BusError> {
        self.announcer.announce_unavailable(None).await?;
        self.bus.flush().await
    }
}

/// A running registry: health checker and listener tasks
pub struct RegistryHandle {
    registry: Arc<Registry>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RegistryHandle {
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Stop the background tasks, then withdraw all models.
    ///
    /// A cycle or single-backend refresh in flight finishes before the
    /// tasks exit, so the withdrawal is the last message published and
    /// covers everything in the final catalog.
    pub async fn shutdown(self) -> Result<(), BusError> {
        info!("Registry shutting down");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }

        self.registry.withdraw_all().await
    }
}

/// Start the registry on a bus.
///
/// Subscriptions are in place when this returns. Statically configured
/// backends are probed by the first cycle, which starts immediately.
pub async fn start_registry(
    bus: Arc<dyn MessageBus>,
    probe: Arc<dyn ModelProbe>,
    config: RegistryConfig,
) -> Result<RegistryHandle, BusError> {
    let (registry, checker) = Registry::new(bus.clone(), probe, config.clone());
    for url in &config.backends {
        registry.backends().insert(url).await;
    }
    let registry = Arc::new(registry);

    let streams = RequestListener::subscribe(bus.as_ref()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = RequestListener::new(registry.clone());
    let tasks = vec![
        tokio::spawn(checker.run(shutdown_rx.clone())),
        tokio::spawn(listener.run(streams, shutdown_rx)),
    ];

    info!(
        "Registry started with {} static backends",
        registry.backends().len().await
    );

    Ok(RegistryHandle {
        registry,
        shutdown_tx,
        tasks,
    })
}
