//! Active health checker for inference backends
//!
//! This module probes every known backend's model list on a fixed interval
//! and rebuilds the catalog from the answers. It is the only writer of the
//! catalog: backends registered between cycles are probed on request through
//! the same task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::announcer::Announcer;
use super::backends::BackendSet;
use super::catalog::{Catalog, CatalogStore};
use crate::model::ModelDescriptor;

/// Configuration for the health checker
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// Seconds between full probe cycles
    pub interval_secs: u64,
    /// Timeout for a single probe
    pub timeout_secs: u64,
    /// Path appended to a backend URL to list its models
    pub models_path: String,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            interval_secs: super::HEALTH_CHECK_INTERVAL_SECS,
            timeout_secs: super::PROBE_TIMEOUT_SECS,
            models_path: "/models".to_string(),
        }
    }
}

/// Why a backend is considered unhealthy this cycle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Invalid model list: {0}")]
    Decode(String),
}

/// Body of an OpenAI-compatible `GET /models`
#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait ModelProbe: Send + Sync {
    /// Ask a backend which model ids it serves
    async fn list_models(&self, backend_url: &str) -> Result<Vec<String>, ProbeError>;
}

/// Probe over HTTP using the OpenAI model-list endpoint
#[derive(Clone)]
pub struct HttpModelProbe {
    client: Client,
    models_path: String,
    timeout: Duration,
}

impl HttpModelProbe {
    pub fn new(config: &HealthCheckerConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: &HealthCheckerConfig) -> Self {
        Self {
            client,
            models_path: config.models_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<String>, ProbeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| ProbeError::Decode(e.to_string()))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl ModelProbe for HttpModelProbe {
    async fn list_models(&self, backend_url: &str) -> Result<Vec<String>, ProbeError> {
        let url = format!("{}{}", backend_url.trim_end_matches('/'), self.models_path);
        trace!("Probing {}", url);

        match timeout(self.timeout, self.fetch(&url)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        }
    }
}

/// Result of probing one backend
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub url: String,
    /// Response time in milliseconds
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub outcome: Result<Vec<ModelDescriptor>, ProbeError>,
}

impl ProbeReport {
    pub fn is_healthy(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// What one full cycle observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub probed: usize,
    pub healthy: usize,
    pub failed: usize,
    pub models: usize,
}

async fn probe_backend(probe: &dyn ModelProbe, url: &str) -> ProbeReport {
    let start = Instant::now();
    let outcome = probe.list_models(url).await.map(|ids| {
        ids.iter()
            .map(|id| ModelDescriptor::from_model_id(id, url))
            .collect()
    });

    ProbeReport {
        url: url.to_string(),
        latency_ms: start.elapsed().as_millis() as u64,
        timestamp: Utc::now(),
        outcome,
    }
}

/// Background task that owns catalog rebuilds
pub struct HealthChecker {
    config: HealthCheckerConfig,
    probe: Arc<dyn ModelProbe>,
    backends: Arc<BackendSet>,
    catalog: Arc<CatalogStore>,
    announcer: Announcer,
    probe_requests: mpsc::UnboundedReceiver<String>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckerConfig,
        probe: Arc<dyn ModelProbe>,
        backends: Arc<BackendSet>,
        catalog: Arc<CatalogStore>,
        announcer: Announcer,
        probe_requests: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            config,
            probe,
            backends,
            catalog,
            announcer,
            probe_requests,
        }
    }

    /// Run the health-check loop
    ///
    /// The first cycle starts immediately. Single-backend probe requests are
    /// served between cycles. Returns when the shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Starting health checker: interval={}s, timeout={}s",
            self.config.interval_secs, self.config.timeout_secs
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                Some(url) = self.probe_requests.recv() => {
                    self.refresh_backend(&url).await;
                }
            }
        }
    }

    /// Probe every known backend and replace the catalog with the result
    ///
    /// This function:
    /// 1. Snapshots the backend set (later additions wait for the next cycle)
    /// 2. Probes all backends concurrently
    /// 3. Swaps in a catalog built from the healthy ones, in backend order
    /// 4. Announces every live model, and withdraws the previous models of
    ///    every backend that failed
    pub async fn run_cycle(&self) -> CycleSummary {
        let backends = self.backends.snapshot().await;
        let previous = self.catalog.snapshot().await;

        if backends.is_empty() {
            trace!("No backends to probe");
        } else {
            debug!("Probing {} backends", backends.len());
        }

        let probe = self.probe.as_ref();
        let reports =
            futures::future::join_all(backends.iter().map(|url| probe_backend(probe, url))).await;

        let mut summary = CycleSummary {
            probed: reports.len(),
            ..CycleSummary::default()
        };
        let mut working = Catalog::new();
        let mut withdrawn: Vec<ModelDescriptor> = Vec::new();

        for report in reports {
            match report.outcome {
                Ok(models) => {
                    debug!(
                        "Backend {} is healthy with {} models ({}ms)",
                        report.url,
                        models.len(),
                        report.latency_ms
                    );
                    summary.healthy += 1;
                    working.extend(models);
                }
                Err(e) => {
                    warn!(
                        "Backend {} failed its health check at {}: {}",
                        report.url,
                        report.timestamp.to_rfc3339(),
                        e
                    );
                    summary.failed += 1;
                    withdrawn.extend(previous.for_backend(&report.url).cloned());
                }
            }
        }

        summary.models = working.len();
        let live = working.models().to_vec();
        self.catalog.replace(working).await;

        for model in &live {
            if let Err(e) = self.announcer.announce_available(model).await {
                warn!("Failed to announce {}: {}", model.name, e);
            }
        }
        for model in &withdrawn {
            if let Err(e) = self.announcer.announce_unavailable(Some(model)).await {
                warn!("Failed to withdraw {}: {}", model.name, e);
            }
        }

        info!(
            "Health check complete: {}/{} backends healthy, {} models",
            summary.healthy, summary.probed, summary.models
        );
        for model in &live {
            debug!("  {} [{}] @ {}", model.name, model.quantization, model.url);
        }

        summary
    }

    /// Probe a single backend now and swap its entries in the catalog
    ///
    /// Used when a backend joins so it does not wait a full interval to
    /// become visible. Other backends' entries are left untouched.
    pub async fn refresh_backend(&self, url: &str) -> ProbeReport {
        let report = probe_backend(self.probe.as_ref(), url).await;
        if !self.backends.contains(url).await {
            debug!("Backend {} was removed while being probed, discarding result", url);
            return report;
        }

        let previous = self.catalog.snapshot().await;
        let mut next = previous.without_backend(url);

        match &report.outcome {
            Ok(models) => {
                info!(
                    "Backend {} joined with {} models ({}ms)",
                    url,
                    models.len(),
                    report.latency_ms
                );
                next.extend(models.iter().cloned());
                self.catalog.replace(next).await;

                for model in models {
                    if let Err(e) = self.announcer.announce_available(model).await {
                        warn!("Failed to announce {}: {}", model.name, e);
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Backend {} failed its health check at {}: {}",
                    url,
                    report.timestamp.to_rfc3339(),
                    e
                );
                self.catalog.replace(next).await;

                for model in previous.for_backend(url) {
                    if let Err(e) = self.announcer.announce_unavailable(Some(model)).await {
                        warn!("Failed to withdraw {}: {}", model.name, e);
                    }
                }
            }
        }

        report
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================
