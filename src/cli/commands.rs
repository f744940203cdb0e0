//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::display::{format_catalog, format_event, format_models};
use super::{ChatArgs, ServeArgs, WatchArgs};
use crate::bus::{BusError, MessageBus, NatsBus, SUBJECT_NEW_SERVER, SUBJECT_UNAVAILABLE};
use crate::client::{ask_model, ClientError, OpenAiClient};
use crate::config::{default_config_path, expand_path, load_config_file, ConfigError};
use crate::consumer::{MirrorClient, MirrorError, MirrorEvent};
use crate::model::{normalize_backend_url, RequestPattern};
use crate::registry::{start_registry, HttpModelProbe, RegistryConfig};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid backend URL: '{0}'")]
    InvalidUrl(String),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Serve
// ============================================================================

/// Build the registry config from the config file and flag overrides
pub fn build_registry_config(args: &ServeArgs) -> CommandResult<RegistryConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_file(&expand_path(path))?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                info!("Loading config from {}", path.display());
                load_config_file(&path)?
            }
            None => RegistryConfig::default(),
        },
    };

    if let Some(interval) = args.interval {
        config.health_check_interval_secs = interval;
    }
    if let Some(timeout) = args.probe_timeout {
        config.probe_timeout_secs = timeout;
    }
    for url in &args.backends {
        let url = normalize_backend_url(url);
        if !config.backends.contains(&url) {
            config.backends.push(url);
        }
    }

    config.validate()?;
    Ok(config)
}

/// Connect to NATS. Failure here is fatal for every command.
pub async fn connect_bus(url: &str) -> CommandResult<Arc<NatsBus>> {
    Ok(Arc::new(NatsBus::connect(url).await?))
}

/// Run the registry until SIGINT/SIGTERM, then withdraw every model
pub async fn run_serve(bus: Arc<dyn MessageBus>, config: RegistryConfig) -> CommandResult<()> {
    let probe = Arc::new(HttpModelProbe::new(&config.health_checker()));
    let handle = start_registry(bus, probe, config).await?;

    info!("Registry running, press Ctrl+C to stop");
    shutdown_signal().await;

    info!("Service is shutting down");
    let catalog = handle.registry().catalog().await;
    info!("Withdrawing {}", format_catalog(&catalog).trim_end());
    handle.shutdown().await?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ============================================================================
// Register / Withdraw
// ============================================================================

async fn publish_backend(bus: &dyn MessageBus, subject: &str, url: &str) -> CommandResult<String> {
    let url = normalize_backend_url(url);
    if url.is_empty() {
        return Err(CommandError::InvalidUrl(url));
    }
    bus.publish(subject, url.clone().into_bytes()).await?;
    bus.flush().await?;
    Ok(url)
}

/// Announce a backend to every registry on the bus
pub async fn run_register(bus: &dyn MessageBus, url: &str) -> CommandResult<String> {
    let url = publish_backend(bus, SUBJECT_NEW_SERVER, url).await?;
    info!("Announced new server {}", url);
    Ok(url)
}

/// Ask every registry on the bus to stop probing a backend
pub async fn run_withdraw(bus: &dyn MessageBus, url: &str) -> CommandResult<String> {
    let url = publish_backend(bus, SUBJECT_UNAVAILABLE, url).await?;
    info!("Withdrew server {}", url);
    Ok(url)
}

// ============================================================================
// Watch / Chat
// ============================================================================

/// Print availability changes for a pattern until interrupted
pub async fn run_watch(bus: Arc<dyn MessageBus>, args: &WatchArgs) -> CommandResult<()> {
    let pattern = RequestPattern::from(&args.pattern);
    let (client, mut events) = MirrorClient::connect(bus, pattern).await?;
    client.request_models().await?;

    let mut refresh = (args.refresh > 0).then(|| {
        let period = Duration::from_secs(args.refresh);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                println!("{}", format_event(&event));
            }
            _ = async {
                match refresh.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                client.request_models().await?;
            }
            _ = &mut shutdown => break,
        }
    }

    print!("{}", format_models(&client.models().await));
    client.close().await;
    Ok(())
}

/// Send a prompt to each model offered for a pattern
pub async fn run_chat(bus: Arc<dyn MessageBus>, args: &ChatArgs) -> CommandResult<()> {
    let pattern = RequestPattern::from(&args.pattern);
    let (client, mut events) = MirrorClient::connect(bus, pattern).await?;
    client.request_models().await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                println!("{}", format_event(&event));
                let MirrorEvent::ServerAvailable(model) = event else {
                    continue;
                };

                let backend = OpenAiClient::for_model(&model, args.api_key.clone());
                match ask_model(&backend, &model, &args.system, &args.prompt).await {
                    Ok(answer) => {
                        println!("{}", answer);
                        if args.once {
                            break;
                        }
                    }
                    Err(e) => warn!("{} on {} failed: {}", model.name, model.url, e),
                }
            }
            _ = &mut shutdown => break,
        }
    }

    client.close().await;
    Ok(())
}
