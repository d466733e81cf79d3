//! Runtime orchestration.
//!
//! [`CrucibleRuntime`] assembles a [`PluginManager`] from the loaded
//! configuration (transport selection included), owns the hot-deploy
//! coordinator tasks, and drives the process run loop until a shutdown
//! signal arrives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crucible_bus::EventBus;
use crucible_core::{ArtifactEvent, PluginLoader, PluginResult};
use crucible_host::{HotDeployCoordinator, PluginManager};

use crate::config::{ConfigResult, CrucibleConfig, EventBusType, load_config};
use crate::logging::{LoggingBuilder, SpanEvents};

/// Global flag to track whether logging has been initialized.
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// The top-level runtime: configuration + manager + watcher tasks.
///
/// ```rust,ignore
/// let runtime = CrucibleRuntime::new()?;
/// runtime.manager().install(my_plugin).await?;
/// runtime.run().await?;
/// ```
pub struct CrucibleRuntime {
    config: CrucibleConfig,
    manager: Arc<PluginManager>,
    running: AtomicBool,
    watchers: Mutex<Vec<(CancellationToken, JoinHandle<()>)>>,
}

impl CrucibleRuntime {
    /// Creates a runtime from the default configuration sources
    /// (`crucible.yaml` in the search paths, or built-in defaults).
    pub fn new() -> ConfigResult<Self> {
        Self::from_config(load_config()?)
    }

    /// Creates a runtime from a specific configuration file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> ConfigResult<Self> {
        Self::from_config(crate::config::load_config_from_file(path)?)
    }

    /// Creates a runtime from an already-loaded configuration.
    pub fn from_config(config: CrucibleConfig) -> ConfigResult<Self> {
        Self::init_logging(&config);

        let bus = Self::build_bus(&config)?;
        let manager = PluginManager::with_bus(config.manager_settings(), Arc::new(bus));

        Ok(Self {
            config,
            manager,
            running: AtomicBool::new(false),
            watchers: Mutex::new(Vec::new()),
        })
    }

    fn init_logging(config: &CrucibleConfig) {
        if LOGGING_INITIALIZED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let level = config.logging.level.to_tracing_level();
        let span_events = if matches!(level, tracing::Level::TRACE | tracing::Level::DEBUG) {
            SpanEvents::LIFECYCLE
        } else {
            SpanEvents::NONE
        };

        let mut builder = LoggingBuilder::new()
            .with_level(level)
            .with_span_events(span_events);
        for (module, level) in &config.logging.filters {
            builder = builder.directive(&format!("{module}={level}"));
        }
        builder.init();
    }

    fn build_bus(config: &CrucibleConfig) -> ConfigResult<EventBus> {
        let capacity = config.event_bus.subscription_capacity;
        match config.event_bus.kind {
            EventBusType::InMemory => Ok(EventBus::in_process().subscription_capacity(capacity)),
            EventBusType::Broker => Self::build_broker_bus(config, capacity),
        }
    }

    #[cfg(feature = "broker")]
    fn build_broker_bus(config: &CrucibleConfig, capacity: usize) -> ConfigResult<EventBus> {
        use crucible_bus::{BrokerConfig, BrokerTransport};
        use crucible_core::EventCodec;

        let settings = &config.event_bus.broker;
        let codec = Arc::new(EventCodec::with_builtins());
        let broker_config = BrokerConfig {
            bootstrap: settings.bootstrap.clone(),
            consumer_group: settings.consumer_group.clone(),
            default_topic: settings.default_topic.clone(),
            topic_overrides: settings.topic_overrides.clone(),
            ..BrokerConfig::new(settings.bootstrap.clone())
        };
        let transport = BrokerTransport::new(broker_config, Arc::clone(&codec));
        Ok(EventBus::with_transport(Box::new(transport), codec).subscription_capacity(capacity))
    }

    #[cfg(not(feature = "broker"))]
    fn build_broker_bus(_config: &CrucibleConfig, _capacity: usize) -> ConfigResult<EventBus> {
        Err(crate::config::ConfigError::InvalidTransportType(
            "broker (build with the `broker` feature)".to_string(),
        ))
    }

    /// The manager facade.
    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    /// The loaded configuration.
    pub fn config(&self) -> &CrucibleConfig {
        &self.config
    }

    /// Whether the runtime is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Initializes the manager subsystems.
    pub async fn start(&self) -> PluginResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Runtime is already running");
            return Ok(());
        }
        self.manager.initialize().await?;
        info!("Crucible runtime started");
        Ok(())
    }

    /// Attaches a hot-deploy coordinator fed by an external watcher.
    ///
    /// The watcher pushes [`ArtifactEvent`]s into the channel; the
    /// suggested poll period for polling watchers is
    /// `config.hot_deployment.polling_interval()`. The returned token
    /// stops this coordinator early; `stop` cancels it too.
    pub async fn spawn_hot_deploy(
        &self,
        loader: Arc<dyn PluginLoader>,
        events: mpsc::Receiver<ArtifactEvent>,
    ) -> CancellationToken {
        let coordinator = HotDeployCoordinator::new(
            Arc::clone(&self.manager),
            loader,
            self.config.hot_deployment.to_settings(),
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn(coordinator.run(events, token.clone()));
        self.watchers.lock().await.push((token.clone(), handle));
        token
    }

    /// Stops watcher tasks, then shuts the manager down.
    pub async fn stop(&self) -> PluginResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            warn!("Runtime is not running");
            return Ok(());
        }
        info!("Stopping Crucible runtime");

        for (token, handle) in self.watchers.lock().await.drain(..) {
            token.cancel();
            let _ = handle.await;
        }

        self.manager.shutdown().await?;
        info!("Crucible runtime stopped");
        Ok(())
    }

    /// Runs until a shutdown signal (Ctrl-C or SIGTERM) is received.
    pub async fn run(&self) -> PluginResult<()> {
        self.start().await?;
        info!("Crucible runtime is now running. Press Ctrl+C to stop.");
        Self::wait_for_shutdown().await;
        self.stop().await
    }

    /// Runs until the given future completes.
    pub async fn run_until<F>(&self, shutdown: F) -> PluginResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }

    /// Waits for shutdown signals (Ctrl+C or SIGTERM).
    async fn wait_for_shutdown() {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to register SIGTERM handler");

            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
            info!("Received Ctrl+C, shutting down");
        }
    }
}

impl std::fmt::Debug for CrucibleRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrucibleRuntime")
            .field("running", &self.is_running())
            .field("event_bus", &self.config.event_bus.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{HookResult, Plugin, PluginMetadata, PluginState};

    struct NoopPlugin {
        metadata: PluginMetadata,
    }

    #[async_trait::async_trait]
    impl Plugin for NoopPlugin {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }
        async fn initialize(&self) -> HookResult {
            Ok(())
        }
        async fn start(&self) -> HookResult {
            Ok(())
        }
        async fn stop(&self) -> HookResult {
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_and_stop_drive_full_lifecycle() {
        let mut config = CrucibleConfig::default();
        config.auto_start_plugins = true;
        config.health.enabled = false;
        let runtime = CrucibleRuntime::from_config(config).unwrap();

        runtime.start().await.unwrap();
        let descriptor = runtime
            .manager()
            .install(Arc::new(NoopPlugin {
                metadata: PluginMetadata::builder("p1", "Plugin One", "1.0.0").build(),
            }))
            .await
            .unwrap();
        assert_eq!(
            runtime.manager().descriptor(descriptor.id()).await.unwrap().state,
            PluginState::Started
        );

        runtime.stop().await.unwrap();
        assert!(!runtime.is_running());
        assert!(matches!(
            runtime.manager().start("p1").await,
            Err(crucible_core::PluginError::Shutdown)
        ));
    }

    #[cfg(not(feature = "broker"))]
    #[test]
    fn broker_config_requires_feature() {
        let yaml = r#"
event_bus:
  type: broker
  broker:
    bootstrap: ws://broker:9092
"#;
        let config = crate::config::ConfigLoader::new().load_from_str(yaml).unwrap();
        assert!(matches!(
            CrucibleRuntime::from_config(config),
            Err(crate::config::ConfigError::InvalidTransportType(_))
        ));
    }
}
