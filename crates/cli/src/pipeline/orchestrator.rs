//! Bridge orchestrator - coordinates bus, dispatcher, sinks and stdin.
//!
//! Supports both a real broker and the in-memory bus. Without the `real-mqtt`
//! feature, or with `--mock`, runs against `MockBus`.

use std::future::Future;
use std::time::Instant;

use anyhow::{Context, Result};
use bus::{BusClient, MockBus};
use contracts::BridgeBlueprint;
use dispatcher::{spawn_line_reader, BridgeContext, Dispatcher};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};

use super::BridgeStats;
use crate::error::CliError;

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Validated configuration, CLI overrides applied
    pub blueprint: BridgeBlueprint,

    /// Resolved client id
    pub client_id: String,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Use the in-memory bus
    #[cfg_attr(not(feature = "real-mqtt"), allow(dead_code))]
    pub mock: bool,
}

/// Main bridge orchestrator
pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Run until stdin closes or `shutdown` resolves
    ///
    /// Either way the dispatcher drains, flushes and closes its sinks.
    pub async fn run<F>(self, shutdown: F) -> Result<BridgeStats>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        #[cfg(feature = "real-mqtt")]
        if !self.config.mock {
            return self.run_real(shutdown).await;
        }

        self.run_mock(shutdown).await
    }

    /// Run against a real broker
    #[cfg(feature = "real-mqtt")]
    async fn run_real<F>(self, shutdown: F) -> Result<BridgeStats>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        use bus::{MqttBus, MqttSettings};

        let broker = &self.config.blueprint.broker;
        let settings = MqttSettings::from_config(broker, self.config.client_id.clone())
            .context("Invalid broker settings")?;

        info!(
            host = %settings.host,
            port = settings.port,
            client_id = %settings.client_id,
            "Connecting to broker..."
        );

        let bus = MqttBus::new(settings);
        bus.connect()
            .await
            .map_err(|e| CliError::broker_connection(&broker.uri, e.to_string()))?;

        info!("Connected to broker");

        let stdin = BufReader::new(tokio::io::stdin());
        self.run_with_bus(bus, stdin, shutdown, |bus| {
            if let Err(e) = bus.disconnect() {
                warn!(error = %e, "Error during broker disconnect");
            }
        })
        .await
    }

    /// Run against the in-memory bus; nothing is delivered, stdin lines are still published
    async fn run_mock<F>(self, shutdown: F) -> Result<BridgeStats>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Running in MOCK mode (no broker required)");

        let bus = MockBus::new(self.config.client_id.clone());
        bus.connect()
            .await
            .context("Failed to initialize mock bus")?;

        let stdin = BufReader::new(tokio::io::stdin());
        self.run_with_bus(bus, stdin, shutdown, |_| {}).await
    }

    /// Logic shared between mock and real modes
    async fn run_with_bus<B, R, S, F>(
        &self,
        bus: B,
        input: R,
        shutdown: S,
        finish: F,
    ) -> Result<BridgeStats>
    where
        B: BusClient,
        R: AsyncBufRead + Unpin + Send + 'static,
        S: Future<Output = ()> + Send + 'static,
        F: FnOnce(&B),
    {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        info!("Setting up sinks...");
        let sinks = dispatcher::create_sinks(&blueprint.sinks)
            .await
            .context("Failed to create sinks")?;

        if sinks.is_empty() {
            warn!("No sinks configured - matching messages will be dropped");
        }
        let active_sinks = sinks.len();

        let context = BridgeContext::new(self.config.client_id.clone(), &blueprint.publish);
        info!(
            default_topic = %context.default_publish_topic,
            "Publishing stdin lines"
        );

        let mut dispatcher = Dispatcher::new(bus, sinks, context, &blueprint.dispatch);

        let patterns = blueprint.subscriptions.effective_patterns();
        let ids = dispatcher
            .subscribe_all(&patterns, blueprint.subscriptions.qos)
            .await;

        if ids.len() < patterns.len() {
            warn!(
                requested = patterns.len(),
                active = ids.len(),
                "Some subscriptions were not created"
            );
        }

        let (input, reader) = spawn_line_reader(input);

        // A signal closes the input, so the loop stops the same way as at EOF
        let closer = input.clone();
        let watcher = tokio::spawn(async move {
            shutdown.await;
            warn!("Received shutdown signal, stopping bridge...");
            closer.close();
        });

        let result = dispatcher.run(input).await;

        info!("Shutting down bridge...");
        watcher.abort();
        reader.abort();
        dispatcher.close().await;
        finish(dispatcher.bus());

        let dispatch = result.map_err(|e| CliError::bridge_execution(e.to_string()))?;

        let stats = BridgeStats {
            dispatch,
            duration: start_time.elapsed(),
            active_subscriptions: ids.len(),
            active_sinks,
            metrics: dispatcher.summary(),
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            records = stats.dispatch.records,
            "Bridge shutdown complete"
        );

        Ok(stats)
    }
}
