//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::{split_watch_list, BridgeBlueprint, QoS};
use rand::Rng;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Bridge, BridgeConfig};

/// Execute the `run` command
pub async fn run_bridge(args: &RunArgs) -> Result<()> {
    let mut blueprint = load_blueprint(args)?;
    apply_overrides(&mut blueprint, args)?;

    config_loader::ConfigLoader::validate(&blueprint)
        .map_err(|e| CliError::config_validation(e.to_string()))?;

    let client_id = blueprint
        .broker
        .client_id
        .clone()
        .unwrap_or_else(random_client_id);

    info!(
        broker = %blueprint.broker.uri,
        client_id = %client_id,
        patterns = ?blueprint.subscriptions.effective_patterns(),
        sinks = blueprint.sinks.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint, &client_id);
        return Ok(());
    }

    let bridge = Bridge::new(BridgeConfig {
        blueprint,
        client_id,
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
        mock: args.mock,
    });

    info!("Starting bridge...");

    let stats = bridge
        .run(setup_shutdown_signal())
        .await
        .context("Bridge execution failed")?;
    info!(
        records = stats.dispatch.records,
        published = stats.dispatch.published,
        duration_secs = stats.duration.as_secs_f64(),
        "Bridge completed successfully"
    );
    stats.print_summary();

    info!("MQTT Plumber finished");
    Ok(())
}

/// Configuration file when given, built-in defaults otherwise
fn load_blueprint(args: &RunArgs) -> Result<BridgeBlueprint> {
    let Some(path) = &args.config else {
        info!("No configuration file given, using defaults");
        return Ok(BridgeBlueprint::default());
    };

    info!(config = %path.display(), "Loading configuration");

    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()).into());
    }

    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Apply command-line overrides on top of the loaded configuration
fn apply_overrides(blueprint: &mut BridgeBlueprint, args: &RunArgs) -> Result<()> {
    if let Some(ref broker) = args.broker {
        info!(broker = %broker, "Overriding broker from CLI");
        blueprint.broker.uri = broker.clone();
    }
    if let Some(ref client) = args.client {
        blueprint.broker.client_id = Some(client.clone());
    }
    if let Some(ref watch) = args.watch {
        info!(watch = %watch, "Overriding watch patterns from CLI");
        blueprint.subscriptions.watch = split_watch_list(watch);
    }
    if let Some(ref prefix) = args.prefix {
        blueprint.subscriptions.prefix = prefix.clone();
    }
    if let Some(qos) = args.qos {
        blueprint.subscriptions.qos = QoS::try_from(qos)?;
    }
    if args.sys {
        blueprint.subscriptions.sys = true;
    }
    Ok(())
}

/// "plumber-<0..999>"
fn random_client_id() -> String {
    format!("plumber-{}", rand::rng().random_range(0..1000))
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &BridgeBlueprint, client_id: &str) {
    println!("\n=== Configuration Summary ===\n");
    println!("Broker:");
    println!("  URI: {}", blueprint.broker.uri);
    println!("  Client: {}", client_id);

    let patterns = blueprint.subscriptions.effective_patterns();
    println!(
        "\nSubscriptions ({}, qos {}):",
        patterns.len(),
        blueprint.subscriptions.qos
    );
    for pattern in &patterns {
        println!("  - {}", pattern);
    }

    println!("\nPublish:");
    println!(
        "  Default topic: {}",
        contracts::substitute_client(&blueprint.publish.default_topic, client_id)
    );

    if !blueprint.sinks.is_empty() {
        println!("\nSinks ({}):", blueprint.sinks.len());
        for sink in &blueprint.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}
