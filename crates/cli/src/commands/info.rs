//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use contracts::{substitute_client, BridgeBlueprint, CLIENT_PLACEHOLDER};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    broker: BrokerInfo,
    subscriptions: SubscriptionInfo,
    publish: PublishInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct BrokerInfo {
    uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    clean_session: bool,
    keep_alive_secs: u64,
}

#[derive(Serialize)]
struct SubscriptionInfo {
    /// Patterns actually subscribed (prefix applied, `$SYS/#` first when enabled)
    patterns: Vec<String>,
    qos: u8,
}

#[derive(Serialize)]
struct PublishInfo {
    default_topic: String,
    qos: u8,
    retain: bool,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint);
    }

    Ok(())
}

fn build_config_info(blueprint: &BridgeBlueprint) -> ConfigInfo {
    // Without a fixed client id the placeholder is left visible
    let default_topic = match &blueprint.broker.client_id {
        Some(client_id) => substitute_client(&blueprint.publish.default_topic, client_id),
        None => blueprint.publish.default_topic.clone(),
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        broker: BrokerInfo {
            uri: blueprint.broker.uri.clone(),
            client_id: blueprint.broker.client_id.clone(),
            clean_session: blueprint.broker.clean_session,
            keep_alive_secs: blueprint.broker.keep_alive_secs,
        },
        subscriptions: SubscriptionInfo {
            patterns: blueprint.subscriptions.effective_patterns(),
            qos: blueprint.subscriptions.qos.level(),
        },
        publish: PublishInfo {
            default_topic,
            qos: blueprint.publish.qos.level(),
            retain: blueprint.publish.retain,
        },
        sinks: blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                params: s
                    .params
                    .iter()
                    .map(|(k, v)| (k.clone(), redact(k, v)))
                    .collect(),
            })
            .collect(),
    }
}

/// Hide credentials in printed sink params
fn redact(key: &str, value: &str) -> String {
    if key.contains("password") || key.contains("token") {
        "***".to_string()
    } else {
        value.to_string()
    }
}

fn print_config_info(blueprint: &BridgeBlueprint) {
    let info = build_config_info(blueprint);

    println!("=== MQTT Plumber Configuration ===\n");

    println!("Broker");
    println!("   ├─ Version: {}", info.version);
    println!("   ├─ URI: {}", info.broker.uri);
    println!(
        "   ├─ Client: {}",
        info.broker
            .client_id
            .as_deref()
            .unwrap_or("random (plumber-NNN)")
    );
    println!("   └─ Keep alive: {}s", info.broker.keep_alive_secs);

    println!(
        "\nSubscriptions ({}, qos {})",
        info.subscriptions.patterns.len(),
        info.subscriptions.qos
    );
    print_list(&info.subscriptions.patterns);

    println!("\nPublish");
    println!("   ├─ Default topic: {}", info.publish.default_topic);
    if info.publish.default_topic.contains(CLIENT_PLACEHOLDER) {
        println!("   │  ({CLIENT_PLACEHOLDER} is replaced with the client id)");
    }
    println!("   ├─ QoS: {}", info.publish.qos);
    println!("   └─ Retain: {}", info.publish.retain);

    if !info.sinks.is_empty() {
        println!("\nSinks ({})", info.sinks.len());
        let lines: Vec<String> = info
            .sinks
            .iter()
            .map(|s| {
                if s.params.is_empty() {
                    format!("{} ({})", s.name, s.sink_type)
                } else {
                    format!("{} ({}) {:?}", s.name, s.sink_type, s.params)
                }
            })
            .collect();
        print_list(&lines);
    }

    println!();
}

fn print_list(items: &[String]) {
    for (i, item) in items.iter().enumerate() {
        let prefix = if i == items.len() - 1 { "└─" } else { "├─" };
        println!("   {} {}", prefix, item);
    }
}
