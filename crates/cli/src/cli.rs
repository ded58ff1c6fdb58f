//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// MQTT Plumber - persist bus messages matching topic patterns as time-series records
#[derive(Parser, Debug)]
#[command(
    name = "mqtt-plumber",
    author,
    version,
    about = "Bridge MQTT topic patterns to time-series sinks",
    long_about = "Subscribes to MQTT topic patterns and writes every matching message as a \n\
                  time-series record to the configured sinks. Lines read from stdin are \n\
                  published back to the bus as \"<topic> <body>\" or \"<body>\"."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "MQTT_PLUMBER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "MQTT_PLUMBER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bridge until stdin closes
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone, Default)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); built-in defaults when omitted
    #[arg(short, long, env = "MQTT_PLUMBER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override broker URI (tcp://host:port)
    #[arg(long, env = "MQTT_PLUMBER_BROKER")]
    pub broker: Option<String>,

    /// Override client id
    #[arg(long, env = "MQTT_PLUMBER_CLIENT")]
    pub client: Option<String>,

    /// Override watch patterns (comma separated)
    #[arg(long, env = "MQTT_PLUMBER_WATCH")]
    pub watch: Option<String>,

    /// Override namespace prefix for watch patterns
    #[arg(long, env = "MQTT_PLUMBER_PREFIX")]
    pub prefix: Option<String>,

    /// Override subscription QoS
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2), env = "MQTT_PLUMBER_QOS")]
    pub qos: Option<u8>,

    /// Also persist broker `$SYS` messages
    #[arg(long)]
    pub sys: bool,

    /// Use the in-memory bus instead of a broker
    #[arg(long)]
    pub mock: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "MQTT_PLUMBER_METRICS_PORT")]
    pub metrics_port: u16,

    /// Validate configuration and exit without connecting
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
