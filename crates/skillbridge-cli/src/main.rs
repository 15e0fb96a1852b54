//! Command-line interface for the SkillBridge operation-delegation bridge.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skillbridge_api::ServerState;
use skillbridge_core::{BridgeConfig, SkillTopicTable, env_vars};
use skillbridge_mqtt::{
    AasStateUpdater, MqttOperationBridge, PendingOperationRegistry, RumqttTransport,
};
use skillbridge_schema::SchemaParser;

/// SkillBridge - delegate shell Operations to MQTT devices.
#[derive(Parser, Debug)]
#[command(name = "skillbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the delegation API.
    Serve {
        /// TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON skill table `{assetId: {skillName: config}}`.
        #[arg(long)]
        skills: Option<PathBuf>,

        /// Host to bind to (overrides the configured bind address).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides the configured bind address).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the flat structure extracted from a JSON Schema.
    Schema {
        /// Schema file path or URL.
        reference: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Serve {
            config,
            skills,
            host,
            port,
        } => run_server(config, skills, host, port).await,
        Command::Schema { reference } => print_schema(&reference).await,
    }
}

fn init_logging(verbose: bool) {
    // Check if JSON logging is requested (for production/container environments)
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "skillbridge=debug" } else { "skillbridge=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(default_level).add_directive(tracing::Level::WARN.into())
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}

/// Combine the configured bind address with command-line overrides.
fn resolve_bind(configured: &str, host: Option<String>, port: Option<u16>) -> Result<SocketAddr> {
    let base: SocketAddr = configured
        .parse()
        .with_context(|| format!("Invalid bind address: {}", configured))?;
    let host = match host {
        Some(host) => host
            .parse()
            .with_context(|| format!("Invalid host: {}", host))?,
        None => base.ip(),
    };
    Ok(SocketAddr::new(host, port.unwrap_or(base.port())))
}

async fn run_server(
    config_path: Option<PathBuf>,
    skills_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let config = BridgeConfig::load(config_path.as_deref())?;
    let bind = resolve_bind(&config.server.bind, host, port)?;

    let skills = Arc::new(SkillTopicTable::new());
    if let Some(path) = skills_path.or_else(|| config.skills_file.clone()) {
        skills.replace(SkillTopicTable::load_json_file(&path)?);
        tracing::info!(
            "Loaded {} skills for {} assets from {}",
            skills.len(),
            skills.asset_count(),
            path.display()
        );
    }

    let registry = Arc::new(PendingOperationRegistry::new());
    let transport = Arc::new(
        RumqttTransport::new(config.mqtt.clone(), registry.clone()).with_disconnect_callback(
            Arc::new(|reason: &str| {
                tracing::warn!("MQTT connection lost ({}); restart or reconnect to resume", reason);
            }),
        ),
    );
    transport
        .connect()
        .await
        .with_context(|| format!("Cannot connect to MQTT broker {}:{}", config.mqtt.host, config.mqtt.port))?;

    let schemas = Arc::new(SchemaParser::new(Duration::from_secs(
        config.schema.fetch_timeout_secs,
    )));
    let progress = Arc::new(AasStateUpdater::new(&config.aas));
    let bridge = Arc::new(MqttOperationBridge::new(
        transport.clone(),
        registry,
        schemas,
        progress,
        config.invocation.default_timeout(),
    ));

    let state = ServerState::new(bridge, skills, config.invocation.clone());
    let served = skillbridge_api::run(bind, state).await;

    transport.disconnect().await?;
    served
}

async fn print_schema(reference: &str) -> Result<()> {
    let parser = SchemaParser::new(Duration::from_secs(
        skillbridge_core::defaults::SCHEMA_FETCH_TIMEOUT_SECS,
    ));
    let structure = parser
        .extract_structure(reference)
        .await
        .with_context(|| format!("Cannot load schema {}", reference))?;
    println!("{}", serde_json::to_string_pretty(&*structure)?);
    Ok(())
}
