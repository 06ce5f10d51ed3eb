use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use emi_agent::capability::LoggingCapabilities;
use emi_agent::client::{DeviceApi, FetchOutcome, HttpDeviceApi};
use emi_agent::config::AgentConfig;
use emi_agent::error::AgentError;
use emi_agent::heartbeat::{Heartbeat, LoopExit, Terminal};
use emi_agent::identity::{DeviceIdentity, IdentityStore};

/// Device-side agent for EMI-financed handsets.
#[derive(Parser, Debug)]
#[command(name = "emi-agent", version, about)]
struct Cli {
    /// Path to the agent configuration file (defaults to config/agent.toml).
    #[arg(short, long, global = true, env = "EMI_AGENT_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Link this handset to a device record after provisioning.
    Enroll {
        /// Device id from the provisioning QR code.
        device_id: String,

        /// Server URL from the QR code; overrides the configured one.
        #[arg(long)]
        server_url: Option<String>,
    },
    /// Enter service mode and run the heartbeat until unlinked or stopped.
    Run,
    /// Print the local enrollment.
    Status,
}

async fn enroll(
    config: &AgentConfig,
    identity: &IdentityStore,
    device_id: String,
    server_url: Option<String>,
) -> Result<()> {
    let server_url = server_url.unwrap_or_else(|| config.server_url.clone());
    let api = HttpDeviceApi::new(&server_url, &config.timings())?;

    match api.fetch_device(&device_id).await? {
        FetchOutcome::Found(device) => {
            identity
                .save(&DeviceIdentity {
                    device_id: device.id.clone(),
                    server_url,
                    enrolled_at: Utc::now(),
                })
                .await?;
            info!(device_id = %device.id, customer = %device.customer_name, "Device enrolled");
            Ok(())
        }
        FetchOutcome::Missing => Err(AgentError::UnknownDevice(device_id).into()),
    }
}

async fn run(config: &AgentConfig, identity: IdentityStore) -> Result<()> {
    let enrolled = identity.load().await?.ok_or(AgentError::NotEnrolled)?;
    let timings = config.timings();
    let api: Arc<dyn DeviceApi> = Arc::new(HttpDeviceApi::new(&enrolled.server_url, &timings)?);
    let caps = Arc::new(LoggingCapabilities::new(config.simulated_position));

    let cancel = CancellationToken::new();
    let heartbeat = Heartbeat::new(
        enrolled.device_id,
        api,
        caps,
        identity,
        timings,
        cancel.clone(),
    );
    heartbeat.activate().await.context("Activation failed")?;

    let mut task = tokio::spawn(heartbeat.run());
    let exit = tokio::select! {
        exit = &mut task => exit?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            cancel.cancel();
            task.await?
        }
    };

    match exit {
        LoopExit::Cancelled => info!("Agent stopped"),
        LoopExit::Finished(Terminal::Released) => {
            info!("Loan fully paid. This application can now be uninstalled.")
        }
        LoopExit::Finished(Terminal::Unlinked) => {
            info!("Device unlinked. This application can now be uninstalled.")
        }
        LoopExit::Finished(Terminal::Wiped) => info!("Factory reset issued"),
        LoopExit::Finished(Terminal::CommandFailed(command)) => {
            warn!(%command, "Command failed; device control has been released")
        }
    }
    Ok(())
}

async fn status(identity: &IdentityStore) -> Result<()> {
    match identity.load().await? {
        Some(enrolled) => println!(
            "enrolled: {} at {} (since {})",
            enrolled.device_id, enrolled.server_url, enrolled.enrolled_at
        ),
        None => println!("not enrolled"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref())?;

    shared::logging::init_logging(&config.logging.level, &config.logging.format);

    let identity = IdentityStore::new(&config.identity_path);

    match cli.command {
        Command::Enroll {
            device_id,
            server_url,
        } => enroll(&config, &identity, device_id, server_url).await,
        Command::Run => run(&config, identity).await,
        Command::Status => status(&identity).await,
    }
}
