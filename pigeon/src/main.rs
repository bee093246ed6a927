//! Pigeon emergency mesh node
//!
//! Orchestrator binary: loads identity and config, assembles a mesh context
//! and runs it. Without a radio attached, `run` lays out a demo mesh of
//! in-process nodes so the relay, discovery and gateway upload paths can be
//! watched end to end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use lib_gateway::HttpCollector;
use lib_identity::DeviceIdentity;
use lib_mesh::{MemoryHub, MeshEvent};
use lib_protocol::{MessagePayload, Urgency, AUTO_CONNECT_PERIOD};
use lib_storage::KvStore;
use pigeon::{MeshContext, NodeConfig};

#[derive(Parser)]
#[command(name = "pigeon", version, about = "Offline emergency mesh messaging node")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a demo mesh of in-process nodes, with this device as gateway.
    Run {
        /// Number of nodes in the demo line topology.
        #[arg(long, default_value_t = 4)]
        nodes: usize,
    },
    /// Show or change this device's identity.
    Identity {
        #[command(subcommand)]
        command: IdentityCommand,
    },
}

#[derive(Subcommand)]
enum IdentityCommand {
    /// Print the device id, name and onboarding state.
    Show,
    /// Set a new display name.
    Rename { name: String },
    /// Mark onboarding as completed.
    Onboard,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = NodeConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run { nodes } => run_demo_mesh(config, nodes).await,
        Command::Identity { command } => identity_command(config, command),
    }
}

fn identity_command(config: NodeConfig, command: IdentityCommand) -> Result<()> {
    let kv = KvStore::open(&config.data_dir)?;
    let mut identity = DeviceIdentity::load_or_generate(kv)?;
    match command {
        IdentityCommand::Show => {
            println!("device id:   {}", identity.device_id());
            println!("device name: {}", identity.device_name());
            println!("onboarded:   {}", identity.has_completed_onboarding());
        }
        IdentityCommand::Rename { name } => {
            identity.set_device_name(name);
            println!("device name: {}", identity.device_name());
        }
        IdentityCommand::Onboard => {
            identity.set_completed(true);
            println!("onboarding completed");
        }
    }
    Ok(())
}

async fn run_demo_mesh(config: NodeConfig, nodes: usize) -> Result<()> {
    let kv = KvStore::open(&config.data_dir)?;
    let mut identity = DeviceIdentity::load_or_generate(kv.clone())?;
    if let Some(name) = &config.device_name {
        if name != identity.device_name() {
            identity.set_device_name(name.clone());
        }
    }
    let endpoint = config.resolve_endpoint(&kv);
    info!(endpoint = %endpoint, "collector endpoint resolved");
    let collector = Arc::new(HttpCollector::new(endpoint)?);

    let hub = MemoryHub::new();
    let (link, link_events) = hub.attach(identity.device_id(), identity.device_name()).await;
    let local = MeshContext::start(
        &identity,
        kv,
        Arc::new(link),
        link_events,
        collector.clone(),
    )
    .await?;

    // Ephemeral peers form a line behind the local node; auto-connect links
    // each adjacent pair once discovery fires.
    let mut peers = Vec::new();
    let mut previous = identity.device_id().to_string();
    for i in 1..nodes.max(2) {
        let device_id = format!("demo-{i:02}");
        let device_name = format!("Pigeon-demo{i:02}");
        let (link, link_events) = hub.attach(&device_id, &device_name).await;
        let ctx = MeshContext::start_ephemeral(
            &device_id,
            &device_name,
            Arc::new(link),
            link_events,
            collector.clone(),
        )
        .await?;
        hub.place_in_range(&previous, &device_id).await;
        previous = device_id;
        peers.push(ctx);
    }
    info!(nodes, "demo mesh laid out as a line");

    let mut events = local.router.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                MeshEvent::MessageAdmitted(msg) => {
                    info!(id = %msg.id, from = %msg.sender_name, hops = msg.hop_count, "message admitted");
                }
                MeshEvent::GatewayStateChanged { reachable } => {
                    info!(reachable, "gateway reachability changed");
                }
                MeshEvent::UploadStatusChanged(status) => {
                    info!(?status, "upload status changed");
                }
                _ => {}
            }
        }
    });

    // Give auto-connect one cycle to wire the line, then exercise it with an
    // SOS from the far end.
    tokio::time::sleep(AUTO_CONNECT_PERIOD + Duration::from_secs(1)).await;
    if let Some(far) = peers.last() {
        far.router
            .originate(
                MessagePayload::Sos {
                    description: "Demo: trapped near the east stairwell".into(),
                    urgency: Urgency::High,
                    latitude: None,
                    longitude: None,
                    location: Some("east stairwell".into()),
                    battery_level: Some(63),
                },
                None,
            )
            .await?;
    }

    // This device plays the gateway; uploads go to the configured collector.
    local.reachability.set_online(true);

    info!("demo mesh running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    for ctx in &peers {
        ctx.stop().await;
    }
    local.stop().await;
    Ok(())
}
