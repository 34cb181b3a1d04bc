//! Concord node CLI.
//!
//! Hosts one consensus module agent as a single-process, single-threaded
//! run loop. This is a local/manual-testing host: it wires the agent's
//! collaborator traits to in-process loopback implementations rather than a
//! real Aeron-like transport (see [`collab`]).

mod collab;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use concord_agent::agent::Agent;
use concord_agent::counters::AgentCounters;
use concord_agent::ingress::IngressAdapter;
use concord_agent::log::{LogAdapter, LogPublisher};
use concord_agent::recording_log::RecordingLog;
use concord_config::{ClusterConfig, ConfigLoader, MemberConfig, Paths};
use concord_types::ClusterTime;

use collab::{AllowAllAuthenticator, InMemoryArchiveClient, LoggingTerminationHook, loopback_pair};

#[derive(Parser)]
#[command(name = "concord-node")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default single-member `concord.toml` into a node directory.
    Init {
        /// Node directory to initialize.
        path: String,
    },

    /// Run the agent's run loop in this process until interrupted.
    Run {
        /// Node directory containing `concord.toml`.
        path: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init { path } => init(&path),
        Commands::Run { path } => run(&path),
    }
}

fn init(path: &str) -> Result<()> {
    let node_dir = Path::new(path);
    if Paths::is_initialized(node_dir) {
        bail!("{} is already initialized: concord.toml already exists", node_dir.display());
    }
    std::fs::create_dir_all(node_dir).context("failed to create node directory")?;

    let config = ClusterConfig {
        member_id: 0,
        members: vec![MemberConfig {
            id: 0,
            client_endpoint: "127.0.0.1:9000".to_string(),
            member_endpoint: "127.0.0.1:9010".to_string(),
            transfer_endpoint: "127.0.0.1:9020".to_string(),
            log_endpoint: "127.0.0.1:9030".to_string(),
        }],
        ..ClusterConfig::default()
    };
    let content = toml::to_string_pretty(&config).context("failed to serialize default configuration")?;
    std::fs::write(Paths::node_config_file(node_dir), content).context("failed to write concord.toml")?;

    println!("Initialized a single-member node in {}", node_dir.display());
    println!("Edit concord.toml to add cluster members, then run `concord-node run {path}`.");
    Ok(())
}

fn run(path: &str) -> Result<()> {
    let node_dir = Path::new(path);
    if !Paths::is_initialized(node_dir) {
        bail!("{} is not initialized. Run `concord-node init {path}` first.", node_dir.display());
    }

    let cluster_config = ConfigLoader::new().with_node_dir(node_dir).load().context("failed to load concord.toml")?;
    let agent_config = cluster_config.into_agent_config().context("invalid configuration")?;

    let data_dir = Paths::data_dir(node_dir);
    std::fs::create_dir_all(&data_dir).context("failed to create data directory")?;
    let recording_log = RecordingLog::open(&recording_log_path(&data_dir), agent_config.file_sync_level).context("failed to open recording log")?;

    let (publication, subscription) = loopback_pair();
    let log_publisher = LogPublisher::new(publication);
    let log_adapter = LogAdapter::new(subscription);

    // The client-facing ingress transport is a separate wire from the log:
    // nothing publishes onto it yet in this local/manual host, so the
    // subscription only ever observes an empty stream. A real deployment
    // wires this to its actual transport's subscription side.
    let (_ingress_publication, ingress_subscription) = loopback_pair();
    let ingress = IngressAdapter::new(ingress_subscription);

    let counters = AgentCounters::shared();
    let now = cluster_time_now();

    let mut agent = Agent::new(
        agent_config,
        Arc::clone(&counters),
        log_publisher,
        log_adapter,
        ingress,
        recording_log,
        Box::new(InMemoryArchiveClient::new()),
        Box::new(AllowAllAuthenticator),
        Box::new(LoggingTerminationHook),
        now,
    );

    agent.complete_recovery();

    println!("Consensus module agent running in {}. Press Ctrl+C to stop.", node_dir.display());
    loop {
        if let Err(err) = agent.do_work(cluster_time_now()) {
            tracing::error!(error = %err, "agent.do_work returned an error");
        }
        if agent.module_state() == concord_agent::module_state::ModuleState::Closed {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    println!("Agent closed.");
    Ok(())
}

fn recording_log_path(data_dir: &Path) -> PathBuf {
    data_dir.join("recording.log")
}

fn cluster_time_now() -> ClusterTime {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    ClusterTime::new(nanos as i64)
}
