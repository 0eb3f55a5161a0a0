use agent_watch::cli;
use agent_watch::config::FileConfig;
use agent_watch::gateway;
use agent_watch::hooks::DaemonHooks;
use agent_watch::monitor;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "agent-watch", version, about = "Watch what coding agents are doing")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor daemon (and its gateway)
    Watch {
        /// Transcript directory (overrides config)
        #[arg(long)]
        sessions_dir: Option<PathBuf>,
        /// Poll interval in milliseconds (overrides config)
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Also look for running agent processes
        #[arg(long)]
        processes: bool,
    },
    /// Parse one transcript and print the result
    Scan {
        /// Transcript file
        path: PathBuf,
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
        /// Number of recent actions to keep
        #[arg(long, default_value_t = agent_watch::parser::DEFAULT_MAX_ACTIONS)]
        max_actions: usize,
    },
    /// Check whether the daemon is running
    Status,
    /// Write a default config file
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| agent_watch::agent_watch_home().join("config.yaml"));

    let (sessions_dir, interval_ms, processes) = match cli.command {
        Some(Command::Watch {
            sessions_dir,
            interval_ms,
            processes,
        }) => (sessions_dir, interval_ms, processes),
        None => (None, None, false),
        Some(Command::Scan {
            path,
            json,
            max_actions,
        }) => return cli::scan_file(&path, max_actions, json).await,
        Some(Command::Status) => {
            let file = FileConfig::load(&config_path).await?;
            let addr = std::env::var("AGENT_WATCH_GATEWAY_ADDR")
                .ok()
                .or(file.gateway_addr)
                .unwrap_or_else(|| gateway::DEFAULT_GATEWAY_ADDR.to_string());
            return cli::check_status(&addr).await;
        }
        Some(Command::Init) => return cli::init_config(&config_path).await,
    };

    // --- Daemon startup ---

    info!(path = %config_path.display(), "loading configuration");
    let file = FileConfig::load(&config_path).await?;

    let mut monitor_cfg = file.monitor_config();
    if let Some(dir) = sessions_dir {
        monitor_cfg.sessions_dir = Some(dir);
    }
    if let Some(ms) = interval_ms {
        monitor_cfg.poll_interval = Duration::from_millis(ms);
    }
    if processes {
        monitor_cfg.process_monitoring = true;
    }

    let (snapshots, _) = tokio::sync::broadcast::channel(64);
    let monitor_cfg = monitor_cfg
        .with_hooks(Arc::new(DaemonHooks::new(agent_watch::agent_watch_home())))
        .with_pubsub(snapshots);
    let handle = monitor::start(monitor_cfg)?;

    // Start the gateway (enabled by default; set AGENT_WATCH_GATEWAY=0 to disable).
    let gw = gateway::spawn_gateway_if_enabled(handle.clone(), file.gateway_addr.as_deref()).await;
    match &gw {
        Some(gw) => info!(addr = %gw.addr, "gateway enabled"),
        None if std::env::var("AGENT_WATCH_GATEWAY").as_deref() != Ok("0") => {
            tracing::warn!("gateway failed to start (all ports in use?). Try: AGENT_WATCH_GATEWAY=0 agent-watch watch");
        }
        None => {}
    }

    info!("agent-watch ready");

    // Wait for shutdown signal (Ctrl-C)
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down…");

    handle.shutdown().await;
    if let Some(gw) = gw {
        gw.handle.abort();
    }

    info!("shutdown complete");
    Ok(())
}
