//! gazecast CLI
//!
//! Share your gaze with other participants through a relay.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use gazecast::{
    assemble,
    config::Config,
    core::FilterConfig,
    device::{EyeTracker, SimulatedTracker, SimulatorConfig},
    net::{ClientRole, DEFAULT_RELAY_PORT},
    orchestrator::UserCommand,
    stats::SessionLog,
    VERSION,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "gazecast")]
#[command(version = VERSION)]
#[command(about = "Real-time gaze sharing over a relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent and connect to the relay
    Start {
        /// Relay host (overrides the saved configuration)
        #[arg(long)]
        host: Option<String>,

        /// Relay port (overrides the saved configuration)
        #[arg(long)]
        port: Option<u16>,

        /// Role: source, sink, or both
        #[arg(long)]
        role: Option<String>,

        /// Sample rate of the simulated tracker
        #[arg(long, default_value = "60")]
        rate_hz: u32,

        /// Start disconnected
        #[arg(long)]
        no_connect: bool,
    },

    /// Run a gaze relay
    Relay {
        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_RELAY_PORT)]
        port: u16,
    },

    /// Show configuration and cumulative statistics
    Status,

    /// Show configuration
    Config,

    /// Change the fixation filter constants
    SetFilter {
        /// Fast average time constant, in samples
        #[arg(long)]
        low: Option<u32>,

        /// Slow average time constant, in samples
        #[arg(long)]
        high: Option<u32>,

        /// Divergence window, in samples
        #[arg(long)]
        window: Option<u32>,

        /// Fixation threshold, in screen units
        #[arg(long)]
        threshold: Option<u32>,
    },

    /// Change the relay target and role
    SetLink {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Role: source, sink, or both
        #[arg(long)]
        role: Option<String>,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start {
            host,
            port,
            role,
            rate_hz,
            no_connect,
        } => cmd_start(host, port, role, rate_hz, no_connect),
        Commands::Relay { host, port } => cmd_relay(host, port),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        Commands::SetFilter {
            low,
            high,
            window,
            threshold,
        } => cmd_set_filter(low, high, window, threshold),
        Commands::SetLink { host, port, role } => cmd_set_link(host, port, role),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gazecast=info".into()),
        )
        .init();
}

fn load_config() -> Config {
    Config::load_or_default().0
}

fn parse_role(role: &str) -> anyhow::Result<ClientRole> {
    let parsed = ClientRole::from_csv(role);
    if parsed.is_empty() {
        bail!("unknown role {role:?}; expected source, sink, or both");
    }
    Ok(parsed)
}

fn cmd_start(
    host: Option<String>,
    port: Option<u16>,
    role: Option<String>,
    rate_hz: u32,
    no_connect: bool,
) -> anyhow::Result<()> {
    println!("gazecast v{VERSION}");
    println!();

    let (mut config, writable) = Config::load_or_default();
    if host.is_some() || port.is_some() || role.is_some() {
        let role = match role {
            Some(role) => parse_role(&role)?,
            None => config.link.role,
        };
        let host = host.unwrap_or_else(|| config.link.host.clone());
        let port = port.unwrap_or(config.link.port);
        config.set_link(host, port, role)?;
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("  Relay: {}", config.link.address());
    println!("  Role: {}", config.link.role);
    println!(
        "  Filter: low {} / high {} / window {} / threshold {}",
        config.filter.low_time_constant,
        config.filter.high_time_constant,
        config.filter.window_size,
        config.filter.fixation_threshold
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let tracker: Arc<dyn EyeTracker> = Arc::new(SimulatedTracker::new(SimulatorConfig {
        rate_hz,
        ..SimulatorConfig::default()
    }));
    let (mut orchestrator, queue) =
        assemble(&config, tracker).context("Failed to start the agent")?;

    let exit_queue = queue.clone();
    ctrlc::set_handler(move || {
        exit_queue.request_exit();
    })
    .context("Error setting Ctrl+C handler")?;

    if !no_connect {
        queue.command(UserCommand::Connect);
    }
    orchestrator.run();

    if writable {
        if let Err(e) = config.save() {
            eprintln!("Warning: Could not save configuration: {e}");
        }
    }
    if let Some(stats) = orchestrator.stats() {
        if let Err(e) = stats.append_to(&config.stats_path()) {
            eprintln!("Warning: Could not save session statistics: {e}");
        }
        println!();
        println!("Session Statistics:");
        println!("{}", stats.summary());
    }
    Ok(())
}

#[cfg(feature = "relay")]
fn cmd_relay(host: String, port: u16) -> anyhow::Result<()> {
    use gazecast::net::{relay, RelayConfig};

    let runtime = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    runtime.block_on(async {
        let (addr, shutdown) = relay::run(RelayConfig::new(host, port)).await?;
        println!("Relay listening on {addr}");
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        println!();
        println!("Stopping relay...");
        let _ = shutdown.send(());
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(not(feature = "relay"))]
fn cmd_relay(_host: String, _port: u16) -> anyhow::Result<()> {
    bail!("relay support not enabled at compile time")
}

fn cmd_status() -> anyhow::Result<()> {
    let config = load_config();

    println!("gazecast Status");
    println!("===============");
    println!();
    println!("Configuration:");
    println!("  Relay: {}", config.link.address());
    println!("  Role: {}", config.link.role);
    println!(
        "  Filter: low {} / high {} / window {} / threshold {}",
        config.filter.low_time_constant,
        config.filter.high_time_constant,
        config.filter.window_size,
        config.filter.fixation_threshold
    );
    println!();

    let log = SessionLog::load(&config.stats_path()).context("Failed to read the session log")?;
    let (Some(last), Some(totals)) = (log.last(), log.totals()) else {
        println!("No previous session data found.");
        return Ok(());
    };

    println!(
        "Last Session ({} UTC):",
        last.started.format("%Y-%m-%d %H:%M:%S")
    );
    println!("{last}");
    println!();
    println!("All {} Logged Sessions:", log.sessions.len());
    println!("{totals}");
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_set_filter(
    low: Option<u32>,
    high: Option<u32>,
    window: Option<u32>,
    threshold: Option<u32>,
) -> anyhow::Result<()> {
    let mut config = Config::load().context("Refusing to overwrite an unreadable configuration")?;
    let current = config.filter.clone();

    config.set_filter(FilterConfig {
        low_time_constant: low.unwrap_or(current.low_time_constant),
        high_time_constant: high.unwrap_or(current.high_time_constant),
        window_size: window.unwrap_or(current.window_size),
        fixation_threshold: threshold.unwrap_or(current.fixation_threshold),
    })?;
    config.save()?;

    println!("Filter updated; takes effect the next time the agent starts.");
    Ok(())
}

fn cmd_set_link(
    host: Option<String>,
    port: Option<u16>,
    role: Option<String>,
) -> anyhow::Result<()> {
    let mut config = Config::load().context("Refusing to overwrite an unreadable configuration")?;

    let role = match role {
        Some(role) => parse_role(&role)?,
        None => config.link.role,
    };
    let host = host.unwrap_or_else(|| config.link.host.clone());
    let port = port.unwrap_or(config.link.port);

    config.set_link(host, port, role)?;
    config.save()?;

    println!(
        "Relay set to {} as {}.",
        config.link.address(),
        config.link.role
    );
    Ok(())
}
