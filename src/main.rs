//! Guardian Agent CLI
//!
//! On-device monitoring agent for family safety.

use clap::{Parser, Subcommand};
use guardian_agent::{
    agent::{status_report, Agent},
    capabilities::NoopCapabilities,
    clock::SystemClock,
    config::AgentConfig,
    store::Store,
    sync::{BackendConfig, HttpBackend},
    VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "guardian-agent")]
#[command(version = VERSION)]
#[command(about = "On-device monitoring agent for family safety", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitoring agent
    Start {
        /// Hide the launcher icon after starting
        #[arg(long)]
        stealth: bool,
    },

    /// Register this device with the backend without starting the agent
    Register,

    /// Show agent status from the local store
    Status,

    /// Show or update configuration
    Config {
        /// Set the backend base URL
        #[arg(long)]
        backend_url: Option<String>,

        /// Set the API token
        #[arg(long)]
        token: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { stealth } => cmd_start(stealth),
        Commands::Register => cmd_register(),
        Commands::Status => cmd_status(),
        Commands::Config { backend_url, token } => cmd_config(backend_url, token),
    }
}

fn load_config() -> AgentConfig {
    match AgentConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: could not load config: {e}");
            AgentConfig::default()
        }
    }
}

fn open_store(config: &AgentConfig) -> Store {
    if let Err(e) = config.ensure_directories() {
        eprintln!("Error: could not create data directory: {e}");
        std::process::exit(1);
    }
    match Store::open(&config.database_path()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: could not open local database: {e}");
            std::process::exit(1);
        }
    }
}

fn build_backend(config: &AgentConfig) -> HttpBackend {
    let mut backend_config = BackendConfig::new(config.backend_url.clone());
    backend_config.timeout = Duration::from_secs(config.request_timeout_secs);
    if let Some(ref token) = config.api_token {
        backend_config = backend_config.with_token(token.clone());
    }
    match HttpBackend::new(backend_config) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Error: could not create backend client: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_start(stealth: bool) {
    println!("Guardian Agent v{VERSION}");

    let mut config = load_config();
    if stealth {
        config.stealth = true;
    }
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let store = open_store(&config);
    let backend = Arc::new(build_backend(&config));
    let caps = Arc::new(NoopCapabilities::new());
    let clock = Arc::new(SystemClock);

    let mut agent = match Agent::new(config, store, backend, caps, clock) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("Error: could not assemble agent: {e}");
            std::process::exit(1);
        }
    };

    match agent.startup() {
        Ok(child_id) => println!("Monitoring child profile {child_id}"),
        Err(e) => {
            eprintln!("Error: registration failed: {e}");
            std::process::exit(1);
        }
    }

    println!("Press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    agent.run(running);

    println!("Stopping agent...");
    agent.shutdown();
    println!("{}", agent.stats().snapshot().summary());
}

fn cmd_register() {
    let config = load_config();
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let store = open_store(&config);
    let backend = Arc::new(build_backend(&config));
    let caps = Arc::new(NoopCapabilities::new());
    let clock = Arc::new(SystemClock);

    let mut agent = match Agent::new(config, store, backend, caps, clock) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("Error: could not assemble agent: {e}");
            std::process::exit(1);
        }
    };
    match agent.startup() {
        Ok(child_id) => println!("Registered. Child profile: {child_id}"),
        Err(e) => {
            eprintln!("Error: registration failed: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_status() {
    let config = load_config();
    let store = open_store(&config);

    println!("Guardian Agent Status");
    println!("=====================");
    println!();

    match status_report(&store) {
        Ok(report) => {
            println!(
                "Registered: {}",
                if report.registered { "yes" } else { "no" }
            );
            if let Some(child_id) = report.child_id {
                println!("Child profile: {child_id}");
            }
            if let Some(device_id) = report.device_id {
                println!("Device ID: {device_id}");
            }
            println!("Stealth mode: {}", if report.stealth { "on" } else { "off" });
            match report.last_heartbeat_at {
                Some(at) => println!("Last heartbeat: {at}"),
                None => println!("Last heartbeat: never"),
            }
            println!("Queued records: {}", report.queued_records);
        }
        Err(e) => {
            eprintln!("Error reading status: {e}");
            std::process::exit(1);
        }
    }

    let stats_path = config.stats_path();
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!();
                println!("Last session:");
                if let Some(n) = stats.get("records_collected") {
                    println!("  Records collected: {n}");
                }
                if let Some(n) = stats.get("records_uploaded") {
                    println!("  Records uploaded: {n}");
                }
                if let Some(n) = stats.get("alerts_raised") {
                    println!("  Alerts raised: {n}");
                }
                if let Some(n) = stats.get("tamper_events") {
                    println!("  Tamper events: {n}");
                }
            }
        }
    }
}

fn cmd_config(backend_url: Option<String>, token: Option<String>) {
    let mut config = load_config();

    let changed = backend_url.is_some() || token.is_some();
    if let Some(url) = backend_url {
        config.backend_url = url;
    }
    if let Some(token) = token {
        config.api_token = Some(token);
    }

    if changed {
        if let Err(e) = config.save() {
            eprintln!("Error saving config: {e}");
            std::process::exit(1);
        }
        println!("Configuration saved.");
        println!();
    }

    println!("Config file: {:?}", AgentConfig::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
