//! # Fleetsim CLI
//!
//! Run the simulator as an API server, or execute a single scenario from
//! the command line and exit.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use fleetsim_engine::{ScenarioLoader, SimulationEngine};
use fleetsim_events::EventBus;
use fleetsim_server::{api, ApiState, AppConfig, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "fleetsim")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the admin API server
    Serve(ServeArgs),
    /// Run one scenario to completion and exit
    Run(RunArgs),
    /// Validate a scenario file
    Validate(ValidateArgs),
    /// List available scenarios
    Scenarios(ScenariosArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "fleetsim.yaml")]
    config: PathBuf,

    /// Override the listen address (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Scenario file name inside the scenario directory
    scenario: String,

    /// Configuration file path
    #[arg(short, long, default_value = "fleetsim.yaml")]
    config: PathBuf,

    /// Scenario directory override
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

#[derive(Args)]
struct ValidateArgs {
    /// Scenario file path
    path: PathBuf,
}

#[derive(Args)]
struct ScenariosArgs {
    /// Scenario directory
    #[arg(short, long, default_value = "scenarios")]
    dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => serve_command(args).await,
        Commands::Run(args) => run_command(args).await,
        Commands::Validate(args) => validate_command(args),
        Commands::Scenarios(args) => scenarios_command(args),
    }
}

async fn serve_command(args: ServeArgs) -> Result<()> {
    init_logging(&args.log_level, args.json_logs)?;

    let mut config = AppConfig::load(&args.config)?;
    if let Some(listen) = args.listen {
        if let Some((host, port)) = listen.rsplit_once(':') {
            config.server.host = host.to_string();
            config.server.port = port.parse()?;
        }
    }

    info!("starting fleetsim");
    info!("  listen: {}", config.listen_addr());
    info!("  database: {}", config.database.url);
    info!("  scenarios: {}", config.scenarios.dir);

    let bus = Arc::new(EventBus::new());
    let state = ApiState {
        engine: Arc::new(SimulationEngine::new(bus)),
        loader: Arc::new(ScenarioLoader::new(&config.scenarios.dir)),
        storage: Arc::new(Storage::connect(&config.database.url).await?),
    };

    let listen_addr = config.listen_addr();
    let server = {
        let state = state.clone();
        tokio::spawn(async move { api::serve(state, &listen_addr).await })
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            state.engine.stop_scenario();
            state.engine.fleet().stop_all().await;
        }
        result = server => {
            warn!("server task ended");
            result??;
        }
    }

    Ok(())
}

async fn run_command(args: RunArgs) -> Result<()> {
    init_logging(&args.log_level, args.json_logs)?;

    let config = AppConfig::load(&args.config)?;
    let dir = args
        .dir
        .unwrap_or_else(|| PathBuf::from(&config.scenarios.dir));
    let loader = ScenarioLoader::new(dir);
    let scenario = loader.load(&args.scenario)?;

    info!(
        name = %scenario.name,
        chargers = scenario.chargers.count,
        duration = scenario.duration,
        "running scenario"
    );

    let engine = Arc::new(SimulationEngine::new(Arc::new(EventBus::new())));
    let run = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_scenario(scenario).await })
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received ctrl-c, cancelling scenario");
            engine.stop_scenario();
        }
        result = run => {
            result??;
            info!("scenario completed");
            return Ok(());
        }
    }

    Ok(())
}

fn validate_command(args: ValidateArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.path)?;
    match ScenarioLoader::load_str(&content) {
        Ok(scenario) => {
            println!("{} is valid", args.path.display());
            println!("  name: {}", scenario.name);
            println!("  chargers: {}", scenario.chargers.count);
            println!("  duration: {}s", scenario.duration);
            println!("  timeline events: {}", scenario.timeline.len());
            Ok(())
        }
        Err(err) => anyhow::bail!("{} is invalid: {err}", args.path.display()),
    }
}

fn scenarios_command(args: ScenariosArgs) -> Result<()> {
    let loader = ScenarioLoader::new(&args.dir);
    let names = loader.list()?;
    if names.is_empty() {
        println!("no scenarios in {}", args.dir.display());
    } else {
        for name in names {
            println!("{name}");
        }
    }
    Ok(())
}

fn init_logging(level: &str, json_logs: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    if json_logs {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    Ok(())
}
