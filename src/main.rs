mod app;
mod cli;
mod config;
mod simulate;

use app::QuorumApp;
use clap::Parser;
use cli::{Cli, Commands};
use config::AppConfig;
use quorum_consensus::{DefaultProposerSelector, ProposerSelector};
use quorum_crypto::KeyPair;
use quorum_types::{Height, Round, Stage};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Keygen) = cli.command {
        return keygen();
    }

    let config = AppConfig::load()?;
    init_tracing(&config.logging.level, &config.logging.format);
    info!("Configuration loaded");

    match cli.command {
        Some(Commands::Run) | None => run_node(config).await?,
        Some(Commands::Info) => show_info(config)?,
        Some(Commands::Proposer { height, round }) => show_proposer(config, height, round)?,
        Some(Commands::Simulate {
            validators,
            heights,
            threshold,
            timeout,
        }) => simulate(validators, heights, threshold, timeout).await?,
        Some(Commands::Keygen) => keygen()?,
    }

    Ok(())
}

async fn run_node(config: AppConfig) -> anyhow::Result<()> {
    let app = QuorumApp::new(config)?;
    info!("Starting validator {}", app.address());
    app.run().await?;
    Ok(())
}

fn keygen() -> anyhow::Result<()> {
    let key = KeyPair::generate();
    println!("private_key = \"{}\"", hex::encode(key.private_key()));
    println!("public_key  = \"{}\"", hex::encode(key.public_key()));
    println!("address     = \"{}\"", key.address());
    Ok(())
}

fn show_info(config: AppConfig) -> anyhow::Result<()> {
    let app = QuorumApp::new(config.clone())?;
    let thresholds = app.thresholds()?;

    println!("\nNode Information");
    println!("─────────────────────────────────────");
    println!("  Address:     {}", app.address());
    println!("  Public Key:  {}", hex::encode(app.public_key()));
    println!("  Listen:      {}", config.node.listen_addr);
    println!("  Network:     {}", app.policy().network_id);
    println!("  Storage:     {:?}", config.storage.backend);

    println!("\nValidators");
    println!("─────────────────────────────────────");
    for validator in config.network.validators.iter() {
        let marker = if validator.address == app.address().as_str() { "*" } else { " " };
        let endpoint = if validator.endpoint.is_empty() { "-" } else { validator.endpoint.as_str() };
        println!("  {} {} {}", marker, validator.address, endpoint);
    }

    println!("\nThresholds");
    println!("─────────────────────────────────────");
    for stage in [Stage::Init, Stage::Sign, Stage::Accept] {
        let pair = thresholds.get(stage);
        println!(
            "  {:<7} {}/{} ({}%)",
            stage.to_string(),
            pair.threshold,
            pair.total,
            app.policy().stage_percent(stage)
        );
    }
    println!("  Round timeout: {:?}", app.policy().round_timeout);

    Ok(())
}

fn show_proposer(config: AppConfig, height: u64, round: u64) -> anyhow::Result<()> {
    config.validate()?;
    let selector = DefaultProposerSelector::new(config.validators())?;
    let proposer = selector.select(Height(height), Round(round));
    println!("{}", proposer);
    Ok(())
}

async fn simulate(validators: usize, heights: u64, threshold: u32, timeout: u64) -> anyhow::Result<()> {
    let report =
        simulate::run_simulation(validators, heights, threshold, Duration::from_secs(timeout)).await?;

    println!("\nSimulation");
    println!("─────────────────────────────────────");
    println!("  Validators:  {}", validators);
    println!("  Elapsed:     {:?}", report.elapsed);
    println!("  Consistent:  {}", report.consistent());

    for (address, chain) in report.chains.iter() {
        println!("\n  {} ({} blocks)", address, chain.len());
        for block in chain.iter() {
            println!("    {}", block);
        }
    }

    if !report.consistent() {
        anyhow::bail!("validators finalized diverging chains");
    }
    Ok(())
}

fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
