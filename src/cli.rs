use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use framewatch::config::Config;
use framewatch::Supervisor;

#[derive(Parser)]
#[command(name = "framewatch")]
#[command(author, version, about = "port-bound byte-pattern detection daemon")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start all enabled detectors and stream detection events
    Run,

    /// Validate the configuration without binding anything
    Check,

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub async fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run => {
            let config = load_config(&cli)?;
            cmd_run(config).await
        }
        Commands::Check => {
            let config = load_config(&cli)?;
            cmd_check(config)
        }
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

async fn cmd_run(config: Config) -> Result<()> {
    config.validate()?;

    let (mut supervisor, mut events) = Supervisor::new(config.general.event_buffer);

    let mut started = 0usize;
    for (name, detector) in &config.detectors {
        if !detector.enabled {
            info!("detector '{}' is disabled, skipping", name);
            continue;
        }
        supervisor.spawn(name, detector.clone()).await?;
        started += 1;
    }

    if started == 0 {
        bail!("no enabled detectors in configuration");
    }

    info!("{} detector(s) running", started);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                info!(
                    entry_id = %event.entry_id,
                    detected_at = %event.detected_at.to_rfc3339(),
                    event_id = %event.id,
                    "pattern detected"
                );
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    supervisor.shutdown_all().await;
    Ok(())
}

fn cmd_check(config: Config) -> Result<()> {
    config.validate()?;

    let enabled = config.detectors.values().filter(|d| d.enabled).count();
    println!(
        "{} {} detector(s) configured, {} enabled",
        "ok:".green().bold(),
        config.detectors.len(),
        enabled
    );

    let mut names: Vec<_> = config.detectors.keys().collect();
    names.sort();
    for name in names {
        let detector = &config.detectors[name];
        let state = if detector.enabled {
            "enabled".green()
        } else {
            "disabled".yellow()
        };
        println!(
            "  {} [{}] {} port {} pattern_type={}",
            name.bold(),
            state,
            detector.protocol,
            detector.port,
            detector.pattern_type
        );
    }

    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let content =
        toml::to_string_pretty(&config).context("Failed to serialize default configuration")?;

    match output {
        Some(path) => {
            std::fs::write(&path, &content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
        }
        None => print!("{}", content),
    }

    Ok(())
}
