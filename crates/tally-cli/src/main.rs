use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tally_cli::commands::{add, export, hide, import, records, start, stats, status, sync};
use tally_cli::{Cli, Commands, Config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so JSON and JSONL output stay clean.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config =
        Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let now = tally_core::now_secs();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Start { description } => {
            start::start(&mut out, &config, &description.join(" "), now)?;
        }
        Commands::Stop => {
            start::stop(&mut out, &config, now)?;
        }
        Commands::Add(args) => {
            add::run(&mut out, &config, args, now)?;
        }
        Commands::Hide { key } => {
            hide::run(&mut out, &config, key, true, now)?;
        }
        Commands::Unhide { key } => {
            hide::run(&mut out, &config, key, false, now)?;
        }
        Commands::Records(args) => records::run(&mut out, &config, args, now)?,
        Commands::Stats(args) => stats::run(&mut out, &config, args, now)?,
        Commands::Status => status::run(&mut out, &config, now)?,
        Commands::Sync => {
            sync::run(&mut out, &config)?;
        }
        Commands::Export => {
            export::run(&mut out, &config)?;
        }
        Commands::Import => {
            import::run(io::stdin().lock(), &mut out, &config)?;
        }
    }
    out.flush()?;
    Ok(())
}
