use anyhow::Context;
use aptsync::cli::sync::{self, SyncOptions};
use aptsync::constants::DEFAULT_CONFIG_PATH;
use aptsync::core::config::detect_default_arch;
use aptsync::MirrorConfig;
use clap::Parser;
use colored::Colorize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "aptsync")]
#[command(about = "Mirror apt repositories into a local tree", long_about = None)]
#[command(version)]
struct Cli {
    /// Mirror list to read
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Resolve and report, but download, promote and delete nothing
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,

    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let default_arch = detect_default_arch();
    let config = MirrorConfig::load(&cli.config, &default_arch)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if cli.dump_config {
        let json = serde_json::to_string_pretty(&config).context("serializing configuration")?;
        println!("{}", json);
        return Ok(());
    }

    let options = SyncOptions {
        dry_run: cli.dry_run,
        show_progress: std::io::stderr().is_terminal() && !cli.verbose,
    };
    sync::execute(&config, options).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let start = Instant::now();
    let dump_only = cli.dump_config;

    match run(cli).await {
        Ok(()) => {
            if !dump_only {
                println!(
                    "\n{} Completed in {:.2}s",
                    "✓".green().bold(),
                    start.elapsed().as_secs_f64()
                );
            }
        }
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    }
}
