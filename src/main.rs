//! route-proxy binary.
//!
//! ```text
//! route-proxy [--config <path>] [--bind <addr>] [--no-watch]
//! route-proxy check [--config <path>]
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use route_proxy::lifecycle::startup::{self, StartupOptions, DEFAULT_CONFIG_PATH};
use route_proxy::routing::RouteTable;

#[derive(Parser)]
#[command(name = "route-proxy", version)]
#[command(about = "Development reverse proxy routing path prefixes to local upstreams", long_about = None)]
struct Cli {
    /// Config file (TOML). Defaults to ./route-proxy.toml when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,

    /// Do not reload routes when the config file changes
    #[arg(long)]
    no_watch: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the config file and print the route table
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check) => {
            let path = cli
                .config
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
            let config = match startup::check(&path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{}: {e}", path.display());
                    std::process::exit(1);
                }
            };
            let table = RouteTable::load(&config.routes)?;
            println!("{}: ok, {} route(s)", path.display(), table.len());
            for route in table.routes() {
                let mode = if route.is_websocket() { "ws" } else { "http" };
                let rewrite = if route.rewrite().is_some() { " (rewrite)" } else { "" };
                println!("  {:<20} {:<4} -> {}{}", route.prefix(), mode, route.authority(), rewrite);
            }
        }
        None => {
            startup::run(StartupOptions {
                config_path: cli.config,
                bind: cli.bind,
                watch: !cli.no_watch,
            })
            .await?;
        }
    }

    Ok(())
}
