use clap::{Parser, Subcommand};
use colored::*;
use std::process;

mod cli;

use cli::extract::ExtractArgs;
use cli::run::RunArgs;
use cli::serve::ServeArgs;

#[derive(Parser)]
#[command(name = "conduit")]
#[command(about = "Conduit - turn model replies into safe, ordered project changes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message (or replay a transcript) and execute the resulting actions
    Run(RunArgs),
    /// Show the plan a reply would produce without executing it
    Extract(ExtractArgs),
    /// Start a project's dev server and stream its output until Ctrl-C
    Serve(ServeArgs),
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => cli::run::handle(args).await,
        Commands::Extract(args) => cli::extract::handle(args).await,
        Commands::Serve(args) => cli::serve::handle(args).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}
