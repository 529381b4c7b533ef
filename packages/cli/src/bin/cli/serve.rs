// ABOUTME: `conduit serve` - run one project's dev server in the foreground
// ABOUTME: Streams dev server output and status events until Ctrl-C, then stops every server

use anyhow::{bail, Result};
use clap::Args;
use colored::*;
use conduit_ai::ScriptedModelClient;
use conduit_cli::Orchestrator;
use conduit_config::OrchestratorConfig;
use conduit_events::EventKind;
use futures::StreamExt;
use std::sync::Arc;

#[derive(Args)]
pub struct ServeArgs {
    /// Project whose dev server to run
    #[arg(short, long)]
    project: String,

    /// Recorded as the user who started the server
    #[arg(long, default_value = "cli")]
    user: String,
}

pub async fn handle(args: ServeArgs) -> Result<()> {
    // No chat turns happen here, so the model is never asked
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_env(),
        Arc::new(ScriptedModelClient::default()),
    );
    let events = orchestrator.events.subscribe(&args.project).into_stream();
    let monitor = orchestrator.start_health_monitor();

    println!("{} {}", "Starting dev server for".bold(), args.project.cyan());
    let started = orchestrator.dev_servers.start(&args.project, &args.user).await;
    if !started.success {
        orchestrator.shutdown().await;
        bail!(
            "Dev server failed to start: {}",
            started.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    if let Some(url) = &started.url {
        println!("{} {}", "Serving at".green().bold(), url);
    }
    println!("{}", "Press Ctrl-C to stop".dimmed());

    tokio::pin!(events);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next() => {
                let Some(event) = event else { break };
                match event.kind {
                    EventKind::TerminalOutput => {
                        let line = event.payload["line"].as_str().unwrap_or_default();
                        if event.payload["stream"] == "stderr" {
                            eprintln!("{}", line.red());
                        } else {
                            println!("{}", line);
                        }
                    }
                    EventKind::Status => {
                        if let Some(status) = event.payload["devServer"]["status"].as_str() {
                            println!("{} {}", "status:".dimmed(), status);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    let stopped = orchestrator.shutdown().await;
    let _ = monitor.await;
    println!("{} {}", "Stopped".yellow().bold(), stopped.join(", "));
    Ok(())
}
