// ABOUTME: `conduit run` - one chat turn against a project, with interactive confirmation
// ABOUTME: Replays a saved model transcript or asks the configured model; Ctrl-C cancels between actions

use super::output;
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::*;
use conduit_ai::{AnthropicClient, ChatData, ChatOptions, ChatRequest, ModelClient, ScriptedModelClient};
use conduit_cli::Orchestrator;
use conduit_config::OrchestratorConfig;
use conduit_executions::{CancellationHandle, ConfirmationRequest};
use inquire::Confirm;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Args)]
pub struct RunArgs {
    /// Project to act on
    #[arg(short, long)]
    project: String,

    /// Message for the model
    #[arg(short, long)]
    message: Option<String>,

    /// Use this file as the model's reply instead of calling the model
    #[arg(short, long)]
    transcript: Option<PathBuf>,

    /// Execute confirmation-gated actions without asking
    #[arg(long)]
    auto: bool,

    /// Approve every confirmation prompt
    #[arg(short, long)]
    yes: bool,

    /// Include the project's file list as context
    #[arg(long)]
    context: bool,

    /// Print the response as JSON
    #[arg(long)]
    json: bool,
}

fn model_for(args: &RunArgs) -> Result<(Arc<dyn ModelClient>, String)> {
    match &args.transcript {
        Some(path) => {
            let reply = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read transcript {}", path.display()))?;
            let message = args
                .message
                .clone()
                .unwrap_or_else(|| format!("Replay {}", path.display()));
            Ok((Arc::new(ScriptedModelClient::new([reply])), message))
        }
        None => {
            let Some(message) = args.message.clone() else {
                bail!("Pass --message, or --transcript to replay a saved reply");
            };
            Ok((Arc::new(AnthropicClient::from_env()?), message))
        }
    }
}

fn question(confirmation: &ConfirmationRequest) -> String {
    format!(
        "{} {} ({} risk)?",
        "Run".yellow().bold(),
        confirmation.description,
        confirmation.risk_level
    )
}

async fn ask(question: String) -> Result<bool> {
    let confirmed = tokio::task::spawn_blocking(move || {
        Confirm::new(&question).with_default(false).prompt()
    })
    .await??;
    Ok(confirmed)
}

fn show(data: &ChatData, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        output::print_chat(data);
    }
    Ok(())
}

pub async fn handle(args: RunArgs) -> Result<()> {
    let (model, message) = model_for(&args)?;
    let orchestrator = Orchestrator::new(OrchestratorConfig::from_env(), model);

    let cancel = CancellationHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current action");
            on_interrupt.cancel();
        }
    });

    let request = ChatRequest::new(&args.project, message).with_options(ChatOptions {
        include_project_context: args.context,
        auto_execute: args.auto,
    });
    let result = drive(&orchestrator, request, &args, &cancel).await;

    orchestrator.shutdown().await;
    result
}

async fn drive(
    orchestrator: &Orchestrator,
    request: ChatRequest,
    args: &RunArgs,
    cancel: &CancellationHandle,
) -> Result<()> {
    let mut data = orchestrator.chat.process_with_cancel(request, cancel).await?;
    show(&data, args.json)?;

    while let Some(confirmation) = data.confirmation.clone() {
        if cancel.is_cancelled() {
            break;
        }
        let approved = args.yes || ask(question(&confirmation)).await?;

        let approvals: Vec<String> = if approved {
            vec![confirmation.action_id.clone()]
        } else {
            Vec::new()
        };
        data = orchestrator
            .chat
            .confirm(&args.project, &confirmation.batch_token, approvals)
            .await?;
        show(&data, args.json)?;
    }

    let failures = output::failure_count(&data);
    if failures > 0 {
        bail!("{} action(s) failed", failures);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::RiskLevel;

    #[test]
    fn test_question_names_action_and_risk() {
        let request = ConfirmationRequest {
            batch_token: "tok".to_string(),
            action_id: "rm".to_string(),
            description: "Delete old.txt".to_string(),
            risk_level: RiskLevel::High,
        };

        let text = question(&request);
        assert!(text.contains("Delete old.txt"));
        assert!(text.contains("risk)?"));
    }
}
