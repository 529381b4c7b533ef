// ABOUTME: `conduit extract` - dry run of extraction and validation over a saved reply

use super::output;
use anyhow::{Context, Result};
use clap::Args;
use conduit_actions::{ActionExtractor, ActionValidator, ConversationContext};
use conduit_core::RiskLevel;
use std::io::Read;
use std::path::PathBuf;

#[derive(Args)]
pub struct ExtractArgs {
    /// Reply to read; stdin when omitted
    file: Option<PathBuf>,

    /// Files the project already has (turns "create" of them into "update")
    #[arg(long = "known", value_delimiter = ',')]
    known_files: Vec<String>,

    /// Lowest risk that needs confirmation: low, medium or high
    #[arg(long, default_value = "medium")]
    confirm_at: String,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
}

fn read_reply(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

fn parse_threshold(value: &str) -> Result<RiskLevel> {
    match value.to_ascii_lowercase().as_str() {
        "low" => Ok(RiskLevel::Low),
        "medium" => Ok(RiskLevel::Medium),
        "high" => Ok(RiskLevel::High),
        other => anyhow::bail!("Unknown risk level '{}'", other),
    }
}

pub async fn handle(args: ExtractArgs) -> Result<()> {
    let text = read_reply(args.file.as_ref())?;
    let context = ConversationContext::new("cli")
        .with_known_files(args.known_files.iter().map(|f| f.trim().to_string()))
        .with_confirm_threshold(parse_threshold(&args.confirm_at)?);

    let intents = ActionExtractor::default().extract_all(&text, &context);
    let plan = ActionValidator::new().validate(intents, &context)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(plan.actions())?);
    } else {
        output::print_plan(plan.actions());
    }
    Ok(())
}
