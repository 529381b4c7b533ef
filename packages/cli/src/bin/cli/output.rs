// ABOUTME: Terminal rendering of plans and chat results

use colored::*;
use conduit_ai::ChatData;
use conduit_core::{ActionIntent, ActionStatus, ExecutionResult, RiskLevel};

fn risk_label(risk: RiskLevel) -> ColoredString {
    match risk {
        RiskLevel::Low => "low".green(),
        RiskLevel::Medium => "medium".yellow(),
        RiskLevel::High => "high".red().bold(),
    }
}

fn status_label(status: ActionStatus) -> ColoredString {
    match status {
        ActionStatus::Completed => "completed".green(),
        ActionStatus::Failed => "failed".red().bold(),
        ActionStatus::RolledBack => "rolled back".red(),
        ActionStatus::Skipped => "skipped".dimmed(),
        ActionStatus::AwaitingConfirmation => "awaiting confirmation".yellow().bold(),
        ActionStatus::Pending | ActionStatus::Executing => status.as_str().normal(),
    }
}

pub fn print_plan(actions: &[ActionIntent]) {
    if actions.is_empty() {
        println!("{}", "No actions found.".dimmed());
        return;
    }

    println!("{}", "Planned actions:".bold());
    for (index, action) in actions.iter().enumerate() {
        let target = action.path().or(action.command()).unwrap_or("-");
        let confirm = if action.requires_confirmation {
            " [confirm]".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  {}. {} {} {} ({}){}",
            index + 1,
            action.id.cyan(),
            action.action_type.as_str().bold(),
            target,
            risk_label(action.risk_level),
            confirm
        );
        if !action.dependencies.is_empty() {
            let deps: Vec<&str> = action.dependencies.iter().map(String::as_str).collect();
            println!("     after {}", deps.join(", ").dimmed());
        }
    }
}

fn print_result(result: &ExecutionResult) {
    println!(
        "  {} {} {}",
        "•".dimmed(),
        result.action_id.cyan(),
        status_label(result.status)
    );
    if let Some(error) = &result.error {
        println!("      {} {}", error.kind.red(), error.message);
    } else if let Some(output) = result.output.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
        for line in output.lines().take(10) {
            println!("      {}", line.dimmed());
        }
    }
}

pub fn print_chat(data: &ChatData) {
    print_plan(&data.response.metadata.actions);

    if !data.results.is_empty() {
        println!();
        println!("{}", "Results:".bold());
        data.results.iter().for_each(print_result);
    }

    for rollback in &data.rollbacks {
        match &rollback.error {
            None => println!("  {} rolled back {}", "↺".yellow(), rollback.action_id),
            Some(error) => println!(
                "  {} rollback of {} failed: {}",
                "✗".red(),
                rollback.action_id,
                error
            ),
        }
    }

    if !data.response.metadata.suggestions.is_empty() {
        println!();
        for suggestion in &data.response.metadata.suggestions {
            println!("{} {}", "→".cyan(), suggestion);
        }
    }
}

/// Actions that ended badly
pub fn failure_count(data: &ChatData) -> usize {
    data.results
        .iter()
        .filter(|r| matches!(r.status, ActionStatus::Failed | ActionStatus::RolledBack))
        .count()
}
