// ABOUTME: Follow-up suggestions derived from what a chat request planned and executed

use conduit_actions::ExecutionPlan;
use conduit_core::{ActionStatus, ActionType};
use conduit_executions::BatchOutcome;

const MAX_SUGGESTIONS: usize = 3;

/// Suggestions for the user's next message, most relevant first.
pub fn suggest(plan: &ExecutionPlan, outcome: Option<&BatchOutcome>) -> Vec<String> {
    let mut suggestions = Vec::new();

    if plan.is_empty() {
        suggestions.push("Describe a concrete change, e.g. \"create a file src/index.js\"".to_string());
        return suggestions;
    }

    let Some(outcome) = outcome else {
        return suggestions;
    };

    if let Some(request) = &outcome.confirmation {
        suggestions.push(format!("Confirm \"{}\" to continue", request.description));
    }

    let failed: Vec<&str> = outcome.failed().map(|r| r.action_id.as_str()).collect();
    if let [only] = failed.as_slice() {
        if let Some(action) = plan.get(only) {
            suggestions.push(format!("Fix the failure in \"{}\" and try again", action.description));
        }
    } else if !failed.is_empty() {
        suggestions.push(format!("Fix the {} failed actions and try again", failed.len()));
    }

    let completed = |types: &[ActionType]| {
        plan.iter().any(|action| {
            types.contains(&action.action_type)
                && outcome.status_of(&action.id) == Some(ActionStatus::Completed)
        })
    };

    if completed(&[ActionType::TestCreate]) && !completed(&[ActionType::CommandExecute]) {
        suggestions.push("Run the test suite".to_string());
    }
    if completed(&[
        ActionType::FileCreate,
        ActionType::FileUpdate,
        ActionType::FileDelete,
        ActionType::Refactor,
    ]) {
        suggestions.push("Start the dev server to preview changes".to_string());
    }

    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}
