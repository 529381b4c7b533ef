// ABOUTME: Validates extracted intents and orders them into an ExecutionPlan
// ABOUTME: Pure: checks shape and references, adds implicit path ordering, detects cycles, settles risk

use crate::context::ConversationContext;
use crate::error::{ValidationError, ValidationResult};
use crate::plan::ExecutionPlan;
use crate::risk;
use conduit_core::{ActionIntent, ActionType, RiskLevel};
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct ActionValidator;

impl ActionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Build an execution plan, or reject the whole batch.
    pub fn validate(
        &self,
        intents: Vec<ActionIntent>,
        context: &ConversationContext,
    ) -> ValidationResult<ExecutionPlan> {
        check_shape(&intents)?;

        let index: HashMap<&str, usize> = intents
            .iter()
            .enumerate()
            .map(|(i, intent)| (intent.id.as_str(), i))
            .collect();

        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (i, intent) in intents.iter().enumerate() {
            for dependency in &intent.dependencies {
                let Some(&from) = index.get(dependency.as_str()) else {
                    return Err(ValidationError::UnknownDependency {
                        action_id: intent.id.clone(),
                        dependency: dependency.clone(),
                    });
                };
                edges.push((from, i));
            }
        }
        edges.extend(implicit_edges(&intents));

        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..intents.len()).map(|i| graph.add_node(i)).collect();
        for &(from, to) in &edges {
            graph.update_edge(nodes[from], nodes[to], ());
        }

        if is_cyclic_directed(&graph) {
            let cycle = find_cycle(&graph, &intents);
            warn!(
                "Rejecting plan for {}: dependency cycle {:?}",
                context.project_id, cycle
            );
            return Err(ValidationError::CycleDetected { cycle });
        }

        let order = stable_topological_order(&graph);
        let id_edges: Vec<(String, String)> = edges
            .iter()
            .map(|&(from, to)| (intents[from].id.clone(), intents[to].id.clone()))
            .collect();

        let mut slots: Vec<Option<ActionIntent>> = intents.into_iter().map(Some).collect();
        let ordered: Vec<ActionIntent> = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .map(|intent| settle_risk(intent, context))
            .collect();

        debug!(
            "Validated plan for {} with {} actions and {} edges",
            context.project_id,
            ordered.len(),
            id_edges.len()
        );
        Ok(ExecutionPlan::from_parts(ordered, &id_edges))
    }
}

fn check_shape(intents: &[ActionIntent]) -> ValidationResult<()> {
    let mut seen = HashSet::new();

    for intent in intents {
        if intent.id.trim().is_empty() {
            return Err(ValidationError::Malformed {
                action_id: intent.id.clone(),
                reason: "action id is empty".to_string(),
            });
        }
        if !seen.insert(intent.id.as_str()) {
            return Err(ValidationError::DuplicateId(intent.id.clone()));
        }
        if intent.dependencies.contains(&intent.id) {
            return Err(ValidationError::CycleDetected {
                cycle: vec![intent.id.clone(), intent.id.clone()],
            });
        }

        let missing = match intent.action_type {
            ActionType::CommandExecute if intent.command().is_none() => Some("command"),
            ActionType::CommandExecute => None,
            // Debug runs a command or inspects a file
            ActionType::Debug if intent.command().is_none() && intent.path().is_none() => {
                Some("path or command")
            }
            ActionType::Debug => None,
            _ if intent.path().is_none() => Some("path"),
            _ => None,
        };
        if let Some(missing) = missing {
            return Err(ValidationError::Malformed {
                action_id: intent.id.clone(),
                reason: format!("{} action has no {}", intent.action_type, missing),
            });
        }
    }
    Ok(())
}

fn normalize(path: &str) -> &str {
    path.trim().trim_start_matches("./")
}

/// Whether `path` appears as a whole word of `command`
fn mentions(command: &str, path: &str) -> bool {
    !path.is_empty()
        && command
            .split(|c: char| {
                c.is_whitespace()
                    || matches!(c, '"' | '\'' | '`' | ';' | '|' | '&' | '(' | ')' | '<' | '>' | '=' | ',')
            })
            .any(|word| normalize(word) == path)
}

/// Ordering the text implies without declaring it.
///
/// A create of P comes before every later action on P, and before every
/// later command that mentions P.
fn implicit_edges(intents: &[ActionIntent]) -> Vec<(usize, usize)> {
    let mut edges = Vec::new();

    for (i, creator) in intents.iter().enumerate() {
        if !matches!(
            creator.action_type,
            ActionType::FileCreate | ActionType::TestCreate
        ) {
            continue;
        }
        let Some(created) = creator.path().map(normalize) else {
            continue;
        };

        for (j, later) in intents.iter().enumerate().skip(i + 1) {
            let follows = match later.action_type {
                ActionType::CommandExecute => later.command().is_some_and(|c| mentions(c, created)),
                _ => later.path().map(normalize) == Some(created),
            };
            if follows {
                edges.push((i, j));
            }
        }
    }
    edges
}

/// Kahn's algorithm, always releasing the earliest ready action first so the
/// textual order survives wherever dependencies allow.
fn stable_topological_order(graph: &DiGraph<usize, ()>) -> Vec<usize> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();

    let mut ready: BinaryHeap<Reverse<(usize, NodeIndex)>> = graph
        .node_indices()
        .filter(|n| in_degree.get(n).copied() == Some(0))
        .map(|n| Reverse((graph[n], n)))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse((position, node))) = ready.pop() {
        order.push(position);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(degree) = in_degree.get_mut(&next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((graph[next], next)));
                }
            }
        }
    }
    order
}

fn find_cycle(graph: &DiGraph<usize, ()>, intents: &[ActionIntent]) -> Vec<String> {
    let mut components: Vec<Vec<usize>> = tarjan_scc(graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .map(|component| {
            let mut positions: Vec<usize> = component.into_iter().map(|n| graph[n]).collect();
            positions.sort_unstable();
            positions
        })
        .collect();
    components.sort();

    let Some(component) = components.into_iter().next() else {
        return Vec::new();
    };
    let mut cycle: Vec<String> = component.iter().map(|&i| intents[i].id.clone()).collect();
    if let Some(first) = cycle.first().cloned() {
        cycle.push(first);
    }
    cycle
}

/// Effective risk; high risk or anything at the context's threshold needs confirmation.
fn settle_risk(mut intent: ActionIntent, context: &ConversationContext) -> ActionIntent {
    intent.risk_level = risk::classify(&intent);
    if intent.risk_level == RiskLevel::High || intent.risk_level >= context.confirm_threshold {
        intent.requires_confirmation = true;
    }
    intent
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> ConversationContext {
        ConversationContext::new("proj")
    }

    fn create(id: &str, path: &str) -> ActionIntent {
        ActionIntent::new(id, ActionType::FileCreate, "create").with_param("path", path)
    }

    fn run(id: &str, command: &str) -> ActionIntent {
        ActionIntent::new(id, ActionType::CommandExecute, "run").with_param("command", command)
    }

    #[test]
    fn test_implicit_edges_reorder_command_after_create() {
        // The command is listed first but mentions a file created later
        let plan = ActionValidator::new()
            .validate(
                vec![run("r", "node ./app.js"), create("c", "app.js")],
                &ctx(),
            )
            .unwrap();
        // Only commands after the create are ordered; textual order wins here
        let ids: Vec<_> = plan.ids().collect();
        assert_eq!(ids, vec!["r", "c"]);

        let plan = ActionValidator::new()
            .validate(
                vec![create("c", "./app.js"), run("r", "node app.js")],
                &ctx(),
            )
            .unwrap();
        assert_eq!(plan.dependencies_of("r"), vec!["c"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = ActionValidator::new()
            .validate(vec![run("a", "ls").depends_on("a")], &ctx())
            .unwrap_err();
        assert_eq!(err.kind(), "cycle_detected");
    }

    #[test]
    fn test_missing_command_is_malformed() {
        let bare = ActionIntent::new("x", ActionType::CommandExecute, "nothing");
        let err = ActionValidator::new().validate(vec![bare], &ctx()).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed { .. }));
    }

    #[test]
    fn test_confirmation_threshold_comes_from_context() {
        let lenient = ctx().with_confirm_threshold(RiskLevel::High);
        let delete = ActionIntent::new("d", ActionType::FileDelete, "rm").with_param("path", "a.js");

        let plan = ActionValidator::new().validate(vec![delete.clone()], &lenient).unwrap();
        assert!(!plan.actions()[0].requires_confirmation);

        let plan = ActionValidator::new().validate(vec![delete], &ctx()).unwrap();
        assert!(plan.actions()[0].requires_confirmation);
        assert_eq!(plan.actions()[0].risk_level, RiskLevel::Medium);
    }
}
