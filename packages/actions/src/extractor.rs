// ABOUTME: Turns free-form model output into an ordered sequence of ActionIntents
// ABOUTME: Structured action markers win; pattern heuristics run only when no marker is present

use crate::context::ConversationContext;
use crate::risk;
use crate::rules::RuleSet;
use conduit_core::{ActionIntent, ActionType, RiskLevel};
use once_cell::sync::Lazy;
use regex::{CaptureMatches, Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Texts larger than this are not scanned at all
pub const MAX_TEXT_BYTES: usize = 1024 * 1024;

/// Confidence multiplier applied when one sentence yields several intents of one type
const AMBIGUITY_PENALTY: f32 = 0.5;

/// Fenced ```action JSON blocks and inline <action ...>body</action> tags, in document order
static MARKER: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(r"(?s)```action[ \t]*\r?\n(?P<json>.*?)```|<action\b(?P<attrs>[^>]*?)(?:/>|>(?P<body>.*?)</action>)")
});

static ATTRIBUTE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r#"(?P<key>[A-Za-z][\w-]*)\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#));

static FENCE: Lazy<Option<Regex>> = Lazy::new(|| compile(r"(?s)```(?P<lang>[^\n`]*)\n(?P<body>.*?)```"));

static RUN_TRIGGER: Lazy<Option<Regex>> = Lazy::new(|| compile(r"(?i)\b(?:run|execute)\b"));

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Failed to compile extraction pattern: {}", e);
            None
        }
    }
}

/// Rule-driven action extractor.
#[derive(Debug, Clone, Default)]
pub struct ActionExtractor {
    rules: RuleSet,
}

impl ActionExtractor {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Lazily extract intents from `text`.
    ///
    /// The returned iterator is finite and single-use. Calling `extract` again
    /// on the same text and context yields an equal sequence.
    pub fn extract<'a>(&'a self, text: &'a str, context: &'a ConversationContext) -> Extraction<'a> {
        let source = if text.len() > MAX_TEXT_BYTES {
            warn!(
                "Skipping extraction for {}: text is {} bytes (max {})",
                context.project_id,
                text.len(),
                MAX_TEXT_BYTES
            );
            Source::Empty
        } else {
            match MARKER.as_ref() {
                Some(marker) if marker.is_match(text) => Source::Markers(marker.captures_iter(text)),
                _ => Source::Segments(segments(text)),
            }
        };

        Extraction {
            rules: &self.rules,
            context,
            source,
            pending: VecDeque::new(),
            seen: HashSet::new(),
            emitted: 0,
        }
    }

    /// Eagerly collect [`extract`](Self::extract).
    pub fn extract_all(&self, text: &str, context: &ConversationContext) -> Vec<ActionIntent> {
        self.extract(text, context).collect()
    }
}

enum Source<'a> {
    Markers(CaptureMatches<'static, 'a>),
    Segments(VecDeque<Segment<'a>>),
    Empty,
}

#[derive(Debug, Clone, Copy)]
enum Segment<'a> {
    Prose(&'a str),
    Code { lang: &'a str, body: &'a str },
}

/// Iterator returned by [`ActionExtractor::extract`]
pub struct Extraction<'a> {
    rules: &'a RuleSet,
    context: &'a ConversationContext,
    source: Source<'a>,
    pending: VecDeque<ActionIntent>,
    seen: HashSet<(ActionType, String)>,
    emitted: usize,
}

impl Iterator for Extraction<'_> {
    type Item = ActionIntent;

    fn next(&mut self) -> Option<ActionIntent> {
        loop {
            if let Some(intent) = self.pending.pop_front() {
                return Some(intent);
            }

            match &mut self.source {
                Source::Markers(captures) => {
                    let caps = captures.next()?;
                    self.process_marker(&caps);
                }
                Source::Segments(segments) => match segments.pop_front()? {
                    Segment::Prose(prose) => self.process_prose(prose),
                    // Blocks not claimed by the preceding prose carry no action
                    Segment::Code { .. } => {}
                },
                Source::Empty => return None,
            }
        }
    }
}

impl Extraction<'_> {
    fn process_marker(&mut self, caps: &Captures<'_>) {
        let markers = if let Some(json) = caps.name("json") {
            parse_json_marker(json.as_str())
        } else {
            let attrs = caps.name("attrs").map_or("", |m| m.as_str());
            let body = caps.name("body").map(|m| m.as_str());
            vec![marker_from_tag(attrs, body)]
        };

        for marker in markers {
            let Some(intent) = marker.into_intent() else {
                continue;
            };
            self.emit(intent);
        }
    }

    fn process_prose(&mut self, prose: &str) {
        let rules = self.rules;
        let mut produced = Vec::new();
        let mut trailing_run = false;

        for sentence in split_sentences(prose) {
            let mut found = Vec::new();
            for rule in rules.rules() {
                for hit in rule.matches(sentence) {
                    found.push((hit.start, rule, hit.params));
                }
            }
            // Stable: rule order breaks ties at the same offset
            found.sort_by_key(|(start, _, _)| *start);

            let mut per_type: HashMap<ActionType, usize> = HashMap::new();
            for (_, rule, _) in &found {
                *per_type.entry(rule.action_type).or_default() += 1;
            }

            trailing_run = found.is_empty()
                && RUN_TRIGGER.as_ref().is_some_and(|re| re.is_match(sentence));

            for (_, rule, params) in found {
                let mut action_type = rule.action_type;
                let path = params.iter().find(|(k, _)| *k == "path").map(|(_, v)| v.as_str());
                if action_type == ActionType::FileCreate
                    && path.is_some_and(|p| self.context.knows_file(p))
                {
                    action_type = ActionType::FileUpdate;
                }

                let mut intent = ActionIntent::new(String::new(), action_type, String::new())
                    .with_risk(rule.risk)
                    .with_confidence(rule.confidence);
                for (key, value) in params {
                    intent = intent.with_param(key, value);
                }

                if per_type.get(&rule.action_type).copied().unwrap_or(0) > 1 {
                    debug!(
                        "Ambiguous {} match in sentence for {}: {:?}",
                        rule.action_type, self.context.project_id, sentence
                    );
                    intent.confidence *= AMBIGUITY_PENALTY;
                    intent.risk_level = intent.risk_level.max(RiskLevel::Medium);
                }

                if self.is_duplicate(&intent) {
                    continue;
                }
                produced.push(intent);
            }
        }

        if let Source::Segments(segments) = &mut self.source {
            if let Some(Segment::Code { lang, body }) = segments.front().copied() {
                if let Some(target) = produced
                    .iter_mut()
                    .rev()
                    .find(|i| takes_content(i.action_type) && i.content().is_none())
                {
                    target.parameters.insert("content".to_string(), Value::String(body.to_string()));
                    segments.pop_front();
                } else if trailing_run && is_shell_language(lang) {
                    segments.pop_front();
                    for command in shell_lines(body) {
                        let intent = ActionIntent::new(String::new(), ActionType::CommandExecute, String::new())
                            .with_param("command", command)
                            .with_confidence(0.8);
                        if !self.is_duplicate(&intent) {
                            produced.push(intent);
                        }
                    }
                }
            }
        }

        for intent in produced {
            self.emit(intent);
        }
    }

    /// Heuristic intents are deduplicated by type and target.
    fn is_duplicate(&mut self, intent: &ActionIntent) -> bool {
        let target = intent
            .path()
            .or_else(|| intent.command())
            .unwrap_or_default()
            .trim_start_matches("./")
            .to_string();
        !self.seen.insert((intent.action_type, target))
    }

    /// Assign id, description, rollback and risk, then queue.
    fn emit(&mut self, mut intent: ActionIntent) {
        self.emitted += 1;
        if intent.id.trim().is_empty() {
            intent.id = format!("action-{}", self.emitted);
        }
        if intent.description.trim().is_empty() {
            intent.description = describe(&intent);
        }
        if intent.rollback_plan.is_none() {
            intent.rollback_plan = default_rollback(intent.action_type).map(str::to_string);
        }
        intent.risk_level = risk::classify(&intent);
        intent.requires_confirmation = intent.requires_confirmation
            || intent.risk_level >= self.context.confirm_threshold;

        debug!(
            "Extracted {} ({}) for {} with risk {}",
            intent.id, intent.action_type, self.context.project_id, intent.risk_level
        );
        self.pending.push_back(intent);
    }
}

fn takes_content(action_type: ActionType) -> bool {
    matches!(
        action_type,
        ActionType::FileCreate | ActionType::FileUpdate | ActionType::TestCreate | ActionType::Refactor
    )
}

/// Rollback recipe applied when none was declared
pub fn default_rollback(action_type: ActionType) -> Option<&'static str> {
    match action_type {
        ActionType::FileCreate | ActionType::TestCreate => Some("delete"),
        ActionType::FileUpdate | ActionType::Refactor | ActionType::FileDelete => Some("restore"),
        ActionType::CommandExecute | ActionType::Debug => None,
    }
}

fn describe(intent: &ActionIntent) -> String {
    let target = intent.path().or_else(|| intent.command()).unwrap_or("project");
    match intent.action_type {
        ActionType::FileCreate => format!("Create {}", target),
        ActionType::FileUpdate => format!("Update {}", target),
        ActionType::FileDelete => format!("Delete {}", target),
        ActionType::CommandExecute => format!("Run `{}`", target),
        ActionType::Refactor => format!("Refactor {}", target),
        ActionType::TestCreate => format!("Create tests in {}", target),
        ActionType::Debug => format!("Debug {}", target),
    }
}

fn segments(text: &str) -> VecDeque<Segment<'_>> {
    let mut segments = VecDeque::new();
    let mut cursor = 0;

    if let Some(fence) = FENCE.as_ref() {
        for caps in fence.captures_iter(text) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.name("body")) else {
                continue;
            };
            if whole.start() > cursor {
                segments.push_back(Segment::Prose(&text[cursor..whole.start()]));
            }
            segments.push_back(Segment::Code {
                lang: caps.name("lang").map_or("", |m| m.as_str().trim()),
                body: body.as_str(),
            });
            cursor = whole.end();
        }
    }
    if cursor < text.len() {
        segments.push_back(Segment::Prose(&text[cursor..]));
    }
    segments
}

/// Split prose on newlines and sentence punctuation, never inside backticks.
fn split_sentences(prose: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut in_code = false;
    let mut chars = prose.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '`' => {
                in_code = !in_code;
                false
            }
            '\n' => {
                in_code = false;
                true
            }
            '.' | '!' | '?' if !in_code => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            sentences.push(&prose[start..i]);
            start = i + c.len_utf8();
        }
    }
    sentences.push(&prose[start..]);

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_shell_language(lang: &str) -> bool {
    matches!(
        lang.to_ascii_lowercase().as_str(),
        "" | "sh" | "bash" | "shell" | "zsh" | "console" | "terminal"
    )
}

fn shell_lines(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .map(|line| line.strip_prefix("$ ").unwrap_or(line).trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// One action as declared by a structured marker
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkerAction {
    id: Option<String>,
    #[serde(rename = "type", alias = "actionType")]
    action_type: String,
    description: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
    path: Option<String>,
    command: Option<String>,
    content: Option<String>,
    #[serde(default, alias = "dependsOn")]
    dependencies: Vec<String>,
    #[serde(alias = "risk")]
    risk_level: Option<String>,
    #[serde(default)]
    requires_confirmation: bool,
    #[serde(alias = "rollback")]
    rollback_plan: Option<String>,
    confidence: Option<f32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MarkerBody {
    Many(Vec<MarkerAction>),
    One(Box<MarkerAction>),
}

impl MarkerAction {
    fn into_intent(self) -> Option<ActionIntent> {
        let action_type = match self.action_type.parse::<ActionType>() {
            Ok(action_type) => action_type,
            Err(e) => {
                warn!("Ignoring action marker: {}", e);
                return None;
            }
        };

        let mut intent = ActionIntent::new(
            self.id.unwrap_or_default(),
            action_type,
            self.description.unwrap_or_default(),
        )
        .with_confidence(self.confidence.unwrap_or(1.0))
        .with_confirmation(self.requires_confirmation);
        intent.parameters = self.parameters;

        for (key, value) in [("path", self.path), ("command", self.command), ("content", self.content)] {
            if let Some(value) = value {
                intent.parameters.insert(key.to_string(), Value::String(value));
            }
        }
        intent.dependencies = self
            .dependencies
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if let Some(risk) = self.risk_level.as_deref().and_then(parse_risk) {
            intent.risk_level = risk;
        }
        intent.rollback_plan = self.rollback_plan.filter(|p| !p.trim().is_empty());

        Some(intent)
    }
}

fn parse_risk(value: &str) -> Option<RiskLevel> {
    match value.trim().to_ascii_lowercase().as_str() {
        "low" => Some(RiskLevel::Low),
        "medium" => Some(RiskLevel::Medium),
        "high" => Some(RiskLevel::High),
        _ => None,
    }
}

fn parse_json_marker(json: &str) -> Vec<MarkerAction> {
    match serde_json::from_str::<MarkerBody>(json.trim()) {
        Ok(MarkerBody::Many(actions)) => actions,
        Ok(MarkerBody::One(action)) => vec![*action],
        Err(e) => {
            warn!("Ignoring malformed action block: {}", e);
            Vec::new()
        }
    }
}

fn marker_from_tag(attrs: &str, body: Option<&str>) -> MarkerAction {
    let mut marker = MarkerAction::default();

    if let Some(attribute) = ATTRIBUTE.as_ref() {
        for caps in attribute.captures_iter(attrs) {
            let Some(key) = caps.name("key") else {
                continue;
            };
            let value = caps
                .name("dq")
                .or_else(|| caps.name("sq"))
                .map_or(String::new(), |m| m.as_str().to_string());

            match key.as_str() {
                "id" => marker.id = Some(value),
                "type" => marker.action_type = value,
                "description" => marker.description = Some(value),
                "path" => marker.path = Some(value),
                "command" => marker.command = Some(value),
                "depends" | "dependencies" | "depends-on" => {
                    marker.dependencies = value.split(',').map(str::to_string).collect();
                }
                "risk" | "risk-level" => marker.risk_level = Some(value),
                "confirm" | "requires-confirmation" => {
                    marker.requires_confirmation = value.eq_ignore_ascii_case("true");
                }
                "rollback" => marker.rollback_plan = Some(value),
                other => {
                    marker
                        .parameters
                        .insert(other.to_string(), Value::String(value));
                }
            }
        }
    }

    if let Some(body) = body.map(strip_fence).filter(|b| !b.trim().is_empty()) {
        if marker.action_type.parse::<ActionType>() == Ok(ActionType::CommandExecute) {
            if marker.command.is_none() {
                marker.command = Some(body.trim().to_string());
            }
        } else {
            marker.content = Some(body);
        }
    }
    marker
}

/// Tag bodies may wrap their content in a fenced code block.
fn strip_fence(body: &str) -> String {
    let body = body.strip_prefix('\n').unwrap_or(body);
    let trimmed = body.trim();
    if let Some(inner) = trimmed.strip_prefix("```").and_then(|s| s.strip_suffix("```")) {
        // Drop the language line
        return match inner.split_once('\n') {
            Some((_, code)) => code.to_string(),
            None => String::new(),
        };
    }
    body.to_string()
}
