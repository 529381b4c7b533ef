// ABOUTME: Declarative rule table mapping natural language patterns to action templates
// ABOUTME: Each rule carries the action type, base risk and extraction confidence it produces

use conduit_core::{ActionType, RiskLevel};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Path-like token: at least one dot-separated extension, optionally quoted
const PATH: &str = r#"[`'"]?(?P<path>[\w][\w./-]*\.\w+)[`'"]?"#;

/// One row of the extraction table.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    pub name: &'static str,
    pub action_type: ActionType,
    /// When set, the sentence must contain this and `pattern` is only
    /// searched after it
    pub trigger: Option<Regex>,
    /// Captures `path` and/or `command`; matched repeatedly within a sentence
    pub pattern: Regex,
    pub risk: RiskLevel,
    pub confidence: f32,
}

impl ExtractionRule {
    pub fn new(
        name: &'static str,
        action_type: ActionType,
        trigger: Option<&str>,
        pattern: &str,
        risk: RiskLevel,
        confidence: f32,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            action_type,
            trigger: trigger.map(Regex::new).transpose()?,
            pattern: Regex::new(pattern)?,
            risk,
            confidence,
        })
    }

    /// Every hit of this rule in `sentence`, in order of appearance.
    pub fn matches(&self, sentence: &str) -> Vec<RuleMatch> {
        let offset = match &self.trigger {
            Some(trigger) => match trigger.find(sentence) {
                Some(m) => m.end(),
                None => return Vec::new(),
            },
            None => 0,
        };

        self.pattern
            .captures_iter(&sentence[offset..])
            .filter_map(|caps| {
                let params: Vec<_> = ["path", "command"]
                    .into_iter()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name, m.as_str().trim().to_string()))
                    })
                    .filter(|(_, value)| !value.is_empty())
                    .collect();
                if params.is_empty() {
                    return None;
                }
                let start = caps.get(0).map_or(0, |m| m.start()) + offset;
                Some(RuleMatch { start, params })
            })
            .collect()
    }
}

/// One hit of a rule inside a sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// Byte offset of the match within the sentence
    pub start: usize,
    pub params: Vec<(&'static str, String)>,
}

/// Ordered set of extraction rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<ExtractionRule>,
}

static DEFAULT_RULES: Lazy<RuleSet> = Lazy::new(|| {
    let table: [(&'static str, ActionType, Option<String>, String, RiskLevel, f32); 7] = [
        (
            "create_test",
            ActionType::TestCreate,
            None,
            format!(r"(?i)\b(?:write|add|create)\s+(?:a\s+|some\s+)?(?:unit\s+)?tests?\s+(?:file\s+)?(?:for\s+|in\s+|called\s+|named\s+)?{}", PATH),
            RiskLevel::Low,
            0.7,
        ),
        (
            "create_file",
            ActionType::FileCreate,
            None,
            format!(r"(?i)\b(?:create|add|make|write)\s+(?:a\s+|an\s+|the\s+)?(?:new\s+)?(?:file\s+)?(?:called\s+|named\s+)?{}", PATH),
            RiskLevel::Low,
            0.7,
        ),
        (
            "update_file",
            ActionType::FileUpdate,
            None,
            format!(r"(?i)\b(?:update|modify|edit|change)\s+(?:the\s+)?(?:file\s+)?{}", PATH),
            RiskLevel::Low,
            0.7,
        ),
        (
            "delete_file",
            ActionType::FileDelete,
            None,
            format!(r"(?i)\b(?:delete|remove)\s+(?:the\s+)?(?:file\s+)?{}", PATH),
            RiskLevel::Medium,
            0.7,
        ),
        (
            "refactor_file",
            ActionType::Refactor,
            None,
            format!(r"(?i)\brefactor\s+(?:the\s+)?(?:file\s+)?{}", PATH),
            RiskLevel::Medium,
            0.6,
        ),
        (
            "debug_file",
            ActionType::Debug,
            None,
            format!(r"(?i)\bdebug\s+(?:the\s+)?(?:file\s+)?{}", PATH),
            RiskLevel::Low,
            0.6,
        ),
        (
            "run_command",
            ActionType::CommandExecute,
            Some(r"(?i)\b(?:run|execute|exec)\b".to_string()),
            r"`(?P<command>[^`\n]+)`".to_string(),
            RiskLevel::Low,
            0.8,
        ),
    ];

    let rules = table
        .into_iter()
        .filter_map(|(name, action_type, trigger, pattern, risk, confidence)| {
            match ExtractionRule::new(name, action_type, trigger.as_deref(), &pattern, risk, confidence) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!("Skipping extraction rule {}: {}", name, e);
                    None
                }
            }
        })
        .collect();
    RuleSet { rules }
});

impl RuleSet {
    pub fn new(rules: Vec<ExtractionRule>) -> Self {
        Self { rules }
    }

    /// Built-in rules covering create/update/delete/refactor/test/debug and commands
    pub fn default_rules() -> Self {
        DEFAULT_RULES.clone()
    }

    pub fn push(&mut self, rule: ExtractionRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::default_rules()
    }
}
