// ABOUTME: Extraction tests over realistic model replies
// ABOUTME: Covers markers, heuristics, ambiguity escalation and determinism

use conduit_actions::{ActionExtractor, ConversationContext};
use conduit_core::{ActionType, RiskLevel};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn ctx() -> ConversationContext {
    ConversationContext::new("demo")
}

fn kinds(text: &str, ctx: &ConversationContext) -> Vec<(ActionType, String)> {
    ActionExtractor::default()
        .extract(text, ctx)
        .map(|i| {
            let target = i.path().or(i.command()).unwrap_or_default().to_string();
            (i.action_type, target)
        })
        .collect()
}

#[rstest]
#[case("Create a new file called `src/app.js`.", ActionType::FileCreate, "src/app.js")]
#[case("Please update the file index.html with a header.", ActionType::FileUpdate, "index.html")]
#[case("Remove old.css since nothing uses it.", ActionType::FileDelete, "old.css")]
#[case("Refactor utils/math.js into smaller functions.", ActionType::Refactor, "utils/math.js")]
#[case("Write tests for math.test.js covering add.", ActionType::TestCreate, "math.test.js")]
#[case("Debug server.js, it crashes on start.", ActionType::Debug, "server.js")]
#[case("Now run `npm install` to fetch dependencies.", ActionType::CommandExecute, "npm install")]
fn test_heuristic_rules(#[case] text: &str, #[case] action_type: ActionType, #[case] target: &str) {
    assert_eq!(kinds(text, &ctx()), vec![(action_type, target.to_string())]);
}

#[test]
fn test_no_actions_is_empty_not_error() {
    let text = "React is a UI library. It renders components.";
    assert!(kinds(text, &ctx()).is_empty());
    assert!(kinds("", &ctx()).is_empty());
}

#[test]
fn test_code_block_becomes_content() {
    let text = "Create a file named hello.js:\n\n```js\nconsole.log('hi');\n```\n\nThen run `node hello.js`.";
    let intents = ActionExtractor::default().extract_all(text, &ctx());

    assert_eq!(intents.len(), 2);
    assert_eq!(intents[0].action_type, ActionType::FileCreate);
    assert_eq!(intents[0].content(), Some("console.log('hi');\n"));
    assert_eq!(intents[0].rollback_plan.as_deref(), Some("delete"));
    assert_eq!(intents[1].command(), Some("node hello.js"));
    assert_eq!(intents[0].id, "action-1");
    assert_eq!(intents[1].id, "action-2");
}

#[test]
fn test_shell_block_after_run_sentence() {
    let text = "Run the following:\n```bash\n$ npm install\nnpm run build\n```\n";
    assert_eq!(
        kinds(text, &ctx()),
        vec![
            (ActionType::CommandExecute, "npm install".to_string()),
            (ActionType::CommandExecute, "npm run build".to_string()),
        ]
    );
}

#[test]
fn test_known_file_turns_create_into_update() {
    let ctx = ctx().with_known_files(["index.js"]);
    assert_eq!(
        kinds("Create index.js with an express server.", &ctx),
        vec![(ActionType::FileUpdate, "index.js".to_string())]
    );
}

#[test]
fn test_ambiguous_commands_escalate_risk() {
    let intents = ActionExtractor::default()
        .extract_all("Run `npm test` or `yarn test`, whichever you use.", &ctx());

    assert_eq!(intents.len(), 2);
    for intent in &intents {
        assert_eq!(intent.risk_level, RiskLevel::Medium);
        assert!(intent.requires_confirmation);
        assert!(intent.confidence < 0.8);
    }
}

#[test]
fn test_repeated_mentions_are_deduplicated() {
    let text = "Run `npm test`. If it fails, run `npm test` again.";
    assert_eq!(kinds(text, &ctx()).len(), 1);
}

#[test]
fn test_destructive_command_is_high_risk() {
    let intents = ActionExtractor::default().extract_all("Run `rm -rf dist` first.", &ctx());
    assert_eq!(intents[0].risk_level, RiskLevel::High);
    assert!(intents[0].requires_confirmation);
}

#[test]
fn test_json_marker_block() {
    let text = r#"Here is the plan.

```action
[
  {"id": "mk", "type": "file_create", "path": "a.js", "content": "1", "riskLevel": "high"},
  {"id": "go", "type": "command_execute", "command": "node a.js", "dependencies": ["mk"]}
]
```

Also create b.js, which is ignored because markers are present."#;
    let intents = ActionExtractor::default().extract_all(text, &ctx());

    assert_eq!(intents.len(), 2);
    assert_eq!(intents[0].id, "mk");
    assert_eq!(intents[0].risk_level, RiskLevel::High);
    assert!(intents[0].requires_confirmation);
    assert!(intents[1].dependencies.contains("mk"));
    assert_eq!(intents[1].confidence, 1.0);
}

#[test]
fn test_inline_tag_marker() {
    let text = r#"<action type="file_create" path="src/index.js" description="Entry point">
```js
export default 1;
```
</action>
<action type="command_execute" depends="action-1">npm start</action>
<action type="teleport" path="x.js"/>"#;
    let intents = ActionExtractor::default().extract_all(text, &ctx());

    assert_eq!(intents.len(), 2);
    assert_eq!(intents[0].description, "Entry point");
    assert_eq!(intents[0].content(), Some("export default 1;\n"));
    assert_eq!(intents[1].command(), Some("npm start"));
    assert!(intents[1].dependencies.contains("action-1"));
}

#[test]
fn test_malformed_json_marker_is_skipped() {
    let text = "```action\n{not json}\n```\n<action type=\"file_delete\" path=\"old.js\"/>";
    assert_eq!(
        kinds(text, &ctx()),
        vec![(ActionType::FileDelete, "old.js".to_string())]
    );
}

#[test]
fn test_extraction_is_deterministic() {
    let text = "Create a file called server.js:\n```js\nrequire('http').createServer().listen(process.env.PORT);\n```\nUpdate the file package.json. Run `npm test` or `npm run lint`. Delete tmp.log.";
    let extractor = ActionExtractor::default();
    let ctx = ctx().with_known_files(["package.json"]);

    let first = extractor.extract_all(text, &ctx);
    let second = extractor.extract_all(text, &ctx);
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
}

#[test]
fn test_extraction_is_lazy() {
    let text = "Create a.js. Create b.js. Create c.js.";
    let extractor = ActionExtractor::default();
    let ctx = ctx();
    let mut extraction = extractor.extract(text, &ctx);

    assert_eq!(extraction.next().and_then(|i| i.path().map(String::from)), Some("a.js".into()));
    assert_eq!(extraction.count(), 2);
}
