//! End-to-end decision scenarios: restriction phrase in, verdict out.

use std::sync::Arc;

use veto_core::compiler::Compiler;
use veto_core::engine::{DecisionEngine, EngineMode};
use veto_core::policy::model::{
    Action, ContentMode, ContentRule, Decision, Policy, PolicySet, ToolCall,
};

fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
    let serde_json::Value::Object(arguments) = arguments else {
        panic!("arguments must be an object");
    };
    ToolCall::new(name, arguments)
}

async fn compile_set(phrases: &[&str]) -> PolicySet {
    let dir = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(dir.path().to_path_buf(), None);
    let mut set = PolicySet::default();
    for phrase in phrases {
        let result = compiler.compile(phrase).await.unwrap();
        set.policies.extend(result.compiled.policies);
        set.rules.extend(result.compiled.rules);
    }
    set
}

#[tokio::test]
async fn env_write_is_denied_with_target_in_reason() {
    let set = PolicySet {
        policies: vec![Policy {
            action: Action::Modify,
            include: vec![".env*".into(), "*.key".into()],
            exclude: vec![],
            description: "deny write to env and key files".into(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![],
        }],
        rules: vec![],
    };
    let engine = DecisionEngine::new(Arc::new(set), EngineMode::Strict);

    let verdict = engine
        .evaluate(&call(
            "Write",
            serde_json::json!({"file_path": ".env.local", "content": "X=1"}),
        ))
        .await;
    assert_eq!(verdict.decision, Decision::Deny);
    assert!(verdict.reason.as_deref().unwrap().contains(".env.local"));
}

#[tokio::test]
async fn force_push_yields_ask() {
    let set = compile_set(&["ask before push"]).await;
    let engine = DecisionEngine::new(Arc::new(set), EngineMode::Strict);

    let verdict = engine
        .evaluate(&call(
            "bash",
            serde_json::json!({"command": "git push --force origin main"}),
        ))
        .await;
    assert_eq!(verdict.decision, Decision::Ask);
}

#[tokio::test]
async fn lodash_import_denied_with_native_suggestion() {
    let set = compile_set(&["no lodash"]).await;
    let engine = DecisionEngine::new(Arc::new(set), EngineMode::Strict);

    let verdict = engine
        .evaluate(&call(
            "write_file",
            serde_json::json!({
                "file_path": "app.ts",
                "content": "import _ from 'lodash';\nconst a = _.chunk([1], 1);\n"
            }),
        ))
        .await;
    assert_eq!(verdict.decision, Decision::Deny);
    assert!(verdict.suggest.as_deref().unwrap().contains("native"));
    let matched = verdict.matched.unwrap();
    assert_eq!(matched.line, Some(1));
}

#[tokio::test]
async fn lodash_in_comment_is_allowed() {
    let set = compile_set(&["no lodash"]).await;
    let engine = DecisionEngine::new(Arc::new(set), EngineMode::Strict);

    let verdict = engine
        .evaluate(&call(
            "write_file",
            serde_json::json!({
                "file_path": "app.ts",
                "content": "// import _ from 'lodash';\nconst a = [1];\n"
            }),
        ))
        .await;
    assert_eq!(verdict.decision, Decision::Allow);
}

#[tokio::test]
async fn strict_content_rule_skips_comments() {
    let set = PolicySet {
        policies: vec![Policy {
            action: Action::Modify,
            include: vec!["*.ts".into()],
            exclude: vec![],
            description: "no lodash imports".into(),
            command_rules: vec![],
            content_rules: vec![ContentRule {
                pattern: r"require\(".into(),
                file_types: vec!["*.ts".into()],
                reason: "commonjs require is banned".into(),
                suggest: None,
                mode: ContentMode::Strict,
                exceptions: vec![],
            }],
            ast_rules: vec![],
        }],
        rules: vec![],
    };
    let engine = DecisionEngine::new(Arc::new(set), EngineMode::Strict);

    let commented = engine
        .evaluate(&call(
            "write_file",
            serde_json::json!({
                "file_path": "app.ts",
                "content": "// const _ = require('lodash');\n"
            }),
        ))
        .await;
    assert_eq!(commented.decision, Decision::Allow);

    let live = engine
        .evaluate(&call(
            "write_file",
            serde_json::json!({
                "file_path": "app.ts",
                "content": "const _ = require('lodash');\n"
            }),
        ))
        .await;
    // The string argument is blanked, but the call itself is live code.
    assert_eq!(live.decision, Decision::Deny);
}

#[tokio::test]
async fn any_type_denied_but_any_identifier_allowed() {
    let set = compile_set(&["no any"]).await;
    let engine = DecisionEngine::new(Arc::new(set), EngineMode::Strict);

    let denied = engine
        .evaluate(&call(
            "write_file",
            serde_json::json!({"file_path": "x.ts", "content": "function f(x: any) {}"}),
        ))
        .await;
    assert_eq!(denied.decision, Decision::Deny);

    let allowed = engine
        .evaluate(&call(
            "write_file",
            serde_json::json!({"file_path": "x.ts", "content": "function f(anyhow: number) {}"}),
        ))
        .await;
    assert_eq!(allowed.decision, Decision::Allow);
}

#[tokio::test]
async fn compiled_command_bans_block_shell_calls() {
    let set = compile_set(&["no force push", "no rm -rf"]).await;
    let engine = DecisionEngine::new(Arc::new(set), EngineMode::Strict);

    let push = engine
        .evaluate(&call(
            "bash",
            serde_json::json!({"command": "git push --force origin main"}),
        ))
        .await;
    assert_eq!(push.decision, Decision::Deny);
    assert!(push.suggest.as_deref().unwrap().contains("force-with-lease"));

    let chained = engine
        .evaluate(&call(
            "bash",
            serde_json::json!({"command": "echo ok && rm -rf build"}),
        ))
        .await;
    assert_eq!(chained.decision, Decision::Deny);

    let plain = engine
        .evaluate(&call("bash", serde_json::json!({"command": "git status"})))
        .await;
    assert_eq!(plain.decision, Decision::Allow);
}

#[tokio::test]
async fn alias_expansion_reaches_command_bans() {
    let set = compile_set(&["prefer pnpm"]).await;
    let engine = DecisionEngine::new(Arc::new(set), EngineMode::Strict);

    let shorthand = engine
        .evaluate(&call("bash", serde_json::json!({"command": "npm i lodash"})))
        .await;
    assert_eq!(shorthand.decision, Decision::Deny);
    assert!(shorthand.suggest.as_deref().unwrap().contains("pnpm"));

    let preferred = engine
        .evaluate(&call("bash", serde_json::json!({"command": "pnpm install"})))
        .await;
    assert_eq!(preferred.decision, Decision::Allow);
}
