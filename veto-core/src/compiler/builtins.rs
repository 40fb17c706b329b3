//! Builtin restriction table.
//!
//! Each entry maps a normalized restriction phrase to the policies and
//! rules it compiles to. The table covers the mistakes coding agents make
//! most: banned packages, package-manager preferences, language hygiene,
//! secret and config protection, and destructive commands.

use serde::{Deserialize, Serialize};

use crate::policy::model::{
    Action, AstRule, CommandRule, Condition, ConditionOperator, ContentMode, ContentRule, Policy,
    Rule, RuleAction, Severity,
};

/// The compiled output of one restriction: file policies plus SDK rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Compiled {
    #[serde(default)]
    pub policies: Vec<Policy>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Compiled {
    fn policy(policy: Policy) -> Self {
        Self {
            policies: vec![policy],
            rules: vec![],
        }
    }

    fn rule(rule: Rule) -> Self {
        Self {
            policies: vec![],
            rules: vec![rule],
        }
    }
}

fn strings<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.as_ref().to_string())
        .collect()
}

fn protect(action: Action, include: &[&str], exclude: &[&str], description: &str) -> Policy {
    Policy {
        action,
        include: strings(include),
        exclude: strings(exclude),
        description: description.to_string(),
        command_rules: vec![],
        content_rules: vec![],
        ast_rules: vec![],
    }
}

fn command_ban(block: &[&str], reason: &str, suggest: Option<&str>, description: &str) -> Policy {
    Policy {
        action: Action::Execute,
        include: vec![],
        exclude: vec![],
        description: description.to_string(),
        command_rules: vec![CommandRule {
            block: strings(block),
            reason: reason.to_string(),
            suggest: suggest.map(|value| value.to_string()),
        }],
        content_rules: vec![],
        ast_rules: vec![],
    }
}

/// Ban an npm package: no imports in source, no installs at the shell.
fn package_ban(name: &str, suggest: &str) -> Compiled {
    let import_query = format!(
        "(import_statement source: (string) @source (#match? @source \"{name}\")) @violation"
    );
    let require_query = format!(
        "(call_expression function: (identifier) @fn arguments: (arguments (string) @source) \
         (#eq? @fn \"require\") (#match? @source \"{name}\")) @violation"
    );
    Compiled::policy(Policy {
        action: Action::Modify,
        include: strings(&["*.ts", "*.tsx", "*.js", "*.jsx", "*.mjs", "*.cjs"]),
        exclude: vec![],
        description: format!("no {name}"),
        command_rules: vec![CommandRule {
            block: strings(&[
                &format!("npm install {name}*"),
                &format!("npm install -* {name}*"),
                &format!("yarn add {name}*"),
                &format!("pnpm add {name}*"),
                &format!("bun add {name}*"),
            ]),
            reason: format!("{name} is banned in this project"),
            suggest: Some(suggest.to_string()),
        }],
        content_rules: vec![],
        ast_rules: vec![
            AstRule {
                id: format!("no-{name}-import"),
                query: import_query,
                languages: strings(&["typescript", "tsx", "javascript", "jsx"]),
                reason: format!("importing {name} is banned"),
                suggest: Some(suggest.to_string()),
                regex_pre_filter: Some(name.to_string()),
            },
            AstRule {
                id: format!("no-{name}-require"),
                query: require_query,
                languages: strings(&["typescript", "javascript"]),
                reason: format!("requiring {name} is banned"),
                suggest: Some(suggest.to_string()),
                regex_pre_filter: Some(name.to_string()),
            },
        ],
    })
}

/// Prefer one package manager: block the others' mutating commands.
fn prefer_package_manager(preferred: &str) -> Compiled {
    let managers = ["npm", "yarn", "pnpm", "bun"];
    let mut block = Vec::new();
    for manager in managers {
        if manager == preferred {
            continue;
        }
        block.push(format!("{manager} install*"));
        block.push(format!("{manager} i *"));
        block.push(format!("{manager} add*"));
        block.push(format!("{manager} remove*"));
        block.push(format!("{manager} uninstall*"));
        block.push(format!("{manager} update*"));
    }
    let block_refs: Vec<&str> = block.iter().map(String::as_str).collect();
    Compiled::policy(command_ban(
        &block_refs,
        &format!("this project uses {preferred}"),
        Some(&format!("use {preferred} instead")),
        &format!("prefer {preferred}"),
    ))
}

fn ask_on_command(id: &str, name: &str, pattern: &str) -> Compiled {
    Compiled::rule(Rule {
        id: id.to_string(),
        name: name.to_string(),
        enabled: true,
        severity: Severity::Medium,
        action: RuleAction::Ask,
        tools: None,
        conditions: Some(vec![Condition {
            field: "command".to_string(),
            operator: ConditionOperator::Matches,
            value: serde_json::Value::String(pattern.to_string()),
        }]),
        condition_groups: None,
    })
}

/// Canonical builtin keys, in resolution-preference order. File-protection
/// builtins come first so ambiguous containment matches bias toward them.
pub fn keys() -> &'static [&'static str] {
    &[
        "protect .env",
        "protect secrets",
        "protect lockfiles",
        "protect config",
        "protect git",
        "protect ssh",
        "protect dotfiles",
        "protect tests",
        "protect docs",
        "protect migrations",
        "protect ci",
        "no secrets in code",
        "no lodash",
        "no moment",
        "no jquery",
        "no axios",
        "no request",
        "no left-pad",
        "prefer pnpm",
        "prefer yarn",
        "prefer npm",
        "prefer bun",
        "no any",
        "no ts-ignore",
        "no console.log",
        "no debugger",
        "no var",
        "no eval",
        "no force push",
        "no git reset",
        "no rm -rf",
        "no sudo",
        "no curl pipe sh",
        "no global installs",
        "no npm publish",
        "no deploys",
        "ask before push",
        "ask before install",
        "no print",
        "no pickle",
        "prefer pathlib",
        "no unwrap",
        "no panic",
    ]
}

/// True when the key compiles to a file-protection policy. Used to bias
/// ambiguous containment matches.
pub fn is_file_protection(key: &str) -> bool {
    key.starts_with("protect ")
}

/// Look up a builtin by its canonical key.
pub fn lookup(key: &str) -> Option<Compiled> {
    let compiled = match key {
        "no lodash" => package_ban("lodash", "use native array and object methods"),
        "no moment" => package_ban("moment", "use date-fns or the built-in Temporal API"),
        "no jquery" => package_ban("jquery", "use querySelector and fetch"),
        "no axios" => package_ban("axios", "use the built-in fetch API"),
        "no request" => package_ban("request", "use the built-in fetch API"),
        "no left-pad" => package_ban("left-pad", "use String.prototype.padStart"),

        "prefer pnpm" => prefer_package_manager("pnpm"),
        "prefer yarn" => prefer_package_manager("yarn"),
        "prefer npm" => prefer_package_manager("npm"),
        "prefer bun" => prefer_package_manager("bun"),

        "no any" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["*.ts", "*.tsx"]),
            exclude: strings(&["*.d.ts"]),
            description: "no any".to_string(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![AstRule {
                id: "no-any-type".to_string(),
                query: "((predefined_type) @violation (#eq? @violation \"any\"))".to_string(),
                languages: strings(&["typescript", "tsx"]),
                reason: "the any type defeats the type checker".to_string(),
                suggest: Some("use unknown or a precise type".to_string()),
                regex_pre_filter: Some("any".to_string()),
            }],
        }),

        "no ts-ignore" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["*.ts", "*.tsx"]),
            exclude: vec![],
            description: "no ts-ignore".to_string(),
            command_rules: vec![],
            content_rules: vec![ContentRule {
                pattern: "@ts-ignore".to_string(),
                file_types: strings(&["*.ts", "*.tsx"]),
                reason: "suppressing type errors hides real bugs".to_string(),
                suggest: Some("fix the type error or use @ts-expect-error with a note".to_string()),
                mode: ContentMode::Fast,
                exceptions: vec![],
            }],
            ast_rules: vec![],
        }),

        "no console.log" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["*.ts", "*.tsx", "*.js", "*.jsx"]),
            exclude: strings(&["*.test.*", "*.spec.*"]),
            description: "no console.log".to_string(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![AstRule {
                id: "no-console-log".to_string(),
                query: "(call_expression function: (member_expression object: (identifier) @obj \
                        property: (property_identifier) @prop (#eq? @obj \"console\") \
                        (#eq? @prop \"log\"))) @violation"
                    .to_string(),
                languages: strings(&["typescript", "tsx", "javascript", "jsx"]),
                reason: "console.log left in source".to_string(),
                suggest: Some("use a structured logger".to_string()),
                regex_pre_filter: Some("console.log".to_string()),
            }],
        }),

        "no debugger" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["*.ts", "*.tsx", "*.js", "*.jsx"]),
            exclude: vec![],
            description: "no debugger".to_string(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![AstRule {
                id: "no-debugger".to_string(),
                query: "(debugger_statement) @violation".to_string(),
                languages: strings(&["typescript", "tsx", "javascript", "jsx"]),
                reason: "debugger statement left in source".to_string(),
                suggest: None,
                regex_pre_filter: Some("debugger".to_string()),
            }],
        }),

        "no var" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["*.ts", "*.tsx", "*.js", "*.jsx"]),
            exclude: vec![],
            description: "no var".to_string(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![AstRule {
                id: "no-var".to_string(),
                query: "(variable_declaration) @violation".to_string(),
                languages: strings(&["typescript", "tsx", "javascript", "jsx"]),
                reason: "var has function scoping surprises".to_string(),
                suggest: Some("use let or const".to_string()),
                regex_pre_filter: Some("var".to_string()),
            }],
        }),

        "no eval" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["*.ts", "*.tsx", "*.js", "*.jsx"]),
            exclude: vec![],
            description: "no eval".to_string(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![AstRule {
                id: "no-eval".to_string(),
                query: "(call_expression function: (identifier) @fn (#eq? @fn \"eval\")) @violation"
                    .to_string(),
                languages: strings(&["typescript", "tsx", "javascript", "jsx"]),
                reason: "eval executes arbitrary strings".to_string(),
                suggest: None,
                regex_pre_filter: Some("eval".to_string()),
            }],
        }),

        "protect .env" => Compiled::policy(protect(
            Action::Modify,
            &[".env", ".env.*", "*.env"],
            &[".env.example", ".env.sample", ".env.template"],
            "protect .env",
        )),

        "protect secrets" => Compiled::policy(protect(
            Action::Modify,
            &["*.key", "*.pem", "*.p12", "*.pfx", "secrets.*", "credentials.*"],
            &[],
            "protect secrets",
        )),

        "no secrets in code" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["*.ts", "*.tsx", "*.js", "*.jsx", "*.py", "*.go", "*.rb", "*.java"]),
            exclude: strings(&["*.test.*", "*.spec.*"]),
            description: "no secrets in code".to_string(),
            command_rules: vec![],
            content_rules: vec![
                ContentRule {
                    pattern: "AKIA[0-9A-Z]{16}".to_string(),
                    file_types: vec![],
                    reason: "AWS access key id in source".to_string(),
                    suggest: Some("load credentials from the environment".to_string()),
                    mode: ContentMode::Strict,
                    exceptions: vec![],
                },
                ContentRule {
                    pattern: r#"(?i)(api[_-]?key|secret|token|password)\s*[:=]\s*['"][^'"]{8,}['"]"#
                        .to_string(),
                    file_types: vec![],
                    reason: "hardcoded credential in source".to_string(),
                    suggest: Some("load credentials from the environment".to_string()),
                    mode: ContentMode::Strict,
                    exceptions: strings(&[r"(?i)(example|placeholder|changeme|xxx)"]),
                },
                ContentRule {
                    pattern: "-----BEGIN (RSA |EC |OPENSSH )?PRIVATE KEY-----".to_string(),
                    file_types: vec![],
                    reason: "private key material in source".to_string(),
                    suggest: None,
                    mode: ContentMode::Fast,
                    exceptions: vec![],
                },
            ],
            ast_rules: vec![],
        }),

        "protect lockfiles" => Compiled::policy(protect(
            Action::Modify,
            &[
                "package-lock.json",
                "yarn.lock",
                "pnpm-lock.yaml",
                "bun.lockb",
                "Cargo.lock",
                "poetry.lock",
                "uv.lock",
                "Gemfile.lock",
            ],
            &[],
            "protect lockfiles",
        )),

        "protect config" => Compiled::policy(protect(
            Action::Modify,
            &[
                "tsconfig*.json",
                "*.config.js",
                "*.config.ts",
                "*.config.mjs",
                ".eslintrc*",
                ".prettierrc*",
                "pyproject.toml",
                "Cargo.toml",
            ],
            &[],
            "protect config",
        )),

        "protect git" => Compiled::policy(protect(
            Action::Modify,
            &[".git/**", ".gitignore", ".gitattributes", ".gitmodules"],
            &[],
            "protect git",
        )),

        "protect ssh" => Compiled::policy(protect(
            Action::Read,
            &[".ssh/**", "id_rsa*", "id_ed25519*", "known_hosts", "authorized_keys"],
            &[],
            "protect ssh",
        )),

        "protect dotfiles" => Compiled::policy(protect(
            Action::Modify,
            &[".*", ".*/**"],
            &[".git/**", ".veto"],
            "protect dotfiles",
        )),

        "protect tests" => Compiled::policy(protect(
            Action::Delete,
            &["*.test.*", "*.spec.*", "tests/**", "__tests__/**", "test/**"],
            &[],
            "protect tests",
        )),

        "protect docs" => Compiled::policy(protect(
            Action::Delete,
            &["*.md", "docs/**", "doc/**"],
            &[],
            "protect docs",
        )),

        "protect migrations" => Compiled::policy(protect(
            Action::Modify,
            &["migrations/**", "**/migrations/**", "db/migrate/**"],
            &[],
            "protect migrations",
        )),

        "protect ci" => Compiled::policy(protect(
            Action::Modify,
            &[".github/**", ".gitlab-ci.yml", ".circleci/**", "Jenkinsfile", ".buildkite/**"],
            &[],
            "protect ci",
        )),

        "no force push" => Compiled::policy(command_ban(
            &["git push --force*", "git push -f*", "git push * --force*", "git push * -f*"],
            "force pushing rewrites shared history",
            Some("use git push --force-with-lease after review"),
            "no force push",
        )),

        "no git reset" => Compiled::policy(command_ban(
            &["git reset --hard*"],
            "hard reset discards uncommitted work",
            Some("use git stash to set work aside"),
            "no git reset",
        )),

        "no rm -rf" => Compiled::policy(command_ban(
            &["rm -rf*", "rm -fr*", "rm -r -f*", "rm -f -r*"],
            "recursive force deletion is unrecoverable",
            Some("delete specific files, or move them to a scratch directory"),
            "no rm -rf",
        )),

        "no sudo" => Compiled::policy(command_ban(
            &["sudo *"],
            "privilege escalation is not allowed for agents",
            None,
            "no sudo",
        )),

        "no curl pipe sh" => Compiled::policy(command_ban(
            &["curl * | sh*", "curl * | bash*", "wget * | sh*", "wget * | bash*", "curl *|sh*", "curl *|bash*"],
            "piping downloads into a shell executes unreviewed code",
            Some("download first, inspect, then run"),
            "no curl pipe sh",
        )),

        "no global installs" => Compiled::policy(command_ban(
            &["npm install -g *", "npm i -g *", "yarn global add*", "pnpm add -g *"],
            "global installs mutate the machine outside the project",
            Some("add the package as a project dependency"),
            "no global installs",
        )),

        "no npm publish" => Compiled::policy(command_ban(
            &["npm publish*", "pnpm publish*", "yarn publish*"],
            "publishing is a release action, not an agent task",
            None,
            "no npm publish",
        )),

        "no deploys" => Compiled::policy(command_ban(
            &[
                "vercel deploy*",
                "vercel --prod*",
                "netlify deploy*",
                "firebase deploy*",
                "fly deploy*",
                "cdk deploy*",
                "terraform apply*",
                "kubectl apply*",
            ],
            "deployments require human sign-off",
            None,
            "no deploys",
        )),

        "ask before push" => ask_on_command(
            "ask-before-push",
            "Confirm git pushes and resets",
            r"^git (push|reset)\b.*",
        ),

        "ask before install" => ask_on_command(
            "ask-before-install",
            "Confirm dependency installs",
            r"^(npm|pnpm|yarn|bun|pip|cargo) (install|add|i)\b.*",
        ),

        "no print" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["*.py"]),
            exclude: strings(&["test_*.py", "*_test.py"]),
            description: "no print".to_string(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![AstRule {
                id: "no-print".to_string(),
                query: "(call function: (identifier) @fn (#eq? @fn \"print\")) @violation"
                    .to_string(),
                languages: strings(&["python"]),
                reason: "print left in source".to_string(),
                suggest: Some("use the logging module".to_string()),
                regex_pre_filter: Some("print".to_string()),
            }],
        }),

        "no pickle" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["*.py"]),
            exclude: vec![],
            description: "no pickle".to_string(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![AstRule {
                id: "no-pickle-import".to_string(),
                query: "(import_statement name: (dotted_name) @mod (#eq? @mod \"pickle\")) @violation"
                    .to_string(),
                languages: strings(&["python"]),
                reason: "pickle deserialization executes arbitrary code".to_string(),
                suggest: Some("use json or another safe format".to_string()),
                regex_pre_filter: Some("pickle".to_string()),
            }],
        }),

        "prefer pathlib" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["*.py"]),
            exclude: vec![],
            description: "prefer pathlib".to_string(),
            command_rules: vec![],
            content_rules: vec![ContentRule {
                pattern: r"os\.path\.\w+".to_string(),
                file_types: strings(&["*.py"]),
                reason: "os.path is the legacy path API".to_string(),
                suggest: Some("use pathlib.Path".to_string()),
                mode: ContentMode::Strict,
                exceptions: vec![],
            }],
            ast_rules: vec![],
        }),

        "no unwrap" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["src/**/*.rs"]),
            exclude: strings(&["**/tests/**"]),
            description: "no unwrap".to_string(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![AstRule {
                id: "no-unwrap".to_string(),
                query: "(call_expression function: (field_expression field: (field_identifier) @method \
                        (#eq? @method \"unwrap\"))) @violation"
                    .to_string(),
                languages: strings(&["rust"]),
                reason: "unwrap panics on the error path".to_string(),
                suggest: Some("propagate with ? or handle the None/Err case".to_string()),
                regex_pre_filter: Some("unwrap".to_string()),
            }],
        }),

        "no panic" => Compiled::policy(Policy {
            action: Action::Modify,
            include: strings(&["src/**/*.rs"]),
            exclude: strings(&["**/tests/**"]),
            description: "no panic".to_string(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![AstRule {
                id: "no-panic".to_string(),
                query: "(macro_invocation macro: (identifier) @name (#eq? @name \"panic\")) @violation"
                    .to_string(),
                languages: strings(&["rust"]),
                reason: "panics abort instead of returning an error".to_string(),
                suggest: Some("return a typed error".to_string()),
                regex_pre_filter: Some("panic!".to_string()),
            }],
        }),

        _ => return None,
    };
    Some(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_key_resolves_to_well_formed_output() {
        for key in keys() {
            let compiled = lookup(key).unwrap_or_else(|| panic!("missing builtin '{key}'"));
            let has_policies = !compiled.policies.is_empty();
            let has_rules = !compiled.rules.is_empty();
            assert!(has_policies || has_rules, "builtin '{key}' compiles to nothing");
            for policy in &compiled.policies {
                assert!(policy.is_well_formed(), "builtin '{key}' policy protects nothing");
            }
        }
    }

    #[test]
    fn table_has_expected_breadth() {
        assert!(keys().len() >= 40);
    }

    #[test]
    fn package_bans_cover_imports_and_installs() {
        let compiled = lookup("no lodash").unwrap();
        let policy = &compiled.policies[0];
        assert_eq!(policy.ast_rules.len(), 2);
        assert!(!policy.command_rules.is_empty());
        assert!(
            policy.command_rules[0]
                .suggest
                .as_deref()
                .unwrap()
                .contains("native")
        );
    }

    #[test]
    fn ask_builtins_compile_to_ask_rules() {
        let compiled = lookup("ask before push").unwrap();
        assert_eq!(compiled.rules[0].action, RuleAction::Ask);
    }

    #[test]
    fn file_protection_bias_marker() {
        assert!(is_file_protection("protect .env"));
        assert!(!is_file_protection("no lodash"));
    }
}
