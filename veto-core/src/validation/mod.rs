//! Programmatic SDK wrapper.
//!
//! `ToolRegistry::wrap` takes an agent's tool set and returns both the
//! definitions (schemas for the model) and wrapped handlers. Every
//! invocation is assigned an id, recorded in the bounded history, and
//! validated: the local rules engine pre-filters, then an optional
//! remote validation API or local kernel client adjudicates. A deny
//! raises a typed error and the original handler never runs.
//!
//! Cancellation propagates naturally: dropping a wrapped invocation's
//! future drops the outstanding validation request with it.

pub mod history;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::constants::{env, limits, timing};
use crate::engine::{DecisionEngine, EngineMode};
use crate::error::{ToolCallDeniedError, VetoError};
use crate::policy::model::{Decision, ToolCall, Verdict};
use history::{ToolCallRecord, ToolHistory};

/// Everything a backend needs to adjudicate one call.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationContext {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    /// Recent outcomes, oldest first.
    pub history: Vec<ToolCallRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BackendVerdict {
    decision: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    suggest: Option<String>,
}

impl BackendVerdict {
    fn into_verdict(self) -> Result<Verdict, VetoError> {
        let mut verdict = match self.decision.as_str() {
            "allow" => Verdict::allow(),
            "deny" => Verdict::deny(self.reason.unwrap_or_else(|| "denied".to_string())),
            "ask" => Verdict::ask(
                self.reason
                    .unwrap_or_else(|| "confirmation required".to_string()),
            ),
            other => {
                return Err(VetoError::Validation(format!(
                    "backend returned unknown decision '{other}'"
                )));
            }
        };
        if let Some(suggest) = self.suggest {
            verdict = verdict.with_suggest(suggest);
        }
        Ok(verdict)
    }
}

/// Remote or local adjudication backend. The remote API is retried with
/// fixed backoff; the local kernel client is not.
#[derive(Debug, Clone)]
pub enum ValidationBackend {
    Remote { base_url: String, api_key: Option<String> },
    Kernel { base_url: String },
}

impl ValidationBackend {
    fn endpoint(&self) -> String {
        match self {
            ValidationBackend::Remote { base_url, .. } => format!("{base_url}/v1/validate"),
            ValidationBackend::Kernel { base_url } => format!("{base_url}/validate"),
        }
    }

    fn retries(&self) -> u32 {
        match self {
            ValidationBackend::Remote { .. } => timing::API_RETRIES,
            ValidationBackend::Kernel { .. } => 1,
        }
    }

    async fn validate(
        &self,
        http: &reqwest::Client,
        context: &ValidationContext,
    ) -> Result<Verdict, VetoError> {
        let endpoint = self.endpoint();
        let mut last_error = None;
        for attempt in 0..self.retries() {
            if attempt > 0 {
                tokio::time::sleep(timing::API_RETRY_BACKOFF).await;
            }
            let mut request = http.post(&endpoint).json(context);
            if let ValidationBackend::Remote {
                api_key: Some(key), ..
            } = self
            {
                request = request.bearer_auth(key);
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let backend_verdict: BackendVerdict =
                        response.json().await.map_err(|error| {
                            VetoError::Network(format!("invalid validation response: {error}"))
                        })?;
                    return backend_verdict.into_verdict();
                }
                Ok(response) => {
                    last_error = Some(VetoError::Network(format!(
                        "validation API returned {}",
                        response.status()
                    )));
                }
                Err(error) => {
                    last_error = Some(VetoError::Network(format!(
                        "validation API unreachable: {error}"
                    )));
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| VetoError::Network("validation API unreachable".to_string())))
    }
}

/// Validates tool calls: rules pre-filter, then the configured backend.
pub struct Validator {
    engine: Arc<DecisionEngine>,
    backend: Option<ValidationBackend>,
    http: reqwest::Client,
    history: Mutex<ToolHistory>,
    session_id: Option<String>,
    agent_id: Option<String>,
}

impl Validator {
    pub fn new(engine: Arc<DecisionEngine>, backend: Option<ValidationBackend>) -> Self {
        Self {
            engine,
            backend,
            http: reqwest::Client::builder()
                .timeout(timing::API_TIMEOUT)
                .build()
                .unwrap_or_default(),
            history: Mutex::new(ToolHistory::new()),
            session_id: std::env::var(env::SESSION_ID).ok(),
            agent_id: std::env::var(env::AGENT_ID).ok(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    async fn compose_context(&self, call: &ToolCall) -> ValidationContext {
        let history = self.history.lock().await.tail(limits::HISTORY_TAIL);
        ValidationContext {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: Value::Object(call.arguments.clone()),
            history,
            session_id: self.session_id.clone(),
            agent_id: self.agent_id.clone(),
        }
    }

    async fn record(&self, call: &ToolCall, verdict: &Verdict) {
        self.history.lock().await.push(ToolCallRecord {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            timestamp: Utc::now(),
            decision: verdict.decision,
            reason: verdict.reason.clone(),
        });
    }

    /// Validate one call. The rules engine runs first; the backend is
    /// only consulted when the rules produce no explicit decision.
    pub async fn validate(&self, call: &ToolCall) -> Verdict {
        let rules_verdict = self.engine.evaluate(call).await;
        if rules_verdict.decision != Decision::Allow || !rules_verdict.metadata.is_empty() {
            self.record(call, &rules_verdict).await;
            return rules_verdict;
        }

        let verdict = match &self.backend {
            None => rules_verdict,
            Some(backend) => {
                let context = self.compose_context(call).await;
                match backend.validate(&self.http, &context).await {
                    Ok(verdict) => verdict,
                    Err(error) => {
                        warn!(%error, tool = %call.name, "validation backend failed");
                        match self.engine.mode() {
                            EngineMode::Strict => Verdict::deny("API unavailable"),
                            EngineMode::Log => Verdict::allow().with_metadata(
                                "api_error",
                                Value::String(error.to_string()),
                            ),
                        }
                    }
                }
            }
        };

        self.record(call, &verdict).await;
        verdict
    }

    /// Recent history, for inspection and tests.
    pub async fn history_tail(&self, count: usize) -> Vec<ToolCallRecord> {
        self.history.lock().await.tail(count)
    }
}

/// A future returned by a tool handler.
pub type BoxedToolFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;
/// An agent tool implementation.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxedToolFuture + Send + Sync>;

/// Schema surfaced to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool as registered by the SDK caller.
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: ToolHandler,
}

/// A tool whose handler is gated by the validator.
pub struct WrappedTool {
    pub definition: ToolDefinition,
    validator: Arc<Validator>,
    inner: ToolHandler,
}

impl WrappedTool {
    /// Validate, then run the original handler. A deny raises
    /// [`ToolCallDeniedError`]; the handler never runs.
    pub async fn invoke(&self, arguments: Value) -> anyhow::Result<Value> {
        let argument_map = match &arguments {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        let call = ToolCall::new(self.definition.name.clone(), argument_map);
        debug!(tool = %call.name, id = %call.id, "validating tool call");

        let verdict = self.validator.validate(&call).await;
        if verdict.decision == Decision::Deny {
            return Err(ToolCallDeniedError::new(call.name, verdict).into());
        }
        (self.inner)(arguments).await
    }
}

/// Wraps an agent's tool set behind one validator.
pub struct ToolRegistry {
    validator: Arc<Validator>,
}

impl ToolRegistry {
    pub fn new(validator: Arc<Validator>) -> Self {
        Self { validator }
    }

    /// Register tool definitions and return both the definitions and the
    /// wrapped handlers.
    pub fn wrap(&self, tools: Vec<RegisteredTool>) -> (Vec<ToolDefinition>, Vec<WrappedTool>) {
        let definitions = tools.iter().map(|tool| tool.definition.clone()).collect();
        let wrapped = tools
            .into_iter()
            .map(|tool| WrappedTool {
                definition: tool.definition,
                validator: Arc::clone(&self.validator),
                inner: tool.handler,
            })
            .collect();
        (definitions, wrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::{Action, Policy, PolicySet};

    fn engine() -> Arc<DecisionEngine> {
        let set = PolicySet {
            policies: vec![Policy {
                action: Action::Modify,
                include: vec![".env*".into()],
                exclude: vec![],
                description: "protect .env".into(),
                command_rules: vec![],
                content_rules: vec![],
                ast_rules: vec![],
            }],
            rules: vec![],
        };
        Arc::new(DecisionEngine::new(Arc::new(set), EngineMode::Strict))
    }

    fn echo_tool() -> RegisteredTool {
        RegisteredTool {
            definition: ToolDefinition {
                name: "write_file".into(),
                description: "write a file".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            handler: Arc::new(|arguments| {
                Box::pin(async move { Ok(serde_json::json!({"echo": arguments})) })
            }),
        }
    }

    #[tokio::test]
    async fn wrap_returns_definitions_and_handlers() {
        let validator = Arc::new(Validator::new(engine(), None));
        let registry = ToolRegistry::new(validator);
        let (definitions, wrapped) = registry.wrap(vec![echo_tool()]);
        assert_eq!(definitions.len(), 1);
        assert_eq!(wrapped.len(), 1);
        assert_eq!(definitions[0].name, "write_file");
    }

    #[tokio::test]
    async fn denied_call_raises_and_never_runs_handler() {
        let validator = Arc::new(Validator::new(engine(), None));
        let registry = ToolRegistry::new(Arc::clone(&validator));
        let (_, wrapped) = registry.wrap(vec![echo_tool()]);

        let result = wrapped[0]
            .invoke(serde_json::json!({"file_path": ".env", "content": "X=1"}))
            .await;
        let error = result.unwrap_err();
        let denied = error.downcast_ref::<ToolCallDeniedError>().unwrap();
        assert_eq!(denied.tool_name, "write_file");
        assert_eq!(denied.verdict.decision, Decision::Deny);
    }

    #[tokio::test]
    async fn allowed_call_runs_handler_and_records_history() {
        let validator = Arc::new(Validator::new(engine(), None));
        let registry = ToolRegistry::new(Arc::clone(&validator));
        let (_, wrapped) = registry.wrap(vec![echo_tool()]);

        let result = wrapped[0]
            .invoke(serde_json::json!({"file_path": "notes.md", "content": "hi"}))
            .await
            .unwrap();
        assert!(result.get("echo").is_some());

        let tail = validator.history_tail(10).await;
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].decision, Decision::Allow);
    }

    #[tokio::test]
    async fn backend_failure_fails_closed_in_strict_mode() {
        let backend = ValidationBackend::Kernel {
            // Port 9 is discard; nothing listens on loopback in tests.
            base_url: "http://127.0.0.1:9".into(),
        };
        let validator = Arc::new(Validator::new(engine(), Some(backend)));
        let registry = ToolRegistry::new(Arc::clone(&validator));
        let (_, wrapped) = registry.wrap(vec![echo_tool()]);

        let result = wrapped[0]
            .invoke(serde_json::json!({"file_path": "notes.md", "content": "hi"}))
            .await;
        let error = result.unwrap_err();
        let denied = error.downcast_ref::<ToolCallDeniedError>().unwrap();
        assert_eq!(denied.reason, "API unavailable");
    }

    #[tokio::test]
    async fn history_tail_is_bounded_to_ten_in_context() {
        let validator = Arc::new(Validator::new(engine(), None));
        for index in 0..15 {
            let call = ToolCall::new(
                "read_file",
                serde_json::json!({"file_path": format!("f{index}.txt")})
                    .as_object()
                    .unwrap()
                    .clone(),
            );
            let _ = validator.validate(&call).await;
        }
        let context = validator
            .compose_context(&ToolCall::new("read_file", serde_json::Map::new()))
            .await;
        assert_eq!(context.history.len(), limits::HISTORY_TAIL);
    }
}
