//! Policy model and rule-file parsers.

pub mod dsl;
pub mod model;

pub use model::{
    Action, AstRule, CommandRule, Condition, ConditionOperator, ContentMode, ContentRule,
    Decision, MatchedRule, Policy, PolicySet, Rule, RuleAction, SessionMode, Severity, ToolCall,
    Verdict,
};
