//! # veto-core - authorization kernel for AI coding agents
//!
//! `veto-core` mediates every tool invocation an AI coding agent attempts
//! against a developer workstation. Given a declarative policy set and a
//! structured tool call, it emits `allow`, `deny`, or `ask` with a reason
//! and an optional suggested substitute.
//!
//! ## Architecture Overview
//!
//! - `policy/`: typed policy model plus the `.veto` and YAML parsers.
//! - `compiler/`: restriction phrases to executable policies, via a
//!   builtin table, a disk cache, and an optional LLM adjudicator.
//! - `paths/`, `commands/`, `ast/`: the matching engines (globs over
//!   normalized paths, alias-expanded command patterns, tree queries).
//! - `engine/`: the decision pipeline that combines them into a verdict.
//! - `daemon/`: the loopback line-protocol server shims talk to.
//! - `shim/`: per-session PATH wrapper scripts for destructive commands.
//! - `snapshot/` + `watcher/`: the watchdog that repairs protected files
//!   after unauthorized modification or deletion.
//! - `sessions/`: advisory registry of live sessions.
//! - `validation/`: the programmatic SDK wrapper with history tracking
//!   and remote adjudication.
//! - `audit/`: the append-only JSONL decision log.
//!
//! The policy set is immutable after compilation and freely shareable;
//! a decision is indivisible; everything that leaves the process is
//! recorded.

pub mod adjudicator;
pub mod ast;
pub mod audit;
pub mod commands;
pub mod compiler;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod paths;
pub mod policy;
pub mod sessions;
pub mod shim;
pub mod snapshot;
pub mod utils;
pub mod validation;
pub mod watcher;

pub use engine::{DecisionEngine, EngineMode};
pub use error::{ToolCallDeniedError, VetoError, VetoResult};
pub use policy::model::{Action, Decision, Policy, PolicySet, ToolCall, Verdict};
