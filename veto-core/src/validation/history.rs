//! Bounded tool-call history.
//!
//! The validation pipeline owns one history per validator instance; all
//! writes go through it. Oldest entries fall off once the capacity is
//! reached.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::constants::limits;
use crate::policy::model::Decision;

/// Outcome of one validated tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    pub timestamp: DateTime<Utc>,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// FIFO of recent tool-call outcomes, capacity-bounded.
#[derive(Debug, Default)]
pub struct ToolHistory {
    records: VecDeque<ToolCallRecord>,
}

impl ToolHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ToolCallRecord) {
        if self.records.len() >= limits::HISTORY_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The most recent `count` records, oldest first.
    pub fn tail(&self, count: usize) -> Vec<ToolCallRecord> {
        let skip = self.records.len().saturating_sub(count);
        self.records.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize) -> ToolCallRecord {
        ToolCallRecord {
            call_id: format!("call-{index}"),
            tool_name: "write_file".into(),
            timestamp: Utc::now(),
            decision: Decision::Allow,
            reason: None,
        }
    }

    #[test]
    fn capacity_is_bounded() {
        let mut history = ToolHistory::new();
        for index in 0..(limits::HISTORY_CAPACITY + 20) {
            history.push(record(index));
        }
        assert_eq!(history.len(), limits::HISTORY_CAPACITY);
        // The oldest entries fell off.
        let tail = history.tail(limits::HISTORY_CAPACITY);
        assert_eq!(tail[0].call_id, "call-20");
    }

    #[test]
    fn tail_returns_most_recent_in_order() {
        let mut history = ToolHistory::new();
        for index in 0..5 {
            history.push(record(index));
        }
        let tail = history.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].call_id, "call-3");
        assert_eq!(tail[1].call_id, "call-4");
    }
}
