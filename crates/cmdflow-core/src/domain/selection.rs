//! Agent-selection vocabulary: `TaskSignal`, `AgentCandidate`, `AgentSelection`.

use serde::{Deserialize, Serialize};

/// Session key under which every `AgentSelection` is recorded.
pub const SELECTION_CONTEXT_KEY: &str = "dynamicAgentSelection";

/// A weighted domain or expertise tag derived from task text or session context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSignal {
    pub tag: String,
    /// Always within `[0, 1]`.
    pub weight: f64,
}

impl TaskSignal {
    /// Build a signal, clamping `weight` into `[0, 1]`.
    pub fn new(tag: impl Into<String>, weight: f64) -> Self {
        let weight = if weight.is_nan() { 0.0 } else { weight.clamp(0.0, 1.0) };
        Self {
            tag: tag.into(),
            weight,
        }
    }
}

/// A scored registry entry produced by the capability matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCandidate {
    pub role: String,
    pub score: f64,
    pub priority: i64,
    pub matched_signals: Vec<TaskSignal>,
}

impl AgentCandidate {
    pub fn has_matches(&self) -> bool {
        !self.matched_signals.is_empty()
    }
}

/// A runner-up in a resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub role: String,
    pub score: f64,
}

/// Outcome of one dynamic-resolution call. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSelection {
    /// `None` when no candidate matched any signal.
    pub selected_agent: Option<String>,
    /// `winner score / sum of matched candidate scores`; 0 without a winner.
    pub confidence: f64,
    /// Matched signal tags of the winner, strongest first.
    pub reasons: Vec<String>,
    pub alternatives: Vec<Alternative>,
    /// Human-readable explanation built from registry descriptions.
    #[serde(default)]
    pub summary: String,
    /// True when the coordinator substituted the static/fallback agent.
    #[serde(default)]
    pub fallback: bool,
}

impl AgentSelection {
    /// Selection recorded when resolution itself failed.
    pub fn fallback(role: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            selected_agent: Some(role.to_string()),
            confidence: 0.0,
            reasons: vec![],
            alternatives: vec![],
            summary: format!("fell back to {role}: {reason}"),
            fallback: true,
        }
    }

    /// Mark an inconclusive selection as resolved by fallback to `role`.
    pub fn resolved_by_fallback(mut self, role: &str) -> Self {
        self.summary = if self.summary.is_empty() {
            format!("no capability matched; fell back to {role}")
        } else {
            format!("{}; fell back to {role}", self.summary)
        };
        self.selected_agent = Some(role.to_string());
        self.fallback = true;
        self
    }
}
