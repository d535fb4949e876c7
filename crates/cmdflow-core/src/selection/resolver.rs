//! Dynamic agent resolver.
//!
//! Composes the classifier, the context analyzer and the capability matcher
//! over a shared [`CapabilityRegistry`] into a single `resolve_agent` call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cmdflow_state::{SessionManager, SessionSnapshot};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{AgentCandidate, AgentSelection, Alternative, TaskSignal};
use crate::selection::analyzer::ContextAnalyzer;
use crate::selection::classifier::TaskClassifier;
use crate::selection::error::{SelectionError, SelectionResult};
use crate::selection::matcher::match_capabilities;
use crate::selection::registry::CapabilityRegistry;

/// Tunables for agent resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum number of runner-ups reported in `alternatives`.
    pub max_alternatives: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_alternatives: 3,
        }
    }
}

pub struct DynamicAgentResolver {
    registry: Arc<CapabilityRegistry>,
    classifier: TaskClassifier,
    analyzer: ContextAnalyzer,
    config: ResolverConfig,
}

impl DynamicAgentResolver {
    /// Build a resolver over `registry`.
    ///
    /// An uninitialized registry is accepted: every resolution then fails
    /// with [`SelectionError::RegistryLoad`], which callers recover from by
    /// running the command's static agent.
    pub fn new(registry: Arc<CapabilityRegistry>, config: ResolverConfig) -> Self {
        Self {
            registry,
            classifier: TaskClassifier::new(),
            analyzer: ContextAnalyzer::new(),
            config,
        }
    }

    /// Builder: replace the keyword classifier.
    pub fn with_classifier(mut self, classifier: TaskClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Restrict selection to the roles a command's selection criteria name.
    ///
    /// Returns `None` when the command declares no criteria.
    pub fn allowed_candidates(
        &self,
        criteria: Option<&[String]>,
    ) -> SelectionResult<Option<BTreeSet<String>>> {
        match criteria {
            Some(criteria) => Ok(Some(self.registry.roles_matching_criteria(criteria)?)),
            None => Ok(None),
        }
    }

    /// Pick an agent for `description` in the context of `session`.
    ///
    /// A weak or absent match is not an error: the selection then carries
    /// `selected_agent: None` and confidence 0. Only an uninitialized
    /// registry fails.
    pub fn resolve_agent(
        &self,
        description: &str,
        session: &SessionSnapshot,
        allowed: Option<&BTreeSet<String>>,
    ) -> SelectionResult<AgentSelection> {
        let signals = combine_signals(
            self.classifier.classify(description),
            self.analyzer.analyze(session),
        );
        debug!(signals = signals.len(), "task signals collected");

        let candidates = match_capabilities(&signals, &self.registry, allowed)?;
        Ok(self.select(candidates))
    }

    /// Same as [`resolve_agent`](Self::resolve_agent), reading the snapshot
    /// from `sessions` first.
    pub async fn resolve_for_session(
        &self,
        description: &str,
        sessions: &dyn SessionManager,
        allowed: Option<&BTreeSet<String>>,
    ) -> SelectionResult<AgentSelection> {
        let snapshot = sessions
            .get_session()
            .await
            .map_err(|e| SelectionError::Resolution {
                reason: format!("cannot read session {}: {e}", sessions.session_id()),
            })?;
        self.resolve_agent(description, &snapshot, allowed)
    }

    fn select(&self, candidates: Vec<AgentCandidate>) -> AgentSelection {
        let cap = self.config.max_alternatives;
        let matched_total: f64 = candidates
            .iter()
            .filter(|c| c.has_matches())
            .map(|c| c.score)
            .sum();

        let winner = candidates.first().filter(|c| c.has_matches());

        let Some(winner) = winner else {
            return AgentSelection {
                selected_agent: None,
                confidence: 0.0,
                reasons: vec![],
                alternatives: candidates.iter().take(cap).map(alternative).collect(),
                summary: "no capability matched the task signals".to_string(),
                fallback: false,
            };
        };

        let confidence = if matched_total > 0.0 {
            (winner.score / matched_total).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut strongest = winner.matched_signals.clone();
        strongest.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.tag.cmp(&b.tag)));
        let reasons: Vec<String> = strongest.into_iter().map(|s| s.tag).collect();

        AgentSelection {
            selected_agent: Some(winner.role.clone()),
            confidence,
            summary: self.summarize(&winner.role, &reasons),
            reasons,
            alternatives: candidates.iter().skip(1).take(cap).map(alternative).collect(),
            fallback: false,
        }
    }

    fn summarize(&self, role: &str, reasons: &[String]) -> String {
        let described: Vec<String> = reasons
            .iter()
            .map(|tag| match self.registry.describe(tag) {
                Some(description) => format!("{tag} ({description})"),
                None => tag.clone(),
            })
            .collect();
        format!("{role} matched {}", described.join(", "))
    }
}

fn alternative(candidate: &AgentCandidate) -> Alternative {
    Alternative {
        role: candidate.role.clone(),
        score: candidate.score,
    }
}

/// Union of both signal sources; duplicate tags add up, capped at 1.0.
fn combine_signals(task: Vec<TaskSignal>, context: Vec<TaskSignal>) -> Vec<TaskSignal> {
    let mut weights: BTreeMap<String, f64> = BTreeMap::new();
    for signal in task.into_iter().chain(context) {
        *weights.entry(signal.tag).or_default() += signal.weight;
    }
    weights
        .into_iter()
        .map(|(tag, weight)| TaskSignal::new(tag, weight))
        .collect()
}
