//! Capability matcher: scores every registry entry against task signals.
//!
//! Score of a record = sum of weights of the signals whose tag appears in the
//! record's domains, expertise, or selection criteria, plus a priority bonus
//! of at most [`TIE_BREAK_EPSILON`]. The bonus is applied only to records with
//! at least one matched signal, so unmatched records score exactly 0.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::domain::{AgentCandidate, TaskSignal};
use crate::selection::error::SelectionResult;
use crate::selection::registry::CapabilityRegistry;

/// Upper bound of the priority bonus; small enough never to outweigh a
/// genuine signal match.
pub const TIE_BREAK_EPSILON: f64 = 1e-6;

/// Rank every (allowed) registry entry against `signals`.
///
/// Sorted by score descending, then priority descending, then role ascending.
/// Records without matches are included with score 0.
pub fn match_capabilities(
    signals: &[TaskSignal],
    registry: &CapabilityRegistry,
    allowed: Option<&BTreeSet<String>>,
) -> SelectionResult<Vec<AgentCandidate>> {
    let records = registry.records()?;
    let eligible: Vec<_> = records
        .values()
        .filter(|r| allowed.map_or(true, |set| set.contains(&r.role)))
        .collect();

    let max_priority = eligible.iter().map(|r| r.priority).max().unwrap_or(0);

    let mut candidates: Vec<AgentCandidate> = eligible
        .into_iter()
        .map(|record| {
            let matched_signals: Vec<TaskSignal> = signals
                .iter()
                .filter(|s| s.weight > 0.0 && record.covers(&s.tag))
                .cloned()
                .collect();

            let score = if matched_signals.is_empty() {
                0.0
            } else {
                let signal_score: f64 = matched_signals.iter().map(|s| s.weight).sum();
                let bonus = if max_priority > 0 && record.priority > 0 {
                    TIE_BREAK_EPSILON * record.priority as f64 / max_priority as f64
                } else {
                    0.0
                };
                signal_score + bonus
            };

            AgentCandidate {
                role: record.role.clone(),
                score,
                priority: record.priority,
                matched_signals,
            }
        })
        .collect();

    candidates.sort_by(rank_order);
    Ok(candidates)
}

fn rank_order(a: &AgentCandidate, b: &AgentCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.role.cmp(&b.role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::registry::CapabilitySource;
    use serde_json::json;

    fn registry() -> CapabilityRegistry {
        let value = json!({
            "capabilities": {
                "platform-engineer": {
                    "domains": ["infrastructure"],
                    "expertise": ["terraform"],
                    "priority": 5
                },
                "sre": {
                    "domains": ["infrastructure"],
                    "priority": 3
                },
                "software-engineer-typescript-backend": {
                    "domains": ["typescript-backend-general"],
                    "priority": 5
                },
                "generalist": {
                    "selectionCriteria": ["general"],
                    "priority": 1
                }
            }
        });
        CapabilityRegistry::load(CapabilitySource::Bytes(serde_json::to_vec(&value).unwrap()))
            .unwrap()
    }

    #[test]
    fn test_scores_sum_matched_weights() {
        let signals = vec![
            TaskSignal::new("infrastructure", 0.5),
            TaskSignal::new("terraform", 0.25),
        ];
        let ranked = match_capabilities(&signals, &registry(), None).unwrap();
        assert_eq!(ranked[0].role, "platform-engineer");
        assert!((ranked[0].score - 0.75).abs() < 1e-5);
        assert_eq!(ranked[0].matched_signals.len(), 2);
        assert_eq!(ranked[1].role, "sre");
    }

    #[test]
    fn test_unmatched_records_score_zero_and_are_still_listed() {
        let ranked =
            match_capabilities(&[TaskSignal::new("infrastructure", 0.5)], &registry(), None)
                .unwrap();
        assert_eq!(ranked.len(), 4);
        let zero: Vec<&AgentCandidate> = ranked.iter().filter(|c| c.score == 0.0).collect();
        assert_eq!(zero.len(), 2);
        assert!(zero.iter().all(|c| !c.has_matches()));
    }

    #[test]
    fn test_priority_breaks_equal_signal_scores() {
        let ranked =
            match_capabilities(&[TaskSignal::new("infrastructure", 0.5)], &registry(), None)
                .unwrap();
        // Both match 0.5; platform-engineer has the higher priority bonus.
        assert_eq!(ranked[0].role, "platform-engineer");
        assert_eq!(ranked[1].role, "sre");
        assert!(ranked[0].score - ranked[1].score < TIE_BREAK_EPSILON);
    }

    #[test]
    fn test_zero_scores_order_by_priority_then_role() {
        let ranked = match_capabilities(&[], &registry(), None).unwrap();
        let roles: Vec<&str> = ranked.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(
            roles,
            vec![
                "platform-engineer",
                "software-engineer-typescript-backend",
                "sre",
                "generalist"
            ]
        );
    }

    #[test]
    fn test_allowed_set_restricts_candidates() {
        let allowed: BTreeSet<String> = ["sre".to_string()].into_iter().collect();
        let ranked = match_capabilities(
            &[TaskSignal::new("terraform", 1.0)],
            &registry(),
            Some(&allowed),
        )
        .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].role, "sre");
        assert_eq!(ranked[0].score, 0.0);
    }

    #[test]
    fn test_uninitialized_registry_errors() {
        let registry = CapabilityRegistry::new(CapabilitySource::Bytes(vec![]));
        assert!(match_capabilities(&[], &registry, None).is_err());
    }
}
