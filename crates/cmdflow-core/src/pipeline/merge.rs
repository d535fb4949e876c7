//! Dependency waves for the parallel merge strategy, and output merging.
//!
//! A stage depends on every other stage whose id appears in its `inputs`.
//! Inputs that name no stage are plain inputs and add no edge. Wave *n*
//! holds the stages whose dependencies all sit in waves `0..n`.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use tracing::warn;

use crate::domain::StageSpec;

/// Group stage indices into waves that may run concurrently.
///
/// Indices inside a wave keep declared order. A dependency cycle makes every
/// stage still unplaced run alone, one wave each, in declared order.
pub fn execution_waves(stages: &[StageSpec]) -> Vec<Vec<usize>> {
    let index: HashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let deps: Vec<HashSet<usize>> = stages
        .iter()
        .enumerate()
        .map(|(i, stage)| {
            stage
                .inputs
                .iter()
                .filter_map(|input| index.get(input.as_str()).copied())
                .filter(|&dep| dep != i)
                .collect()
        })
        .collect();
    let self_loops: HashSet<usize> = stages
        .iter()
        .enumerate()
        .filter(|(_, s)| s.inputs.iter().any(|input| *input == s.id))
        .map(|(i, _)| i)
        .collect();

    let mut placed: HashSet<usize> = HashSet::new();
    let mut waves = Vec::new();

    while placed.len() < stages.len() {
        let wave: Vec<usize> = (0..stages.len())
            .filter(|i| !placed.contains(i) && !self_loops.contains(i))
            .filter(|i| deps[*i].iter().all(|d| placed.contains(d)))
            .collect();

        if wave.is_empty() {
            let remaining: Vec<usize> = (0..stages.len()).filter(|i| !placed.contains(i)).collect();
            warn!(
                stages = ?remaining.iter().map(|i| stages[*i].id.as_str()).collect::<Vec<_>>(),
                "stage dependency cycle; running remaining stages sequentially"
            );
            waves.extend(remaining.into_iter().map(|i| vec![i]));
            break;
        }

        placed.extend(wave.iter().copied());
        waves.push(wave);
    }

    waves
}

/// Key-wise shallow merge of completed branch outputs into `outputs`.
pub fn merge_outputs(
    outputs: &mut BTreeMap<String, Value>,
    branches: impl IntoIterator<Item = (String, Value)>,
) {
    for (key, value) in branches {
        outputs.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage(id: &str, inputs: &[&str]) -> StageSpec {
        inputs
            .iter()
            .fold(StageSpec::new(id, id), |s, input| s.with_input(*input))
    }

    #[test]
    fn test_independent_stages_share_one_wave() {
        let waves = execution_waves(&[stage("a", &[]), stage("b", &["args"]), stage("c", &[])]);
        assert_eq!(waves, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_dependencies_push_stages_to_later_waves() {
        let waves = execution_waves(&[
            stage("plan", &[]),
            stage("code", &["plan"]),
            stage("docs", &["plan"]),
            stage("review", &["code", "docs"]),
        ]);
        assert_eq!(waves, vec![vec![0], vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_forward_reference_is_respected() {
        let waves = execution_waves(&[stage("b", &["a"]), stage("a", &[])]);
        assert_eq!(waves, vec![vec![1], vec![0]]);
    }

    #[test]
    fn test_cycle_falls_back_to_sequential() {
        let waves = execution_waves(&[
            stage("root", &[]),
            stage("x", &["y"]),
            stage("y", &["x"]),
        ]);
        assert_eq!(waves, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let waves = execution_waves(&[stage("a", &["a"]), stage("b", &[])]);
        assert_eq!(waves, vec![vec![1], vec![0]]);
    }

    #[test]
    fn test_merge_outputs_is_shallow() {
        let mut outputs: BTreeMap<String, Value> =
            [("a".to_string(), json!({"x": 1}))].into_iter().collect();
        merge_outputs(
            &mut outputs,
            vec![
                ("a".to_string(), json!({"y": 2})),
                ("b".to_string(), json!("ok")),
            ],
        );
        assert_eq!(outputs["a"], json!({"y": 2}));
        assert_eq!(outputs["b"], json!("ok"));
    }
}
