//! Property tests for wave computation
//!
//! Run with: cargo test --package helm-orchestrator --test wave_properties

use helm_core::SubTask;
use helm_orchestrator::compute_waves;
use proptest::prelude::*;
use std::collections::HashSet;

/// Subtasks `t0..tn`; edges are (task, dependency) index pairs
fn build(count: usize, edges: &[(usize, usize)], acyclic: bool) -> Vec<SubTask> {
    (0..count)
        .map(|i| {
            let deps: HashSet<usize> = edges
                .iter()
                .filter(|(task, dep)| *task == i && *dep < count && (!acyclic || *dep < i))
                .map(|(_, dep)| *dep)
                .collect();
            deps.into_iter()
                .fold(SubTask::new(format!("t{i}"), "advisor", "work"), |t, d| {
                    t.depends_on(format!("t{d}"))
                })
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_acyclic_plans_respect_dependencies(
        count in 1..25usize,
        edges in proptest::collection::vec((0..25usize, 0..25usize), 0..60)
    ) {
        let tasks = build(count, &edges, true);
        let plan = compute_waves(&tasks);

        prop_assert!(plan.forced.is_empty());
        prop_assert!(plan.warnings.is_empty());

        let placed: Vec<&String> = plan.waves.iter().flatten().collect();
        prop_assert_eq!(placed.len(), count);
        prop_assert_eq!(placed.iter().collect::<HashSet<_>>().len(), count);

        for task in &tasks {
            let wave = plan.wave_of(&task.id).unwrap();
            for dep in &task.dependencies {
                prop_assert!(plan.wave_of(dep).unwrap() < wave);
            }
        }
        for wave in &plan.waves {
            prop_assert!(!wave.is_empty());
        }
    }

    #[test]
    fn prop_any_plan_terminates_with_every_task_once(
        count in 1..25usize,
        edges in proptest::collection::vec((0..25usize, 0..25usize), 0..80)
    ) {
        let tasks = build(count, &edges, false);
        let plan = compute_waves(&tasks);

        let placed: Vec<&String> = plan.waves.iter().flatten().collect();
        prop_assert_eq!(placed.len(), count);
        prop_assert_eq!(placed.iter().collect::<HashSet<_>>().len(), count);
        prop_assert!(plan.waves.len() <= count);

        let forced: HashSet<&String> = plan.forced.iter().collect();
        for task in &tasks {
            if forced.contains(&task.id) {
                continue;
            }
            let wave = plan.wave_of(&task.id).unwrap();
            for dep in &task.dependencies {
                prop_assert!(plan.wave_of(dep).unwrap() < wave);
            }
        }
    }
}
