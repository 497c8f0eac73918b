//! Wave scheduling
//!
//! Groups subtasks into waves: a task joins the first wave after all of its
//! dependencies have been placed. Ties keep plan order. When nothing is
//! ready the first remaining task is forced into the wave, so scheduling
//! always terminates even on cyclic plans.

use helm_core::SubTask;
use std::collections::HashSet;

/// Result of wave computation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WavePlan {
    /// Subtask ids per wave
    pub waves: Vec<Vec<String>>,
    /// Tasks placed before their dependencies because of a cycle
    pub forced: Vec<String>,
    /// Human-readable scheduling warnings
    pub warnings: Vec<String>,
}

impl WavePlan {
    /// Number of waves
    #[must_use]
    pub fn len(&self) -> usize {
        self.waves.len()
    }

    /// Whether there is nothing to run
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Wave containing `id`
    #[must_use]
    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.waves.iter().position(|w| w.iter().any(|t| t == id))
    }
}

/// Compute execution waves
///
/// Unknown dependency ids are ignored with a warning. Duplicate subtask ids
/// keep their first occurrence.
#[must_use]
pub fn compute_waves(subtasks: &[SubTask]) -> WavePlan {
    let mut plan = WavePlan::default();

    let mut seen = HashSet::new();
    let mut remaining: Vec<&SubTask> = Vec::with_capacity(subtasks.len());
    for task in subtasks {
        if seen.insert(task.id.as_str()) {
            remaining.push(task);
        } else {
            plan.warnings
                .push(format!("duplicate subtask id {} ignored", task.id));
        }
    }

    for task in &remaining {
        for dep in &task.dependencies {
            if !seen.contains(dep.as_str()) {
                plan.warnings.push(format!(
                    "subtask {} depends on unknown subtask {dep}; ignoring",
                    task.id
                ));
            }
        }
    }

    let mut placed: HashSet<&str> = HashSet::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let ready = |task: &SubTask| {
            task.dependencies
                .iter()
                .all(|d| placed.contains(d.as_str()) || !seen.contains(d.as_str()))
        };

        let (mut wave, rest): (Vec<&SubTask>, Vec<&SubTask>) =
            remaining.into_iter().partition(|t| ready(t));
        remaining = rest;

        if wave.is_empty() {
            let forced = remaining.remove(0);
            plan.warnings.push(format!(
                "dependency cycle detected; forcing subtask {} to run",
                forced.id
            ));
            tracing::warn!(subtask = %forced.id, "dependency cycle, forcing subtask");
            plan.forced.push(forced.id.clone());
            wave.push(forced);
        }

        for task in &wave {
            placed.insert(task.id.as_str());
        }
        plan.waves
            .push(wave.into_iter().map(|t| t.id.clone()).collect());
    }

    plan
}
