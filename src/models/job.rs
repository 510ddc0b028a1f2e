//! Job model and dependency graph.
//!
//! A job is a DAG of stages. Two frontiers advance through the graph at
//! different speeds:
//!
//! - the **schedulable frontier** grows when all of a stage's parents are
//!   *saturated* (every task assigned or spoken for) — workers may be
//!   committed to such a stage ahead of its parents finishing;
//! - the **runnable frontier** grows when all parents have *completed* —
//!   only then can a worker actually start one of the stage's tasks.
//!
//! Each stage enters the schedulable set at most once per run; a one-shot
//! latch guards re-entry when saturation is temporarily rolled back.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Stage, StageId, StageSpec, WorkerId};

/// Static definition of a job, supplied by the caller at reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Stages, indexed by position. Dependencies refer to these indices.
    pub stages: Vec<StageSpec>,
}

impl JobSpec {
    /// Creates a job from its stages.
    pub fn new(stages: Vec<StageSpec>) -> Self {
        Self { stages }
    }
}

/// Which progress notion a frontier query is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontierCriterion {
    /// All parents saturated: the stage may be scheduled.
    Saturated,
    /// All parents completed: the stage may actually run.
    Completed,
}

/// A live job inside the simulation.
#[derive(Debug, Clone)]
pub struct Job {
    /// Job identifier, assigned by arrival order.
    pub id: super::JobId,
    /// Simulated time the job entered the system.
    pub arrival_time: f64,
    /// Simulated time the job finished, once it has.
    pub completion_time: Option<f64>,
    /// The job's stages.
    pub stages: Vec<Stage>,
    parents: Vec<Vec<StageId>>,
    children: Vec<Vec<StageId>>,
    /// Stages whose parents have all completed and that are not themselves
    /// complete.
    frontier: BTreeSet<StageId>,
    saturated: Vec<bool>,
    schedulable_latch: Vec<bool>,
    local_workers: BTreeSet<WorkerId>,
    completed_stages: usize,
}

impl Job {
    /// Builds a job from its spec at the given arrival time.
    pub fn from_spec(id: super::JobId, arrival_time: f64, spec: &JobSpec) -> Self {
        let n = spec.stages.len();
        let mut parents: Vec<Vec<StageId>> = vec![Vec::new(); n];
        let mut children: Vec<Vec<StageId>> = vec![Vec::new(); n];
        for (stage_id, stage_spec) in spec.stages.iter().enumerate() {
            for &dep in &stage_spec.dependencies {
                parents[stage_id].push(dep);
                children[dep].push(stage_id);
            }
        }

        Self {
            id,
            arrival_time,
            completion_time: None,
            stages: spec
                .stages
                .iter()
                .enumerate()
                .map(|(stage_id, s)| Stage::from_spec(stage_id, id, s))
                .collect(),
            parents,
            children,
            frontier: BTreeSet::new(),
            saturated: vec![false; n],
            schedulable_latch: vec![false; n],
            local_workers: BTreeSet::new(),
            completed_stages: 0,
        }
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Whether every stage has completed.
    pub fn is_complete(&self) -> bool {
        self.completed_stages == self.stages.len()
    }

    /// Whether every stage is saturated.
    pub fn all_stages_saturated(&self) -> bool {
        self.saturated.iter().all(|&s| s)
    }

    /// Whether the stage's parents have all completed.
    pub fn is_runnable(&self, stage: StageId) -> bool {
        self.frontier.contains(&stage)
    }

    /// Saturation flag of a stage.
    pub fn is_saturated(&self, stage: StageId) -> bool {
        self.saturated[stage]
    }

    /// Sets or clears a stage's saturation flag.
    pub fn set_saturated(&mut self, stage: StageId, saturated: bool) {
        self.saturated[stage] = saturated;
    }

    /// Workers currently local to this job (idle at the job or at one of its
    /// stages).
    pub fn local_workers(&self) -> &BTreeSet<WorkerId> {
        &self.local_workers
    }

    /// Registers a worker as local to this job.
    pub fn add_local_worker(&mut self, worker: WorkerId) {
        self.local_workers.insert(worker);
    }

    /// Removes a worker from this job.
    pub fn remove_local_worker(&mut self, worker: WorkerId) {
        self.local_workers.remove(&worker);
    }

    /// Source stages of the DAG. Seeds both frontiers; called once, at
    /// arrival.
    pub fn initialize_frontier(&mut self) -> Vec<StageId> {
        let sources: Vec<StageId> = (0..self.stages.len())
            .filter(|&s| self.parents[s].is_empty())
            .collect();
        for &s in &sources {
            self.frontier.insert(s);
            assert!(!self.schedulable_latch[s], "frontier initialized twice");
            self.schedulable_latch[s] = true;
        }
        sources
    }

    /// Successors of `stage` whose parents all satisfy `criterion`.
    ///
    /// Under `Saturated`, each stage is returned at most once across the
    /// job's lifetime regardless of how often saturation is re-processed.
    pub fn find_new_frontier_stages(
        &mut self,
        stage: StageId,
        criterion: FrontierCriterion,
    ) -> Vec<StageId> {
        let mut unlocked = Vec::new();
        for i in 0..self.children[stage].len() {
            let child = self.children[stage][i];
            let ready = self.parents[child].iter().all(|&p| match criterion {
                FrontierCriterion::Saturated => self.saturated[p],
                FrontierCriterion::Completed => self.stages[p].is_complete(),
            });
            if !ready {
                continue;
            }
            match criterion {
                FrontierCriterion::Saturated => {
                    if !self.schedulable_latch[child] {
                        self.schedulable_latch[child] = true;
                        unlocked.push(child);
                    }
                }
                FrontierCriterion::Completed => {
                    if self.frontier.insert(child) {
                        unlocked.push(child);
                    }
                }
            }
        }
        unlocked
    }

    /// Records that `stage` finished its last task.
    ///
    /// Advances the runnable frontier and returns the stages that just
    /// became runnable.
    pub fn record_stage_completion(&mut self, stage: StageId) -> Vec<StageId> {
        assert!(self.stages[stage].is_complete());
        self.completed_stages += 1;
        self.frontier.remove(&stage);
        self.find_new_frontier_stages(stage, FrontierCriterion::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_spec(tasks: usize, deps: Vec<StageId>) -> StageSpec {
        StageSpec::new(tasks, vec![100.0]).with_dependencies(deps)
    }

    /// A → B, A → C, B → D, C → D.
    fn diamond() -> Job {
        let spec = JobSpec::new(vec![
            stage_spec(1, vec![]),
            stage_spec(1, vec![0]),
            stage_spec(1, vec![0]),
            stage_spec(1, vec![1, 2]),
        ]);
        Job::from_spec(0, 0.0, &spec)
    }

    #[test]
    fn test_initialize_frontier_returns_sources() {
        let mut job = diamond();
        let sources = job.initialize_frontier();
        assert_eq!(sources, vec![0]);
        assert!(job.is_runnable(0));
        assert!(!job.is_runnable(1));
    }

    #[test]
    fn test_saturation_unlocks_children_once() {
        let mut job = diamond();
        job.initialize_frontier();

        job.set_saturated(0, true);
        let mut unlocked = job.find_new_frontier_stages(0, FrontierCriterion::Saturated);
        unlocked.sort_unstable();
        assert_eq!(unlocked, vec![1, 2]);

        // A second pass over the same saturation yields nothing new.
        let again = job.find_new_frontier_stages(0, FrontierCriterion::Saturated);
        assert!(again.is_empty());
    }

    #[test]
    fn test_diamond_join_waits_for_both_parents() {
        let mut job = diamond();
        job.initialize_frontier();
        job.set_saturated(0, true);
        job.find_new_frontier_stages(0, FrontierCriterion::Saturated);

        job.set_saturated(1, true);
        assert!(job
            .find_new_frontier_stages(1, FrontierCriterion::Saturated)
            .is_empty());

        job.set_saturated(2, true);
        let unlocked = job.find_new_frontier_stages(2, FrontierCriterion::Saturated);
        assert_eq!(unlocked, vec![3]);
    }

    #[test]
    fn test_join_unlock_is_idempotent_after_rollback() {
        let mut job = diamond();
        job.initialize_frontier();
        job.set_saturated(0, true);
        job.find_new_frontier_stages(0, FrontierCriterion::Saturated);
        job.set_saturated(1, true);
        job.set_saturated(2, true);
        let unlocked = job.find_new_frontier_stages(2, FrontierCriterion::Saturated);
        assert_eq!(unlocked, vec![3]);

        // Saturation of B is rolled back and re-established; D must not be
        // unlocked a second time.
        job.set_saturated(1, false);
        job.set_saturated(1, true);
        assert!(job
            .find_new_frontier_stages(1, FrontierCriterion::Saturated)
            .is_empty());
    }

    #[test]
    fn test_completion_advances_runnable_frontier() {
        let mut job = diamond();
        job.initialize_frontier();

        let t0 = job.stages[0].assign(0, 0.0).unwrap();
        job.stages[0].complete_task(t0, 10.0);
        let mut unlocked = job.record_stage_completion(0);
        unlocked.sort_unstable();
        assert_eq!(unlocked, vec![1, 2]);
        assert!(!job.is_runnable(0));
        assert!(job.is_runnable(1));
        assert!(job.is_runnable(2));
        assert!(!job.is_runnable(3));
        assert!(!job.is_complete());
    }

    #[test]
    fn test_job_completion() {
        let spec = JobSpec::new(vec![stage_spec(2, vec![])]);
        let mut job = Job::from_spec(3, 5.0, &spec);
        job.initialize_frontier();

        for task in 0..2 {
            let t = job.stages[0].assign(task, 0.0).unwrap();
            job.stages[0].complete_task(t, 20.0);
        }
        let unlocked = job.record_stage_completion(0);
        assert!(unlocked.is_empty());
        assert!(job.is_complete());
    }

    #[test]
    fn test_local_worker_roster() {
        let mut job = diamond();
        job.add_local_worker(4);
        job.add_local_worker(2);
        assert_eq!(job.local_workers().len(), 2);
        job.remove_local_worker(4);
        assert!(!job.local_workers().contains(&4));
    }
}
